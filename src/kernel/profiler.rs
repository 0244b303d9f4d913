use crate::config::settings::ProfilerConfig;
use crate::config::types::{MonitorError, Result, Sample};
/// Kernel profiler orchestration
///
/// One sampling window runs a fixed sequence against the profiler module:
/// 1. rotate the previous trace log to `<log>.old`
/// 2. insert the module if its debugfs directory is absent
/// 3. verify the `pids` control file
/// 4. write the target pid, switch tracing on, hold the window, switch it off
/// 5. remove the module (it is reloaded from scratch every cycle)
/// 6. decode the trace log
///
/// Steps 2-5 are encoded as type-states: the trace log can only be obtained
/// from a session whose module has been removed.
use crate::kernel::host::{insmod_argv, rmmod_argv, HostSystem};
use crate::kernel::trace_log::{self, DecodedLog};
use std::fs;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Type-state marker: module present and control files verified
pub struct ModuleLoaded;

/// Type-state marker: target pid written
pub struct TargetSelected;

/// Type-state marker: tracing window completed
pub struct TraceStopped;

/// Profiler module session with type-state tracking
pub struct ProfilerSession<'a, H: HostSystem, S> {
    config: &'a ProfilerConfig,
    host: &'a mut H,
    /// Target pid, set once a target is selected
    pub pid: Option<u32>,
    _state: PhantomData<S>,
}

/// Trace log left behind by an unloaded session
#[derive(Debug, Clone)]
pub struct TraceCapture {
    pub log_path: PathBuf,
    pub pid: u32,
}

impl TraceCapture {
    pub fn decode(&self) -> DecodedLog {
        trace_log::decode(&self.log_path)
    }
}

/// Move the previous log out of the way so this window's log starts empty
pub fn rotate_log(config: &ProfilerConfig) {
    let log_path = &config.log_path;
    match fs::metadata(log_path) {
        Ok(meta) if !meta.is_dir() => {
            let backup = config.backup_log_path();
            if let Err(e) = fs::rename(log_path, &backup) {
                log::warn!(
                    "Failed to rotate {} to {}: {}",
                    log_path.display(),
                    backup.display(),
                    e
                );
            }
        }
        Ok(_) => log::warn!("Trace log path {} is a directory", log_path.display()),
        Err(e) => log::debug!("No previous trace log to rotate: {}", e),
    }
}

/// Control-file writes mirror `echo value > file`; failures do not abort the window
fn write_control(path: &Path, value: &str) {
    if let Err(e) = fs::write(path, format!("{}\n", value)) {
        log::warn!("Failed to write '{}' to {}: {}", value, path.display(), e);
    }
}

impl<'a, H: HostSystem> ProfilerSession<'a, H, ModuleLoaded> {
    /// Ensure the module is loaded and its pid selector is usable
    pub fn open(config: &'a ProfilerConfig, host: &'a mut H) -> Result<Self> {
        let control_present = fs::metadata(&config.control_dir)
            .map(|meta| meta.is_dir())
            .unwrap_or(false);

        if !control_present {
            log::debug!(
                "Control directory {} absent, inserting {}",
                config.control_dir.display(),
                config.module_path.display()
            );
            host.run_privileged(&insmod_argv(&config.module_path))
                .map_err(|e| MonitorError::ModuleLoadFailed(e.to_string()))?;
        }

        let pids_file = config.pids_file();
        match fs::metadata(&pids_file) {
            Ok(meta) if meta.is_file() => {}
            Ok(_) => {
                return Err(MonitorError::ControllerUnavailable(format!(
                    "{} is not a regular file",
                    pids_file.display()
                )))
            }
            Err(e) => {
                return Err(MonitorError::ControllerUnavailable(format!(
                    "{}: {}",
                    pids_file.display(),
                    e
                )))
            }
        }

        Ok(ProfilerSession {
            config,
            host,
            pid: None,
            _state: PhantomData,
        })
    }

    /// Point the profiler at `pid`
    pub fn select_target(self, pid: u32) -> ProfilerSession<'a, H, TargetSelected> {
        write_control(&self.config.pids_file(), &pid.to_string());

        ProfilerSession {
            config: self.config,
            host: self.host,
            pid: Some(pid),
            _state: PhantomData,
        }
    }
}

impl<'a, H: HostSystem> ProfilerSession<'a, H, TargetSelected> {
    /// Enable tracing for `window`, then disable it
    pub fn trace(self, window: Duration) -> ProfilerSession<'a, H, TraceStopped> {
        let tracing_file = self.config.tracing_file();
        write_control(&tracing_file, "on");
        std::thread::sleep(window);
        write_control(&tracing_file, "off");

        ProfilerSession {
            config: self.config,
            host: self.host,
            pid: self.pid,
            _state: PhantomData,
        }
    }
}

impl<'a, H: HostSystem> ProfilerSession<'a, H, TraceStopped> {
    /// Remove the module so no state leaks into the next window
    pub fn unload(self) -> Result<TraceCapture> {
        self.host
            .run_privileged(&rmmod_argv(&self.config.module_name))
            .map_err(|e| MonitorError::ModuleUnloadFailed(e.to_string()))?;

        Ok(TraceCapture {
            log_path: self.config.log_path.clone(),
            pid: self.pid.unwrap_or_default(),
        })
    }
}

/// Runs complete sampling windows against the profiler module
pub struct ProfilerController<H: HostSystem> {
    config: ProfilerConfig,
    host: H,
}

impl<H: HostSystem> ProfilerController<H> {
    pub fn new(config: ProfilerConfig, host: H) -> Self {
        Self { config, host }
    }

    pub fn config(&self) -> &ProfilerConfig {
        &self.config
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    pub fn host_mut(&mut self) -> &mut H {
        &mut self.host
    }

    /// Sample `pid` for one window and return the first recorded address
    pub fn sample(&mut self, pid: u32) -> Result<Sample> {
        rotate_log(&self.config);

        let window = self.config.sampling_window();
        let capture = ProfilerSession::<H, ModuleLoaded>::open(&self.config, &mut self.host)?
            .select_target(pid)
            .trace(window)
            .unload()?;

        let decoded = capture.decode();
        log::debug!(
            "Decoded {} trace records for pid {}",
            decoded.len(),
            capture.pid
        );
        decoded.first().ok_or(MonitorError::NoSample)
    }
}
