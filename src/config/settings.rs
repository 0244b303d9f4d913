use crate::config::types::{MonitorError, Result};
/// Monitor configuration loaded from a JSON file, overridable from the CLI
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Kernel profiler locations
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ProfilerConfig {
    /// debugfs directory the module exposes while loaded
    pub control_dir: PathBuf,
    /// Binary trace log the module writes when tracing is switched off
    pub log_path: PathBuf,
    /// Kernel object inserted with insmod
    pub module_path: PathBuf,
    /// Name passed to rmmod
    pub module_name: String,
    /// How long tracing stays enabled per cycle
    pub sampling_window_ms: u64,
}

impl Default for ProfilerConfig {
    fn default() -> Self {
        Self {
            control_dir: PathBuf::from("/sys/kernel/debug/mapia"),
            log_path: PathBuf::from("/monitor/log/targetAddrs.list"),
            module_path: PathBuf::from("/monitor/kernel/daptrace.ko"),
            module_name: "daptrace".to_string(),
            sampling_window_ms: 100,
        }
    }
}

impl ProfilerConfig {
    pub fn pids_file(&self) -> PathBuf {
        self.control_dir.join("pids")
    }

    pub fn tracing_file(&self) -> PathBuf {
        self.control_dir.join("tracing_on")
    }

    /// Where the previous cycle's log is moved before a new window
    pub fn backup_log_path(&self) -> PathBuf {
        let mut name = self.log_path.clone().into_os_string();
        name.push(".old");
        PathBuf::from(name)
    }

    pub fn sampling_window(&self) -> Duration {
        Duration::from_millis(self.sampling_window_ms)
    }
}

/// Which processes count as the sandboxed workload
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SelectorConfig {
    /// Unprivileged identity the sandbox runs its workload as
    pub user: String,
    /// Substring that marks the sandbox's executable image in the command line
    pub command_marker: String,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            user: "nobody".to_string(),
            command_marker: "exe".to_string(),
        }
    }
}

/// Loop cadence
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TimingConfig {
    /// Delay before the first cycle so the workload reaches steady state
    pub warmup_secs: u64,
    pub baseline_interval_ms: u64,
    pub max_interval_ms: u64,
    pub backoff_factor: u64,
    /// How long a start directive stays active before the stop directive
    pub mitigation_window_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            warmup_secs: 40,
            baseline_interval_ms: 500,
            max_interval_ms: 30_000,
            backoff_factor: 10,
            mitigation_window_ms: 8050,
        }
    }
}

impl TimingConfig {
    pub fn warmup(&self) -> Duration {
        Duration::from_secs(self.warmup_secs)
    }

    pub fn baseline_interval(&self) -> Duration {
        Duration::from_millis(self.baseline_interval_ms)
    }

    pub fn max_interval(&self) -> Duration {
        Duration::from_millis(self.max_interval_ms)
    }

    pub fn mitigation_window(&self) -> Duration {
        Duration::from_millis(self.mitigation_window_ms)
    }
}

/// Inherited pipe descriptors
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IpcConfig {
    pub input_fd: i32,
    pub output_fd: i32,
}

impl Default for IpcConfig {
    fn default() -> Self {
        Self {
            input_fd: 13,
            output_fd: 11,
        }
    }
}

/// Full monitor configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MonitorConfig {
    pub profiler: ProfilerConfig,
    pub selector: SelectorConfig,
    pub timing: TimingConfig,
    pub ipc: IpcConfig,
    /// Append-only JSON-lines audit file; log-only when unset or unopenable
    pub audit_log: Option<PathBuf>,
    /// Container identifier used to label log lines and audit events
    pub container_id: Option<String>,
    /// Emit a metrics snapshot every N completed cycles (0 disables)
    pub metrics_every: u64,
}

impl MonitorConfig {
    /// Load configuration from a JSON file; missing fields take their defaults
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .map_err(|e| MonitorError::Config(format!("Failed to read config file: {}", e)))?;

        let config: MonitorConfig = serde_json::from_str(&content)
            .map_err(|e| MonitorError::Config(format!("Failed to parse config JSON: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    /// Reject settings the control loop cannot run with
    pub fn validate(&self) -> Result<()> {
        let timing = &self.timing;
        if timing.baseline_interval_ms == 0 {
            return Err(MonitorError::Config(
                "baseline_interval_ms must be greater than zero".to_string(),
            ));
        }
        if timing.max_interval_ms < timing.baseline_interval_ms {
            return Err(MonitorError::Config(format!(
                "max_interval_ms ({}) is below baseline_interval_ms ({})",
                timing.max_interval_ms, timing.baseline_interval_ms
            )));
        }
        if timing.backoff_factor == 0 {
            return Err(MonitorError::Config(
                "backoff_factor must be at least 1".to_string(),
            ));
        }
        if self.ipc.input_fd == self.ipc.output_fd {
            return Err(MonitorError::Config(format!(
                "input and output descriptors must differ (both {})",
                self.ipc.input_fd
            )));
        }
        if self.profiler.module_name.trim().is_empty() {
            return Err(MonitorError::Config("module_name is empty".to_string()));
        }
        Ok(())
    }

    /// Prefix for log lines that identifies the monitored container
    pub fn log_label(&self) -> String {
        match &self.container_id {
            Some(id) => format!("[{}]", id),
            None => "[-]".to_string(),
        }
    }
}
