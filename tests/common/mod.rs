//! Scripted host shared by the integration tests

#![allow(dead_code)]

use jitterguard::config::settings::MonitorConfig;
use jitterguard::config::types::{MonitorError, ProcessRow, Result, Sample};
use jitterguard::kernel::host::HostSystem;
use jitterguard::kernel::trace_log::encode_records;
use std::collections::VecDeque;
use std::fs;
use std::path::Path;

pub const TARGET_PID: u32 = 4242;

/// Host whose profiler module materializes the control directory on insmod
/// and writes the next scripted trace log on rmmod
pub struct ScriptedHost {
    config: MonitorConfig,
    pub processes: Vec<ProcessRow>,
    pub logs: VecDeque<Vec<Sample>>,
    pub fail_rmmod: bool,
    pub commands: Vec<Vec<String>>,
}

impl ScriptedHost {
    pub fn new(config: &MonitorConfig) -> Self {
        Self {
            config: config.clone(),
            processes: vec![
                row(TARGET_PID, "nobody", "/proc/self/exe boot", 87.5),
                row(4243, "nobody", "/proc/self/exe gofer", 1.5),
                row(1, "root", "/sbin/init", 99.0),
            ],
            logs: VecDeque::new(),
            fail_rmmod: false,
            commands: Vec::new(),
        }
    }

    /// Queue one single-record trace log per count, all at `address`
    pub fn with_counts(mut self, address: u64, counts: &[i64]) -> Self {
        for &count in counts {
            self.logs.push_back(vec![Sample::new(address, count)]);
        }
        self
    }
}

pub fn row(pid: u32, user: &str, command: &str, cpu: f64) -> ProcessRow {
    ProcessRow {
        pid,
        user: user.to_string(),
        command: command.to_string(),
        cpu_percent: cpu,
        mem_percent: 1.0,
        cpu_time_secs: 12,
    }
}

impl HostSystem for ScriptedHost {
    fn list_processes(&self) -> Result<Vec<ProcessRow>> {
        Ok(self.processes.clone())
    }

    fn run_privileged(&mut self, argv: &[String]) -> Result<()> {
        self.commands.push(argv.to_vec());
        let profiler = &self.config.profiler;
        match argv.first().map(String::as_str) {
            Some("insmod") => {
                fs::create_dir_all(&profiler.control_dir)?;
                fs::write(profiler.pids_file(), "")?;
                fs::write(profiler.tracing_file(), "off\n")?;
                Ok(())
            }
            Some("rmmod") if self.fail_rmmod => {
                Err(MonitorError::Process("rmmod: Module daptrace is in use".into()))
            }
            Some("rmmod") => {
                let records = self.logs.pop_front().unwrap_or_default();
                fs::write(&profiler.log_path, encode_records(&records))?;
                fs::remove_dir_all(&profiler.control_dir)?;
                Ok(())
            }
            _ => Err(MonitorError::Process(format!("unexpected command {:?}", argv))),
        }
    }
}

/// Configuration rooted in `root` with every wait shortened to zero
pub fn fast_config(root: &Path) -> MonitorConfig {
    let mut config = MonitorConfig::default();
    config.profiler.control_dir = root.join("debug/mapia");
    config.profiler.log_path = root.join("log/targetAddrs.list");
    config.profiler.module_path = root.join("kernel/daptrace.ko");
    config.profiler.sampling_window_ms = 0;
    config.timing.warmup_secs = 0;
    config.timing.mitigation_window_ms = 0;
    config.container_id = Some("it-container".to_string());
    fs::create_dir_all(root.join("log")).unwrap();
    config
}
