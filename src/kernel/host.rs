//! Narrow host capability used by the monitor
//!
//! Everything the control loop needs from the host besides plain file I/O goes
//! through [`HostSystem`]: enumerating processes and running a privileged
//! command (module insertion/removal). Tests substitute a scripted host.

use crate::config::types::{MonitorError, ProcessRow, Result};
use crate::kernel::procfs::ProcScanner;
use std::process::Command;

pub trait HostSystem: Send {
    /// Enumerate live processes
    fn list_processes(&self) -> Result<Vec<ProcessRow>>;

    /// Run `argv` with the monitor's privileges and fail on non-zero exit
    fn run_privileged(&mut self, argv: &[String]) -> Result<()>;
}

/// Host backed by `/proc` and direct command execution
#[derive(Debug, Default)]
pub struct LinuxHost {
    scanner: ProcScanner,
}

impl LinuxHost {
    pub fn new() -> Self {
        Self {
            scanner: ProcScanner::new(),
        }
    }

    pub fn with_scanner(scanner: ProcScanner) -> Self {
        Self { scanner }
    }
}

impl HostSystem for LinuxHost {
    fn list_processes(&self) -> Result<Vec<ProcessRow>> {
        self.scanner.scan()
    }

    fn run_privileged(&mut self, argv: &[String]) -> Result<()> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| MonitorError::Config("empty argv for privileged command".to_string()))?;

        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|e| MonitorError::Process(format!("failed to spawn {}: {}", program, e)))?;

        if output.status.success() {
            log::debug!("{} succeeded", argv.join(" "));
            return Ok(());
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(MonitorError::Process(format!(
            "{} exited with {}: {}",
            argv.join(" "),
            output.status,
            stderr.trim()
        )))
    }
}

/// `insmod <module_path>`
pub fn insmod_argv(module_path: &std::path::Path) -> Vec<String> {
    vec!["insmod".to_string(), module_path.display().to_string()]
}

/// `rmmod <module_name>`
pub fn rmmod_argv(module_name: &str) -> Vec<String> {
    vec!["rmmod".to_string(), module_name.to_string()]
}
