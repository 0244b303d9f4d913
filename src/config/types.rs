/// Core types shared across the jitterguard monitor
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Placeholder address the sandbox side interprets as "stop delaying".
pub const STOP_ADDRESS: &str = "0x00000";

/// One decoded profiler record
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sample {
    /// Virtual address observed by the profiler
    pub address: u64,
    /// Number of accesses recorded for the address during the window
    pub access_count: i64,
}

impl Sample {
    pub fn new(address: u64, access_count: i64) -> Self {
        Self {
            address,
            access_count,
        }
    }

    /// Address rendered the way the enforcement side expects (`0xdead`)
    pub fn address_hex(&self) -> String {
        format!("{:#x}", self.address)
    }
}

/// Directive sent to the sandbox enforcement side
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MitigationDirective {
    /// Start delaying accesses to `address`
    Start { address: String, access_count: i64 },
    /// Stop delaying
    Stop,
}

impl MitigationDirective {
    pub fn start(sample: &Sample) -> Self {
        MitigationDirective::Start {
            address: sample.address_hex(),
            access_count: sample.access_count,
        }
    }

    pub fn is_start(&self) -> bool {
        matches!(self, MitigationDirective::Start { .. })
    }
}

impl fmt::Display for MitigationDirective {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MitigationDirective::Start {
                address,
                access_count,
            } => write!(f, "{} {}", address, access_count),
            MitigationDirective::Stop => write!(f, "{} 0", STOP_ADDRESS),
        }
    }
}

impl FromStr for MitigationDirective {
    type Err = MonitorError;

    fn from_str(s: &str) -> Result<Self> {
        let mut parts = s.split_whitespace();
        let (Some(address), Some(count), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(MonitorError::Ipc(format!("malformed directive: {:?}", s)));
        };
        let access_count = count
            .parse::<i64>()
            .map_err(|e| MonitorError::Ipc(format!("bad access count in {:?}: {}", s, e)))?;

        if address == STOP_ADDRESS {
            return Ok(MitigationDirective::Stop);
        }
        Ok(MitigationDirective::Start {
            address: address.to_string(),
            access_count,
        })
    }
}

/// One row of the process listing
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProcessRow {
    pub pid: u32,
    /// Owning user name (numeric uid rendered as text when unresolvable)
    pub user: String,
    /// Full command line, or the short command name for kernel threads
    pub command: String,
    pub cpu_percent: f64,
    pub mem_percent: f64,
    /// Accumulated CPU time in whole seconds
    pub cpu_time_secs: u64,
}

impl ProcessRow {
    /// Placeholder rows report no CPU, no memory and no accumulated time
    pub fn is_idle(&self) -> bool {
        self.cpu_percent == 0.0 && self.mem_percent == 0.0 && self.cpu_time_secs == 0
    }
}

/// Errors raised by the monitor and its collaborators
#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("no qualifying process to sample")]
    SelectionMiss,

    #[error("profiler module load failed: {0}")]
    ModuleLoadFailed(String),

    #[error("profiler controller unavailable: {0}")]
    ControllerUnavailable(String),

    #[error("profiler module unload failed: {0}")]
    ModuleUnloadFailed(String),

    #[error("trace log contained no samples")]
    NoSample,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Process error: {0}")]
    Process(String),

    #[error("IPC error: {0}")]
    Ipc(String),
}

impl MonitorError {
    /// Short stable label used for metrics and audit records
    pub fn kind(&self) -> &'static str {
        match self {
            MonitorError::Io(_) => "io",
            MonitorError::SelectionMiss => "selection_miss",
            MonitorError::ModuleLoadFailed(_) => "module_load_failed",
            MonitorError::ControllerUnavailable(_) => "controller_unavailable",
            MonitorError::ModuleUnloadFailed(_) => "module_unload_failed",
            MonitorError::NoSample => "no_sample",
            MonitorError::Config(_) => "config",
            MonitorError::Process(_) => "process",
            MonitorError::Ipc(_) => "ipc",
        }
    }
}

impl From<nix::errno::Errno> for MonitorError {
    fn from(err: nix::errno::Errno) -> Self {
        MonitorError::Process(err.to_string())
    }
}

/// Result type alias for monitor operations
pub type Result<T> = std::result::Result<T, MonitorError>;
