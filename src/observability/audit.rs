/// Mitigation audit trail for jitterguard
/// Structured record of every mitigation decision for incident review
///
/// - Correlation by run id (one per monitor process) and container label
/// - Event types: monitor start, mitigation start/stop, outlier discard, sample failure
/// - JSON lines appended to an audit file, mirrored to the log facade by severity
use crate::config::types::{MitigationDirective, MonitorError, Result};
use chrono::{DateTime, Utc};
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use uuid::Uuid;

/// Audit event severity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditSeverity {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuditEventType {
    MonitorStarted,
    MitigationStarted,
    MitigationStopped,
    OutlierDiscarded,
    SampleFailed,
}

impl AuditEventType {
    /// Get the default severity for this event type
    pub fn default_severity(&self) -> AuditSeverity {
        match self {
            AuditEventType::MonitorStarted => AuditSeverity::Low,
            AuditEventType::MitigationStarted => AuditSeverity::High,
            AuditEventType::MitigationStopped => AuditSeverity::Medium,
            AuditEventType::OutlierDiscarded => AuditSeverity::Low,
            AuditEventType::SampleFailed => AuditSeverity::Low,
        }
    }
}

/// Identity stamped onto every event of one monitor process
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunContext {
    pub run_id: String,
    pub container_id: Option<String>,
}

impl RunContext {
    pub fn new(container_id: Option<String>) -> Self {
        Self {
            run_id: Uuid::new_v4().to_string(),
            container_id,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_type: AuditEventType,
    pub severity: AuditSeverity,
    pub timestamp: DateTime<Utc>,
    pub details: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_pid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_count: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
}

impl AuditEvent {
    pub fn new(event_type: AuditEventType, details: String) -> Self {
        Self {
            event_type,
            severity: event_type.default_severity(),
            timestamp: Utc::now(),
            details,
            target_pid: None,
            address: None,
            access_count: None,
            error_kind: None,
        }
    }

    pub fn with_target_pid(mut self, pid: u32) -> Self {
        self.target_pid = Some(pid);
        self
    }

    pub fn with_sample(mut self, address: String, access_count: i64) -> Self {
        self.address = Some(address);
        self.access_count = Some(access_count);
        self
    }

    pub fn with_error_kind(mut self, kind: &str) -> Self {
        self.error_kind = Some(kind.to_string());
        self
    }
}

/// One line of the audit file
#[derive(Serialize)]
struct AuditRecord<'a> {
    run_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    container_id: Option<&'a str>,
    process_id: u32,
    #[serde(flatten)]
    event: &'a AuditEvent,
}

/// Audit logger writing JSON lines, or log-only when no file is available
pub struct AuditLogger {
    audit_file: Option<Mutex<File>>,
    audit_path: Option<PathBuf>,
    context: RunContext,
}

impl AuditLogger {
    /// Open `audit_path` for appending
    pub fn new(audit_path: &Path, context: RunContext) -> Result<Self> {
        if let Some(parent) = audit_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                MonitorError::Config(format!("Failed to create audit log directory: {}", e))
            })?;
        }

        let audit_file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(audit_path)
            .map_err(|e| MonitorError::Config(format!("Failed to open audit log: {}", e)))?;

        Ok(Self {
            audit_file: Some(Mutex::new(audit_file)),
            audit_path: Some(audit_path.to_path_buf()),
            context,
        })
    }

    /// Logger that only mirrors events to the log facade
    pub fn log_only(context: RunContext) -> Self {
        Self {
            audit_file: None,
            audit_path: None,
            context,
        }
    }

    /// Open the requested file, then a per-user temp fallback, then degrade to log-only
    pub fn open_or_degrade(audit_path: Option<&Path>, context: RunContext) -> Self {
        let Some(requested) = audit_path else {
            return Self::log_only(context);
        };

        match Self::new(requested, context.clone()) {
            Ok(logger) => {
                info!("Audit log at {}", requested.display());
                return logger;
            }
            Err(e) => warn!("Audit log unavailable at {}: {}", requested.display(), e),
        }

        // SAFETY: geteuid has no preconditions and cannot fail
        let euid = unsafe { libc::geteuid() };
        let fallback = std::env::temp_dir().join(format!("jitterguard-audit-{}.log", euid));
        match Self::new(&fallback, context.clone()) {
            Ok(logger) => {
                warn!("Audit log using fallback path: {}", fallback.display());
                logger
            }
            Err(e) => {
                warn!(
                    "Audit log unavailable (all paths failed). Continuing with log-only audit events: {}",
                    e
                );
                Self::log_only(context)
            }
        }
    }

    pub fn context(&self) -> &RunContext {
        &self.context
    }

    pub fn audit_path(&self) -> Option<&Path> {
        self.audit_path.as_deref()
    }

    pub fn record(&self, event: AuditEvent) {
        let label = self.context.container_id.as_deref().unwrap_or("-");
        match event.severity {
            AuditSeverity::High => {
                warn!("AUDIT [{}] {:?}: {}", label, event.event_type, event.details)
            }
            AuditSeverity::Medium => {
                info!("AUDIT [{}] {:?}: {}", label, event.event_type, event.details)
            }
            AuditSeverity::Low => {
                log::debug!("AUDIT [{}] {:?}: {}", label, event.event_type, event.details)
            }
        }

        let Some(file) = &self.audit_file else {
            return;
        };

        let record = AuditRecord {
            run_id: &self.context.run_id,
            container_id: self.context.container_id.as_deref(),
            process_id: std::process::id(),
            event: &event,
        };
        let line = match serde_json::to_string(&record) {
            Ok(line) => line,
            Err(e) => {
                error!("Failed to encode audit event: {}", e);
                return;
            }
        };

        match file.lock() {
            Ok(mut file) => {
                if let Err(e) = writeln!(file, "{}", line) {
                    error!("Failed to write to audit log: {}", e);
                }
                if let Err(e) = file.flush() {
                    error!("Failed to flush audit log: {}", e);
                }
            }
            Err(_) => error!("Failed to acquire lock on audit file"),
        }
    }

    pub fn monitor_started(&self, warmup_secs: u64) {
        self.record(AuditEvent::new(
            AuditEventType::MonitorStarted,
            format!(
                "Monitor started: run_id={}, warmup={}s",
                self.context.run_id, warmup_secs
            ),
        ));
    }

    pub fn mitigation_started(&self, pid: u32, directive: &MitigationDirective) {
        let mut event = AuditEvent::new(
            AuditEventType::MitigationStarted,
            format!("Mitigation started for pid {}: {}", pid, directive),
        )
        .with_target_pid(pid);
        if let MitigationDirective::Start {
            address,
            access_count,
        } = directive
        {
            event = event.with_sample(address.clone(), *access_count);
        }
        self.record(event);
    }

    pub fn mitigation_stopped(&self, pid: u32) {
        self.record(
            AuditEvent::new(
                AuditEventType::MitigationStopped,
                format!("Mitigation stopped for pid {}", pid),
            )
            .with_target_pid(pid),
        );
    }

    pub fn outlier_discarded(&self, pid: u32, address: String, access_count: i64) {
        self.record(
            AuditEvent::new(
                AuditEventType::OutlierDiscarded,
                format!("Discarded outlier count {} at {}", access_count, address),
            )
            .with_target_pid(pid)
            .with_sample(address, access_count),
        );
    }

    pub fn sample_failed(&self, pid: u32, error: &MonitorError) {
        self.record(
            AuditEvent::new(
                AuditEventType::SampleFailed,
                format!("Sampling pid {} failed: {}", pid, error),
            )
            .with_target_pid(pid)
            .with_error_kind(error.kind()),
        );
    }
}
