use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::settings::MonitorConfig;
use crate::core::monitor::Monitor;
use crate::core::pipe::{open_inherited, run_inbound, spawn_outbound_writer, LoggingAddressSink};
use crate::kernel::host::LinuxHost;
use crate::kernel::trace_log;
use crate::observability::audit::{AuditLogger, RunContext};
use crate::observability::metrics::get_metrics;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sample the sandbox workload and emit mitigation directives
    Monitor {
        /// JSON configuration file
        #[arg(long)]
        config: Option<PathBuf>,
        /// Container identifier used to label logs and audit events
        #[arg(long)]
        container_id: Option<String>,
        /// Inherited descriptor the directives are written to
        #[arg(long)]
        addr_fd: Option<i32>,
        /// Seconds to wait before the first sample
        #[arg(long)]
        warmup_secs: Option<u64>,
        /// Append-only JSON-lines audit file
        #[arg(long)]
        audit_log: Option<PathBuf>,
        /// Log a metrics snapshot every N cycles
        #[arg(long)]
        metrics_every: Option<u64>,
        /// Stop after this many cycles instead of running until killed
        #[arg(long, hide = true)]
        cycles: Option<u64>,
    },
    /// Read observed addresses from the inherited input descriptor until it closes
    Listen {
        /// JSON configuration file
        #[arg(long)]
        config: Option<PathBuf>,
        /// Inherited descriptor observed addresses are read from
        #[arg(long)]
        input_fd: Option<i32>,
        #[arg(long)]
        container_id: Option<String>,
    },
    /// Decode a profiler trace log and print its records as JSON
    Decode {
        /// Trace log written by the profiler module
        path: PathBuf,
    },
    /// Report whether the host can run the monitor
    Check {
        /// JSON configuration file
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

extern "C" fn signal_handler(sig: i32) {
    // ASYNC-SIGNAL SAFETY: only libc::write and libc::_exit here.
    // No eprintln!, no std::process::exit (atexit handlers).
    let msg = b"jitterguard: signal received, exiting\n";
    unsafe {
        libc::write(2, msg.as_ptr() as *const libc::c_void, msg.len());
        libc::_exit(128 + sig);
    }
}

fn setup_signal_handlers() {
    unsafe {
        libc::signal(libc::SIGTERM, signal_handler as usize);
        libc::signal(libc::SIGINT, signal_handler as usize);
    }
}

fn load_config(path: Option<&Path>) -> Result<MonitorConfig> {
    match path {
        Some(path) => MonitorConfig::load_from_file(path)
            .with_context(|| format!("loading {}", path.display())),
        None => Ok(MonitorConfig::default()),
    }
}

pub fn run() -> Result<()> {
    setup_signal_handlers();

    // RUST_LOG controls verbosity
    env_logger::init();

    if !cfg!(target_os = "linux") {
        eprintln!("Error: jitterguard requires Linux (/proc, debugfs and kernel modules)");
        std::process::exit(1);
    }

    let cli = Cli::parse();

    match cli.command {
        Commands::Monitor {
            config,
            container_id,
            addr_fd,
            warmup_secs,
            audit_log,
            metrics_every,
            cycles,
        } => {
            let mut config = load_config(config.as_deref())?;
            if let Some(id) = container_id {
                config.container_id = Some(id);
            }
            if let Some(fd) = addr_fd {
                config.ipc.output_fd = fd;
            }
            if let Some(secs) = warmup_secs {
                config.timing.warmup_secs = secs;
            }
            if let Some(path) = audit_log {
                config.audit_log = Some(path);
            }
            if let Some(every) = metrics_every {
                config.metrics_every = every;
            }
            config.validate()?;
            run_monitor(config, cycles)
        }
        Commands::Listen {
            config,
            input_fd,
            container_id,
        } => {
            let mut config = load_config(config.as_deref())?;
            if let Some(fd) = input_fd {
                config.ipc.input_fd = fd;
            }
            if let Some(id) = container_id {
                config.container_id = Some(id);
            }
            run_listener(&config)
        }
        Commands::Decode { path } => {
            let report = DecodeReport::from_log(&path);
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
        Commands::Check { config } => {
            let config = load_config(config.as_deref())?;
            let checks = prerequisite_checks(&config);
            let mut failed = 0;
            for check in &checks {
                if check.ok {
                    println!("✅ {} - {}", check.name, check.detail);
                } else {
                    failed += 1;
                    println!("❌ {} - {}", check.name, check.detail);
                }
            }
            if failed > 0 {
                anyhow::bail!("{} of {} prerequisites missing", failed, checks.len());
            }
            println!("jitterguard is ready to monitor");
            Ok(())
        }
    }
}

fn run_monitor(config: MonitorConfig, cycles: Option<u64>) -> Result<()> {
    if unsafe { libc::getuid() } != 0 {
        log::warn!("Not running as root: module insertion and debugfs writes will likely fail");
    }

    let output = open_inherited(config.ipc.output_fd)
        .with_context(|| format!("output descriptor {}", config.ipc.output_fd))?;

    let metrics = get_metrics();
    let (directives, writer) = spawn_outbound_writer(output, Arc::clone(&metrics))?;

    let audit = AuditLogger::open_or_degrade(
        config.audit_log.as_deref(),
        RunContext::new(config.container_id.clone()),
    );
    log::info!(
        "{} run id {}",
        config.log_label(),
        audit.context().run_id
    );

    let mut monitor = Monitor::new(config, LinuxHost::new(), directives)
        .with_audit(audit)
        .with_metrics(metrics);
    monitor.run(cycles);

    let label = monitor.config().log_label();
    let summary = monitor.metrics().summary();
    drop(monitor);

    let sent = writer
        .join()
        .map_err(|_| anyhow::anyhow!("outbound writer panicked"))?;
    log::info!("{} monitor finished: {} ({} directives sent)", label, summary, sent);
    Ok(())
}

fn run_listener(config: &MonitorConfig) -> Result<()> {
    let input = open_inherited(config.ipc.input_fd)
        .with_context(|| format!("input descriptor {}", config.ipc.input_fd))?;

    let label = config.log_label();
    log::info!("{} start listening on fd {}", label, config.ipc.input_fd);

    let mut sink = LoggingAddressSink::new(label.clone());
    let received = run_inbound(input, &mut sink, &get_metrics())?;

    log::info!(
        "{} inbound stream closed after {} addresses",
        label,
        received
    );
    Ok(())
}

#[derive(Debug, Serialize)]
struct DecodedRecord {
    address: String,
    access_count: i64,
}

/// Offline view of one trace log
#[derive(Debug, Serialize)]
struct DecodeReport {
    path: PathBuf,
    records: usize,
    distinct_addresses: usize,
    /// What the monitor would sample from this log
    selected: Option<DecodedRecord>,
    ordered: Vec<DecodedRecord>,
}

impl DecodeReport {
    fn from_log(path: &Path) -> Self {
        let decoded = trace_log::decode(path);
        let to_record = |sample: crate::config::types::Sample| DecodedRecord {
            address: sample.address_hex(),
            access_count: sample.access_count,
        };

        Self {
            path: path.to_path_buf(),
            records: decoded.len(),
            distinct_addresses: decoded.access_by_address.len(),
            selected: decoded.first().map(to_record),
            ordered: decoded.samples().map(to_record).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct PrerequisiteCheck {
    name: &'static str,
    ok: bool,
    detail: String,
}

impl PrerequisiteCheck {
    fn path(name: &'static str, path: &Path, ok: bool) -> Self {
        let state = if ok { "present" } else { "missing" };
        Self {
            name,
            ok,
            detail: format!("{} {}", path.display(), state),
        }
    }
}

/// Host prerequisites for the monitor role
fn prerequisite_checks(config: &MonitorConfig) -> Vec<PrerequisiteCheck> {
    prerequisite_checks_under(config, Path::new("/"))
}

fn prerequisite_checks_under(config: &MonitorConfig, root: &Path) -> Vec<PrerequisiteCheck> {
    let proc_self = root.join("proc/self/stat");
    let debugfs = root.join("sys/kernel/debug");
    let profiler = &config.profiler;

    let mut checks = vec![
        PrerequisiteCheck::path("procfs", &proc_self, proc_self.is_file()),
        PrerequisiteCheck::path("debugfs", &debugfs, debugfs.is_dir()),
        PrerequisiteCheck::path("module", &profiler.module_path, profiler.module_path.is_file()),
    ];

    let log_dir = profiler.log_path.parent().unwrap_or_else(|| Path::new("."));
    checks.push(PrerequisiteCheck::path("log directory", log_dir, log_dir.is_dir()));

    let is_root = unsafe { libc::geteuid() } == 0;
    checks.push(PrerequisiteCheck {
        name: "privileges",
        ok: is_root,
        detail: if is_root {
            "running as root".to_string()
        } else {
            "insmod/rmmod and debugfs writes need root".to_string()
        },
    });

    checks
}
