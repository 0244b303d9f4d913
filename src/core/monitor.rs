use crate::config::settings::MonitorConfig;
use crate::config::types::{MitigationDirective, MonitorError, Sample, STOP_ADDRESS};
use crate::detect::engine::{CycleUpdate, Decision, DecisionEngine};
use crate::detect::selector::select_target;
use crate::kernel::host::HostSystem;
use crate::kernel::profiler::ProfilerController;
use crate::observability::audit::{AuditLogger, RunContext};
use crate::observability::metrics::{get_metrics, MetricsRegistry};
use crossbeam_channel::Sender;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// What one pass through the control loop did, and how long to wait before the next
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// No qualifying process; the cycle index is unchanged
    NoTarget { delay: Duration },
    /// Profiler failed; the cycle index is unchanged
    SampleFailed {
        pid: u32,
        kind: &'static str,
        delay: Duration,
    },
    Outlier {
        pid: u32,
        sample: Sample,
        delay: Duration,
    },
    Noise {
        pid: u32,
        sample: Sample,
        delay: Duration,
    },
    /// Eligible, but the address cannot be handed to the enforcement side
    MalformedAddress {
        pid: u32,
        address: String,
        delay: Duration,
    },
    Mitigated {
        pid: u32,
        directive: MitigationDirective,
        delay: Duration,
    },
}

impl CycleOutcome {
    pub fn delay(&self) -> Duration {
        match self {
            CycleOutcome::NoTarget { delay }
            | CycleOutcome::SampleFailed { delay, .. }
            | CycleOutcome::Outlier { delay, .. }
            | CycleOutcome::Noise { delay, .. }
            | CycleOutcome::MalformedAddress { delay, .. }
            | CycleOutcome::Mitigated { delay, .. } => *delay,
        }
    }

    pub fn is_mitigated(&self) -> bool {
        matches!(self, CycleOutcome::Mitigated { .. })
    }
}

/// `0x`-prefixed hex naming a real (non-zero) address
pub fn is_well_formed_address(address: &str) -> bool {
    if address == STOP_ADDRESS {
        return false;
    }
    match address.strip_prefix("0x") {
        Some(digits) if !digits.is_empty() => u64::from_str_radix(digits, 16)
            .map(|value| value != 0)
            .unwrap_or(false),
        _ => false,
    }
}

/// Detection and mitigation control loop
///
/// Owns the profiler (and through it the host), the decision state and the
/// producing end of the outbound handoff. Nothing here is shared with the
/// writer thread except the channel.
pub struct Monitor<H: HostSystem> {
    config: MonitorConfig,
    profiler: ProfilerController<H>,
    engine: DecisionEngine,
    directives: Sender<String>,
    audit: AuditLogger,
    metrics: Arc<MetricsRegistry>,
    label: String,
}

impl<H: HostSystem> Monitor<H> {
    pub fn new(config: MonitorConfig, host: H, directives: Sender<String>) -> Self {
        let label = config.log_label();
        let audit = AuditLogger::log_only(RunContext::new(config.container_id.clone()));
        let metrics = get_metrics();
        metrics.set_interval(config.timing.baseline_interval());

        Self {
            profiler: ProfilerController::new(config.profiler.clone(), host),
            engine: DecisionEngine::new(config.timing.clone()),
            config,
            directives,
            audit,
            metrics,
            label,
        }
    }

    pub fn with_audit(mut self, audit: AuditLogger) -> Self {
        self.audit = audit;
        self
    }

    /// Resume from previously accumulated decision state
    pub fn with_engine(mut self, engine: DecisionEngine) -> Self {
        self.metrics.set_interval(engine.interval());
        self.engine = engine;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsRegistry>) -> Self {
        metrics.set_interval(self.engine.interval());
        self.metrics = metrics;
        self
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    pub fn engine(&self) -> &DecisionEngine {
        &self.engine
    }

    pub fn profiler(&self) -> &ProfilerController<H> {
        &self.profiler
    }

    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    pub fn audit(&self) -> &AuditLogger {
        &self.audit
    }

    /// Warm up, then run cycles until `max_cycles` (forever when `None`)
    pub fn run(&mut self, max_cycles: Option<u64>) {
        let timing = &self.config.timing;
        log::info!(
            "{} Monitor started, warming up for {}s",
            self.label,
            timing.warmup_secs
        );
        self.audit.monitor_started(timing.warmup_secs);
        thread::sleep(timing.warmup());

        let mut completed = 0u64;
        while max_cycles.map_or(true, |max| completed < max) {
            let outcome = self.run_cycle();
            completed += 1;

            let every = self.config.metrics_every;
            if every > 0 && completed % every == 0 {
                log::info!("{} metrics: {}", self.label, self.metrics.summary());
            }

            thread::sleep(outcome.delay());
        }
    }

    /// One Idle -> Sampling -> Deciding -> (Mitigating) pass
    ///
    /// The mitigation window is waited out inside the cycle; the returned
    /// delay is the pause before the next cycle.
    pub fn run_cycle(&mut self) -> CycleOutcome {
        let current = self.engine.interval();

        let Some(pid) = select_target(self.profiler.host(), &self.config.selector) else {
            let miss = MonitorError::SelectionMiss;
            self.metrics.record_failure(&miss);
            log::debug!("{} {}", self.label, miss);
            return CycleOutcome::NoTarget { delay: current };
        };

        let started = Instant::now();
        let sampled = self.profiler.sample(pid);
        self.metrics.sampling_latency.observe(started.elapsed());

        let sample = match sampled {
            Ok(sample) => sample,
            Err(e) => {
                log::debug!("{} sampling failed: {}", self.label, e);
                self.metrics.record_failure(&e);
                self.audit.sample_failed(pid, &e);
                return CycleOutcome::SampleFailed {
                    pid,
                    kind: e.kind(),
                    delay: current,
                };
            }
        };

        let address = sample.address_hex();
        log::debug!(
            "{} pid {} addr: {}, access: {}",
            self.label,
            pid,
            address,
            sample.access_count
        );

        let decision = self.engine.observe(sample.access_count);
        self.metrics.cycles_total.inc();
        self.metrics.set_interval(decision.next_interval);

        match decision.update {
            CycleUpdate::Outlier => {
                self.metrics.outliers.inc();
                self.audit
                    .outlier_discarded(pid, address, sample.access_count);
                CycleOutcome::Outlier {
                    pid,
                    sample,
                    delay: decision.next_interval,
                }
            }
            CycleUpdate::Noise => {
                self.metrics.noise_rejections.inc();
                log::debug!(
                    "{} unstable or quiet count {}, not mitigating",
                    self.label,
                    sample.access_count
                );
                CycleOutcome::Noise {
                    pid,
                    sample,
                    delay: decision.next_interval,
                }
            }
            CycleUpdate::Eligible if !is_well_formed_address(&address) => {
                self.metrics.malformed_addresses.inc();
                log::warn!(
                    "{} not mitigating malformed address {}",
                    self.label,
                    address
                );
                CycleOutcome::MalformedAddress {
                    pid,
                    address,
                    delay: decision.next_interval,
                }
            }
            CycleUpdate::Eligible => self.mitigate(pid, &sample, &decision),
        }
    }

    fn mitigate(&mut self, pid: u32, sample: &Sample, decision: &Decision) -> CycleOutcome {
        let directive = MitigationDirective::start(sample);

        log::info!("{} start delaying {} (pid {})", self.label, directive, pid);
        self.send(&directive);
        self.audit.mitigation_started(pid, &directive);

        thread::sleep(self.config.timing.mitigation_window());

        log::info!("{} mitigation window over, resuming sampling", self.label);
        self.send(&MitigationDirective::Stop);
        self.audit.mitigation_stopped(pid);

        self.engine.mark_mitigated(decision.slot);
        self.engine.reset_interval();
        self.metrics.mitigations.inc();
        self.metrics.set_interval(self.engine.interval());

        CycleOutcome::Mitigated {
            pid,
            directive,
            delay: self.engine.interval(),
        }
    }

    fn send(&self, directive: &MitigationDirective) {
        if let Err(e) = self.directives.send(directive.to_string()) {
            log::error!(
                "{} outbound writer gone, dropping {}: {}",
                self.label,
                directive,
                e
            );
        }
    }
}
