// Monitor metrics
//
// Counters, gauges, and histograms covering:
// - Cycle outcomes (selection misses, outliers, noise, mitigations)
// - Sampling failures by error kind
// - Outbound/inbound pipe traffic
// - Sampling latency and the current interval

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::types::MonitorError;

/// Counter metric (monotonically increasing)
#[derive(Debug)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }

    pub fn inc(&self) {
        self.value.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, delta: u64) {
        self.value.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.value.store(0, Ordering::Relaxed);
    }
}

impl Default for Counter {
    fn default() -> Self {
        Self::new()
    }
}

/// Gauge metric (last written value wins)
#[derive(Debug)]
pub struct Gauge {
    value: AtomicU64,
}

impl Gauge {
    pub fn new() -> Self {
        Self {
            value: AtomicU64::new(0),
        }
    }

    pub fn set(&self, value: u64) {
        self.value.store(value, Ordering::Relaxed);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

impl Default for Gauge {
    fn default() -> Self {
        Self::new()
    }
}

/// Histogram bucket for latency tracking
#[derive(Debug)]
pub struct HistogramBucket {
    pub le: f64, // upper bound in seconds
    pub count: AtomicU64,
}

/// Histogram metric for latency/duration tracking
#[derive(Debug)]
pub struct Histogram {
    buckets: Vec<HistogramBucket>,
    sum: AtomicU64, // microseconds
    count: AtomicU64,
}

impl Histogram {
    /// Buckets sized around the 100 ms sampling window
    pub fn new_sampling_latency() -> Self {
        let bucket_bounds = vec![0.05, 0.1, 0.15, 0.2, 0.3, 0.5, 1.0, 2.5, 5.0];

        let buckets = bucket_bounds
            .into_iter()
            .map(|le| HistogramBucket {
                le,
                count: AtomicU64::new(0),
            })
            .collect();

        Self {
            buckets,
            sum: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    pub fn observe(&self, value: Duration) {
        let seconds = value.as_secs_f64();
        let micros = value.as_micros() as u64;

        self.sum.fetch_add(micros, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);

        for bucket in &self.buckets {
            if seconds <= bucket.le {
                bucket.count.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn get_count(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }

    pub fn get_sum_micros(&self) -> u64 {
        self.sum.load(Ordering::Relaxed)
    }

    pub fn get_bucket_count(&self, le: f64) -> u64 {
        self.buckets
            .iter()
            .find(|b| (b.le - le).abs() < 0.0001)
            .map(|b| b.count.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn reset(&self) {
        self.sum.store(0, Ordering::Relaxed);
        self.count.store(0, Ordering::Relaxed);
        for bucket in &self.buckets {
            bucket.count.store(0, Ordering::Relaxed);
        }
    }
}

/// Metrics registry shared by the control loop and the pipe tasks
#[derive(Debug)]
pub struct MetricsRegistry {
    // Cycle outcomes
    pub cycles_total: Counter,
    pub selection_misses: Counter,
    pub outliers: Counter,
    pub noise_rejections: Counter,
    pub mitigations: Counter,
    pub malformed_addresses: Counter,

    // Sampling failures
    pub sample_failures_module_load: Counter,
    pub sample_failures_controller: Counter,
    pub sample_failures_module_unload: Counter,
    pub sample_failures_no_sample: Counter,
    pub sample_failures_other: Counter,

    // Pipes
    pub directives_sent: Counter,
    pub directive_write_failures: Counter,
    pub inbound_messages: Counter,
    pub inbound_malformed: Counter,

    pub current_interval_ms: Gauge,
    pub sampling_latency: Histogram,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            cycles_total: Counter::new(),
            selection_misses: Counter::new(),
            outliers: Counter::new(),
            noise_rejections: Counter::new(),
            mitigations: Counter::new(),
            malformed_addresses: Counter::new(),

            sample_failures_module_load: Counter::new(),
            sample_failures_controller: Counter::new(),
            sample_failures_module_unload: Counter::new(),
            sample_failures_no_sample: Counter::new(),
            sample_failures_other: Counter::new(),

            directives_sent: Counter::new(),
            directive_write_failures: Counter::new(),
            inbound_messages: Counter::new(),
            inbound_malformed: Counter::new(),

            current_interval_ms: Gauge::new(),
            sampling_latency: Histogram::new_sampling_latency(),
        }
    }

    /// Count a cycle that ended without a sample
    pub fn record_failure(&self, error: &MonitorError) {
        match error {
            MonitorError::SelectionMiss => self.selection_misses.inc(),
            MonitorError::ModuleLoadFailed(_) => self.sample_failures_module_load.inc(),
            MonitorError::ControllerUnavailable(_) => self.sample_failures_controller.inc(),
            MonitorError::ModuleUnloadFailed(_) => self.sample_failures_module_unload.inc(),
            MonitorError::NoSample => self.sample_failures_no_sample.inc(),
            _ => self.sample_failures_other.inc(),
        }
    }

    pub fn sample_failures_total(&self) -> u64 {
        self.sample_failures_module_load.get()
            + self.sample_failures_controller.get()
            + self.sample_failures_module_unload.get()
            + self.sample_failures_no_sample.get()
            + self.sample_failures_other.get()
    }

    pub fn set_interval(&self, interval: Duration) {
        self.current_interval_ms.set(interval.as_millis() as u64);
    }

    /// One-line snapshot for periodic log output
    pub fn summary(&self) -> String {
        format!(
            "cycles={} misses={} failures={} outliers={} noise={} mitigations={} interval_ms={}",
            self.cycles_total.get(),
            self.selection_misses.get(),
            self.sample_failures_total(),
            self.outliers.get(),
            self.noise_rejections.get(),
            self.mitigations.get(),
            self.current_interval_ms.get()
        )
    }

    /// Export metrics in Prometheus text format
    pub fn export_prometheus(&self) -> String {
        let mut output = String::new();

        output.push_str("# HELP jitterguard_cycles_total Control loop cycles with a sample\n");
        output.push_str("# TYPE jitterguard_cycles_total counter\n");
        output.push_str(&format!(
            "jitterguard_cycles_total {}\n",
            self.cycles_total.get()
        ));

        output.push_str("# HELP jitterguard_cycle_outcomes_total Cycle outcomes\n");
        output.push_str("# TYPE jitterguard_cycle_outcomes_total counter\n");
        for (outcome, counter) in [
            ("selection_miss", &self.selection_misses),
            ("outlier", &self.outliers),
            ("noise", &self.noise_rejections),
            ("mitigated", &self.mitigations),
            ("malformed_address", &self.malformed_addresses),
        ] {
            output.push_str(&format!(
                "jitterguard_cycle_outcomes_total{{outcome=\"{}\"}} {}\n",
                outcome,
                counter.get()
            ));
        }

        output.push_str("# HELP jitterguard_sample_failures_total Profiler sampling failures\n");
        output.push_str("# TYPE jitterguard_sample_failures_total counter\n");
        for (kind, counter) in [
            ("module_load_failed", &self.sample_failures_module_load),
            ("controller_unavailable", &self.sample_failures_controller),
            ("module_unload_failed", &self.sample_failures_module_unload),
            ("no_sample", &self.sample_failures_no_sample),
            ("other", &self.sample_failures_other),
        ] {
            output.push_str(&format!(
                "jitterguard_sample_failures_total{{kind=\"{}\"}} {}\n",
                kind,
                counter.get()
            ));
        }

        output.push_str("# HELP jitterguard_directives_total Directives written to the outbound pipe\n");
        output.push_str("# TYPE jitterguard_directives_total counter\n");
        output.push_str(&format!(
            "jitterguard_directives_total{{result=\"sent\"}} {}\n",
            self.directives_sent.get()
        ));
        output.push_str(&format!(
            "jitterguard_directives_total{{result=\"failed\"}} {}\n",
            self.directive_write_failures.get()
        ));

        output.push_str("# HELP jitterguard_inbound_messages_total Values read from the inbound pipe\n");
        output.push_str("# TYPE jitterguard_inbound_messages_total counter\n");
        output.push_str(&format!(
            "jitterguard_inbound_messages_total{{result=\"ok\"}} {}\n",
            self.inbound_messages.get()
        ));
        output.push_str(&format!(
            "jitterguard_inbound_messages_total{{result=\"malformed\"}} {}\n",
            self.inbound_malformed.get()
        ));

        output.push_str("# HELP jitterguard_sampling_interval_ms Current inter-sample delay\n");
        output.push_str("# TYPE jitterguard_sampling_interval_ms gauge\n");
        output.push_str(&format!(
            "jitterguard_sampling_interval_ms {}\n",
            self.current_interval_ms.get()
        ));

        output.push_str("# HELP jitterguard_sampling_latency_seconds Profiler window latency\n");
        output.push_str("# TYPE jitterguard_sampling_latency_seconds histogram\n");
        for bucket in &self.sampling_latency.buckets {
            output.push_str(&format!(
                "jitterguard_sampling_latency_seconds_bucket{{le=\"{}\"}} {}\n",
                bucket.le,
                bucket.count.load(Ordering::Relaxed)
            ));
        }
        output.push_str(&format!(
            "jitterguard_sampling_latency_seconds_sum {}\n",
            self.sampling_latency.get_sum_micros() as f64 / 1_000_000.0
        ));
        output.push_str(&format!(
            "jitterguard_sampling_latency_seconds_count {}\n",
            self.sampling_latency.get_count()
        ));

        output
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Global metrics instance
static METRICS: once_cell::sync::Lazy<Arc<MetricsRegistry>> =
    once_cell::sync::Lazy::new(|| Arc::new(MetricsRegistry::new()));

/// Get global metrics registry
pub fn get_metrics() -> Arc<MetricsRegistry> {
    Arc::clone(&METRICS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter() {
        let counter = Counter::new();
        assert_eq!(counter.get(), 0);

        counter.inc();
        counter.add(5);
        assert_eq!(counter.get(), 6);

        counter.reset();
        assert_eq!(counter.get(), 0);
    }

    #[test]
    fn test_gauge_keeps_last_value() {
        let gauge = Gauge::new();
        gauge.set(5000);
        gauge.set(500);
        assert_eq!(gauge.get(), 500);
    }

    #[test]
    fn test_histogram() {
        let histogram = Histogram::new_sampling_latency();

        histogram.observe(Duration::from_millis(40));
        histogram.observe(Duration::from_millis(120));
        histogram.observe(Duration::from_millis(450));

        assert_eq!(histogram.get_count(), 3);

        // cumulative buckets
        assert_eq!(histogram.get_bucket_count(0.05), 1);
        assert_eq!(histogram.get_bucket_count(0.15), 2);
        assert_eq!(histogram.get_bucket_count(0.5), 3);
        assert_eq!(histogram.get_sum_micros(), 610_000);

        histogram.reset();
        assert_eq!(histogram.get_count(), 0);
    }

    #[test]
    fn test_sample_failures_by_kind() {
        let metrics = MetricsRegistry::new();

        metrics.record_failure(&MonitorError::NoSample);
        metrics.record_failure(&MonitorError::NoSample);
        metrics.record_failure(&MonitorError::ModuleUnloadFailed("busy".into()));
        metrics.record_failure(&MonitorError::Process("ps".into()));

        assert_eq!(metrics.sample_failures_no_sample.get(), 2);
        assert_eq!(metrics.sample_failures_module_unload.get(), 1);
        assert_eq!(metrics.sample_failures_other.get(), 1);
        assert_eq!(metrics.sample_failures_total(), 4);
    }

    #[test]
    fn test_selection_miss_is_not_a_sample_failure() {
        let metrics = MetricsRegistry::new();

        metrics.record_failure(&MonitorError::SelectionMiss);

        assert_eq!(metrics.selection_misses.get(), 1);
        assert_eq!(metrics.sample_failures_total(), 0);
    }

    #[test]
    fn test_prometheus_export() {
        let metrics = MetricsRegistry::new();

        metrics.cycles_total.add(3);
        metrics.mitigations.inc();
        metrics.record_failure(&MonitorError::NoSample);
        metrics.set_interval(Duration::from_millis(5000));

        let output = metrics.export_prometheus();

        assert!(output.contains("jitterguard_cycles_total 3"));
        assert!(output.contains("jitterguard_cycle_outcomes_total{outcome=\"mitigated\"} 1"));
        assert!(output.contains("jitterguard_sample_failures_total{kind=\"no_sample\"} 1"));
        assert!(output.contains("jitterguard_sampling_interval_ms 5000"));
    }

    #[test]
    fn test_summary_line() {
        let metrics = MetricsRegistry::new();
        metrics.cycles_total.inc();
        metrics.noise_rejections.inc();
        assert!(metrics.summary().starts_with("cycles=1 misses=0 failures=0 outliers=0 noise=1"));
    }

    #[test]
    fn test_global_metrics() {
        let metrics1 = get_metrics();
        let metrics2 = get_metrics();

        assert!(Arc::ptr_eq(&metrics1, &metrics2));
    }
}
