//! Control loop scenarios against a scripted profiler module

mod common;

use common::{fast_config, ScriptedHost, TARGET_PID};
use crossbeam_channel::Receiver;
use jitterguard::config::types::MitigationDirective;
use jitterguard::core::monitor::{CycleOutcome, Monitor};
use jitterguard::detect::{AccessWindow, DecisionEngine};
use jitterguard::observability::audit::{AuditLogger, RunContext};
use jitterguard::observability::metrics::MetricsRegistry;
use std::sync::Arc;
use std::time::Duration;

const BASELINE: Duration = Duration::from_millis(500);

fn monitor(host: ScriptedHost, root: &std::path::Path) -> (Monitor<ScriptedHost>, Receiver<String>) {
    let config = fast_config(root);
    let (tx, rx) = crossbeam_channel::unbounded();
    let monitor = Monitor::new(config, host, tx).with_metrics(Arc::new(MetricsRegistry::new()));
    (monitor, rx)
}

fn drain(rx: &Receiver<String>) -> Vec<String> {
    rx.try_iter().collect()
}

#[test]
fn test_stable_activity_is_mitigated_each_visit() {
    let dir = tempfile::tempdir().unwrap();
    let host = ScriptedHost::new(&fast_config(dir.path())).with_counts(0xdead, &[200, 205, 198]);
    let (mut monitor, rx) = monitor(host, dir.path());

    let outcomes: Vec<CycleOutcome> = (0..3).map(|_| monitor.run_cycle()).collect();

    for outcome in &outcomes {
        assert!(outcome.is_mitigated(), "{:?}", outcome);
        assert_eq!(outcome.delay(), BASELINE);
    }
    assert_eq!(
        outcomes[2],
        CycleOutcome::Mitigated {
            pid: TARGET_PID,
            directive: MitigationDirective::Start {
                address: "0xdead".to_string(),
                access_count: 198,
            },
            delay: BASELINE,
        }
    );

    assert_eq!(
        drain(&rx),
        vec![
            "0xdead 200",
            "0x00000 0",
            "0xdead 205",
            "0x00000 0",
            "0xdead 198",
            "0x00000 0"
        ]
    );
    assert_eq!(monitor.engine().interval(), BASELINE);
    assert_eq!(monitor.engine().cycle_index(), 3);
    assert_eq!(monitor.metrics().mitigations.get(), 3);
}

#[test]
fn test_zero_address_is_never_handed_to_enforcement() {
    let dir = tempfile::tempdir().unwrap();
    let host = ScriptedHost::new(&fast_config(dir.path())).with_counts(0x0, &[200]);
    let (mut monitor, rx) = monitor(host, dir.path());

    let outcome = monitor.run_cycle();

    assert_eq!(
        outcome,
        CycleOutcome::MalformedAddress {
            pid: TARGET_PID,
            address: "0x0".to_string(),
            delay: BASELINE,
        }
    );
    assert!(drain(&rx).is_empty());
    // 200 + trunc(0.67 * 300) stays committed even though nothing was sent
    assert_eq!(monitor.engine().window().counts(), [401, 500, 500]);
    assert_eq!(monitor.engine().cycle_index(), 1);
    assert_eq!(monitor.metrics().malformed_addresses.get(), 1);
    assert_eq!(monitor.metrics().mitigations.get(), 0);
}

#[test]
fn test_oscillating_counts_never_emit() {
    let dir = tempfile::tempdir().unwrap();
    let config = fast_config(dir.path());
    let host = ScriptedHost::new(&config).with_counts(0xdead, &[500, 10, 500]);
    let (monitor, rx) = monitor(host, dir.path());
    let engine = DecisionEngine::with_state(config.timing.clone(), AccessWindow::from_counts([0, 0, 0]), 0);
    let mut monitor = monitor.with_engine(engine);

    for _ in 0..3 {
        let outcome = monitor.run_cycle();
        assert!(matches!(outcome, CycleOutcome::Noise { .. }), "{:?}", outcome);
    }

    assert!(drain(&rx).is_empty());
    assert_eq!(monitor.metrics().noise_rejections.get(), 3);
}

#[test]
fn test_outlier_is_discarded_and_audited() {
    let dir = tempfile::tempdir().unwrap();
    let audit_path = dir.path().join("audit.log");
    let host = ScriptedHost::new(&fast_config(dir.path())).with_counts(0xbeef, &[3001]);
    let (monitor, rx) = monitor(host, dir.path());
    let audit = AuditLogger::new(&audit_path, RunContext::new(Some("it-container".into()))).unwrap();
    let mut monitor = monitor.with_audit(audit);

    let outcome = monitor.run_cycle();

    assert!(matches!(outcome, CycleOutcome::Outlier { .. }));
    assert_eq!(monitor.engine().window().counts(), [500, 500, 500]);
    assert!(monitor.engine().window().slot(0).was_mitigated_last_visit);
    assert!(drain(&rx).is_empty());

    let audit = std::fs::read_to_string(&audit_path).unwrap();
    assert!(audit.contains("OutlierDiscarded"));
    assert!(audit.contains("\"access_count\":3001"));
}

#[test]
fn test_quiet_target_backs_off() {
    let dir = tempfile::tempdir().unwrap();
    let config = fast_config(dir.path());
    let host = ScriptedHost::new(&config).with_counts(0xdead, &[0, 0, 0, 0]);
    let (monitor, _rx) = monitor(host, dir.path());
    let engine = DecisionEngine::with_state(config.timing.clone(), AccessWindow::from_counts([0, 0, 0]), 0);
    let mut monitor = monitor.with_engine(engine);

    let delays: Vec<u128> = (0..4).map(|_| monitor.run_cycle().delay().as_millis()).collect();
    assert_eq!(delays, vec![500, 5000, 30000, 30000]);
    assert_eq!(monitor.metrics().current_interval_ms.get(), 30000);
}

#[test]
fn test_failed_sample_keeps_cycle_index() {
    let dir = tempfile::tempdir().unwrap();
    let mut host = ScriptedHost::new(&fast_config(dir.path())).with_counts(0xdead, &[200]);
    host.fail_rmmod = true;
    let (mut monitor, rx) = monitor(host, dir.path());

    let outcome = monitor.run_cycle();

    assert_eq!(
        outcome,
        CycleOutcome::SampleFailed {
            pid: TARGET_PID,
            kind: "module_unload_failed",
            delay: BASELINE,
        }
    );
    assert_eq!(monitor.engine().cycle_index(), 0);
    assert_eq!(monitor.metrics().sample_failures_module_unload.get(), 1);
    assert!(drain(&rx).is_empty());
}

#[test]
fn test_empty_trace_log_is_a_failed_sample() {
    let dir = tempfile::tempdir().unwrap();
    let host = ScriptedHost::new(&fast_config(dir.path()));
    let (mut monitor, _rx) = monitor(host, dir.path());

    let outcome = monitor.run_cycle();
    assert!(matches!(
        outcome,
        CycleOutcome::SampleFailed {
            kind: "no_sample",
            ..
        }
    ));
}

#[test]
fn test_no_workload_process_waits_current_interval() {
    let dir = tempfile::tempdir().unwrap();
    let mut host = ScriptedHost::new(&fast_config(dir.path()));
    host.processes.retain(|p| p.user != "nobody");
    let (mut monitor, _rx) = monitor(host, dir.path());

    assert_eq!(monitor.run_cycle(), CycleOutcome::NoTarget { delay: BASELINE });
    assert_eq!(monitor.metrics().selection_misses.get(), 1);
    assert!(monitor.profiler().host().commands.is_empty());
}

#[test]
fn test_module_is_reloaded_every_cycle() {
    let dir = tempfile::tempdir().unwrap();
    let config = fast_config(dir.path());
    let host = ScriptedHost::new(&config).with_counts(0xdead, &[200, 205]);
    let (mut monitor, _rx) = monitor(host, dir.path());

    monitor.run_cycle();
    monitor.run_cycle();

    let verbs: Vec<&str> = monitor
        .profiler()
        .host()
        .commands
        .iter()
        .map(|argv| argv[0].as_str())
        .collect();
    assert_eq!(verbs, vec!["insmod", "rmmod", "insmod", "rmmod"]);
    assert!(!config.profiler.control_dir.exists());
    assert!(config.profiler.backup_log_path().exists());
}

#[test]
fn test_run_stops_after_requested_cycles() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = fast_config(dir.path());
    config.timing.baseline_interval_ms = 1;
    config.timing.max_interval_ms = 1;
    let host = ScriptedHost::new(&config).with_counts(0xdead, &[200]);
    let (tx, rx) = crossbeam_channel::unbounded();
    let mut monitor =
        Monitor::new(config, host, tx).with_metrics(Arc::new(MetricsRegistry::new()));

    monitor.run(Some(2));

    // second cycle finds an empty log
    assert_eq!(monitor.metrics().cycles_total.get(), 1);
    assert_eq!(monitor.metrics().sample_failures_no_sample.get(), 1);
    assert_eq!(drain(&rx), vec!["0xdead 200", "0x00000 0"]);
}
