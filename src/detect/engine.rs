//! Per-cycle decision state
//!
//! [`DecisionEngine`] owns the access window, the cycle index and the current
//! sampling interval. The control loop feeds it one raw access count per
//! successful sample and acts on the returned [`Decision`].

use crate::config::settings::TimingConfig;
use crate::detect::window::{interval_policy, is_suspicious, previous_slot, slot_for, AccessWindow};
use serde::Serialize;
use std::time::Duration;

/// Counts above this are profiler spikes and never enter the window
pub const OUTLIER_THRESHOLD: i64 = 3000;

/// Adjusted counts at or below this are treated as background noise
pub const NOISE_FLOOR: i64 = 80;

/// Share of a suppressed drop that is added back after a mitigated visit
pub const COMPENSATION_RATIO: f64 = 0.67;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleUpdate {
    /// Spike discarded, slot left as it was
    Outlier,
    /// Unstable or too quiet; no mitigation this cycle
    Noise,
    /// Adjusted count committed and the pattern warrants mitigation
    Eligible,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Decision {
    pub cycle_index: u64,
    pub slot: usize,
    pub raw_count: i64,
    pub adjusted_count: i64,
    pub prior_mitigated: bool,
    pub next_interval: Duration,
    pub update: CycleUpdate,
}

impl Decision {
    pub fn is_eligible(&self) -> bool {
        self.update == CycleUpdate::Eligible
    }
}

/// Count after compensating for a drop caused by the previous mitigation
pub fn compensate(count: i64, prior_comparable: i64, prior_mitigated: bool) -> i64 {
    if prior_mitigated && count < prior_comparable {
        let gap = prior_comparable.saturating_sub(count) as f64;
        count.saturating_add((gap * COMPENSATION_RATIO) as i64)
    } else {
        count
    }
}

#[derive(Debug, Clone)]
pub struct DecisionEngine {
    window: AccessWindow,
    cycle_index: u64,
    interval: Duration,
    timing: TimingConfig,
}

impl DecisionEngine {
    pub fn new(timing: TimingConfig) -> Self {
        Self {
            window: AccessWindow::default(),
            cycle_index: 0,
            interval: timing.baseline_interval(),
            timing,
        }
    }

    /// Resume from an existing window at `cycle_index`
    pub fn with_state(timing: TimingConfig, window: AccessWindow, cycle_index: u64) -> Self {
        Self {
            window,
            cycle_index,
            interval: timing.baseline_interval(),
            timing,
        }
    }

    pub fn window(&self) -> &AccessWindow {
        &self.window
    }

    pub fn cycle_index(&self) -> u64 {
        self.cycle_index
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn timing(&self) -> &TimingConfig {
        &self.timing
    }

    /// Fold one sampled access count into the window
    pub fn observe(&mut self, raw_count: i64) -> Decision {
        let cycle_index = self.cycle_index;
        let slot = slot_for(cycle_index);

        let (next_interval, prior_mitigated) =
            interval_policy(&self.window, cycle_index, self.interval, &self.timing);
        self.interval = next_interval;
        self.cycle_index += 1;

        let previous = self.window.slot(slot).last_access_count;
        let prior_comparable = self.window.slot(previous_slot(slot)).last_access_count;
        let adjusted_count = compensate(raw_count, prior_comparable, prior_mitigated);
        self.window.slot_mut(slot).last_access_count = adjusted_count;

        let update = if raw_count > OUTLIER_THRESHOLD {
            self.window.slot_mut(slot).last_access_count = previous;
            CycleUpdate::Outlier
        } else if adjusted_count <= NOISE_FLOOR || !is_suspicious(&self.window, slot) {
            let entry = self.window.slot_mut(slot);
            if prior_mitigated {
                entry.last_access_count = previous;
            }
            entry.was_mitigated_last_visit = false;
            CycleUpdate::Noise
        } else {
            CycleUpdate::Eligible
        };

        log::debug!(
            "cycle {} slot {}: raw={} adjusted={} window={:?} -> {:?}",
            cycle_index,
            slot,
            raw_count,
            adjusted_count,
            self.window.counts(),
            update
        );

        Decision {
            cycle_index,
            slot,
            raw_count,
            adjusted_count,
            prior_mitigated,
            next_interval,
            update,
        }
    }

    /// Record that the slot's visit ended in a completed mitigation
    pub fn mark_mitigated(&mut self, slot: usize) {
        self.window.slot_mut(slot).was_mitigated_last_visit = true;
    }

    pub fn reset_interval(&mut self) {
        self.interval = self.timing.baseline_interval();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::window::Slot;

    fn quiet_engine(counts: [i64; 3], cycle_index: u64) -> DecisionEngine {
        DecisionEngine::with_state(
            TimingConfig::default(),
            AccessWindow::from_counts(counts),
            cycle_index,
        )
    }

    #[test]
    fn test_compensation_only_after_mitigation() {
        assert_eq!(compensate(250, 500, true), 250 + 167);
        assert_eq!(compensate(250, 500, false), 250);
        assert_eq!(compensate(600, 500, true), 600);
    }

    #[test]
    fn test_compensation_saturates_on_extreme_counts() {
        assert!(compensate(i64::MIN, 500, true) < 0);
        assert_eq!(compensate(i64::MAX, 500, true), i64::MAX);
        let widest = (i64::MAX as f64 * COMPENSATION_RATIO) as i64;
        assert_eq!(compensate(i64::MIN, i64::MAX, true), i64::MIN + widest);
    }

    #[test]
    fn test_negative_count_from_corrupt_log_is_noise() {
        let mut engine = DecisionEngine::new(TimingConfig::default());
        let decision = engine.observe(i64::MIN);

        assert_eq!(decision.update, CycleUpdate::Noise);
        assert!(decision.adjusted_count < 0);
        // prior slot counted as mitigated, so the neutral value is restored
        assert_eq!(engine.window().counts(), [500, 500, 500]);
        assert_eq!(engine.cycle_index(), 1);
    }

    #[test]
    fn test_ramping_counts_are_not_eligible() {
        let mut engine = quiet_engine([100, 150, 0], 2);
        let decision = engine.observe(200);

        assert!(!decision.prior_mitigated);
        assert_eq!(decision.adjusted_count, 200);
        assert_eq!(decision.update, CycleUpdate::Noise);
    }

    #[test]
    fn test_first_cycle_blends_against_neutral_window() {
        let mut engine = DecisionEngine::new(TimingConfig::default());
        let decision = engine.observe(250);

        assert_eq!(decision.slot, 0);
        assert!(decision.prior_mitigated);
        assert_eq!(decision.adjusted_count, 417);
        assert_eq!(decision.update, CycleUpdate::Eligible);
        assert_eq!(engine.window().counts(), [417, 500, 500]);
        assert_eq!(engine.cycle_index(), 1);
    }

    #[test]
    fn test_outlier_leaves_slot_unchanged() {
        let mut engine = DecisionEngine::new(TimingConfig::default());
        let before = *engine.window().slot(0);

        let decision = engine.observe(3001);
        assert_eq!(decision.update, CycleUpdate::Outlier);
        assert_eq!(*engine.window().slot(0), before);
        assert_eq!(engine.cycle_index(), 1);
    }

    #[test]
    fn test_outlier_skips_suspicion_check() {
        let mut engine = quiet_engine([3000, 3000, 3000], 3);
        let decision = engine.observe(3001);
        assert_eq!(decision.update, CycleUpdate::Outlier);
        assert_eq!(engine.window().counts(), [3000, 3000, 3000]);
    }

    #[test]
    fn test_low_count_is_noise() {
        let mut engine = quiet_engine([200, 200, 200], 3);
        let decision = engine.observe(80);
        assert_eq!(decision.update, CycleUpdate::Noise);
        // prior slot was not mitigated, so the raw value stays
        assert_eq!(engine.window().slot(0).last_access_count, 80);
        assert!(!engine.window().slot(0).was_mitigated_last_visit);
    }

    #[test]
    fn test_noise_after_mitigation_restores_previous() {
        let mitigated = |count| Slot {
            last_access_count: count,
            was_mitigated_last_visit: true,
        };
        let window = AccessWindow::from_slots([mitigated(500), mitigated(500), mitigated(20)]);
        let mut engine = DecisionEngine::with_state(TimingConfig::default(), window, 1);
        let decision = engine.observe(10);

        // 10 + trunc(0.67 * 490) = 338, then rejected as unstable
        assert!(decision.prior_mitigated);
        assert_eq!(decision.adjusted_count, 338);
        assert_eq!(decision.update, CycleUpdate::Noise);
        assert_eq!(engine.window().slot(1).last_access_count, 500);
        assert!(!engine.window().slot(1).was_mitigated_last_visit);
    }

    #[test]
    fn test_oscillating_counts_never_eligible() {
        let mut engine = quiet_engine([0, 0, 0], 3);
        for count in [500, 10, 500] {
            let decision = engine.observe(count);
            assert_eq!(decision.update, CycleUpdate::Noise, "count {}", count);
        }
    }

    #[test]
    fn test_quiet_cycles_back_off_then_reset() {
        let mut engine = quiet_engine([0, 0, 0], 0);
        let mut intervals = Vec::new();
        for _ in 0..4 {
            intervals.push(engine.observe(0).next_interval.as_millis());
        }
        assert_eq!(intervals, vec![500, 5000, 30000, 30000]);

        // cycle 4 lands on slot 1; revisiting a mitigated slot resets
        engine.mark_mitigated(1);
        assert_eq!(engine.observe(0).next_interval, Duration::from_millis(500));
    }

    #[test]
    fn test_reset_interval() {
        let mut engine = quiet_engine([0, 0, 0], 1);
        engine.observe(0);
        assert_eq!(engine.interval(), Duration::from_millis(5000));
        engine.reset_interval();
        assert_eq!(engine.interval(), Duration::from_millis(500));
    }

    #[test]
    fn test_stable_counts_stay_eligible_after_mitigation() {
        let mut engine = DecisionEngine::new(TimingConfig::default());
        for count in [200, 205, 198] {
            let decision = engine.observe(count);
            assert!(decision.is_eligible(), "count {}", count);
            assert_eq!(decision.next_interval, Duration::from_millis(500));
            engine.mark_mitigated(decision.slot);
            engine.reset_interval();
        }
    }
}
