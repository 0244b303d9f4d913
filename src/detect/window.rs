//! Rolling access window and the pure functions evaluated over it
//!
//! The window has one slot per rotational phase of the control loop
//! (`cycle mod 3`). A slot's stored count is the measurement taken three
//! cycles earlier unless noise compensation overwrote it.

use crate::config::settings::TimingConfig;
use serde::Serialize;
use std::time::Duration;

pub const WINDOW_SLOTS: usize = 3;

/// Neutral count every slot starts from
pub const BASELINE_ACCESS_COUNT: i64 = 500;

/// Coefficient-of-variation and delta thresholds for "stable" activity
const STABLE_DELTA: f64 = 0.1;
const STABLE_CV: f64 = 0.2;
const LOOSE_LIMIT: f64 = 0.35;

/// Mean access count below which activity is never suspicious
const MIN_MEAN_ACCESS: f64 = 100.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Slot {
    pub last_access_count: i64,
    pub was_mitigated_last_visit: bool,
}

impl Default for Slot {
    fn default() -> Self {
        Self {
            last_access_count: BASELINE_ACCESS_COUNT,
            was_mitigated_last_visit: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AccessWindow {
    slots: [Slot; WINDOW_SLOTS],
}

impl Default for AccessWindow {
    fn default() -> Self {
        Self {
            slots: [Slot::default(); WINDOW_SLOTS],
        }
    }
}

impl AccessWindow {
    pub fn from_slots(slots: [Slot; WINDOW_SLOTS]) -> Self {
        Self { slots }
    }

    /// Window with the given counts and every slot unmitigated
    pub fn from_counts(counts: [i64; WINDOW_SLOTS]) -> Self {
        let mut window = Self::default();
        for (slot, count) in window.slots.iter_mut().zip(counts) {
            slot.last_access_count = count;
            slot.was_mitigated_last_visit = false;
        }
        window
    }

    pub fn slot(&self, index: usize) -> &Slot {
        &self.slots[index % WINDOW_SLOTS]
    }

    pub fn slot_mut(&mut self, index: usize) -> &mut Slot {
        &mut self.slots[index % WINDOW_SLOTS]
    }

    pub fn counts(&self) -> [i64; WINDOW_SLOTS] {
        [
            self.slots[0].last_access_count,
            self.slots[1].last_access_count,
            self.slots[2].last_access_count,
        ]
    }
}

/// Slot visited by `cycle_index`
pub fn slot_for(cycle_index: u64) -> usize {
    (cycle_index % WINDOW_SLOTS as u64) as usize
}

/// Slot visited one cycle before `slot`
pub fn previous_slot(slot: usize) -> usize {
    (slot + WINDOW_SLOTS - 1) % WINDOW_SLOTS
}

/// Next sampling interval and the mitigation status of the previous cycle's slot.
///
/// Revisiting a slot that was mitigated snaps the interval back to baseline;
/// otherwise the interval grows by the backoff factor up to the ceiling.
pub fn interval_policy(
    window: &AccessWindow,
    cycle_index: u64,
    current: Duration,
    timing: &TimingConfig,
) -> (Duration, bool) {
    let baseline = timing.baseline_interval();
    if cycle_index == 0 {
        return (baseline, true);
    }

    let slot = slot_for(cycle_index);
    let prior_mitigated = window.slot(previous_slot(slot)).was_mitigated_last_visit;

    if window.slot(slot).was_mitigated_last_visit {
        return (baseline, prior_mitigated);
    }

    let grown = current.saturating_mul(timing.backoff_factor.min(u32::MAX as u64) as u32);
    (grown.min(timing.max_interval()), prior_mitigated)
}

/// Whether the window holds steady, high-volume access activity
pub fn is_suspicious(window: &AccessWindow, slot: usize) -> bool {
    let counts = window.counts().map(|c| c as f64);
    let n = counts.len() as f64;

    let mean = counts.iter().sum::<f64>() / n;
    // spread is the root of the summed squared deviations, not divided by n
    let spread = counts.iter().map(|c| (c - mean).powi(2)).sum::<f64>().sqrt();
    let cv = spread / mean;

    let current = window.slot(slot).last_access_count as f64;
    let prev = window.slot(previous_slot(slot)).last_access_count as f64;
    let relative_delta = (current - prev).abs() / prev;

    // NaN compares false, so zero denominators fall through to "not stable"
    let stable = relative_delta <= STABLE_DELTA
        || cv <= STABLE_CV
        || (cv <= LOOSE_LIMIT && relative_delta <= LOOSE_LIMIT);

    stable && mean >= MIN_MEAN_ACCESS
}
