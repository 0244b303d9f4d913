//! Detection logic
//!
//! Target selection plus the rolling-window statistics that decide whether a
//! sampled access pattern warrants mitigation.

pub mod engine;
pub mod selector;
pub mod window;

pub use engine::{CycleUpdate, Decision, DecisionEngine};
pub use selector::select_target;
pub use window::{interval_policy, is_suspicious, AccessWindow, Slot};
