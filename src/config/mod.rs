//! Configuration
//!
//! Monitor settings, shared types and the error taxonomy.

pub mod settings;
pub mod types;

pub use settings::{IpcConfig, MonitorConfig, ProfilerConfig, SelectorConfig, TimingConfig};
