//! jitterguard: host-side detector and mitigator for cryptomining-like memory access
//!
//! # Architecture
//!
//! ## Kernel Profiler ([`kernel`])
//! - [`kernel::procfs`]: Process listing from `/proc`
//! - [`kernel::host`]: Host capability seam (process listing, privileged commands)
//! - [`kernel::profiler`]: Type-state enforced load/target/trace/unload session
//! - [`kernel::trace_log`]: Binary trace log decoding
//!
//! ## Detection ([`detect`])
//! - [`detect::selector`]: Process-of-interest selection
//! - [`detect::window`]: Rolling access window, interval policy, suspicion test
//! - [`detect::engine`]: Per-cycle update with noise compensation and outlier rejection
//!
//! ## Control Loop ([`core`])
//! - [`core::monitor`]: Sample, decide, mitigate
//! - [`core::pipe`]: Inbound/outbound JSON pipes to the enforcement side
//!
//! ## Observability ([`observability`])
//! - [`observability::audit`]: Mitigation audit trail
//! - [`observability::metrics`]: Prometheus metrics export
//!
//! ## Configuration ([`config`])
//! - [`config::settings`]: Monitor configuration loading and validation
//! - [`config::types`]: Shared types and the error enum

pub mod config;
pub mod core;
pub mod detect;
pub mod kernel;
pub mod observability;

// CLI entrypoint wiring for the jitterguard binary.
pub mod cli;

pub use config::types::*;
