//! Host-facing plumbing for the kernel profiler.
//!
//! Dependency direction: procfs -> host -> trace_log -> profiler

pub mod host;
pub mod procfs;
pub mod profiler;
pub mod trace_log;
