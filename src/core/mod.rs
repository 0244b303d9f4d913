//! Monitor core.
//!
//! The control loop that samples, decides and mitigates, and the two
//! one-directional pipes that connect it to the sandbox enforcement side.

pub mod monitor;
pub mod pipe;
