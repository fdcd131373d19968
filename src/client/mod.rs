//! # Worker Components
//!
//! A worker node discovers the coordinator, negotiates processing
//! parameters, and runs detection over dispatched frame ranges:
//!
//! ## Worker ([`worker`])
//! The full session loop:
//! - Coordinator discovery over UDP broadcast
//! - Parameter handshake and settings adoption
//! - Frame downloads for nodes without a local frame copy
//! - Block detection and result upload
//! - Retry with jittered backoff on session failure

pub mod worker;

// Re-export for convenience
pub use worker::Worker;
