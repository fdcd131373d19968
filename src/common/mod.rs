//! # Common Components
//!
//! Shared utilities and data structures used by both worker and coordinator nodes.
//!
//! ## Modules
//!
//! - [`protocol`]: Protocol constants, handshake enums, and error types
//! - [`wire`]: TCP framing primitives for node-to-node exchanges
//! - [`config`]: Configuration parsing utilities
//! - [`logging`]: Logger initialization shared by both binaries

pub mod config;
pub mod logging;
pub mod protocol;
pub mod wire;
