//! UDP broadcast discovery of the coordinator.

pub mod service;

pub use service::{find_coordinator, respond_to_probes};
