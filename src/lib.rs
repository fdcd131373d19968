pub mod client;
pub mod common;
pub mod discovery;
pub mod engine;
pub mod server;

pub use client::Worker;
pub use engine::DeltaEngine;
pub use server::Coordinator;
