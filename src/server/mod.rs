pub mod coordinator;
pub mod queue;

pub use coordinator::Coordinator;
pub use queue::WorkQueue;
