//! # Dispatch Work Queue
//!
//! Frame pair indices waiting to be scored. The coordinator seeds the queue
//! once per clip and every worker session drains ranges from the same
//! queue, so pairs are handed out exactly once while sessions run in
//! parallel. Ranges that die with their session are put back at the front.

use std::collections::VecDeque;
use std::sync::Mutex;

/// Shared FIFO of unprocessed frame pair indices.
pub struct WorkQueue {
    pending: Mutex<VecDeque<usize>>,
}

impl WorkQueue {
    pub fn new() -> Self {
        Self {
            pending: Mutex::new(VecDeque::new()),
        }
    }

    /// Queue covering every adjacent pair of a sequence whose last frame is
    /// `last_index`: pair `i` compares frames `i` and `i + 1`, so indices
    /// run `0..last_index`.
    pub fn for_sequence(last_index: usize) -> Self {
        Self {
            pending: Mutex::new((0..last_index).collect()),
        }
    }

    /// Removes and returns up to `max` indices in dispatch order.
    pub fn pop_range(&self, max: usize) -> Vec<usize> {
        let mut pending = self.pending.lock().unwrap();
        let take = max.min(pending.len());
        pending.drain(..take).collect()
    }

    /// Returns indices to the front of the queue, preserving their order.
    /// Used when a worker session fails before reporting results.
    pub fn requeue(&self, indices: &[usize]) {
        let mut pending = self.pending.lock().unwrap();
        for &index in indices.iter().rev() {
            pending.push_front(index);
        }
    }

    pub fn len(&self) -> usize {
        self.pending.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().unwrap().is_empty()
    }
}

impl Default for WorkQueue {
    fn default() -> Self {
        Self::new()
    }
}

// ===== Tests =====
