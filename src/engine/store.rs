//! # Block Store
//!
//! Accumulates flagged blocks between detection and assembly, and tracks
//! blocks placed into delta frames for later reconstruction.
//!
//! All state sits behind one coarse mutex. Detection threads add pending
//! blocks concurrently while exactly one drain consumer (assembly or wire
//! extraction) removes them; every operation takes the lock once, so batch
//! readiness checks and drains can never interleave with each other.
//!
//! Pending blocks are keyed by frame index in a sorted map. Draining walks
//! frames in ascending order and blocks within a frame in insertion order,
//! which fixes the layout order of every delta frame.

use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// A block flagged as changed, before assembly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FlaggedBlock {
    /// Frame index the change was detected at (the earlier frame of the pair)
    pub frame: usize,
    /// Grid column of the block
    pub block_x: u32,
    /// Grid row of the block
    pub block_y: u32,
}

/// A block placed into a delta frame, with its destination recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CommittedBlock {
    pub source_frame: usize,
    pub block_x: u32,
    pub block_y: u32,
    /// Which delta frame the block landed in
    pub delta_index: u32,
    /// Block column inside the delta mosaic
    pub delta_col: u32,
    /// Block row inside the delta mosaic
    pub delta_row: u32,
}

#[derive(Debug, Default)]
struct StoreInner {
    pending: BTreeMap<usize, Vec<(u32, u32)>>,
    pending_count: usize,
    committed: Vec<CommittedBlock>,
    next_delta_index: u32,
}

impl StoreInner {
    /// Remove up to `max` blocks, ascending frame order, insertion order
    /// within a frame. Caller holds the lock.
    fn take(&mut self, max: usize) -> Vec<FlaggedBlock> {
        let mut drained = Vec::with_capacity(max.min(self.pending_count));
        while drained.len() < max {
            let Some((&frame, blocks)) = self.pending.iter_mut().next() else {
                break;
            };
            let take = (max - drained.len()).min(blocks.len());
            for (bx, by) in blocks.drain(..take) {
                drained.push(FlaggedBlock {
                    frame,
                    block_x: bx,
                    block_y: by,
                });
            }
            self.pending_count -= take;
            if blocks.is_empty() {
                self.pending.remove(&frame);
            }
        }
        drained
    }
}

/// Shared store of pending and committed blocks.
#[derive(Debug)]
pub struct BlockStore {
    inner: Mutex<StoreInner>,
    delta_dir: PathBuf,
}

impl BlockStore {
    pub fn new(delta_dir: PathBuf) -> Self {
        Self {
            inner: Mutex::new(StoreInner::default()),
            delta_dir,
        }
    }

    /// Record a changed block detected at `frame`.
    ///
    /// Coordinates already pending for the frame are kept once, so a pair
    /// re-scored after a dispatch retry does not stack duplicates into the
    /// next mosaic.
    pub fn add_pending(&self, frame: usize, block_x: u32, block_y: u32) {
        let mut inner = self.inner.lock().unwrap();
        let blocks = inner.pending.entry(frame).or_default();
        if blocks.contains(&(block_x, block_y)) {
            return;
        }
        blocks.push((block_x, block_y));
        inner.pending_count += 1;
    }

    pub fn pending_len(&self) -> usize {
        self.inner.lock().unwrap().pending_count
    }

    pub fn is_batch_ready(&self, batch_size: usize) -> bool {
        self.inner.lock().unwrap().pending_count >= batch_size
    }

    /// Remove exactly `batch_size` blocks, or none.
    ///
    /// Returns an empty vec when fewer than `batch_size` blocks are pending;
    /// the readiness gate and the removal happen under one lock acquisition,
    /// so the result is always all-or-nothing.
    pub fn drain_batch(&self, batch_size: usize) -> Vec<FlaggedBlock> {
        let mut inner = self.inner.lock().unwrap();
        if batch_size == 0 || inner.pending_count < batch_size {
            return Vec::new();
        }
        inner.take(batch_size)
    }

    /// Remove up to `max` blocks without a readiness gate.
    ///
    /// Used by the wire extraction path so a tail smaller than a full batch
    /// still reaches the coordinator.
    pub fn drain_up_to(&self, max: usize) -> Vec<FlaggedBlock> {
        let mut inner = self.inner.lock().unwrap();
        inner.take(max)
    }

    /// Record the destination a block was assembled into.
    pub fn commit(&self, block: CommittedBlock) {
        self.inner.lock().unwrap().committed.push(block);
    }

    pub fn committed_len(&self) -> usize {
        self.inner.lock().unwrap().committed.len()
    }

    pub fn committed_snapshot(&self) -> Vec<CommittedBlock> {
        self.inner.lock().unwrap().committed.clone()
    }

    /// Current delta-frame slot: its index and output path.
    pub fn next_delta_slot(&self) -> (u32, PathBuf) {
        let index = self.inner.lock().unwrap().next_delta_index;
        (index, self.delta_dir.join(format!("delta_{}.jpg", index)))
    }

    /// Advance to the next slot once the current delta frame is assembled.
    pub fn advance_delta_slot(&self) {
        self.inner.lock().unwrap().next_delta_index += 1;
    }

    pub fn delta_dir(&self) -> &Path {
        &self.delta_dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn store() -> BlockStore {
        BlockStore::new(PathBuf::from("frame_deltas"))
    }

    #[test]
    fn test_add_and_count() {
        let store = store();
        assert_eq!(store.pending_len(), 0);
        store.add_pending(3, 1, 1);
        store.add_pending(1, 0, 0);
        store.add_pending(3, 2, 0);
        assert_eq!(store.pending_len(), 3);
        assert!(store.is_batch_ready(3));
        assert!(!store.is_batch_ready(4));
    }

    #[test]
    fn test_redetected_block_is_kept_once() {
        let store = store();
        store.add_pending(3, 0, 1);
        store.add_pending(3, 1, 1);
        // The same pair scored again, e.g. after its range was requeued.
        store.add_pending(3, 0, 1);
        assert_eq!(store.pending_len(), 2);

        // Same coordinates on another frame are a distinct block.
        store.add_pending(4, 0, 1);
        assert_eq!(store.pending_len(), 3);

        let drained = store.drain_up_to(10);
        let coords: Vec<(usize, u32, u32)> = drained
            .iter()
            .map(|b| (b.frame, b.block_x, b.block_y))
            .collect();
        assert_eq!(coords, vec![(3, 0, 1), (3, 1, 1), (4, 0, 1)]);

        // Once drained the coordinates may legitimately pend again.
        store.add_pending(3, 0, 1);
        assert_eq!(store.pending_len(), 1);
    }

    #[test]
    fn test_drain_batch_is_all_or_nothing() {
        let store = store();
        store.add_pending(0, 0, 0);
        store.add_pending(0, 1, 0);

        assert!(store.drain_batch(3).is_empty());
        assert_eq!(store.pending_len(), 2);

        let batch = store.drain_batch(2);
        assert_eq!(batch.len(), 2);
        assert_eq!(store.pending_len(), 0);
    }

    #[test]
    fn test_drain_order_ascending_frames_insertion_within() {
        let store = store();
        store.add_pending(5, 1, 1);
        store.add_pending(2, 0, 0);
        store.add_pending(2, 1, 0);
        store.add_pending(9, 3, 3);

        let batch = store.drain_batch(4);
        let order: Vec<(usize, u32, u32)> = batch
            .iter()
            .map(|b| (b.frame, b.block_x, b.block_y))
            .collect();
        assert_eq!(order, vec![(2, 0, 0), (2, 1, 0), (5, 1, 1), (9, 3, 3)]);
    }

    #[test]
    fn test_drain_up_to_allows_partial() {
        let store = store();
        store.add_pending(0, 0, 0);
        store.add_pending(1, 0, 0);

        let partial = store.drain_up_to(10);
        assert_eq!(partial.len(), 2);
        assert!(store.drain_up_to(10).is_empty());
    }

    #[test]
    fn test_drain_leaves_remainder_intact() {
        let store = store();
        for frame in 0..3 {
            store.add_pending(frame, 0, 0);
            store.add_pending(frame, 1, 0);
        }

        let batch = store.drain_batch(4);
        assert_eq!(batch.len(), 4);
        assert_eq!(store.pending_len(), 2);

        // Remainder starts where the drain stopped.
        let rest = store.drain_up_to(10);
        assert_eq!(rest[0].frame, 2);
    }

    #[test]
    fn test_concurrent_adds_preserve_total() {
        let store = Arc::new(store());
        let mut handles = Vec::new();
        for t in 0..4 {
            let store = store.clone();
            handles.push(std::thread::spawn(move || {
                for i in 0..100 {
                    store.add_pending(t, i, 0);
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(store.pending_len(), 400);
        assert_eq!(store.drain_up_to(1000).len(), 400);
    }

    #[test]
    fn test_delta_slot_advances() {
        let store = store();
        let (index, path) = store.next_delta_slot();
        assert_eq!(index, 0);
        assert!(path.ends_with("delta_0.jpg"));

        store.advance_delta_slot();
        let (index, path) = store.next_delta_slot();
        assert_eq!(index, 1);
        assert!(path.ends_with("delta_1.jpg"));
    }

    #[test]
    fn test_commit_snapshot() {
        let store = store();
        store.commit(CommittedBlock {
            source_frame: 4,
            block_x: 1,
            block_y: 2,
            delta_index: 0,
            delta_col: 3,
            delta_row: 0,
        });
        let snapshot = store.committed_snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].source_frame, 4);
        assert_eq!(snapshot[0].delta_col, 3);
    }
}
