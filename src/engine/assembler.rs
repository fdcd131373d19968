//! # Delta Frame Assembly
//!
//! Builds mosaic images out of flagged blocks. Each mosaic packs exactly one
//! grid's worth of blocks, row-major in drained order, with every block
//! cropped from its pair's successor frame at full resolution and padded by
//! a replicated border. Placement provenance is committed once the mosaic
//! completes so it can be unpacked later.

use std::collections::{HashMap, VecDeque};

use anyhow::{bail, Context, Result};
use image::{GenericImage, RgbImage};

use crate::engine::frames::FrameStore;
use crate::engine::grid::FrameGrid;
use crate::engine::store::{BlockStore, CommittedBlock, FlaggedBlock};

/// Pixels of edge-replicated border added on every side of a block.
pub const BLOCK_PAD: u32 = 2;

/// Decoded frames kept resident during an assembly pass.
pub const FRAME_CACHE_CAPACITY: usize = 8;

/// Bounded cache of decoded frames, evicting in insertion order.
///
/// Batches arrive sorted by frame, so consecutive blocks usually hit the
/// same entry. The assembler owns its cache; detection never shares it.
pub struct FrameCache {
    capacity: usize,
    frames: HashMap<usize, RgbImage>,
    order: VecDeque<usize>,
}

impl FrameCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            frames: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    /// Returns the frame at `index`, decoding through `source` on a miss.
    pub fn get_or_load(&mut self, source: &FrameStore, index: usize) -> Result<&RgbImage> {
        if !self.frames.contains_key(&index) {
            let decoded = source.frame(index)?.to_rgb8();
            if self.frames.len() >= self.capacity {
                if let Some(oldest) = self.order.pop_front() {
                    self.frames.remove(&oldest);
                }
            }
            self.frames.insert(index, decoded);
            self.order.push_back(index);
        }
        Ok(&self.frames[&index])
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn contains(&self, index: usize) -> bool {
        self.frames.contains_key(&index)
    }
}

/// Assembles one delta frame from an already-drained batch.
///
/// `batch` must hold exactly `grid.cell_count()` blocks. Pixels come from
/// each block's successor frame, the new content of the changed cell.
/// Every placement is recorded as a [`CommittedBlock`] naming the mosaic
/// cell the block landed in.
pub fn assemble_delta(
    frames: &FrameStore,
    store: &BlockStore,
    cache: &mut FrameCache,
    grid: FrameGrid,
    delta_index: u32,
    batch: &[FlaggedBlock],
) -> Result<RgbImage> {
    let expected = grid.cell_count();
    if batch.len() != expected {
        bail!(
            "Delta frame {} needs exactly {} blocks, got {}",
            delta_index,
            expected,
            batch.len()
        );
    }

    let block_w = grid.block_width();
    let block_h = grid.block_height();
    if block_w == 0 || block_h == 0 {
        bail!(
            "Grid {}x{} produces zero-size blocks for {}x{} frames",
            grid.cols,
            grid.rows,
            grid.frame_width,
            grid.frame_height
        );
    }

    let cell_w = block_w + 2 * BLOCK_PAD;
    let cell_h = block_h + 2 * BLOCK_PAD;
    let mut mosaic = RgbImage::new(cell_w * grid.cols, cell_h * grid.rows);

    let mut placements = Vec::with_capacity(batch.len());
    for (slot, block) in batch.iter().enumerate() {
        let col = slot as u32 % grid.cols;
        let row = slot as u32 / grid.cols;

        let source = cache
            .get_or_load(frames, block.frame + 1)
            .with_context(|| format!("Successor of frame {} unavailable", block.frame))?;

        let (origin_x, origin_y) = grid.block_origin(block.block_x, block.block_y);
        let crop = image::imageops::crop_imm(source, origin_x, origin_y, block_w, block_h).to_image();
        let padded = pad_replicate(&crop, BLOCK_PAD);
        mosaic.copy_from(&padded, col * cell_w, row * cell_h)?;

        placements.push(CommittedBlock {
            source_frame: block.frame,
            block_x: block.block_x,
            block_y: block.block_y,
            delta_index,
            delta_col: col,
            delta_row: row,
        });
    }

    // Provenance lands only once the whole mosaic held together; a failed
    // batch records nothing.
    for placement in placements {
        store.commit(placement);
    }

    Ok(mosaic)
}

/// Surrounds a block with `pad` pixels of edge replication on every side.
fn pad_replicate(block: &RgbImage, pad: u32) -> RgbImage {
    let (width, height) = block.dimensions();
    RgbImage::from_fn(width + 2 * pad, height + 2 * pad, |x, y| {
        let sx = x.saturating_sub(pad).min(width - 1);
        let sy = y.saturating_sub(pad).min(height - 1);
        *block.get_pixel(sx, sy)
    })
}

// ===== Tests =====

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, Rgb};
    use std::path::PathBuf;

    fn solid_frame(color: [u8; 3]) -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(10, 10, Rgb(color)))
    }

    fn remote_frames(colors: &[[u8; 3]]) -> FrameStore {
        let store = FrameStore::new();
        store.enable_remote();
        for (index, &color) in colors.iter().enumerate() {
            store.ingest(index, solid_frame(color)).unwrap();
        }
        store
    }

    #[test]
    fn test_cache_evicts_in_insertion_order() {
        let frames = remote_frames(&[[1, 1, 1], [2, 2, 2], [3, 3, 3]]);
        let mut cache = FrameCache::new(2);

        cache.get_or_load(&frames, 0).unwrap();
        cache.get_or_load(&frames, 1).unwrap();
        assert_eq!(cache.len(), 2);

        cache.get_or_load(&frames, 2).unwrap();
        assert_eq!(cache.len(), 2);
        assert!(!cache.contains(0));
        assert!(cache.contains(1));
        assert!(cache.contains(2));

        // A hit does not refresh insertion order.
        cache.get_or_load(&frames, 1).unwrap();
        cache.get_or_load(&frames, 0).unwrap();
        assert!(!cache.contains(1));
        assert!(cache.contains(0));
        assert!(cache.contains(2));
    }

    #[test]
    fn test_cache_miss_for_unknown_frame() {
        let frames = remote_frames(&[[1, 1, 1]]);
        let mut cache = FrameCache::new(2);
        assert!(cache.get_or_load(&frames, 5).is_err());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_pad_replicate_extends_edges() {
        let mut block = RgbImage::new(2, 1);
        block.put_pixel(0, 0, Rgb([10, 0, 0]));
        block.put_pixel(1, 0, Rgb([0, 20, 0]));

        let padded = pad_replicate(&block, 2);
        assert_eq!(padded.dimensions(), (6, 5));
        assert_eq!(*padded.get_pixel(0, 0), Rgb([10, 0, 0]));
        assert_eq!(*padded.get_pixel(2, 0), Rgb([10, 0, 0]));
        assert_eq!(*padded.get_pixel(5, 4), Rgb([0, 20, 0]));
        assert_eq!(*padded.get_pixel(3, 2), Rgb([0, 20, 0]));
    }

    #[test]
    fn test_assemble_places_blocks_row_major() {
        let frames = remote_frames(&[
            [0, 0, 0],
            [200, 0, 0],
            [0, 200, 0],
            [0, 0, 200],
        ]);
        let store = BlockStore::new(PathBuf::from("frame_deltas"));
        let mut cache = FrameCache::new(FRAME_CACHE_CAPACITY);
        let grid = FrameGrid::derive(10, 10, 2);

        let batch = [
            FlaggedBlock { frame: 0, block_x: 0, block_y: 0 },
            FlaggedBlock { frame: 0, block_x: 1, block_y: 0 },
            FlaggedBlock { frame: 1, block_x: 0, block_y: 1 },
            FlaggedBlock { frame: 2, block_x: 1, block_y: 1 },
        ];
        let mosaic = assemble_delta(&frames, &store, &mut cache, grid, 7, &batch).unwrap();

        // 5x5 blocks padded to 9x9, two per side.
        assert_eq!(mosaic.dimensions(), (18, 18));

        // Pixels come from each block's successor frame.
        assert_eq!(*mosaic.get_pixel(4, 4), Rgb([200, 0, 0]));
        assert_eq!(*mosaic.get_pixel(13, 4), Rgb([200, 0, 0]));
        assert_eq!(*mosaic.get_pixel(4, 13), Rgb([0, 200, 0]));
        assert_eq!(*mosaic.get_pixel(13, 13), Rgb([0, 0, 200]));

        let committed = store.committed_snapshot();
        assert_eq!(committed.len(), 4);
        let destinations: Vec<(u32, u32)> = committed
            .iter()
            .map(|block| (block.delta_col, block.delta_row))
            .collect();
        assert_eq!(destinations, vec![(0, 0), (1, 0), (0, 1), (1, 1)]);
        assert!(committed.iter().all(|block| block.delta_index == 7));
    }

    #[test]
    fn test_assemble_rejects_short_batch() {
        let frames = remote_frames(&[[0, 0, 0], [200, 0, 0]]);
        let store = BlockStore::new(PathBuf::from("frame_deltas"));
        let mut cache = FrameCache::new(FRAME_CACHE_CAPACITY);
        let grid = FrameGrid::derive(10, 10, 2);

        let batch = [FlaggedBlock { frame: 0, block_x: 0, block_y: 0 }];
        assert!(assemble_delta(&frames, &store, &mut cache, grid, 0, &batch).is_err());
    }
}
