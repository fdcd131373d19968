//! # Difference Detection
//!
//! Scores consecutive frame pairs cell by cell and queues the cells that
//! changed. Frames are downscaled and converted to grayscale before scoring
//! to keep the metric cheap; extraction later crops the full-resolution
//! frame, so no detail is lost by scoring small.

use anyhow::Result;
use image::imageops::FilterType;
use image::{DynamicImage, GrayImage};
use rayon::prelude::*;

use crate::engine::frames::FrameStore;
use crate::engine::grid::FrameGrid;
use crate::engine::quality::BlockQualityMetric;
use crate::engine::store::BlockStore;

/// Fraction of the original resolution used when scoring frame pairs.
const DETECTION_SCALE: f64 = 0.8;

/// Scores the pair `(index, index + 1)` and queues every cell whose score
/// falls at or below `threshold`.
///
/// Returns `Ok(false)` without scoring when frame `index + 1` is not
/// available yet. On success the frame is marked stale so remote caches can
/// reclaim it.
///
/// # Arguments
///
/// * `frames` - Source of input frames
/// * `store` - Destination queue for flagged cells
/// * `metric` - Similarity metric applied per cell
/// * `grid` - Cell layout shared by every frame of the clip
/// * `threshold` - Scores at or below this flag the cell as changed
/// * `index` - Index of the earlier frame of the pair
pub fn detect_single(
    frames: &FrameStore,
    store: &BlockStore,
    metric: &dyn BlockQualityMetric,
    grid: FrameGrid,
    threshold: f64,
    index: usize,
) -> Result<bool> {
    let within_range = frames.last_index().map_or(false, |last| index + 1 <= last);
    if !within_range {
        return Ok(false);
    }

    let gray_a = downscale_gray(&frames.frame(index)?);
    let gray_b = downscale_gray(&frames.frame(index + 1)?);

    let cell_w = gray_a.width() / grid.cols;
    let cell_h = gray_a.height() / grid.rows;
    if cell_w == 0 || cell_h == 0 {
        return Ok(false);
    }

    // Rows scan in parallel; the ordered collect keeps the queue row-major.
    let flagged: Vec<(u32, u32)> = (0..grid.rows)
        .into_par_iter()
        .flat_map_iter(|cy| {
            let gray_a = &gray_a;
            let gray_b = &gray_b;
            (0..grid.cols).filter_map(move |cx| {
                let x = cell_w * cx;
                let y = cell_h * cy;
                let block_a = image::imageops::crop_imm(gray_a, x, y, cell_w, cell_h).to_image();
                let block_b = image::imageops::crop_imm(gray_b, x, y, cell_w, cell_h).to_image();
                let score = metric.score(&block_a, &block_b);
                (score <= threshold).then_some((cx, cy))
            })
        })
        .collect();

    for &(block_x, block_y) in &flagged {
        store.add_pending(index, block_x, block_y);
    }
    frames.mark_stale(index);

    if !flagged.is_empty() {
        log::debug!("🔍 Pair {}: {} changed cells", index, flagged.len());
    }
    Ok(true)
}

/// Scores a batch of frame pairs in parallel and returns how many were
/// actually processed. Pairs that cannot be scored are logged and skipped.
pub fn detect_range(
    frames: &FrameStore,
    store: &BlockStore,
    metric: &dyn BlockQualityMetric,
    grid: FrameGrid,
    threshold: f64,
    indices: &[usize],
) -> usize {
    indices
        .par_iter()
        .map(
            |&index| match detect_single(frames, store, metric, grid, threshold, index) {
                Ok(true) => 1,
                Ok(false) => 0,
                Err(e) => {
                    log::error!("❌ Failed to score frame pair {}: {}", index, e);
                    0
                }
            },
        )
        .sum()
}

fn downscale_gray(frame: &DynamicImage) -> GrayImage {
    let width = (frame.width() as f64 * DETECTION_SCALE) as u32;
    let height = (frame.height() as f64 * DETECTION_SCALE) as u32;
    frame
        .resize_exact(width, height, FilterType::Triangle)
        .to_luma8()
}

// ===== Tests =====

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::quality::Psnr;
    use image::{Rgb, RgbImage};
    use std::path::PathBuf;

    const THRESHOLD: f64 = 15.0;

    fn white_frame() -> DynamicImage {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(10, 10, Rgb([255, 255, 255])))
    }

    fn corner_changed_frame() -> DynamicImage {
        let mut img = RgbImage::from_pixel(10, 10, Rgb([255, 255, 255]));
        for y in 5..10 {
            for x in 5..10 {
                img.put_pixel(x, y, Rgb([0, 0, 0]));
            }
        }
        DynamicImage::ImageRgb8(img)
    }

    fn remote_store_with(frames: Vec<DynamicImage>) -> FrameStore {
        let store = FrameStore::new();
        store.enable_remote();
        for (index, frame) in frames.into_iter().enumerate() {
            store.ingest(index, frame).unwrap();
        }
        store
    }

    fn test_grid() -> FrameGrid {
        // 10x10 reduces to a 1:1 ratio, so density 2 gives 2x2 cells.
        FrameGrid::derive(10, 10, 2)
    }

    #[test]
    fn test_identical_frames_flag_nothing() {
        let frames = remote_store_with(vec![white_frame(), white_frame()]);
        let blocks = BlockStore::new(PathBuf::from("deltas"));

        let processed =
            detect_single(&frames, &blocks, &Psnr, test_grid(), THRESHOLD, 0).unwrap();
        assert!(processed);
        assert_eq!(blocks.pending_len(), 0);
    }

    #[test]
    fn test_changed_cell_is_flagged() {
        let frames = remote_store_with(vec![white_frame(), corner_changed_frame()]);
        let blocks = BlockStore::new(PathBuf::from("deltas"));

        assert!(detect_single(&frames, &blocks, &Psnr, test_grid(), THRESHOLD, 0).unwrap());
        let flagged = blocks.drain_up_to(8);
        assert_eq!(flagged.len(), 1);
        assert_eq!(flagged[0].frame, 0);
        assert_eq!((flagged[0].block_x, flagged[0].block_y), (1, 1));
    }

    #[test]
    fn test_pair_without_successor_is_skipped() {
        let frames = remote_store_with(vec![white_frame(), white_frame(), white_frame()]);
        let blocks = BlockStore::new(PathBuf::from("deltas"));
        let grid = test_grid();

        // Frame 2 is the last one loaded, so pair 2 waits for frame 3.
        assert!(detect_single(&frames, &blocks, &Psnr, grid, THRESHOLD, 1).unwrap());
        assert!(!detect_single(&frames, &blocks, &Psnr, grid, THRESHOLD, 2).unwrap());
        assert!(!detect_single(&frames, &blocks, &Psnr, grid, THRESHOLD, 9).unwrap());
    }

    #[test]
    fn test_detect_range_counts_processed_pairs() {
        let frames = remote_store_with(vec![white_frame(), white_frame(), white_frame()]);
        let blocks = BlockStore::new(PathBuf::from("deltas"));

        let processed =
            detect_range(&frames, &blocks, &Psnr, test_grid(), THRESHOLD, &[0, 1, 2]);
        assert_eq!(processed, 2);
    }

    #[test]
    fn test_scored_remote_frame_becomes_reclaimable() {
        let frames = remote_store_with(vec![white_frame(), white_frame()]);
        let blocks = BlockStore::new(PathBuf::from("deltas"));

        assert!(detect_single(&frames, &blocks, &Psnr, test_grid(), THRESHOLD, 0).unwrap());
        assert!(frames.has_frame(0));

        // The next ingest prunes frame 0: its pair is scored and there is
        // no earlier pair waiting on it.
        frames.ingest(2, white_frame()).unwrap();
        assert!(!frames.has_frame(0));
        assert!(frames.has_frame(1));
    }
}
