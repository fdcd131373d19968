//! # Delta Processing Engine
//!
//! Shared frame-differencing logic used by both node roles. The coordinator
//! runs the full pipeline against a local frame directory; workers run
//! detection only, against frames pulled over the network, and ship flagged
//! blocks back instead of assembling them.

pub mod assembler;
pub mod detector;
pub mod frames;
pub mod grid;
pub mod quality;
pub mod store;

use std::fs;
use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use anyhow::{Context, Result};
use image::{GenericImageView, ImageOutputFormat, RgbImage};
use rayon::prelude::*;

use crate::common::config::ProcessingConfig;
use crate::common::protocol::{ProtocolError, WIRE_BLOCK_LIMIT};
use crate::engine::assembler::{FrameCache, FRAME_CACHE_CAPACITY};
use crate::engine::frames::FrameStore;
use crate::engine::grid::FrameGrid;
use crate::engine::quality::{BlockQualityMetric, Psnr};
use crate::engine::store::BlockStore;

/// Tunables shared by coordinator and workers. The handshake overwrites a
/// worker's threshold and mini-batch size with the coordinator's; grid
/// density is not on the wire and comes from each node's own configuration.
#[derive(Debug, Clone, Copy)]
pub struct EngineSettings {
    /// Scores at or below this mark a block as changed.
    pub similarity_threshold: f64,
    /// Multiplier on available cores for the delta write mini-batch.
    pub mini_batch_size: usize,
    /// Cells per reduced-aspect-ratio unit, per axis.
    pub grid_density: u32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            similarity_threshold: 34.50,
            mini_batch_size: 2,
            grid_density: 2,
        }
    }
}

impl From<ProcessingConfig> for EngineSettings {
    fn from(config: ProcessingConfig) -> Self {
        Self {
            similarity_threshold: config.similarity_threshold,
            mini_batch_size: config.mini_batch_size,
            grid_density: config.grid_density,
        }
    }
}

/// Core pipeline state: frame source, block queue, grid geometry, and the
/// similarity metric. Safe to share across tasks behind an `Arc`.
pub struct DeltaEngine {
    settings: RwLock<EngineSettings>,
    grid: RwLock<FrameGrid>,
    frames: FrameStore,
    store: BlockStore,
    metric: Box<dyn BlockQualityMetric>,
}

impl DeltaEngine {
    pub fn new(delta_dir: PathBuf, settings: EngineSettings) -> Self {
        Self::with_metric(delta_dir, settings, Box::new(Psnr))
    }

    /// Builds an engine around a caller-chosen similarity metric.
    pub fn with_metric(
        delta_dir: PathBuf,
        settings: EngineSettings,
        metric: Box<dyn BlockQualityMetric>,
    ) -> Self {
        Self {
            settings: RwLock::new(settings),
            grid: RwLock::new(FrameGrid::unit()),
            frames: FrameStore::new(),
            store: BlockStore::new(delta_dir),
            metric,
        }
    }

    /// Binds the engine to a local frame directory and derives the grid
    /// from it. Returns the number of frames found.
    pub fn load_frame_dir(&self, dir: &Path) -> Result<usize> {
        let count = self.frames.load_dir(dir)?;
        self.compute_grid();
        Ok(count)
    }

    /// Switches the frame source to a remote download cache. The grid is
    /// derived later, from the first downloaded frame.
    pub fn enable_remote_source(&self) {
        self.frames.enable_remote();
    }

    /// Derives the grid from frame zero of the current source.
    ///
    /// Needs at least two frames, otherwise there is no pair to ever score
    /// and the unit grid stays in place with nothing flagged.
    pub fn compute_grid(&self) {
        let enough = self.frames.last_index().map_or(false, |last| last > 0);
        if !enough {
            log::warn!("⚠️ Not enough frames to derive a grid, keeping 1x1");
            return;
        }

        match self.frames.frame(0) {
            Ok(frame) => {
                let density = self.settings.read().unwrap().grid_density;
                let grid = FrameGrid::derive(frame.width(), frame.height(), density);
                log::info!(
                    "📐 Using a {}x{} grid for {}x{} frames",
                    grid.cols,
                    grid.rows,
                    grid.frame_width,
                    grid.frame_height
                );
                *self.grid.write().unwrap() = grid;
            }
            Err(e) => log::warn!("⚠️ Could not read frame 0 to derive a grid: {}", e),
        }
    }

    pub fn grid(&self) -> FrameGrid {
        *self.grid.read().unwrap()
    }

    pub fn settings(&self) -> EngineSettings {
        *self.settings.read().unwrap()
    }

    /// Adopts the threshold and mini-batch size agreed at handshake.
    pub fn apply_remote_settings(&self, threshold: f64, mini_batch_size: usize) {
        let mut settings = self.settings.write().unwrap();
        settings.similarity_threshold = threshold;
        settings.mini_batch_size = mini_batch_size;
        log::info!(
            "🔧 Adopted session settings: threshold={}, mini_batch={}",
            threshold,
            mini_batch_size
        );
    }

    pub fn last_frame_index(&self) -> Option<usize> {
        self.frames.last_index()
    }

    pub fn delta_dir(&self) -> &Path {
        self.store.delta_dir()
    }

    pub fn pending_blocks(&self) -> usize {
        self.store.pending_len()
    }

    pub fn committed_blocks(&self) -> usize {
        self.store.committed_len()
    }

    /// Scores the given frame pairs in parallel. Returns how many pairs
    /// were actually processed.
    pub fn detect_range(&self, indices: &[usize]) -> usize {
        let grid = self.grid();
        let threshold = self.settings.read().unwrap().similarity_threshold;
        detector::detect_range(
            &self.frames,
            &self.store,
            self.metric.as_ref(),
            grid,
            threshold,
            indices,
        )
    }

    /// Scores every adjacent pair of the loaded sequence.
    pub fn detect_all(&self) -> usize {
        let last = match self.frames.last_index() {
            Some(last) => last,
            None => return 0,
        };
        let indices: Vec<usize> = (0..last).collect();
        self.detect_range(&indices)
    }

    /// Assembles and persists delta frames while full batches are pending.
    ///
    /// Mosaics are staged in memory and flushed to disk in parallel once
    /// more than `cores * mini_batch_size` accumulate; the remainder is
    /// written sequentially. Returns the number of files written.
    pub fn drain_ready_delta_frames(&self) -> Result<usize> {
        let grid = self.grid();
        if grid.is_unit() {
            return Ok(0);
        }
        let flush_limit = num_cpus::get() * self.settings.read().unwrap().mini_batch_size;

        let mut cache = FrameCache::new(FRAME_CACHE_CAPACITY);
        let mut staged: Vec<(PathBuf, RgbImage)> = Vec::new();
        let mut written = 0;

        loop {
            let batch = self.store.drain_batch(grid.cell_count());
            if batch.is_empty() {
                break;
            }

            let (delta_index, path) = self.store.next_delta_slot();
            let mosaic = match assembler::assemble_delta(
                &self.frames,
                &self.store,
                &mut cache,
                grid,
                delta_index,
                &batch,
            ) {
                Ok(mosaic) => mosaic,
                Err(e) => {
                    // The slot is not advanced, so the next batch reuses it.
                    log::error!("❌ Dropping a {}-block batch: {}", batch.len(), e);
                    continue;
                }
            };
            self.store.advance_delta_slot();
            staged.push((path, mosaic));

            if staged.len() > flush_limit {
                written += staged.par_drain(..).map(|entry| save_delta(&entry)).filter(|&ok| ok).count();
            }
        }

        written += staged.iter().map(save_delta).filter(|&ok| ok).count();
        Ok(written)
    }

    /// Drains up to `max` flagged blocks into their flat wire form, three
    /// integers per block. `max` is capped at the protocol block limit.
    pub fn extract_flagged_blocks(&self, max: usize) -> Vec<i32> {
        let blocks = self.store.drain_up_to(max.min(WIRE_BLOCK_LIMIT));
        let mut wire = Vec::with_capacity(blocks.len() * 3);
        for block in blocks {
            wire.push(block.frame as i32);
            wire.push(block.block_x as i32);
            wire.push(block.block_y as i32);
        }
        wire
    }

    /// Queues flagged blocks received in wire form.
    pub fn ingest_flagged_triples(&self, values: &[i32]) -> Result<usize> {
        if values.len() % 3 != 0 {
            return Err(ProtocolError::TripleMisaligned { len: values.len() }.into());
        }
        for triple in values.chunks_exact(3) {
            let frame = usize::try_from(triple[0]).context("Negative frame index in block triple")?;
            let block_x = u32::try_from(triple[1]).context("Negative block column in triple")?;
            let block_y = u32::try_from(triple[2]).context("Negative block row in triple")?;
            self.store.add_pending(frame, block_x, block_y);
        }
        Ok(values.len() / 3)
    }

    /// Decodes and caches a frame received over the download channel.
    ///
    /// The first ingest also derives the grid, since remote sources have no
    /// frame zero to inspect at startup.
    pub fn ingest_downloaded_frame(&self, index: usize, bytes: &[u8]) -> Result<()> {
        let frame = image::load_from_memory(bytes)
            .with_context(|| format!("Failed to decode downloaded frame {}", index))?;
        let (width, height) = frame.dimensions();
        self.frames.ingest(index, frame)?;

        if self.grid.read().unwrap().is_unit() {
            let density = self.settings.read().unwrap().grid_density;
            let grid = FrameGrid::derive(width, height, density);
            log::info!(
                "📐 Derived a {}x{} grid from downloaded frame {}",
                grid.cols,
                grid.rows,
                index
            );
            *self.grid.write().unwrap() = grid;
        }
        Ok(())
    }

    /// Frames the given pairs depend on that are not available locally.
    pub fn missing_frames(&self, indices: &[usize]) -> Vec<usize> {
        let mut wanted = Vec::with_capacity(indices.len() * 2);
        for &index in indices {
            wanted.push(index);
            wanted.push(index + 1);
        }
        wanted.sort_unstable();
        wanted.dedup();
        wanted.retain(|&index| !self.frames.has_frame(index));
        wanted
    }

    /// Frame pixels encoded as PNG for network transfer.
    pub fn encode_frame(&self, index: usize) -> Result<Vec<u8>> {
        let frame = self.frames.frame(index)?;
        let mut bytes = Vec::new();
        frame
            .write_to(&mut Cursor::new(&mut bytes), ImageOutputFormat::Png)
            .with_context(|| format!("Failed to encode frame {}", index))?;
        Ok(bytes)
    }

    /// Writes the committed-block log as pretty JSON. Returns the number of
    /// records exported.
    pub fn export_provenance(&self, path: &Path) -> Result<usize> {
        let committed = self.store.committed_snapshot();
        let json = serde_json::to_string_pretty(&committed)?;
        fs::write(path, json)
            .with_context(|| format!("Failed to write provenance to {}", path.display()))?;
        Ok(committed.len())
    }
}

fn save_delta(entry: &(PathBuf, RgbImage)) -> bool {
    let (path, mosaic) = entry;
    match mosaic.save(path) {
        Ok(()) => {
            log::info!("💾 Saved delta frame {}", path.display());
            true
        }
        Err(e) => {
            log::error!("❌ Failed to save delta frame {}: {}", path.display(), e);
            false
        }
    }
}

// ===== Tests =====
