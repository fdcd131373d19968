//! # Frame Store
//!
//! Source of input frames for detection and assembly. A store starts empty
//! and is bound to exactly one source before use:
//!
//! - **Local**: a directory of image files, sorted in natural filename order
//!   and decoded from disk on every access.
//! - **Remote**: an in-memory cache filled over the network, pruned as
//!   frame pairs are consumed.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use anyhow::{bail, Context, Result};
use image::DynamicImage;

/// Image file extensions accepted when scanning a frame directory.
const FRAME_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "bmp"];

/// Cache of frames received over the network, keyed by frame index.
///
/// `stale` holds indices whose frame pair has already been scored. A stale
/// frame is still needed as the successor of the pair below it, so eviction
/// waits until that pair is consumed too.
#[derive(Default)]
struct DownloadCache {
    frames: HashMap<usize, DynamicImage>,
    stale: HashSet<usize>,
    end_index: Option<usize>,
}

enum SourceMode {
    Unloaded,
    Local(Vec<PathBuf>),
    Remote(DownloadCache),
}

/// Thread-safe store of input frames, backed by a directory or a download
/// cache depending on the node's role.
pub struct FrameStore {
    mode: RwLock<SourceMode>,
}

impl FrameStore {
    pub fn new() -> Self {
        Self {
            mode: RwLock::new(SourceMode::Unloaded),
        }
    }

    /// Binds the store to a local frame directory.
    ///
    /// Scans `dir` for image files, orders them with [`natural_cmp`] so that
    /// `frame_9` precedes `frame_10`, and returns the number of frames found.
    ///
    /// # Arguments
    ///
    /// * `dir` - Directory containing the extracted video frames
    pub fn load_dir(&self, dir: &Path) -> Result<usize> {
        let mut entries: Vec<(String, PathBuf)> = Vec::new();

        for entry in fs::read_dir(dir)
            .with_context(|| format!("Failed to read frame directory {}", dir.display()))?
        {
            let entry = entry?;
            let path = entry.path();

            let ext = match path.extension().and_then(|e| e.to_str()) {
                Some(e) => e.to_ascii_lowercase(),
                None => continue,
            };
            if !FRAME_EXTENSIONS.contains(&ext.as_str()) {
                continue;
            }

            let name = entry.file_name().to_string_lossy().into_owned();
            entries.push((name, path));
        }

        entries.sort_by(|a, b| natural_cmp(&a.0, &b.0));
        let files: Vec<PathBuf> = entries.into_iter().map(|(_, path)| path).collect();
        let count = files.len();

        let mut mode = self.mode.write().unwrap();
        *mode = SourceMode::Local(files);

        log::info!("📂 Loaded {} frames from {}", count, dir.display());
        Ok(count)
    }

    /// Switches the store to remote mode with an empty download cache.
    pub fn enable_remote(&self) {
        let mut mode = self.mode.write().unwrap();
        *mode = SourceMode::Remote(DownloadCache::default());
    }

    pub fn is_remote(&self) -> bool {
        matches!(*self.mode.read().unwrap(), SourceMode::Remote(_))
    }

    /// Index of the last frame available, or `None` while the store is
    /// empty. Detection of pair `i` requires frame `i + 1`, so callers gate
    /// on this before scoring.
    pub fn last_index(&self) -> Option<usize> {
        match *self.mode.read().unwrap() {
            SourceMode::Unloaded => None,
            SourceMode::Local(ref files) => files.len().checked_sub(1),
            SourceMode::Remote(ref cache) => cache.end_index,
        }
    }

    /// Returns the frame at `index`.
    ///
    /// Local sources decode from disk on every call; remote sources clone
    /// out of the download cache.
    pub fn frame(&self, index: usize) -> Result<DynamicImage> {
        let path = {
            let mode = self.mode.read().unwrap();
            match *mode {
                SourceMode::Unloaded => bail!("No frame source loaded"),
                SourceMode::Local(ref files) => files
                    .get(index)
                    .cloned()
                    .with_context(|| format!("Frame index {} out of range", index))?,
                SourceMode::Remote(ref cache) => {
                    return cache
                        .frames
                        .get(&index)
                        .cloned()
                        .with_context(|| format!("Frame {} not in download cache", index));
                }
            }
        };

        // Decode outside the lock; disk reads dominate the access time.
        image::open(&path).with_context(|| format!("Failed to decode frame {}", path.display()))
    }

    pub fn has_frame(&self, index: usize) -> bool {
        match *self.mode.read().unwrap() {
            SourceMode::Unloaded => false,
            SourceMode::Local(ref files) => index < files.len(),
            SourceMode::Remote(ref cache) => cache.frames.contains_key(&index),
        }
    }

    /// Adds a downloaded frame to the remote cache, then evicts frames whose
    /// pairs are fully consumed.
    ///
    /// A stale frame `k` is evicted once frame `k - 1` is gone from the
    /// cache or is itself stale; until then `k` is still the successor of
    /// the pair below it.
    pub fn ingest(&self, index: usize, frame: DynamicImage) -> Result<()> {
        let mut mode = self.mode.write().unwrap();
        let cache = match *mode {
            SourceMode::Remote(ref mut cache) => cache,
            _ => bail!("Frame ingest requires a remote frame source"),
        };

        cache.frames.insert(index, frame);
        cache.end_index = Some(cache.end_index.map_or(index, |end| end.max(index)));

        let evicted = prune_consumed(cache);
        if evicted > 0 {
            log::debug!("🧹 Evicted {} consumed frames from download cache", evicted);
        }
        Ok(())
    }

    /// Marks a remote frame as scored. No-op for local sources, where frames
    /// stay on disk.
    pub fn mark_stale(&self, index: usize) {
        let mut mode = self.mode.write().unwrap();
        if let SourceMode::Remote(ref mut cache) = *mode {
            cache.stale.insert(index);
        }
    }

    /// Number of frames currently held in memory. Always zero for local
    /// sources.
    pub fn cached_len(&self) -> usize {
        match *self.mode.read().unwrap() {
            SourceMode::Remote(ref cache) => cache.frames.len(),
            _ => 0,
        }
    }
}

impl Default for FrameStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Evicts stale frames whose predecessor pair is consumed. Returns the
/// number of frames removed.
fn prune_consumed(cache: &mut DownloadCache) -> usize {
    let mut stale_sorted: Vec<usize> = cache.stale.iter().copied().collect();
    stale_sorted.sort_unstable();

    let mut pruned = Vec::new();
    for index in stale_sorted {
        let predecessor_cached = index > 0 && cache.frames.contains_key(&(index - 1));
        let predecessor_stale = index > 0 && cache.stale.contains(&(index - 1));
        if !predecessor_cached || predecessor_stale {
            cache.frames.remove(&index);
            pruned.push(index);
        }
    }

    let evicted = pruned.len();
    for index in pruned {
        cache.stale.remove(&index);
    }
    evicted
}

/// Compares filenames so that embedded numbers order numerically:
/// `frame_9.png` sorts before `frame_10.png`.
///
/// Digit runs compare by value (with bare numbers before zero-padded
/// equals), text runs compare lexically, and a digit run sorts before a
/// text run at the same position.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut runs_a = runs(a);
    let mut runs_b = runs(b);
    loop {
        match (runs_a.next(), runs_b.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) => {
                let ord = compare_runs(x, y);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
        }
    }
}

/// Splits a string into alternating runs of digits and non-digits.
fn runs(s: &str) -> impl Iterator<Item = &str> + '_ {
    let bytes = s.as_bytes();
    let mut start = 0;
    std::iter::from_fn(move || {
        if start >= bytes.len() {
            return None;
        }
        let digits = bytes[start].is_ascii_digit();
        let mut end = start + 1;
        while end < bytes.len() && bytes[end].is_ascii_digit() == digits {
            end += 1;
        }
        let run = &s[start..end];
        start = end;
        Some(run)
    })
}

fn compare_runs(x: &str, y: &str) -> Ordering {
    let x_digits = x.as_bytes()[0].is_ascii_digit();
    let y_digits = y.as_bytes()[0].is_ascii_digit();
    match (x_digits, y_digits) {
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        (false, false) => x.cmp(y),
        (true, true) => {
            let x_stripped = x.trim_start_matches('0');
            let y_stripped = y.trim_start_matches('0');
            x_stripped
                .len()
                .cmp(&y_stripped.len())
                .then_with(|| x_stripped.cmp(y_stripped))
                .then_with(|| x.len().cmp(&y.len()))
        }
    }
}

// ===== Tests =====
