//! # Block Quality Metrics
//!
//! Scores how similar two grayscale blocks are. The pipeline only ever asks
//! one question of a metric: is this pair of blocks similar enough to skip,
//! or different enough to carry into a delta frame?
//!
//! Scores follow the PSNR convention: **lower means more different**. The
//! detection threshold flags a block when `score <= threshold`. An SSIM-style
//! metric can be slotted in behind [`BlockQualityMetric`] as long as it keeps
//! that polarity.

use image::GrayImage;

/// Score assigned to two blocks with zero mean squared error.
const IDENTICAL_SCORE: f64 = 100.0;

/// Similarity scoring seam between the detector and the numeric comparison.
pub trait BlockQualityMetric: Send + Sync {
    /// Compare two equally sized grayscale blocks.
    ///
    /// Lower scores mean more different. Implementations may assume the
    /// blocks have identical dimensions; the detector cuts both from the
    /// same grid geometry.
    fn score(&self, a: &GrayImage, b: &GrayImage) -> f64;

    /// Name for log lines.
    fn name(&self) -> &'static str;
}

/// Peak signal-to-noise ratio over 8-bit luma, in decibels.
///
/// Identical blocks score 100.0 rather than infinity so threshold
/// comparisons stay total.
#[derive(Debug, Clone, Copy, Default)]
pub struct Psnr;

impl BlockQualityMetric for Psnr {
    fn score(&self, a: &GrayImage, b: &GrayImage) -> f64 {
        let mut mse_sum = 0.0f64;
        for (pa, pb) in a.pixels().zip(b.pixels()) {
            let diff = pa.0[0] as f64 - pb.0[0] as f64;
            mse_sum += diff * diff;
        }
        let n = (a.width() * a.height()) as f64;
        if n == 0.0 {
            return IDENTICAL_SCORE;
        }
        let mse = mse_sum / n;
        if mse > 0.0 {
            10.0 * (255.0f64 * 255.0 / mse).log10()
        } else {
            IDENTICAL_SCORE
        }
    }

    fn name(&self) -> &'static str {
        "psnr"
    }
}
