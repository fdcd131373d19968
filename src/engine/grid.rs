//! # Frame Grid Derivation
//!
//! Splits a frame into a grid of equally sized comparison blocks. The grid
//! dimensions come from the frame's reduced integer aspect ratio multiplied
//! by a density factor, so blocks stay square-ish across resolutions:
//! 1920x1080 reduces to 16:9, and at density 2 becomes a 32x18 grid.
//!
//! The reduction is deliberately integer-only and deterministic. Every node
//! derives the grid independently from frame zero of its source, and all
//! block coordinates exchanged over the wire assume the peers agree on it.

/// Grid geometry for one frame source.
///
/// Holds the full-resolution frame size alongside the grid dimensions so
/// block pixel geometry can be computed in one place. All divisions are
/// integer divisions; a trailing remainder of pixels on the right and
/// bottom edges is never part of any block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameGrid {
    pub frame_width: u32,
    pub frame_height: u32,
    pub cols: u32,
    pub rows: u32,
}

impl FrameGrid {
    /// Derive the grid for a frame size at the given density.
    ///
    /// The reduced aspect ratio keeps the largest factor that divides both
    /// dimensions, scanning even factors, or multiples of three when both
    /// dimensions divide by three. The grid is the reduced ratio times
    /// `density` per axis.
    ///
    /// # Example
    /// ```ignore
    /// let grid = FrameGrid::derive(1920, 1080, 2);
    /// assert_eq!((grid.cols, grid.rows), (32, 18));
    /// ```
    pub fn derive(frame_width: u32, frame_height: u32, density: u32) -> Self {
        let (ratio_x, ratio_y) = reduce_aspect_ratio(frame_width, frame_height);
        Self {
            frame_width,
            frame_height,
            cols: ratio_x * density,
            rows: ratio_y * density,
        }
    }

    /// Degraded single-cell grid used before any frame source is known.
    pub fn unit() -> Self {
        Self {
            frame_width: 1,
            frame_height: 1,
            cols: 1,
            rows: 1,
        }
    }

    pub fn is_unit(&self) -> bool {
        *self == Self::unit()
    }

    /// Number of blocks in the grid, which is also the delta-frame batch size.
    pub fn cell_count(&self) -> usize {
        (self.cols * self.rows) as usize
    }

    /// Full-resolution block width.
    pub fn block_width(&self) -> u32 {
        self.frame_width / self.cols
    }

    /// Full-resolution block height.
    pub fn block_height(&self) -> u32 {
        self.frame_height / self.rows
    }

    /// Top-left pixel of block `(bx, by)` at full resolution.
    pub fn block_origin(&self, bx: u32, by: u32) -> (u32, u32) {
        (self.block_width() * bx, self.block_height() * by)
    }
}

/// Reduce a frame size to its integer aspect ratio.
///
/// Seeds the factor scan with 2, or 3 when both dimensions divide by three,
/// and keeps the last factor that divides both. Dimensions that share no
/// seeded factor reduce to themselves divided by one.
fn reduce_aspect_ratio(width: u32, height: u32) -> (u32, u32) {
    let seed = if width % 3 == 0 && height % 3 == 0 { 3 } else { 2 };

    let mut num = 1;
    let mut kept = 1;
    while width / (num * seed) >= 1 {
        let factor = num * seed;
        if width % factor == 0 && height % factor == 0 {
            kept = factor;
        }
        num += 1;
    }

    (width / kept, height / kept)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reduce_common_resolutions() {
        assert_eq!(reduce_aspect_ratio(1920, 1080), (16, 9));
        assert_eq!(reduce_aspect_ratio(1280, 720), (16, 9));
        assert_eq!(reduce_aspect_ratio(300, 300), (1, 1));
        assert_eq!(reduce_aspect_ratio(10, 10), (1, 1));
    }

    #[test]
    fn test_derive_applies_density() {
        let grid = FrameGrid::derive(1920, 1080, 2);
        assert_eq!((grid.cols, grid.rows), (32, 18));
        assert_eq!(grid.cell_count(), 576);

        let grid = FrameGrid::derive(1280, 720, 1);
        assert_eq!((grid.cols, grid.rows), (16, 9));

        let grid = FrameGrid::derive(10, 10, 2);
        assert_eq!((grid.cols, grid.rows), (2, 2));
        assert_eq!(grid.cell_count(), 4);
    }

    #[test]
    fn test_derive_is_deterministic() {
        let a = FrameGrid::derive(1920, 1080, 2);
        let b = FrameGrid::derive(1920, 1080, 2);
        assert_eq!(a, b);
    }

    #[test]
    fn test_block_geometry() {
        let grid = FrameGrid::derive(1920, 1080, 2);
        assert_eq!(grid.block_width(), 60);
        assert_eq!(grid.block_height(), 60);
        assert_eq!(grid.block_origin(0, 0), (0, 0));
        assert_eq!(grid.block_origin(31, 17), (1860, 1020));
    }

    #[test]
    fn test_unit_grid() {
        let grid = FrameGrid::unit();
        assert!(grid.is_unit());
        assert_eq!(grid.cell_count(), 1);
        assert!(!FrameGrid::derive(1920, 1080, 2).is_unit());
    }
}
