//! Slide access.
//!
//! Slide decoding sits behind the [`SlideReader`] trait. Readers are not
//! assumed to be thread-safe: workers only ever reach one through a
//! [`RegionGate`], which serializes every call.
//!
//! [`ImageSlide`] is a file-backed reader for flat scans (TIFF, PNG, JPEG)
//! that synthesizes a pyramid by repeated halving.

mod gate;
mod image_slide;

pub use gate::RegionGate;
pub use image_slide::ImageSlide;

use crate::error::Result;

/// A level-0 rectangle on the slide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Region {
    /// Left edge.
    pub x: u32,
    /// Top edge.
    pub y: u32,
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Region {
    /// Create a new region.
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Exclusive right edge.
    pub fn right(&self) -> u64 {
        self.x as u64 + self.width as u64
    }

    /// Exclusive bottom edge.
    pub fn bottom(&self) -> u64 {
        self.y as u64 + self.height as u64
    }

    /// Whether the region has no pixels.
    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Whether the region lies entirely inside a `width x height` slide.
    pub fn fits_within(&self, width: u32, height: u32) -> bool {
        self.right() <= width as u64 && self.bottom() <= height as u64
    }
}

impl std::fmt::Display for Region {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {}) {}x{}", self.x, self.y, self.width, self.height)
    }
}

/// Minimal whole-slide reader contract.
///
/// Implementations may keep internal decoder state, hence `&mut self` on
/// [`read_region`](SlideReader::read_region).
pub trait SlideReader: Send {
    /// Number of pyramid levels (at least 1).
    fn level_count(&self) -> usize;

    /// Dimensions of `level`, or `None` if it does not exist.
    fn level_dimensions(&self, level: usize) -> Option<(u32, u32)>;

    /// Downsample factor of `level` relative to level 0.
    fn level_downsample(&self, level: usize) -> Option<f64>;

    /// Read an RGBA region.
    ///
    /// `x` and `y` are level-0 coordinates; `width` and `height` are in
    /// pixels of `level`. Returns `width * height * 4` bytes.
    fn read_region(&mut self, x: u32, y: u32, level: usize, width: u32, height: u32)
        -> Result<Vec<u8>>;

    /// Level-0 dimensions.
    fn dimensions(&self) -> (u32, u32) {
        self.level_dimensions(0).unwrap_or((0, 0))
    }

    /// Deepest level whose downsample does not exceed `downsample`.
    fn best_level_for_downsample(&self, downsample: f64) -> usize {
        let mut best = 0;
        for level in 0..self.level_count() {
            match self.level_downsample(level) {
                // Small slack so a requested 4.0 still matches a level at 4.0001.
                Some(ds) if ds <= downsample * 1.0001 => best = level,
                _ => break,
            }
        }
        best
    }
}
