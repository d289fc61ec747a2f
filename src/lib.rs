//! Tissue Tiler Library
//!
//! Cuts whole slide images into tissue-bearing tiles and compresses each one
//! with JPEG XL at the most aggressive distance that still keeps the decoded
//! tile above an SSIM floor.
//!
//! # Features
//!
//! - **Tissue masking**: HSV thresholding with morphological cleanup on a low-resolution level
//! - **Tile indexing**: level-0 grid restricted to the tissue bounding box
//! - **Quality search**: bounded bisection over the JPEG XL distance per tile
//! - **Parallel workers**: Rayon pool with a gated, non-thread-safe slide reader
//! - **Crash-safe output**: temp-then-rename tile files and a CSV manifest
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use tissue_tiler::{ImageSlide, TilerConfig, TilerPipeline};
//!
//! let config = TilerConfig::from_file("tiler.toml")?;
//! let slide = ImageSlide::open("slide.tiff")?;
//!
//! let report = TilerPipeline::new(config).run(Box::new(slide))?;
//! println!(
//!     "{} tiles encoded, {} failed ({:.2}:1)",
//!     report.summary.succeeded,
//!     report.summary.failed,
//!     report.summary.overall_ratio()
//! );
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod batch;
pub mod cli;
pub mod codec;
pub mod config;
pub mod error;
pub mod mask;
pub mod metrics;
pub mod pipeline;
pub mod progress;
pub mod search;
pub mod sink;
pub mod slide;
pub mod tiling;

// Re-export commonly used types
pub use batch::{TileOutcome, TileProcessor};
pub use codec::{CodecInfo, JxlCodec, TileCodec};
pub use config::TilerConfig;
pub use error::{ErrorKind, Result, TilerError};
pub use mask::TissueMask;
pub use metrics::{SimilarityMetric, Ssim};
pub use pipeline::{RunReport, RunSummary, TilerPipeline};
pub use search::{QualitySearch, SearchOutcome, SearchParams};
pub use sink::{Manifest, ManifestEntry, TileSink};
pub use slide::{ImageSlide, Region, RegionGate, SlideReader};
pub use tiling::TileDescriptor;

/// Channels per pixel in a [`PixelBuffer`].
pub const RGB_CHANNELS: usize = 3;

/// 8-bit RGB pixels with an explicit row stride.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
    /// Bytes per row (at least `width * 3`).
    pub stride: usize,
    /// Row-major RGB samples.
    pub data: Vec<u8>,
}

impl PixelBuffer {
    /// Create a tightly packed buffer.
    pub fn new(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        Self::with_stride(width, height, width as usize * RGB_CHANNELS, data)
    }

    /// Create a buffer whose rows may carry trailing padding.
    pub fn with_stride(width: u32, height: u32, stride: usize, data: Vec<u8>) -> Result<Self> {
        let row = width as usize * RGB_CHANNELS;
        if stride < row {
            return Err(TilerError::Buffer(format!(
                "Stride {} is shorter than a {}-pixel row",
                stride, width
            )));
        }
        let expected = stride * height as usize;
        if data.len() < expected {
            return Err(TilerError::Buffer(format!(
                "Pixel data size mismatch: expected at least {} bytes, got {}",
                expected,
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            stride,
            data,
        })
    }

    /// A buffer filled with one colour.
    pub fn filled(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        let data = rgb
            .iter()
            .copied()
            .cycle()
            .take(width as usize * height as usize * RGB_CHANNELS)
            .collect();
        Self {
            width,
            height,
            stride: width as usize * RGB_CHANNELS,
            data,
        }
    }

    /// Convert packed RGBA samples to RGB by discarding alpha.
    pub fn from_rgba(width: u32, height: u32, rgba: &[u8]) -> Result<Self> {
        let pixels = width as usize * height as usize;
        if rgba.len() != pixels * 4 {
            return Err(TilerError::Buffer(format!(
                "RGBA size mismatch: expected {} bytes, got {}",
                pixels * 4,
                rgba.len()
            )));
        }
        let mut data = Vec::with_capacity(pixels * RGB_CHANNELS);
        for px in rgba.chunks_exact(4) {
            data.extend_from_slice(&px[..3]);
        }
        Self::new(width, height, data)
    }

    /// Take ownership of an `image` RGB buffer.
    pub fn from_rgb_image(image: image::RgbImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            width,
            height,
            stride: width as usize * RGB_CHANNELS,
            data: image.into_raw(),
        }
    }

    /// Copy into a packed `image` RGB buffer.
    pub fn to_rgb_image(&self) -> image::RgbImage {
        let row = self.width as usize * RGB_CHANNELS;
        let mut packed = Vec::with_capacity(row * self.height as usize);
        for y in 0..self.height as usize {
            packed.extend_from_slice(self.row(y));
        }
        // Length is exactly width * height * 3, so construction cannot fail.
        image::RgbImage::from_raw(self.width, self.height, packed)
            .unwrap_or_else(|| image::RgbImage::new(self.width, self.height))
    }

    /// Samples of row `y`, without padding.
    pub fn row(&self, y: usize) -> &[u8] {
        let start = y * self.stride;
        &self.data[start..start + self.width as usize * RGB_CHANNELS]
    }

    /// RGB triple at `(x, y)`.
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 3] {
        let i = y as usize * self.stride + x as usize * RGB_CHANNELS;
        [self.data[i], self.data[i + 1], self.data[i + 2]]
    }

    /// `(width, height)`.
    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Uncompressed size of the pixels (no padding).
    pub fn raw_bytes(&self) -> u64 {
        raw_bytes(self.width, self.height)
    }
}

/// Uncompressed 8-bit RGB size of a `w x h` region.
pub fn raw_bytes(width: u32, height: u32) -> u64 {
    width as u64 * height as u64 * RGB_CHANNELS as u64
}

/// Library version information.
pub mod version {
    /// Library version string.
    pub const VERSION: &str = env!("CARGO_PKG_VERSION");

    /// Library name.
    pub const NAME: &str = env!("CARGO_PKG_NAME");

    /// Get full version string.
    pub fn full_version() -> String {
        format!("{} {}", NAME, VERSION)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pixel_buffer_validation() {
        assert!(PixelBuffer::new(4, 4, vec![0; 48]).is_ok());
        assert!(PixelBuffer::new(4, 4, vec![0; 47]).is_err());
        assert!(PixelBuffer::with_stride(4, 2, 11, vec![0; 22]).is_err());
    }

    #[test]
    fn test_from_rgba_drops_alpha() {
        let rgba = vec![1, 2, 3, 255, 4, 5, 6, 0];
        let buf = PixelBuffer::from_rgba(2, 1, &rgba).unwrap();
        assert_eq!(buf.data, vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(buf.stride, 6);
    }

    #[test]
    fn test_padded_rows_are_stripped() {
        // 2x2 image with 2 bytes of padding per row.
        let data = vec![
            1, 1, 1, 2, 2, 2, 0, 0, //
            3, 3, 3, 4, 4, 4, 0, 0,
        ];
        let buf = PixelBuffer::with_stride(2, 2, 8, data).unwrap();
        assert_eq!(buf.pixel(1, 1), [4, 4, 4]);
        assert_eq!(buf.to_rgb_image().into_raw(), vec![1, 1, 1, 2, 2, 2, 3, 3, 3, 4, 4, 4]);
        assert_eq!(buf.raw_bytes(), 12);
    }

    #[test]
    fn test_filled() {
        let buf = PixelBuffer::filled(3, 2, [10, 20, 30]);
        assert_eq!(buf.data.len(), 18);
        assert_eq!(buf.pixel(2, 1), [10, 20, 30]);
    }
}
