//! Codec adapters for tile compression.
//!
//! This module provides the [`TileCodec`] trait and the JPEG XL adapter,
//! which drives the external `cjxl`/`djxl` binaries through a lossless PNG
//! intermediate.

mod jxl;
#[cfg(test)]
pub(crate) mod raw;

pub use jxl::JxlCodec;

use crate::error::Result;
use crate::PixelBuffer;

/// Information about a codec.
#[derive(Debug, Clone)]
pub struct CodecInfo {
    /// Human-readable codec name.
    pub name: &'static str,
    /// File extension for encoded tiles (without the dot).
    pub extension: &'static str,
}

/// Encode/decode capability used by the quality search.
///
/// Implementations must be safe to call from many workers at once.
pub trait TileCodec: Send + Sync {
    /// Encode `buffer` at the given distance (higher = smaller, lossier).
    ///
    /// # Errors
    ///
    /// [`TilerError::Encode`](crate::TilerError::Encode) if the codec fails or
    /// produces no output.
    fn encode(&self, buffer: &PixelBuffer, distance: f32, effort: u8) -> Result<Vec<u8>>;

    /// Decode bytes produced by [`encode`](TileCodec::encode).
    ///
    /// # Errors
    ///
    /// [`TilerError::Decode`](crate::TilerError::Decode) if the codec fails or
    /// produces no output.
    fn decode(&self, data: &[u8]) -> Result<PixelBuffer>;

    /// Get codec information.
    fn info(&self) -> CodecInfo;

    /// Check that the codec is usable before any work is started.
    fn probe(&self) -> Result<()> {
        Ok(())
    }
}
