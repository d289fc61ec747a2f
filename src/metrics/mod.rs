//! Perceptual similarity between an original tile and its round trip.
//!
//! The quality search only depends on the [`SimilarityMetric`] trait, so a
//! deterministic stub can stand in for SSIM in tests.
//!
//! # Example
//!
//! ```rust,ignore
//! use tissue_tiler::metrics::{SimilarityMetric, Ssim};
//!
//! let score = Ssim::default().score(&original, &decoded)?;
//! println!("SSIM: {:.4}", score);
//! ```

mod ssim;

pub use ssim::Ssim;

use crate::error::{Result, TilerError};
use crate::PixelBuffer;

/// Scores how close `test` is to `reference`, in `[0, 1]`.
pub trait SimilarityMetric: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Compare two equally sized buffers.
    ///
    /// # Errors
    ///
    /// Returns [`TilerError::ShapeMismatch`] if the dimensions differ.
    fn score(&self, reference: &PixelBuffer, test: &PixelBuffer) -> Result<f64>;
}

/// Validate that two buffers can be compared.
pub(crate) fn validate_buffers(reference: &PixelBuffer, test: &PixelBuffer) -> Result<()> {
    if reference.dimensions() != test.dimensions() {
        return Err(TilerError::shape_mismatch(
            reference.dimensions(),
            test.dimensions(),
        ));
    }
    Ok(())
}

/// Extract one channel as `f64`, dropping row padding.
pub(crate) fn extract_channel(buffer: &PixelBuffer, channel: usize) -> Vec<f64> {
    let mut values = Vec::with_capacity(buffer.width as usize * buffer.height as usize);
    for y in 0..buffer.height as usize {
        values.extend(
            buffer
                .row(y)
                .chunks_exact(crate::RGB_CHANNELS)
                .map(|px| px[channel] as f64),
        );
    }
    values
}
