//! Error types for the tissue tiling library.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for the library.
pub type Result<T> = std::result::Result<T, TilerError>;

/// Main error type for the tissue tiling library.
#[derive(Error, Debug)]
pub enum TilerError {
    /// Region could not be read from the slide (out of bounds or reader I/O error).
    #[error("Read failure: {0}")]
    Read(String),

    /// External encoder failed or produced no output.
    #[error("Encode failure: {0}")]
    Encode(String),

    /// External decoder failed or produced no output.
    #[error("Decode failure: {0}")]
    Decode(String),

    /// Two buffers that must share dimensions do not.
    #[error("Shape mismatch: expected {expected_width}x{expected_height}, got {actual_width}x{actual_height}")]
    ShapeMismatch {
        /// Width of the reference buffer.
        expected_width: u32,
        /// Height of the reference buffer.
        expected_height: u32,
        /// Width of the offending buffer.
        actual_width: u32,
        /// Height of the offending buffer.
        actual_height: u32,
    },

    /// Invalid or inconsistent configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Pixel buffer has an invalid layout.
    #[error("Pixel buffer error: {0}")]
    Buffer(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Manifest could not be updated or written.
    #[error("Manifest error: {0}")]
    Manifest(String),

    /// Tile was not processed because the run was cancelled.
    #[error("Cancelled")]
    Cancelled,

    /// Generic internal error (including worker panics).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl TilerError {
    /// Build a shape mismatch error from two `(width, height)` pairs.
    pub fn shape_mismatch(expected: (u32, u32), actual: (u32, u32)) -> Self {
        TilerError::ShapeMismatch {
            expected_width: expected.0,
            expected_height: expected.1,
            actual_width: actual.0,
            actual_height: actual.1,
        }
    }

    /// Classify the error for the manifest.
    pub fn kind(&self) -> ErrorKind {
        match self {
            TilerError::Read(_) => ErrorKind::ReadFailure,
            TilerError::Encode(_) => ErrorKind::EncodeFailure,
            TilerError::Decode(_) => ErrorKind::DecodeFailure,
            TilerError::ShapeMismatch { .. } | TilerError::Buffer(_) => ErrorKind::ShapeMismatch,
            TilerError::Config(_) => ErrorKind::Config,
            TilerError::Io(_) => ErrorKind::Io,
            TilerError::Manifest(_) => ErrorKind::Manifest,
            TilerError::Cancelled => ErrorKind::Cancelled,
            TilerError::Internal(_) => ErrorKind::Internal,
        }
    }
}

impl From<image::ImageError> for TilerError {
    fn from(err: image::ImageError) -> Self {
        TilerError::Io(std::io::Error::new(std::io::ErrorKind::Other, err.to_string()))
    }
}

impl From<csv::Error> for TilerError {
    fn from(err: csv::Error) -> Self {
        TilerError::Manifest(err.to_string())
    }
}

impl From<toml::de::Error> for TilerError {
    fn from(err: toml::de::Error) -> Self {
        TilerError::Config(err.to_string())
    }
}

impl From<tempfile::PersistError> for TilerError {
    fn from(err: tempfile::PersistError) -> Self {
        TilerError::Io(err.error)
    }
}

/// Failure classification recorded per tile in the manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Region unreadable.
    ReadFailure,
    /// Encoder invocation failed.
    EncodeFailure,
    /// Decoder invocation failed.
    DecodeFailure,
    /// Buffer dimensions disagree (a defect, never retried).
    ShapeMismatch,
    /// Bad configuration.
    Config,
    /// Filesystem error while persisting.
    Io,
    /// Manifest rejected the entry.
    Manifest,
    /// Run cancelled before the tile started.
    Cancelled,
    /// Worker panicked or hit an unexpected state.
    Internal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::ReadFailure => "ReadFailure",
            Self::EncodeFailure => "EncodeFailure",
            Self::DecodeFailure => "DecodeFailure",
            Self::ShapeMismatch => "ShapeMismatch",
            Self::Config => "Config",
            Self::Io => "Io",
            Self::Manifest => "Manifest",
            Self::Cancelled => "Cancelled",
            Self::Internal => "Internal",
        };
        write!(f, "{}", name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kind_classification() {
        assert_eq!(TilerError::Read("x".into()).kind(), ErrorKind::ReadFailure);
        assert_eq!(TilerError::Encode("x".into()).kind(), ErrorKind::EncodeFailure);
        assert_eq!(TilerError::Decode("x".into()).kind(), ErrorKind::DecodeFailure);
        assert_eq!(
            TilerError::shape_mismatch((4, 4), (2, 2)).kind(),
            ErrorKind::ShapeMismatch
        );
        assert_eq!(TilerError::Cancelled.kind(), ErrorKind::Cancelled);
    }

    #[test]
    fn test_shape_mismatch_message() {
        let err = TilerError::shape_mismatch((512, 512), (256, 512));
        assert_eq!(
            err.to_string(),
            "Shape mismatch: expected 512x512, got 256x512"
        );
    }

    #[test]
    fn test_error_kind_display() {
        assert_eq!(ErrorKind::EncodeFailure.to_string(), "EncodeFailure");
        assert_eq!(ErrorKind::Internal.to_string(), "Internal");
    }
}
