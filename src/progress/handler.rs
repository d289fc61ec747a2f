//! Progress handler trait and related types.

use crate::error::TilerError;
use crate::pipeline::RunSummary;
use crate::tiling::TileDescriptor;

/// Stage of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressPhase {
    /// Computing the tissue mask.
    Masking,
    /// Building the tile grid.
    Indexing,
    /// Searching and encoding tiles.
    Encoding,
    /// Writing the manifest and summary.
    Writing,
    /// Run completed.
    Complete,
    /// Run aborted.
    Failed,
}

impl ProgressPhase {
    /// Get a human-readable description of the phase.
    pub fn description(&self) -> &'static str {
        match self {
            Self::Masking => "Detecting tissue",
            Self::Indexing => "Indexing tiles",
            Self::Encoding => "Encoding",
            Self::Writing => "Writing manifest",
            Self::Complete => "Complete",
            Self::Failed => "Failed",
        }
    }

    /// Check if this is a terminal phase.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete | Self::Failed)
    }
}

impl std::fmt::Display for ProgressPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Progress event emitted during a run.
#[derive(Debug, Clone)]
pub struct ProgressEvent {
    /// Current phase.
    pub phase: ProgressPhase,

    /// Tile that just finished, if any.
    pub tile_id: Option<u64>,

    /// Number of tiles in the run, once known.
    pub total_tiles: Option<usize>,

    /// Tiles finished so far (any status).
    pub completed_tiles: usize,

    /// Overall progress (0.0 to 1.0).
    pub overall_progress: f64,

    /// Uncompressed bytes of the finished tile.
    pub raw_bytes: u64,

    /// Encoded bytes of the finished tile.
    pub encoded_bytes: u64,

    /// Status message.
    pub message: String,
}

impl Default for ProgressEvent {
    fn default() -> Self {
        Self {
            phase: ProgressPhase::Masking,
            tile_id: None,
            total_tiles: None,
            completed_tiles: 0,
            overall_progress: 0.0,
            raw_bytes: 0,
            encoded_bytes: 0,
            message: String::new(),
        }
    }
}

impl ProgressEvent {
    /// Create a new progress event for a specific phase.
    pub fn new(phase: ProgressPhase) -> Self {
        Self {
            phase,
            message: phase.description().into(),
            ..Default::default()
        }
    }

    /// Phase change with a message.
    pub fn stage(phase: ProgressPhase, message: impl Into<String>) -> Self {
        Self {
            phase,
            message: message.into(),
            ..Default::default()
        }
    }

    /// One tile finished.
    pub fn tile_done(tile_id: u64, message: impl Into<String>) -> Self {
        Self {
            phase: ProgressPhase::Encoding,
            tile_id: Some(tile_id),
            message: message.into(),
            ..Default::default()
        }
    }

    /// Set tile counts.
    pub fn with_batch_progress(mut self, completed: usize, total: usize) -> Self {
        self.completed_tiles = completed;
        self.total_tiles = Some(total);
        if total > 0 {
            self.overall_progress = completed as f64 / total as f64;
        }
        self
    }

    /// Set byte counts.
    pub fn with_bytes(mut self, raw_bytes: u64, encoded_bytes: u64) -> Self {
        self.raw_bytes = raw_bytes;
        self.encoded_bytes = encoded_bytes;
        self
    }
}

impl std::fmt::Display for ProgressEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(total) = self.total_tiles {
            write!(
                f,
                "[{}/{}] {}: {}",
                self.completed_tiles, total, self.phase, self.message
            )
        } else {
            write!(f, "{}: {}", self.phase, self.message)
        }
    }
}

/// Receives progress from a run.
///
/// Called from worker threads, so implementations must be thread-safe.
pub trait ProgressHandler: Send + Sync {
    /// Called when progress is updated.
    fn on_progress(&self, event: &ProgressEvent);

    /// Called when a tile fails.
    fn on_error(&self, error: &TilerError, tile: Option<&TileDescriptor>) {
        let _ = (error, tile);
    }

    /// Called when the run completes.
    fn on_complete(&self, summary: &RunSummary) {
        let _ = summary;
    }

    /// Return `true` to stop starting new tiles.
    ///
    /// Tiles already in flight finish; the rest are recorded as cancelled.
    fn is_cancelled(&self) -> bool {
        false
    }
}

/// A no-op progress handler.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullProgress;

impl ProgressHandler for NullProgress {
    fn on_progress(&self, _event: &ProgressEvent) {}
}
