//! Per-tile results.

use std::path::Path;

use crate::error::{ErrorKind, TilerError};
use crate::search::SearchOutcome;
use crate::sink::{ManifestEntry, TileStatus};
use crate::tiling::TileDescriptor;

/// Final state of one tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    /// Encoded within the quality floor.
    Completed,
    /// Encoded at `dist_min` without reaching the floor.
    Infeasible,
    /// An error or panic stopped the tile.
    Failed,
    /// Skipped because the run was cancelled.
    Cancelled,
}

impl JobStatus {
    /// Check if a tile file was written.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Completed | Self::Infeasible)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Completed => write!(f, "Completed"),
            Self::Infeasible => write!(f, "Infeasible"),
            Self::Failed => write!(f, "Failed"),
            Self::Cancelled => write!(f, "Cancelled"),
        }
    }
}

/// Result of processing one tile.
///
/// The encoded bytes are not kept; they live in the tile file.
#[derive(Debug)]
pub struct TileOutcome {
    /// The tile that was processed.
    pub tile: TileDescriptor,

    /// Manifest row for the tile.
    pub entry: ManifestEntry,

    /// Error (if failed).
    pub error: Option<TilerError>,

    /// Wall time spent on the tile, in milliseconds.
    pub duration_ms: u64,
}

impl TileOutcome {
    /// Tile encoded and persisted at `path`.
    pub fn encoded(tile: TileDescriptor, search: &SearchOutcome, path: &Path, duration_ms: u64) -> Self {
        let entry = ManifestEntry::encoded(&tile, search, path);
        Self {
            tile,
            entry,
            error: None,
            duration_ms,
        }
    }

    /// Tile stopped by `error`.
    pub fn failed(tile: TileDescriptor, error: TilerError, duration_ms: u64) -> Self {
        let entry = ManifestEntry::failed(&tile, &error);
        Self {
            tile,
            entry,
            error: Some(error),
            duration_ms,
        }
    }

    /// Tile never started.
    pub fn cancelled(tile: TileDescriptor) -> Self {
        Self::failed(tile, TilerError::Cancelled, 0)
    }

    /// Check if a tile file was written.
    pub fn is_success(&self) -> bool {
        self.status().is_success()
    }

    /// Get the status based on the result.
    pub fn status(&self) -> JobStatus {
        match (self.entry.status, self.entry.error_kind) {
            (TileStatus::Encoded, _) => JobStatus::Completed,
            (TileStatus::Infeasible, _) => JobStatus::Infeasible,
            (TileStatus::Failed, Some(ErrorKind::Cancelled)) => JobStatus::Cancelled,
            (TileStatus::Failed, _) => JobStatus::Failed,
        }
    }

    /// Encoded size, if a tile file was written.
    pub fn encoded_bytes(&self) -> Option<u64> {
        self.entry.encoded_bytes
    }

    /// Compression ratio, if a tile file was written.
    pub fn compression_ratio(&self) -> Option<f64> {
        self.entry.ratio
    }
}

impl std::fmt::Display for TileOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let e = &self.entry;
        match (&self.error, e.distance, e.ratio) {
            (Some(err), _, _) => write!(f, "tile {} {}: {} - {}", self.tile.id, self.tile.region, self.status(), err),
            (None, Some(d), Some(ratio)) => write!(
                f,
                "tile {} {}: {} (d={:.3}, ratio: {:.2}:1, time: {}ms)",
                self.tile.id,
                self.tile.region,
                self.status(),
                d,
                ratio,
                self.duration_ms
            ),
            _ => write!(f, "tile {} {}: {}", self.tile.id, self.tile.region, self.status()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slide::Region;

    fn tile() -> TileDescriptor {
        TileDescriptor::new(5, Region::new(64, 0, 16, 16), 0.8)
    }

    fn search(feasible: bool) -> SearchOutcome {
        SearchOutcome {
            distance: 2.0,
            score: 0.995,
            bytes: vec![1; 96],
            encode_ms: 1.0,
            decode_ms: 1.0,
            feasible,
            iterations: 4,
            evaluations: 5,
        }
    }

    #[test]
    fn test_job_status_success() {
        assert!(JobStatus::Completed.is_success());
        assert!(JobStatus::Infeasible.is_success());
        assert!(!JobStatus::Failed.is_success());
        assert!(!JobStatus::Cancelled.is_success());
    }

    #[test]
    fn test_outcome_success() {
        let outcome = TileOutcome::encoded(tile(), &search(true), Path::new("tiles/t.jxl"), 12);
        assert!(outcome.is_success());
        assert_eq!(outcome.status(), JobStatus::Completed);
        assert_eq!(outcome.compression_ratio(), Some(8.0));
        assert!(outcome.to_string().contains("ratio: 8.00:1"));

        let infeasible = TileOutcome::encoded(tile(), &search(false), Path::new("t"), 3);
        assert_eq!(infeasible.status(), JobStatus::Infeasible);
    }

    #[test]
    fn test_outcome_failure_and_cancel() {
        let failed = TileOutcome::failed(tile(), TilerError::Read("gone".into()), 1);
        assert!(!failed.is_success());
        assert_eq!(failed.status(), JobStatus::Failed);
        assert_eq!(failed.entry.error_kind, Some(ErrorKind::ReadFailure));
        assert!(failed.encoded_bytes().is_none());

        let cancelled = TileOutcome::cancelled(tile());
        assert_eq!(cancelled.status(), JobStatus::Cancelled);
        assert_eq!(cancelled.duration_ms, 0);
    }
}
