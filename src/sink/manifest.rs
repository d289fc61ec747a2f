//! Append-only per-tile manifest, written as CSV.

use std::collections::HashSet;
use std::fs::File;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::error::{ErrorKind, Result, TilerError};
use crate::search::SearchOutcome;
use crate::tiling::TileDescriptor;

/// Outcome class of a manifest row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TileStatus {
    /// Encoded at a distance meeting the quality floor.
    Encoded,
    /// Encoded at `dist_min`, which still missed the floor.
    Infeasible,
    /// No tile file was produced.
    Failed,
}

/// CSV header, in column order.
pub const COLUMNS: [&str; 19] = [
    "tile_id",
    "x",
    "y",
    "w",
    "h",
    "coverage",
    "status",
    "distance",
    "score",
    "raw_bytes",
    "encoded_bytes",
    "ratio",
    "encode_ms",
    "decode_ms",
    "feasible",
    "iterations",
    "path",
    "error_kind",
    "error_message",
];

/// One manifest row. Optional columns are empty in failure rows.
///
/// Field names are the CSV column names (see [`COLUMNS`]).
#[allow(missing_docs)]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub tile_id: u64,
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
    pub coverage: f64,
    pub status: TileStatus,
    pub distance: Option<f32>,
    pub score: Option<f64>,
    pub raw_bytes: u64,
    pub encoded_bytes: Option<u64>,
    pub ratio: Option<f64>,
    pub encode_ms: Option<f64>,
    pub decode_ms: Option<f64>,
    pub feasible: Option<bool>,
    pub iterations: Option<u32>,
    pub path: Option<String>,
    pub error_kind: Option<ErrorKind>,
    pub error_message: Option<String>,
}

impl ManifestEntry {
    /// Row for a tile that was encoded and persisted.
    pub fn encoded(tile: &TileDescriptor, outcome: &SearchOutcome, path: &Path) -> Self {
        let raw = tile.raw_bytes();
        let encoded = outcome.bytes.len() as u64;
        Self {
            status: if outcome.feasible {
                TileStatus::Encoded
            } else {
                TileStatus::Infeasible
            },
            distance: Some(outcome.distance),
            score: Some(outcome.score),
            encoded_bytes: Some(encoded),
            ratio: (encoded > 0).then(|| raw as f64 / encoded as f64),
            encode_ms: Some(outcome.encode_ms),
            decode_ms: Some(outcome.decode_ms),
            feasible: Some(outcome.feasible),
            iterations: Some(outcome.iterations),
            path: Some(path.to_string_lossy().into_owned()),
            ..Self::blank(tile, TileStatus::Encoded)
        }
    }

    /// Row for a tile whose processing failed.
    pub fn failed(tile: &TileDescriptor, error: &TilerError) -> Self {
        Self {
            error_kind: Some(error.kind()),
            error_message: Some(error.to_string()),
            ..Self::blank(tile, TileStatus::Failed)
        }
    }

    fn blank(tile: &TileDescriptor, status: TileStatus) -> Self {
        Self {
            tile_id: tile.id,
            x: tile.region.x,
            y: tile.region.y,
            w: tile.region.width,
            h: tile.region.height,
            coverage: tile.coverage,
            status,
            distance: None,
            score: None,
            raw_bytes: tile.raw_bytes(),
            encoded_bytes: None,
            ratio: None,
            encode_ms: None,
            decode_ms: None,
            feasible: None,
            iterations: None,
            path: None,
            error_kind: None,
            error_message: None,
        }
    }

    /// Whether a tile file was produced.
    pub fn is_success(&self) -> bool {
        self.status != TileStatus::Failed
    }
}

#[derive(Default)]
struct ManifestState {
    entries: Vec<ManifestEntry>,
    ids: HashSet<u64>,
    /// Rows appended to disk as they are recorded.
    journal: Option<csv::Writer<File>>,
}

impl std::fmt::Debug for ManifestState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManifestState")
            .field("entries", &self.entries.len())
            .field("journal", &self.journal.is_some())
            .finish()
    }
}

/// Shared append-only record of tile outcomes, in completion order.
#[derive(Debug, Default)]
pub struct Manifest {
    state: Mutex<ManifestState>,
}

impl Manifest {
    /// Create an empty manifest.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty manifest that also appends every row to `path` as it
    /// is recorded, so an interrupted run still leaves the finished rows.
    ///
    /// [`write_csv`](Self::write_csv) to the same path later replaces the
    /// journal with the complete file.
    pub fn with_journal(path: &Path) -> Result<Self> {
        let file = File::create(path)?;
        let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(file);
        writer.write_record(COLUMNS)?;
        writer.flush()?;
        Ok(Self {
            state: Mutex::new(ManifestState {
                journal: Some(writer),
                ..ManifestState::default()
            }),
        })
    }

    /// Append a row. A second row for the same tile id is rejected.
    pub fn record(&self, entry: ManifestEntry) -> Result<()> {
        let mut state = self.lock()?;
        if !state.ids.insert(entry.tile_id) {
            return Err(TilerError::Manifest(format!(
                "Tile {} already recorded",
                entry.tile_id
            )));
        }
        if let Some(journal) = state.journal.as_mut() {
            let appended = journal
                .serialize(&entry)
                .map_err(TilerError::from)
                .and_then(|()| journal.flush().map_err(TilerError::from));
            if let Err(e) = appended {
                log::warn!("Manifest journal disabled: {}", e);
                state.journal = None;
            }
        }
        state.entries.push(entry);
        Ok(())
    }

    /// Number of rows recorded.
    pub fn len(&self) -> Result<usize> {
        Ok(self.lock()?.entries.len())
    }

    /// Whether no rows were recorded.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Copy of all rows.
    pub fn entries(&self) -> Result<Vec<ManifestEntry>> {
        Ok(self.lock()?.entries.clone())
    }

    /// Write all rows to `path` through a temporary file and atomic rename.
    ///
    /// Closes the journal, if any.
    pub fn write_csv(&self, path: &Path) -> Result<()> {
        let snapshot = {
            let mut state = self.lock()?;
            if let Some(mut journal) = state.journal.take() {
                journal.flush()?;
            }
            state.entries.clone()
        };
        let dir = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };

        let mut tmp = NamedTempFile::new_in(dir)?;
        {
            let mut writer = csv::Writer::from_writer(&mut tmp);
            if snapshot.is_empty() {
                writer.write_record(COLUMNS)?;
            }
            for entry in &snapshot {
                writer.serialize(entry)?;
            }
            writer.flush()?;
        }
        tmp.as_file().sync_all()?;
        tmp.persist(path)?;

        log::debug!("Wrote {} manifest rows to {}", snapshot.len(), path.display());
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, ManifestState>> {
        self.state
            .lock()
            .map_err(|_| TilerError::Manifest("Manifest lock poisoned".into()))
    }
}
