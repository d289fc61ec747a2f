//! Crash-safe output: encoded tile files and the run manifest.
//!
//! Tile files are written to a temporary file in the destination directory,
//! synced, then renamed into place. A reader never sees a partially written
//! file under a final tile name.

mod manifest;

pub use manifest::{Manifest, ManifestEntry, TileStatus, COLUMNS};

use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::NamedTempFile;

use crate::error::Result;
use crate::tiling::TileDescriptor;

/// Subdirectory of the run directory holding tile files.
pub const TILES_DIR: &str = "tiles";

/// Writes encoded tiles into `<run_dir>/tiles/`.
#[derive(Debug, Clone)]
pub struct TileSink {
    run_dir: PathBuf,
    tiles_dir: PathBuf,
    extension: &'static str,
}

impl TileSink {
    /// Create the tile directory under `run_dir`.
    pub fn new(run_dir: impl Into<PathBuf>, extension: &'static str) -> Result<Self> {
        let run_dir = run_dir.into();
        let tiles_dir = run_dir.join(TILES_DIR);
        std::fs::create_dir_all(&tiles_dir)?;
        Ok(Self {
            run_dir,
            tiles_dir,
            extension,
        })
    }

    /// Run directory.
    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    /// Directory receiving tile files.
    pub fn tiles_dir(&self) -> &Path {
        &self.tiles_dir
    }

    /// Atomically write `bytes` under the tile's deterministic name.
    ///
    /// Returns the path relative to the run directory. An existing file with
    /// the same name is replaced.
    pub fn persist(&self, tile: &TileDescriptor, bytes: &[u8]) -> Result<PathBuf> {
        let name = tile.file_name(self.extension);
        let final_path = self.tiles_dir.join(&name);

        // Dropped (and deleted) on every early return below.
        let mut tmp = NamedTempFile::new_in(&self.tiles_dir)?;
        tmp.write_all(bytes)?;
        tmp.flush()?;
        tmp.as_file().sync_all()?;
        tmp.persist(&final_path)?;

        log::trace!("Wrote {} ({} bytes)", final_path.display(), bytes.len());
        Ok(Path::new(TILES_DIR).join(name))
    }
}
