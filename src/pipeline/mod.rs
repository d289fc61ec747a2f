//! End-to-end tiling run.
//!
//! A run masks the slide, indexes tissue tiles, optionally draws the
//! overlay, encodes every tile on the worker pool, then writes
//! `manifest.csv` and `summary.json` into a fresh timestamped directory:
//!
//! ```text
//! <output.root>/run_<YYYYmmdd_HHMMSS>/
//!     tiles/
//!     manifest.csv
//!     summary.json
//!     overlay.png
//! ```

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::batch::{JobStatus, TileOutcome, TileProcessor};
use crate::codec::{JxlCodec, TileCodec};
use crate::config::TilerConfig;
use crate::error::{Result, TilerError};
use crate::mask::{make_tissue_mask, TissueMask};
use crate::metrics::{SimilarityMetric, Ssim};
use crate::progress::{NullProgress, ProgressEvent, ProgressHandler, ProgressPhase};
use crate::search::SearchParams;
use crate::sink::{Manifest, TileSink};
use crate::slide::{RegionGate, SlideReader};
use crate::tiling::{build_tile_index, save_tile_overlay, TileDescriptor};

/// Manifest file name inside the run directory.
pub const MANIFEST_FILE: &str = "manifest.csv";
/// Summary file name inside the run directory.
pub const SUMMARY_FILE: &str = "summary.json";
/// Overlay file name inside the run directory.
pub const OVERLAY_FILE: &str = "overlay.png";

/// Aggregate statistics of a run, written to `summary.json`.
///
/// `succeeded` counts every tile with a file, infeasible ones included.
/// `failed` counts every tile without one, cancelled ones included.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    /// Local start time, `YYYY-mm-dd HH:MM:SS`.
    pub started_at: String,
    /// Level-0 slide width.
    pub slide_width: u32,
    /// Level-0 slide height.
    pub slide_height: u32,
    /// Pyramid level of the tissue mask.
    pub mask_level: usize,
    /// Tissue fraction of the mask.
    pub tissue_coverage: f64,
    /// Tiles in the index.
    pub total: usize,
    /// Tiles written.
    pub succeeded: usize,
    /// Written tiles that missed the quality floor.
    pub infeasible: usize,
    /// Tiles not written.
    pub failed: usize,
    /// Failed tiles that were skipped by cancellation.
    pub cancelled: usize,
    /// Uncompressed bytes of written tiles.
    pub raw_bytes: u64,
    /// Encoded bytes of written tiles.
    pub encoded_bytes: u64,
    /// Similarity target.
    pub ssim_target: f64,
    /// Similarity tolerance.
    pub ssim_tol: f64,
    /// Worker count.
    pub workers: usize,
    /// Wall time of the whole run.
    pub elapsed_ms: u64,
}

impl RunSummary {
    /// Count outcomes.
    pub fn from_outcomes(outcomes: &[TileOutcome]) -> Self {
        let mut summary = Self {
            total: outcomes.len(),
            ..Self::default()
        };
        for outcome in outcomes {
            match outcome.status() {
                JobStatus::Completed | JobStatus::Infeasible => {
                    summary.succeeded += 1;
                    summary.raw_bytes += outcome.tile.raw_bytes();
                    summary.encoded_bytes += outcome.encoded_bytes().unwrap_or(0);
                    if outcome.status() == JobStatus::Infeasible {
                        summary.infeasible += 1;
                    }
                }
                JobStatus::Failed => summary.failed += 1,
                JobStatus::Cancelled => {
                    summary.failed += 1;
                    summary.cancelled += 1;
                }
            }
        }
        summary
    }

    /// Raw over encoded bytes of written tiles.
    pub fn overall_ratio(&self) -> f64 {
        if self.encoded_bytes == 0 {
            0.0
        } else {
            self.raw_bytes as f64 / self.encoded_bytes as f64
        }
    }

    /// Space saved by encoding, in percent.
    pub fn overall_savings_percent(&self) -> f64 {
        if self.raw_bytes == 0 {
            0.0
        } else {
            (1.0 - self.encoded_bytes as f64 / self.raw_bytes as f64) * 100.0
        }
    }
}

/// Everything a finished run produced.
#[derive(Debug)]
pub struct RunReport {
    /// Run directory.
    pub run_dir: PathBuf,
    /// Aggregate statistics.
    pub summary: RunSummary,
    /// Per-tile outcomes, in index order.
    pub outcomes: Vec<TileOutcome>,
}

/// Mask and tile index without encoding.
#[derive(Debug)]
pub struct IndexReport {
    /// Level-0 slide dimensions.
    pub dimensions: (u32, u32),
    /// Tissue mask.
    pub mask: TissueMask,
    /// Tiles passing the coverage filter.
    pub tiles: Vec<TileDescriptor>,
}

/// Tiling pipeline with injectable codec, metric, and progress handler.
pub struct TilerPipeline {
    config: TilerConfig,
    codec: Box<dyn TileCodec>,
    metric: Box<dyn SimilarityMetric>,
    progress: Box<dyn ProgressHandler>,
}

impl TilerPipeline {
    /// Pipeline using JPEG XL and SSIM as configured.
    pub fn new(config: TilerConfig) -> Self {
        let codec = JxlCodec::from_config(&config.jxl);
        Self {
            config,
            codec: Box::new(codec),
            metric: Box::new(Ssim::default()),
            progress: Box::new(NullProgress),
        }
    }

    /// Replace the codec.
    pub fn with_codec(mut self, codec: Box<dyn TileCodec>) -> Self {
        self.codec = codec;
        self
    }

    /// Replace the similarity metric.
    pub fn with_metric(mut self, metric: Box<dyn SimilarityMetric>) -> Self {
        self.metric = metric;
        self
    }

    /// Set the progress handler.
    pub fn with_progress(mut self, progress: Box<dyn ProgressHandler>) -> Self {
        self.progress = progress;
        self
    }

    /// Configuration in use.
    pub fn config(&self) -> &TilerConfig {
        &self.config
    }

    /// Compute the mask and tile index, and write the overlay to `overlay`
    /// if given.
    pub fn index(&self, slide: Box<dyn SlideReader>, overlay: Option<&Path>) -> Result<IndexReport> {
        self.config.validate()?;
        let gate = RegionGate::new(slide);
        let (mask, tiles) = self.index_gate(&gate)?;
        if let Some(path) = overlay {
            save_tile_overlay(&gate, &mask, &tiles, &self.config.visualizer, path)?;
        }
        Ok(IndexReport {
            dimensions: gate.dimensions(),
            mask,
            tiles,
        })
    }

    /// Run the full pipeline on `slide`.
    ///
    /// The configuration and the codec are checked before anything is
    /// written. The progress handler sees a `Complete` or `Failed` event last.
    pub fn run(&self, slide: Box<dyn SlideReader>) -> Result<RunReport> {
        match self.run_stages(slide) {
            Ok(report) => {
                self.progress.on_progress(
                    &ProgressEvent::stage(ProgressPhase::Complete, report.run_dir.display().to_string())
                        .with_batch_progress(report.summary.total, report.summary.total),
                );
                self.progress.on_complete(&report.summary);
                Ok(report)
            }
            Err(e) => {
                log::error!("Run aborted: {}", e);
                self.progress
                    .on_progress(&ProgressEvent::stage(ProgressPhase::Failed, e.to_string()));
                self.progress.on_error(&e, None);
                Err(e)
            }
        }
    }

    fn run_stages(&self, slide: Box<dyn SlideReader>) -> Result<RunReport> {
        let start = Instant::now();
        let started_at = chrono::Local::now();
        self.config.validate()?;
        self.codec.probe()?;

        let run_dir = create_run_dir(&self.config.output.root, &started_at)?;
        log::info!("Run directory: {}", run_dir.display());

        let gate = RegionGate::new(slide);
        let (mask, tiles) = self.index_gate(&gate)?;

        if self.config.visualizer.enabled {
            let path = run_dir.join(OVERLAY_FILE);
            if let Err(e) = save_tile_overlay(&gate, &mask, &tiles, &self.config.visualizer, &path) {
                log::warn!("Overlay not written: {}", e);
            }
        }

        let sink = TileSink::new(&run_dir, self.codec.info().extension)?;
        let manifest_path = run_dir.join(MANIFEST_FILE);
        let manifest = Manifest::with_journal(&manifest_path)?;
        let params = SearchParams::from_config(&self.config.encoder, &self.config.jxl);
        self.progress.on_progress(
            &ProgressEvent::stage(ProgressPhase::Encoding, format!("Encoding {} tiles", tiles.len()))
                .with_batch_progress(0, tiles.len()),
        );

        let outcomes = TileProcessor::new(
            &gate,
            self.codec.as_ref(),
            self.metric.as_ref(),
            params,
            &sink,
            &manifest,
        )
        .workers(self.config.encoder.workers)
        .progress(self.progress.as_ref())
        .process(&tiles)?;

        self.progress
            .on_progress(&ProgressEvent::stage(ProgressPhase::Writing, "Writing manifest"));
        manifest.write_csv(&manifest_path)?;

        let (slide_width, slide_height) = gate.dimensions();
        let summary = RunSummary {
            started_at: started_at.format("%Y-%m-%d %H:%M:%S").to_string(),
            slide_width,
            slide_height,
            mask_level: mask.level,
            tissue_coverage: mask.coverage,
            ssim_target: self.config.encoder.ssim_target,
            ssim_tol: self.config.encoder.ssim_tol,
            workers: self.config.encoder.workers,
            elapsed_ms: start.elapsed().as_millis() as u64,
            ..RunSummary::from_outcomes(&outcomes)
        };
        write_summary(&run_dir.join(SUMMARY_FILE), &summary)?;

        log::info!(
            "Done: {} of {} tiles written ({} infeasible), {} failed, ratio {:.2}:1 in {} ms",
            summary.succeeded,
            summary.total,
            summary.infeasible,
            summary.failed,
            summary.overall_ratio(),
            summary.elapsed_ms
        );

        Ok(RunReport {
            run_dir,
            summary,
            outcomes,
        })
    }

    fn index_gate(&self, gate: &RegionGate) -> Result<(TissueMask, Vec<TileDescriptor>)> {
        self.progress
            .on_progress(&ProgressEvent::new(ProgressPhase::Masking));
        let mask = make_tissue_mask(gate, &self.config.mask)?;

        self.progress
            .on_progress(&ProgressEvent::new(ProgressPhase::Indexing));
        let tiles = build_tile_index(gate.dimensions(), &mask, &self.config.indexer)?;
        Ok((mask, tiles))
    }
}

/// Create `<root>/run_<timestamp>`, adding a numeric suffix if it exists.
pub fn create_run_dir<Tz>(root: &Path, at: &chrono::DateTime<Tz>) -> Result<PathBuf>
where
    Tz: chrono::TimeZone,
    Tz::Offset: std::fmt::Display,
{
    std::fs::create_dir_all(root)?;
    let base = format!("run_{}", at.format("%Y%m%d_%H%M%S"));
    for attempt in 0..1000 {
        let name = if attempt == 0 {
            base.clone()
        } else {
            format!("{}_{}", base, attempt)
        };
        let candidate = root.join(name);
        match std::fs::create_dir(&candidate) {
            Ok(()) => return Ok(candidate),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Err(TilerError::Internal(format!(
        "No free run directory name under {}",
        root.display()
    )))
}

fn write_summary(path: &Path, summary: &RunSummary) -> Result<()> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let mut tmp = NamedTempFile::new_in(dir)?;
    serde_json::to_writer_pretty(&mut tmp, summary)
        .map_err(|e| TilerError::Manifest(format!("Cannot serialize summary: {}", e)))?;
    tmp.write_all(b"\n")?;
    tmp.as_file().sync_all()?;
    tmp.persist(path)?;
    Ok(())
}
