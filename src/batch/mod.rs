//! Parallel per-tile processing.
//!
//! Each tile runs gated fetch, quality search, atomic persist, and manifest
//! record on one worker of a fixed-size pool. Errors and panics are caught
//! per tile and become failure rows; they never abort the run.
//!
//! # Example
//!
//! ```rust,ignore
//! use tissue_tiler::batch::TileProcessor;
//!
//! let processor = TileProcessor::new(&gate, &codec, &metric, params, &sink, &manifest)
//!     .workers(8)
//!     .progress(&bar);
//! let outcomes = processor.process(&tiles)?;
//! ```

mod job;
mod scheduler;

pub use job::{JobStatus, TileOutcome};
pub use scheduler::BatchScheduler;

use std::path::PathBuf;
use std::time::Instant;

use crate::codec::TileCodec;
use crate::error::Result;
use crate::metrics::SimilarityMetric;
use crate::progress::{NullProgress, ProgressEvent, ProgressHandler};
use crate::search::{QualitySearch, SearchOutcome, SearchParams};
use crate::sink::{Manifest, TileSink};
use crate::slide::RegionGate;
use crate::tiling::TileDescriptor;

/// Drives the per-tile pipeline over a worker pool.
pub struct TileProcessor<'a> {
    gate: &'a RegionGate,
    codec: &'a dyn TileCodec,
    metric: &'a dyn SimilarityMetric,
    params: SearchParams,
    sink: &'a TileSink,
    manifest: &'a Manifest,
    progress: &'a dyn ProgressHandler,
    scheduler: BatchScheduler,
}

impl<'a> TileProcessor<'a> {
    /// Create a processor using all available CPUs and no progress output.
    pub fn new(
        gate: &'a RegionGate,
        codec: &'a dyn TileCodec,
        metric: &'a dyn SimilarityMetric,
        params: SearchParams,
        sink: &'a TileSink,
        manifest: &'a Manifest,
    ) -> Self {
        Self {
            gate,
            codec,
            metric,
            params,
            sink,
            manifest,
            progress: &NullProgress,
            scheduler: BatchScheduler::default(),
        }
    }

    /// Set the number of workers.
    pub fn workers(mut self, n: usize) -> Self {
        self.scheduler = BatchScheduler::new(n);
        self
    }

    /// Set the progress handler.
    pub fn progress(mut self, progress: &'a dyn ProgressHandler) -> Self {
        self.progress = progress;
        self
    }

    /// Number of workers.
    pub fn num_workers(&self) -> usize {
        self.scheduler.num_threads()
    }

    /// Request cancellation of remaining tiles.
    pub fn cancel(&self) {
        self.scheduler.cancel();
    }

    /// Process all tiles. Every tile gets exactly one manifest row.
    ///
    /// Only setup problems (invalid search parameters, pool creation) are
    /// returned as errors.
    pub fn process(&self, tiles: &[TileDescriptor]) -> Result<Vec<TileOutcome>> {
        let search = QualitySearch::new(self.codec, self.metric, self.params.clone())?;
        if self.progress.is_cancelled() {
            self.scheduler.cancel();
        }

        log::info!(
            "Encoding {} tiles with {} workers ({} {}, target {:.4})",
            tiles.len(),
            self.num_workers(),
            self.codec.info().name,
            self.metric.name(),
            self.params.threshold()
        );

        self.scheduler.schedule_with_progress(
            tiles,
            |tile| self.process_tile(&search, tile),
            |outcome, done, total| self.finish_tile(outcome, done, total),
        )
    }

    fn process_tile(&self, search: &QualitySearch<'_>, tile: &TileDescriptor) -> TileOutcome {
        let start = Instant::now();
        let result = self.encode_tile(search, tile);
        let duration_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok((outcome, path)) => {
                if !outcome.feasible {
                    log::warn!(
                        "Tile {} {} misses the target even at d={:.3} (score {:.5})",
                        tile.id,
                        tile.region,
                        outcome.distance,
                        outcome.score
                    );
                }
                TileOutcome::encoded(tile.clone(), &outcome, &path, duration_ms)
            }
            Err(e) => {
                log::warn!("Tile {} {} failed: {}", tile.id, tile.region, e);
                TileOutcome::failed(tile.clone(), e, duration_ms)
            }
        }
    }

    /// Gate, search, persist.
    fn encode_tile(
        &self,
        search: &QualitySearch<'_>,
        tile: &TileDescriptor,
    ) -> Result<(SearchOutcome, PathBuf)> {
        let pixels = self.gate.fetch(&tile.region)?;
        let outcome = search.run(&pixels)?;
        let path = self.sink.persist(tile, &outcome.bytes)?;
        Ok((outcome, path))
    }

    /// Record and report a finished tile, on the worker that ran it.
    fn finish_tile(&self, outcome: &TileOutcome, done: usize, total: usize) {
        if let Err(e) = self.manifest.record(outcome.entry.clone()) {
            log::error!("Tile {} not recorded: {}", outcome.tile.id, e);
        }

        log::debug!("{}", outcome);
        if let Some(ref err) = outcome.error {
            self.progress.on_error(err, Some(&outcome.tile));
        }
        self.progress.on_progress(
            &ProgressEvent::tile_done(outcome.tile.id, outcome.status().to_string())
                .with_batch_progress(done, total)
                .with_bytes(outcome.tile.raw_bytes(), outcome.encoded_bytes().unwrap_or(0)),
        );

        if self.progress.is_cancelled() && !self.scheduler.is_cancelled() {
            log::warn!("Cancellation requested; remaining tiles will be skipped");
            self.scheduler.cancel();
        }
    }
}
