//! Tile scheduler using Rayon.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use rayon::prelude::*;

use super::job::TileOutcome;
use crate::error::{Result, TilerError};
use crate::tiling::TileDescriptor;

/// Runs one task per tile on a fixed-size pool.
pub struct BatchScheduler {
    /// Number of threads to use.
    num_threads: usize,

    /// Cancellation flag.
    cancelled: Arc<AtomicBool>,
}

impl BatchScheduler {
    /// Create a new scheduler with the specified number of threads.
    pub fn new(num_threads: usize) -> Self {
        Self {
            num_threads: num_threads.max(1),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Get the number of threads.
    pub fn num_threads(&self) -> usize {
        self.num_threads
    }

    /// Request cancellation. Tiles not yet started are reported as cancelled.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Check if cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Process every tile in parallel.
    ///
    /// Outcomes come back in input order. A panic inside `processor` is
    /// caught and reported as an `Internal` failure for that tile only.
    pub fn schedule<F>(&self, tiles: &[TileDescriptor], processor: F) -> Result<Vec<TileOutcome>>
    where
        F: Fn(&TileDescriptor) -> TileOutcome + Send + Sync,
    {
        self.schedule_with_progress(tiles, processor, |_, _, _| {})
    }

    /// Like [`schedule`](Self::schedule), calling `on_done` on the worker
    /// thread as each tile finishes, with the count of finished tiles and the
    /// total.
    pub fn schedule_with_progress<F, P>(
        &self,
        tiles: &[TileDescriptor],
        processor: F,
        on_done: P,
    ) -> Result<Vec<TileOutcome>>
    where
        F: Fn(&TileDescriptor) -> TileOutcome + Send + Sync,
        P: Fn(&TileOutcome, usize, usize) + Send + Sync,
    {
        let total = tiles.len();
        let completed = AtomicUsize::new(0);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.num_threads)
            .thread_name(|i| format!("tiler-worker-{}", i))
            .build()
            .map_err(|e| TilerError::Internal(format!("Failed to create thread pool: {}", e)))?;

        let outcomes = pool.install(|| {
            tiles
                .par_iter()
                .map(|tile| {
                    let outcome = if self.is_cancelled() {
                        TileOutcome::cancelled(tile.clone())
                    } else {
                        run_isolated(tile, &processor)
                    };

                    let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                    on_done(&outcome, done, total);
                    outcome
                })
                .collect()
        });

        Ok(outcomes)
    }
}

impl Default for BatchScheduler {
    fn default() -> Self {
        Self::new(num_cpus::get())
    }
}

fn run_isolated<F>(tile: &TileDescriptor, processor: &F) -> TileOutcome
where
    F: Fn(&TileDescriptor) -> TileOutcome,
{
    match catch_unwind(AssertUnwindSafe(|| processor(tile))) {
        Ok(outcome) => outcome,
        Err(payload) => {
            let msg = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            log::error!("Worker panicked on tile {}: {}", tile.id, msg);
            TileOutcome::failed(
                tile.clone(),
                TilerError::Internal(format!("Worker panicked: {}", msg)),
                0,
            )
        }
    }
}
