//! Callback-based progress reporting.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::TilerError;
use crate::pipeline::RunSummary;
use crate::tiling::TileDescriptor;

use super::handler::{ProgressEvent, ProgressHandler};

type ErrorCallback = Arc<dyn Fn(&TilerError, Option<&TileDescriptor>) + Send + Sync>;
type CompleteCallback = Arc<dyn Fn(&RunSummary) + Send + Sync>;

/// A progress handler that invokes a callback function.
///
/// # Example
///
/// ```rust,ignore
/// use tissue_tiler::progress::CallbackProgress;
///
/// let progress = CallbackProgress::new(|event| {
///     println!("[{:.1}%] {}", event.overall_progress * 100.0, event.message);
/// })
/// .on_error(|err, tile| eprintln!("tile {:?}: {}", tile.map(|t| t.id), err));
/// ```
pub struct CallbackProgress<F>
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    callback: F,
    error_callback: Option<ErrorCallback>,
    complete_callback: Option<CompleteCallback>,
    cancelled: Arc<AtomicBool>,
}

impl<F> CallbackProgress<F>
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    /// Create a new callback progress handler.
    pub fn new(callback: F) -> Self {
        Self {
            callback,
            error_callback: None,
            complete_callback: None,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Set an error callback.
    pub fn on_error<E>(mut self, callback: E) -> Self
    where
        E: Fn(&TilerError, Option<&TileDescriptor>) + Send + Sync + 'static,
    {
        self.error_callback = Some(Arc::new(callback));
        self
    }

    /// Set a completion callback.
    pub fn on_complete<C>(mut self, callback: C) -> Self
    where
        C: Fn(&RunSummary) + Send + Sync + 'static,
    {
        self.complete_callback = Some(Arc::new(callback));
        self
    }

    /// Request cancellation. Tiles already running still finish.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// Shared flag, for cancelling after the handler has been handed off.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        self.cancelled.clone()
    }
}

impl<F> ProgressHandler for CallbackProgress<F>
where
    F: Fn(ProgressEvent) + Send + Sync,
{
    fn on_progress(&self, event: &ProgressEvent) {
        (self.callback)(event.clone());
    }

    fn on_error(&self, error: &TilerError, tile: Option<&TileDescriptor>) {
        if let Some(ref callback) = self.error_callback {
            callback(error, tile);
        }
    }

    fn on_complete(&self, summary: &RunSummary) {
        if let Some(ref callback) = self.complete_callback {
            callback(summary);
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_callback_progress_receives_events() {
        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = count.clone();

        let progress = CallbackProgress::new(move |_| {
            count_clone.fetch_add(1, Ordering::SeqCst);
        });

        progress.on_progress(&ProgressEvent::default());
        progress.on_progress(&ProgressEvent::default());
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_callback_progress_with_error_handler() {
        let seen = Arc::new(AtomicUsize::new(0));
        let seen_clone = seen.clone();

        let progress = CallbackProgress::new(|_| {}).on_error(move |err, tile| {
            assert_eq!(err.kind(), crate::error::ErrorKind::EncodeFailure);
            seen_clone.store(tile.map_or(0, |t| t.id as usize), Ordering::SeqCst);
        });

        let tile = TileDescriptor::new(9, crate::slide::Region::new(0, 0, 8, 8), 1.0);
        ProgressHandler::on_error(&progress, &TilerError::Encode("x".into()), Some(&tile));
        assert_eq!(seen.load(Ordering::SeqCst), 9);
    }

    #[test]
    fn test_callback_progress_cancellation() {
        let progress = CallbackProgress::new(|_| {});
        assert!(!progress.is_cancelled());

        let flag = progress.cancel_flag();
        flag.store(true, Ordering::SeqCst);
        assert!(progress.is_cancelled());

        let other = CallbackProgress::new(|_| {});
        other.cancel();
        assert!(other.is_cancelled());
    }
}
