//! Progress reporting for tiling runs.
//!
//! - [`ProgressHandler`]: trait receiving events from worker threads
//! - [`CallbackProgress`]: closures plus a cancellation flag
//! - [`BarProgress`]: terminal progress bar used by the CLI
//!
//! # Example
//!
//! ```rust,ignore
//! use tissue_tiler::progress::CallbackProgress;
//!
//! let progress = CallbackProgress::new(|event| {
//!     println!("Progress: {:.1}%", event.overall_progress * 100.0);
//! });
//!
//! let report = TilerPipeline::new(config)
//!     .with_progress(Box::new(progress))
//!     .run(Box::new(slide))?;
//! ```

mod bar;
mod callback;
mod handler;

pub use bar::BarProgress;
pub use callback::CallbackProgress;
pub use handler::{NullProgress, ProgressEvent, ProgressHandler, ProgressPhase};
