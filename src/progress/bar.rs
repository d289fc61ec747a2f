//! Terminal progress bar.

use indicatif::{ProgressBar, ProgressStyle};

use crate::error::TilerError;
use crate::pipeline::RunSummary;
use crate::tiling::TileDescriptor;

use super::handler::{ProgressEvent, ProgressHandler, ProgressPhase};

const TEMPLATE: &str =
    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} tiles ({eta}) {msg}";

/// Progress handler drawing an `indicatif` bar on stderr.
pub struct BarProgress {
    bar: ProgressBar,
}

impl BarProgress {
    /// Create a visible bar.
    pub fn new() -> Self {
        let style = ProgressStyle::with_template(TEMPLATE)
            .map(|s| s.progress_chars("=> "))
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        let bar = ProgressBar::new(0);
        bar.set_style(style);
        Self { bar }
    }

    /// Create a bar that draws nothing.
    pub fn hidden() -> Self {
        Self {
            bar: ProgressBar::hidden(),
        }
    }

    /// Tiles counted so far.
    pub fn position(&self) -> u64 {
        self.bar.position()
    }
}

impl Default for BarProgress {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressHandler for BarProgress {
    fn on_progress(&self, event: &ProgressEvent) {
        if let Some(total) = event.total_tiles {
            if self.bar.length() != Some(total as u64) {
                self.bar.set_length(total as u64);
            }
        }
        match event.phase {
            ProgressPhase::Encoding if event.tile_id.is_some() => {
                self.bar.set_position(event.completed_tiles as u64);
            }
            ProgressPhase::Failed => self.bar.abandon_with_message(event.message.clone()),
            _ => self.bar.set_message(event.message.clone()),
        }
    }

    fn on_error(&self, error: &TilerError, tile: Option<&TileDescriptor>) {
        match tile {
            Some(t) => self.bar.println(format!("tile {} {}: {}", t.id, t.region, error)),
            None => self.bar.println(error.to_string()),
        }
    }

    fn on_complete(&self, summary: &RunSummary) {
        self.bar.finish_with_message(format!(
            "{} encoded, {} failed, ratio {:.2}:1",
            summary.succeeded,
            summary.failed,
            summary.overall_ratio()
        ));
    }
}
