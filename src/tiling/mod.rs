//! Level-0 tile grid restricted to tissue.
//!
//! The grid walks the tissue bounding box in `stride` steps. Tiles at the
//! right and bottom edges are clamped to the box and the slide, so they may
//! be smaller than `tile_size`. Each tile's tissue coverage is the mean of
//! the mask over the tile's footprint in mask coordinates.

mod overlay;

pub use overlay::save_tile_overlay;

use crate::config::IndexerConfig;
use crate::error::{Result, TilerError};
use crate::mask::TissueMask;
use crate::slide::Region;

/// One tile to encode. Immutable once indexed.
#[derive(Debug, Clone, PartialEq)]
pub struct TileDescriptor {
    /// Position in the index; unique within a run.
    pub id: u64,
    /// Level-0 rectangle.
    pub region: Region,
    /// Tissue fraction in `[0, 1]`.
    pub coverage: f64,
}

impl TileDescriptor {
    /// Create a descriptor.
    pub fn new(id: u64, region: Region, coverage: f64) -> Self {
        Self {
            id,
            region,
            coverage,
        }
    }

    /// Deterministic output file name.
    pub fn file_name(&self, extension: &str) -> String {
        let r = &self.region;
        format!(
            "x_{}_y_{}_w_{}_h_{}.{}",
            r.x, r.y, r.width, r.height, extension
        )
    }

    /// Uncompressed RGB size of the tile.
    pub fn raw_bytes(&self) -> u64 {
        crate::raw_bytes(self.region.width, self.region.height)
    }
}

/// Build the tile list for a slide of `slide_dims` level-0 pixels.
pub fn build_tile_index(
    slide_dims: (u32, u32),
    mask: &TissueMask,
    cfg: &IndexerConfig,
) -> Result<Vec<TileDescriptor>> {
    if cfg.tile_size == 0 || cfg.stride == 0 {
        return Err(TilerError::Config(
            "tile_size and stride must be positive".into(),
        ));
    }
    if !(0.0..=1.0).contains(&cfg.min_tissue_frac) {
        return Err(TilerError::Config(format!(
            "min_tissue_frac {} is outside [0, 1]",
            cfg.min_tissue_frac
        )));
    }
    if cfg.stride > cfg.tile_size {
        log::warn!(
            "Stride {} exceeds tile size {}; tissue between tiles is skipped",
            cfg.stride,
            cfg.tile_size
        );
    }

    let (w0, h0) = slide_dims;
    let (bx0, by0, bx1, by1) = mask.bbox_level0;
    let (bx1, by1) = (bx1.min(w0), by1.min(h0));
    if bx1 <= bx0 || by1 <= by0 {
        log::info!("No tissue found; tile index is empty");
        return Ok(Vec::new());
    }

    let mut tiles = Vec::new();
    let mut total = 0usize;
    for y in (by0..by1).step_by(cfg.stride as usize) {
        for x in (bx0..bx1).step_by(cfg.stride as usize) {
            total += 1;
            let w = cfg.tile_size.min(bx1 - x);
            let h = cfg.tile_size.min(by1 - y);
            let region = Region::new(x, y, w, h);
            let coverage = tile_coverage(mask, &region);
            if coverage >= cfg.min_tissue_frac {
                tiles.push(TileDescriptor::new(tiles.len() as u64, region, coverage));
            }
        }
    }

    log::info!(
        "Indexed {} of {} grid tiles (tile {}, stride {}, min tissue {:.2})",
        tiles.len(),
        total,
        cfg.tile_size,
        cfg.stride,
        cfg.min_tissue_frac
    );
    if log::log_enabled!(log::Level::Debug) && !tiles.is_empty() {
        let mut cov: Vec<f64> = tiles.iter().map(|t| t.coverage).collect();
        cov.sort_by(|a, b| a.total_cmp(b));
        let q = |p: f64| cov[((cov.len() - 1) as f64 * p).round() as usize];
        log::debug!(
            "Coverage quantiles: min {:.3}, q25 {:.3}, median {:.3}, q75 {:.3}, max {:.3}",
            q(0.0),
            q(0.25),
            q(0.5),
            q(0.75),
            q(1.0)
        );
    }

    Ok(tiles)
}

/// Mask mean over the tile footprint (floor start, ceil end).
fn tile_coverage(mask: &TissueMask, region: &Region) -> f64 {
    let ds = mask.downsample.max(f64::MIN_POSITIVE);
    let clamp_x = |v: f64| (v.max(0.0) as u32).min(mask.width);
    let clamp_y = |v: f64| (v.max(0.0) as u32).min(mask.height);

    let mx0 = clamp_x((region.x as f64 / ds).floor());
    let my0 = clamp_y((region.y as f64 / ds).floor());
    let mut mx1 = clamp_x((region.right() as f64 / ds).ceil());
    let mut my1 = clamp_y((region.bottom() as f64 / ds).ceil());
    // Always sample at least one mask pixel.
    if mx1 <= mx0 {
        mx1 = (mx0 + 1).min(mask.width);
    }
    if my1 <= my0 {
        my1 = (my0 + 1).min(mask.height);
    }
    mask.window_coverage(mx0, my0, mx1, my1)
}
