//! Configuration types for masking, tiling, and quality-bounded encoding.
//!
//! All sections deserialize from TOML with per-field defaults, so a config
//! file only needs to name the values it changes:
//!
//! ```toml
//! [encoder]
//! ssim_target = 0.995
//! workers = 8
//!
//! [jxl]
//! dist_max = 4.0
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Result, TilerError};

/// Tissue mask generation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MaskConfig {
    /// Longest side (in pixels) of the pyramid level used for masking.
    pub max_dim: u32,
    /// Opening radius is `max_side / open_divisor` (at least 1).
    pub open_divisor: u32,
    /// Closing radius is `max_side / close_divisor` (at least 1).
    pub close_divisor: u32,
    /// Minimum HSV saturation (0..1) for a pixel to count as tissue.
    pub saturation_floor: f32,
    /// Maximum HSV value (0..1) for a pixel to count as tissue.
    pub value_ceiling: f32,
    /// Pixels with all channels above this are background glass.
    pub white_rgb: u8,
    /// Connected components smaller than this (mask pixels) are dropped.
    pub min_object_px: u32,
    /// Level-0 dilation applied to the tissue bounding box.
    pub bbox_dilation_px: u32,
}

impl Default for MaskConfig {
    fn default() -> Self {
        Self {
            max_dim: 2048,
            open_divisor: 512,
            close_divisor: 256,
            saturation_floor: 0.07,
            value_ceiling: 0.92,
            white_rgb: 220,
            min_object_px: 64,
            bbox_dilation_px: 256,
        }
    }
}

impl MaskConfig {
    /// Morphological radius for a mask whose longest side is `max_side`.
    pub fn radius(max_side: u32, divisor: u32) -> u8 {
        (max_side / divisor.max(1)).clamp(1, u8::MAX as u32) as u8
    }
}

/// Tile grid settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexerConfig {
    /// Tile edge length at level 0.
    pub tile_size: u32,
    /// Step between tile origins at level 0.
    pub stride: u32,
    /// Minimum fraction of tissue pixels for a tile to be kept.
    pub min_tissue_frac: f64,
}

impl Default for IndexerConfig {
    fn default() -> Self {
        Self {
            tile_size: 512,
            stride: 512,
            min_tissue_frac: 0.25,
        }
    }
}

/// Similarity target and worker settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderConfig {
    /// SSIM the decoded tile should reach.
    pub ssim_target: f64,
    /// Slack below the target still accepted.
    pub ssim_tol: f64,
    /// Number of parallel workers.
    pub workers: usize,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            ssim_target: 0.99,
            ssim_tol: 0.001,
            workers: num_cpus::get(),
        }
    }
}

impl EncoderConfig {
    /// Lowest score accepted by the search.
    pub fn threshold(&self) -> f64 {
        self.ssim_target - self.ssim_tol
    }
}

/// JPEG XL codec and distance search settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JxlConfig {
    /// Encoder binary.
    pub cjxl_bin: String,
    /// Decoder binary.
    pub djxl_bin: String,
    /// Smallest distance tried (least compression).
    pub dist_min: f32,
    /// Largest distance tried (most compression).
    pub dist_max: f32,
    /// Encoder effort (1-10; 10 needs a recent cjxl).
    pub effort: u8,
    /// Maximum bisection steps after the initial probe.
    pub max_iters: u32,
    /// Stop once the bracket is narrower than this.
    pub stop_eps: f32,
}

impl Default for JxlConfig {
    fn default() -> Self {
        Self {
            cjxl_bin: "cjxl".to_string(),
            djxl_bin: "djxl".to_string(),
            dist_min: 0.3,
            dist_max: 3.0,
            effort: 7,
            max_iters: 18,
            stop_eps: 0.01,
        }
    }
}

/// Tile overlay rendering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct VisualizerConfig {
    /// Write `overlay.png` into the run directory.
    pub enabled: bool,
    /// Bounding box outline colour.
    pub bbox_color: [u8; 3],
    /// Tile outline colour.
    pub tile_color: [u8; 3],
    /// Bounding box outline width in thumbnail pixels.
    pub bbox_width: u32,
    /// Tile outline width in thumbnail pixels.
    pub tile_width: u32,
}

impl Default for VisualizerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bbox_color: [255, 0, 0],
            tile_color: [0, 160, 255],
            bbox_width: 3,
            tile_width: 1,
        }
    }
}

/// Output location.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Directory under which timestamped run directories are created.
    pub root: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("runs"),
        }
    }
}

/// Full tiler configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TilerConfig {
    /// Tissue mask settings.
    pub mask: MaskConfig,
    /// Tile grid settings.
    pub indexer: IndexerConfig,
    /// Similarity target and workers.
    pub encoder: EncoderConfig,
    /// Codec and search bounds.
    pub jxl: JxlConfig,
    /// Overlay rendering.
    pub visualizer: VisualizerConfig,
    /// Output location.
    pub output: OutputConfig,
}

impl TilerConfig {
    /// Load a configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&text)
    }

    /// Parse a configuration from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: TilerConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Render the configuration as TOML.
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| TilerError::Config(e.to_string()))
    }

    /// Reject inconsistent values.
    pub fn validate(&self) -> Result<()> {
        let mask = &self.mask;
        if mask.max_dim == 0 {
            return Err(TilerError::Config("mask.max_dim must be positive".into()));
        }
        if mask.open_divisor == 0 || mask.close_divisor == 0 {
            return Err(TilerError::Config("mask divisors must be positive".into()));
        }
        if !(0.0..=1.0).contains(&mask.saturation_floor) || !(0.0..=1.0).contains(&mask.value_ceiling) {
            return Err(TilerError::Config(
                "mask.saturation_floor and mask.value_ceiling must be within [0, 1]".into(),
            ));
        }

        let idx = &self.indexer;
        if idx.tile_size == 0 || idx.stride == 0 {
            return Err(TilerError::Config(
                "indexer.tile_size and indexer.stride must be positive".into(),
            ));
        }
        if !(0.0..=1.0).contains(&idx.min_tissue_frac) {
            return Err(TilerError::Config(
                "indexer.min_tissue_frac must be within [0, 1]".into(),
            ));
        }

        let enc = &self.encoder;
        if !enc.ssim_target.is_finite() || !(0.0..=1.0).contains(&enc.ssim_target) {
            return Err(TilerError::Config("encoder.ssim_target must be within [0, 1]".into()));
        }
        if !enc.ssim_tol.is_finite() || enc.ssim_tol < 0.0 {
            return Err(TilerError::Config("encoder.ssim_tol must be non-negative".into()));
        }
        if enc.workers == 0 {
            return Err(TilerError::Config("encoder.workers must be at least 1".into()));
        }

        let jxl = &self.jxl;
        if !(jxl.dist_min.is_finite() && jxl.dist_max.is_finite()) || jxl.dist_min < 0.0 {
            return Err(TilerError::Config("jxl distances must be finite and non-negative".into()));
        }
        if jxl.dist_min > jxl.dist_max {
            return Err(TilerError::Config(format!(
                "jxl.dist_min ({}) exceeds jxl.dist_max ({})",
                jxl.dist_min, jxl.dist_max
            )));
        }
        if !(jxl.stop_eps > 0.0) {
            return Err(TilerError::Config("jxl.stop_eps must be positive".into()));
        }
        if !(1..=10).contains(&jxl.effort) {
            return Err(TilerError::Config("jxl.effort must be within 1..=10".into()));
        }

        if self.stride_leaves_gaps() {
            log::warn!(
                "indexer.stride ({}) > indexer.tile_size ({}); tiles will leave gaps",
                idx.stride,
                idx.tile_size
            );
        }

        Ok(())
    }

    /// Whether the grid skips pixels between tiles.
    pub fn stride_leaves_gaps(&self) -> bool {
        self.indexer.stride > self.indexer.tile_size
    }
}
