//! Tissue detection on a low-resolution pyramid level.
//!
//! A pixel is tissue when it is saturated enough, not too bright, and not
//! near-white in every channel. The raw mask is cleaned with a morphological
//! opening and closing, then small 8-connected specks are dropped.

use image::{GrayImage, Luma};
use imageproc::distance_transform::Norm;
use imageproc::morphology::{close, open};
use imageproc::region_labelling::{connected_components, Connectivity};

use crate::config::MaskConfig;
use crate::error::Result;
use crate::slide::{Region, RegionGate};
use crate::PixelBuffer;

const ON: u8 = 255;

/// Binary tissue mask and its level-0 bounding box.
#[derive(Debug, Clone)]
pub struct TissueMask {
    /// Pyramid level the mask was computed on.
    pub level: usize,
    /// Mask width in pixels of `level`.
    pub width: u32,
    /// Mask height in pixels of `level`.
    pub height: u32,
    /// Row-major tissue flags.
    pub mask: Vec<bool>,
    /// Level-0 pixels per mask pixel.
    pub downsample: f64,
    /// Dilated tissue bounding box in level-0 pixels, `(x0, y0, x1, y1)` exclusive.
    pub bbox_level0: (u32, u32, u32, u32),
    /// Fraction of mask pixels flagged as tissue.
    pub coverage: f64,
}

impl TissueMask {
    /// Whether the mask pixel at `(x, y)` is tissue.
    pub fn get(&self, x: u32, y: u32) -> bool {
        self.mask[y as usize * self.width as usize + x as usize]
    }

    /// No tissue was found.
    pub fn is_empty(&self) -> bool {
        let (x0, y0, x1, y1) = self.bbox_level0;
        x1 <= x0 || y1 <= y0
    }

    /// Bounding box as a region.
    pub fn bbox_region(&self) -> Region {
        let (x0, y0, x1, y1) = self.bbox_level0;
        Region::new(x0, y0, x1.saturating_sub(x0), y1.saturating_sub(y0))
    }

    /// Mean of the mask over `[x0, x1) x [y0, y1)` in mask pixels.
    pub fn window_coverage(&self, x0: u32, y0: u32, x1: u32, y1: u32) -> f64 {
        let x1 = x1.min(self.width);
        let y1 = y1.min(self.height);
        if x1 <= x0 || y1 <= y0 {
            return 0.0;
        }
        let mut hits = 0u64;
        for y in y0..y1 {
            let row = y as usize * self.width as usize;
            hits += self.mask[row + x0 as usize..row + x1 as usize]
                .iter()
                .filter(|&&t| t)
                .count() as u64;
        }
        hits as f64 / ((x1 - x0) as u64 * (y1 - y0) as u64) as f64
    }

    /// Render as an 8-bit image (255 = tissue).
    pub fn to_gray_image(&self) -> GrayImage {
        GrayImage::from_fn(self.width, self.height, |x, y| {
            Luma([if self.get(x, y) { ON } else { 0 }])
        })
    }
}

/// Compute the tissue mask of the slide behind `gate`.
pub fn make_tissue_mask(gate: &RegionGate, cfg: &MaskConfig) -> Result<TissueMask> {
    let (w0, h0) = gate.dimensions();
    let target = (w0.max(h0) as f64 / cfg.max_dim.max(1) as f64).max(1.0);
    let level = gate.best_level_for_downsample(target)?;
    let downsample = gate.level_downsample(level)?;
    let thumb = gate.read_level(level)?;

    let raw = threshold_tissue(&thumb, cfg);
    let max_side = thumb.width.max(thumb.height);
    let opened = open(&raw, Norm::LInf, MaskConfig::radius(max_side, cfg.open_divisor));
    let closed = close(&opened, Norm::LInf, MaskConfig::radius(max_side, cfg.close_divisor));
    let cleaned = remove_small_objects(&closed, cfg.min_object_px);

    let (width, height) = cleaned.dimensions();
    let mask: Vec<bool> = cleaned.pixels().map(|p| p[0] > 0).collect();
    let tissue = mask.iter().filter(|&&t| t).count();
    let coverage = if mask.is_empty() {
        0.0
    } else {
        tissue as f64 / mask.len() as f64
    };

    let bbox_level0 = match mask_bounds(&mask, width) {
        Some(bounds) => to_level0(bounds, downsample, cfg.bbox_dilation_px, (w0, h0)),
        None => (0, 0, 0, 0),
    };

    log::info!(
        "Tissue mask: level {} ({}x{}, downsample {:.2}), coverage {:.1}%",
        level,
        width,
        height,
        downsample,
        coverage * 100.0
    );
    log::debug!("Tissue bounding box (level 0): {:?}", bbox_level0);

    Ok(TissueMask {
        level,
        width,
        height,
        mask,
        downsample,
        bbox_level0,
        coverage,
    })
}

/// HSV saturation/value test plus a near-white rejection.
fn threshold_tissue(thumb: &PixelBuffer, cfg: &MaskConfig) -> GrayImage {
    GrayImage::from_fn(thumb.width, thumb.height, |x, y| {
        let [r, g, b] = thumb.pixel(x, y);
        Luma([if is_tissue(r, g, b, cfg) { ON } else { 0 }])
    })
}

fn is_tissue(r: u8, g: u8, b: u8, cfg: &MaskConfig) -> bool {
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let value = max as f32 / 255.0;
    let saturation = if max == 0 {
        0.0
    } else {
        (max - min) as f32 / max as f32
    };
    let white = r > cfg.white_rgb && g > cfg.white_rgb && b > cfg.white_rgb;
    saturation >= cfg.saturation_floor && value <= cfg.value_ceiling && !white
}

/// Drop 8-connected components with fewer than `min_px` pixels.
fn remove_small_objects(mask: &GrayImage, min_px: u32) -> GrayImage {
    let labels = connected_components(mask, Connectivity::Eight, Luma([0u8]));
    let mut sizes: Vec<u32> = Vec::new();
    for label in labels.pixels() {
        let l = label[0] as usize;
        if l == 0 {
            continue;
        }
        if sizes.len() <= l {
            sizes.resize(l + 1, 0);
        }
        sizes[l] += 1;
    }

    let dropped = sizes.iter().skip(1).filter(|&&s| s > 0 && s < min_px).count();
    if dropped > 0 {
        log::debug!("Removed {} tissue specks below {} px", dropped, min_px);
    }

    GrayImage::from_fn(mask.width(), mask.height(), |x, y| {
        let l = labels.get_pixel(x, y)[0] as usize;
        Luma([if l != 0 && sizes[l] >= min_px { ON } else { 0 }])
    })
}

/// Exclusive bounds of the set pixels, in mask coordinates.
fn mask_bounds(mask: &[bool], width: u32) -> Option<(u32, u32, u32, u32)> {
    let width = width as usize;
    if width == 0 {
        return None;
    }
    let mut bounds: Option<(usize, usize, usize, usize)> = None;
    for (i, &tissue) in mask.iter().enumerate() {
        if !tissue {
            continue;
        }
        let (x, y) = (i % width, i / width);
        bounds = Some(match bounds {
            None => (x, y, x + 1, y + 1),
            Some((x0, y0, x1, y1)) => (x0.min(x), y0.min(y), x1.max(x + 1), y1.max(y + 1)),
        });
    }
    bounds.map(|(x0, y0, x1, y1)| (x0 as u32, y0 as u32, x1 as u32, y1 as u32))
}

/// Scale mask bounds to level 0, dilate, and clamp to the slide.
fn to_level0(
    (x0, y0, x1, y1): (u32, u32, u32, u32),
    downsample: f64,
    dilation: u32,
    (w0, h0): (u32, u32),
) -> (u32, u32, u32, u32) {
    let d = dilation as f64;
    let lo = |v: u32| (v as f64 * downsample - d).floor().max(0.0);
    let hi = |v: u32, limit: u32| (v as f64 * downsample + d).ceil().min(limit as f64);
    (
        lo(x0) as u32,
        lo(y0) as u32,
        hi(x1, w0) as u32,
        hi(y1, h0) as u32,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::slide::ImageSlide;
    use image::{Rgb, RgbImage};

    const GLASS: Rgb<u8> = Rgb([240, 240, 238]);
    const STAIN: Rgb<u8> = Rgb([200, 100, 150]);

    fn paint(img: &mut RgbImage, x0: u32, y0: u32, x1: u32, y1: u32) {
        for y in y0..y1 {
            for x in x0..x1 {
                img.put_pixel(x, y, STAIN);
            }
        }
    }

    fn gate_for(img: RgbImage) -> RegionGate {
        RegionGate::new(Box::new(ImageSlide::from_rgb(img)))
    }

    fn config(dilation: u32) -> MaskConfig {
        MaskConfig {
            bbox_dilation_px: dilation,
            ..MaskConfig::default()
        }
    }

    #[test]
    fn test_pixel_classification() {
        let cfg = MaskConfig::default();
        assert!(is_tissue(STAIN[0], STAIN[1], STAIN[2], &cfg));
        assert!(!is_tissue(GLASS[0], GLASS[1], GLASS[2], &cfg));
        // Saturated but too bright.
        assert!(!is_tissue(255, 200, 240, &cfg));
        // Grey: no saturation.
        assert!(!is_tissue(90, 90, 90, &cfg));
    }

    #[test]
    fn test_mask_finds_blob_and_drops_specks() {
        let mut img = RgbImage::from_pixel(400, 300, GLASS);
        paint(&mut img, 100, 80, 200, 160);
        // Survives the 3x3 opening but is below min_object_px.
        paint(&mut img, 20, 20, 23, 23);
        // Removed by the opening.
        paint(&mut img, 350, 250, 351, 251);

        let mask = make_tissue_mask(&gate_for(img), &config(10)).unwrap();

        assert_eq!(mask.level, 0);
        assert_eq!(mask.downsample, 1.0);
        assert_eq!((mask.width, mask.height), (400, 300));
        assert!(mask.get(150, 120));
        assert!(!mask.get(21, 21));
        assert!(!mask.get(350, 250));
        assert_eq!(mask.bbox_level0, (90, 70, 210, 170));
        assert!((mask.coverage - 8000.0 / 120_000.0).abs() < 1e-9);
    }

    #[test]
    fn test_bbox_dilation_is_clamped_to_slide() {
        let mut img = RgbImage::from_pixel(400, 300, GLASS);
        paint(&mut img, 100, 80, 200, 160);

        let mask = make_tissue_mask(&gate_for(img), &MaskConfig::default()).unwrap();
        assert_eq!(mask.bbox_level0, (0, 0, 400, 300));
        assert_eq!(mask.bbox_region(), Region::new(0, 0, 400, 300));
    }

    #[test]
    fn test_empty_slide_gives_empty_mask() {
        let img = RgbImage::from_pixel(200, 100, GLASS);
        let mask = make_tissue_mask(&gate_for(img), &MaskConfig::default()).unwrap();
        assert!(mask.is_empty());
        assert_eq!(mask.bbox_level0, (0, 0, 0, 0));
        assert_eq!(mask.coverage, 0.0);
    }

    #[test]
    fn test_mask_uses_lower_level_and_scales_bbox() {
        let mut img = RgbImage::from_pixel(1200, 900, GLASS);
        paint(&mut img, 400, 300, 800, 600);
        let cfg = MaskConfig {
            max_dim: 300,
            ..config(0)
        };

        let mask = make_tissue_mask(&gate_for(img), &cfg).unwrap();

        assert_eq!(mask.level, 2);
        assert_eq!(mask.downsample, 4.0);
        let (x0, y0, x1, y1) = mask.bbox_level0;
        // Resampling can smear the edge by a pixel or two per level.
        assert!((388..=400).contains(&x0), "x0 = {}", x0);
        assert!((288..=300).contains(&y0), "y0 = {}", y0);
        assert!((800..=812).contains(&x1), "x1 = {}", x1);
        assert!((600..=612).contains(&y1), "y1 = {}", y1);
    }

    #[test]
    fn test_window_coverage() {
        let mask = TissueMask {
            level: 0,
            width: 4,
            height: 2,
            mask: vec![true, true, false, false, true, false, false, false],
            downsample: 1.0,
            bbox_level0: (0, 0, 2, 2),
            coverage: 0.375,
        };
        assert_eq!(mask.window_coverage(0, 0, 2, 2), 0.75);
        assert_eq!(mask.window_coverage(2, 0, 4, 2), 0.0);
        assert_eq!(mask.window_coverage(0, 0, 9, 9), 0.375);
        assert_eq!(mask.window_coverage(3, 1, 3, 2), 0.0);
        assert_eq!(mask.to_gray_image().get_pixel(1, 0)[0], ON);
    }
}
