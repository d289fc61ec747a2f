//! Thumbnail with the tissue box and tile grid drawn on it.

use std::path::Path;

use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use imageproc::drawing::draw_hollow_rect_mut;
use imageproc::rect::Rect;
use tempfile::NamedTempFile;

use super::TileDescriptor;
use crate::config::VisualizerConfig;
use crate::error::Result;
use crate::mask::TissueMask;
use crate::slide::{Region, RegionGate};

/// Draw the bounding box and every tile onto the mask-level thumbnail and
/// write it to `path` as PNG.
pub fn save_tile_overlay(
    gate: &RegionGate,
    mask: &TissueMask,
    tiles: &[TileDescriptor],
    cfg: &VisualizerConfig,
    path: &Path,
) -> Result<()> {
    let mut canvas = gate.read_level(mask.level)?.to_rgb_image();

    if !mask.is_empty() {
        let bbox = mask.bbox_region();
        draw_region(&mut canvas, &bbox, mask.downsample, Rgb(cfg.bbox_color), cfg.bbox_width);
    }
    for tile in tiles {
        draw_region(
            &mut canvas,
            &tile.region,
            mask.downsample,
            Rgb(cfg.tile_color),
            cfg.tile_width,
        );
    }

    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir)?;
    DynamicImage::ImageRgb8(canvas).write_to(&mut tmp, ImageFormat::Png)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path)?;

    log::info!("Wrote overlay with {} tiles to {}", tiles.len(), path.display());
    Ok(())
}

/// Outline a level-0 region, `thickness` pixels wide, growing inwards.
fn draw_region(canvas: &mut RgbImage, region: &Region, downsample: f64, color: Rgb<u8>, thickness: u32) {
    let ds = downsample.max(f64::MIN_POSITIVE);
    let x = (region.x as f64 / ds).floor() as i32;
    let y = (region.y as f64 / ds).floor() as i32;
    let w = ((region.width as f64 / ds).round() as u32).max(1);
    let h = ((region.height as f64 / ds).round() as u32).max(1);

    for i in 0..thickness.max(1) {
        if 2 * i >= w || 2 * i >= h {
            break;
        }
        let rect = Rect::at(x + i as i32, y + i as i32).of_size(w - 2 * i, h - 2 * i);
        draw_hollow_rect_mut(canvas, rect, color);
    }
}
