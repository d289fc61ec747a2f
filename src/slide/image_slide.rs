//! File-backed slide reader built on the `image` crate.

use std::path::Path;

use image::imageops::FilterType;
use image::RgbaImage;

use super::SlideReader;
use crate::error::{Result, TilerError};

/// Levels are halved until the longer side fits this size.
const MIN_LEVEL_SIDE: u32 = 256;

/// A single-image "slide" with a synthesized pyramid.
pub struct ImageSlide {
    levels: Vec<RgbaImage>,
}

impl ImageSlide {
    /// Decode an image file into a slide.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let image = image::open(path)
            .map_err(|e| TilerError::Read(format!("{}: {}", path.display(), e)))?;
        log::info!(
            "Opened {} ({}x{})",
            path.display(),
            image.width(),
            image.height()
        );
        Ok(Self::from_rgba(image.to_rgba8()))
    }

    /// Build a slide from an RGB image.
    pub fn from_rgb(image: image::RgbImage) -> Self {
        Self::from_rgba(image::DynamicImage::ImageRgb8(image).to_rgba8())
    }

    /// Build a slide from an RGBA image.
    pub fn from_rgba(image: RgbaImage) -> Self {
        let mut levels = vec![image];
        loop {
            let last = &levels[levels.len() - 1];
            let (w, h) = last.dimensions();
            if w.max(h) <= MIN_LEVEL_SIDE || w < 2 || h < 2 {
                break;
            }
            let next = image::imageops::resize(last, w / 2, h / 2, FilterType::Triangle);
            levels.push(next);
        }
        log::debug!("Synthesized {} pyramid levels", levels.len());
        Self { levels }
    }
}

impl SlideReader for ImageSlide {
    fn level_count(&self) -> usize {
        self.levels.len()
    }

    fn level_dimensions(&self, level: usize) -> Option<(u32, u32)> {
        self.levels.get(level).map(|img| img.dimensions())
    }

    fn level_downsample(&self, level: usize) -> Option<f64> {
        let (w0, h0) = self.levels[0].dimensions();
        let (w, h) = self.level_dimensions(level)?;
        Some((w0 as f64 / w as f64 + h0 as f64 / h as f64) / 2.0)
    }

    fn read_region(
        &mut self,
        x: u32,
        y: u32,
        level: usize,
        width: u32,
        height: u32,
    ) -> Result<Vec<u8>> {
        let downsample = self
            .level_downsample(level)
            .ok_or_else(|| TilerError::Read(format!("Level {} does not exist", level)))?;
        let img = &self.levels[level];
        let (lw, lh) = img.dimensions();
        let lx = (x as f64 / downsample).floor() as u64;
        let ly = (y as f64 / downsample).floor() as u64;

        // Pixels outside the image stay transparent black.
        let mut out = vec![0u8; width as usize * height as usize * 4];
        for row in 0..height as u64 {
            let sy = ly + row;
            if sy >= lh as u64 {
                break;
            }
            for col in 0..width as u64 {
                let sx = lx + col;
                if sx >= lw as u64 {
                    break;
                }
                let px = img.get_pixel(sx as u32, sy as u32);
                let i = ((row * width as u64 + col) * 4) as usize;
                out[i..i + 4].copy_from_slice(&px.0);
            }
        }
        Ok(out)
    }
}
