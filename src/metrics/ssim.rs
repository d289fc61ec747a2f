//! SSIM (Structural Similarity Index) for 8-bit RGB tiles.
//!
//! Uniform square window, sample covariance and the usual constants
//! (K1 = 0.01, K2 = 0.03, data range 255). The score is the mean over all
//! windows that fit entirely inside the tile, averaged over the three
//! channels. Window sums come from summed-area tables, so cost is linear in
//! the pixel count regardless of window size.
//!
//! - SSIM = 1.0: Identical images
//! - SSIM > 0.99: Visually lossless for most histology content
//! - SSIM > 0.95: Minor visible artifacts

use crate::error::Result;
use crate::{PixelBuffer, RGB_CHANNELS};

use super::{extract_channel, validate_buffers, SimilarityMetric};

const DATA_RANGE: f64 = 255.0;

/// SSIM metric configuration.
#[derive(Debug, Clone)]
pub struct Ssim {
    /// Window edge length (default: 7).
    pub window_size: usize,

    /// K1 constant for luminance comparison (default: 0.01).
    pub k1: f64,

    /// K2 constant for contrast comparison (default: 0.03).
    pub k2: f64,
}

impl Default for Ssim {
    fn default() -> Self {
        Self {
            window_size: 7,
            k1: 0.01,
            k2: 0.03,
        }
    }
}

impl Ssim {
    /// Create a metric with default parameters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set window size.
    pub fn window_size(mut self, size: usize) -> Self {
        self.window_size = size.max(1);
        self
    }

    /// Mean SSIM of one channel.
    fn channel_ssim(&self, x: &[f64], y: &[f64], width: usize, height: usize) -> f64 {
        let c1 = (self.k1 * DATA_RANGE).powi(2);
        let c2 = (self.k2 * DATA_RANGE).powi(2);
        let n = self.window_size;

        // For small images, use global statistics
        if width < n || height < n {
            return global_ssim(x, y, c1, c2);
        }

        let sx = SummedArea::build(width, height, |i| x[i]);
        let sy = SummedArea::build(width, height, |i| y[i]);
        let sxx = SummedArea::build(width, height, |i| x[i] * x[i]);
        let syy = SummedArea::build(width, height, |i| y[i] * y[i]);
        let sxy = SummedArea::build(width, height, |i| x[i] * y[i]);

        let mut total = 0.0;
        let mut count = 0usize;
        for wy in 0..=(height - n) {
            for wx in 0..=(width - n) {
                let stats = WindowStats {
                    sum_x: sx.window(wx, wy, n),
                    sum_y: sy.window(wx, wy, n),
                    sum_xx: sxx.window(wx, wy, n),
                    sum_yy: syy.window(wx, wy, n),
                    sum_xy: sxy.window(wx, wy, n),
                    count: (n * n) as f64,
                };
                total += stats.ssim(c1, c2);
                count += 1;
            }
        }

        total / count as f64
    }
}

impl SimilarityMetric for Ssim {
    fn name(&self) -> &'static str {
        "ssim"
    }

    fn score(&self, reference: &PixelBuffer, test: &PixelBuffer) -> Result<f64> {
        validate_buffers(reference, test)?;

        let width = reference.width as usize;
        let height = reference.height as usize;
        if width == 0 || height == 0 {
            return Ok(1.0);
        }

        let mut sum = 0.0;
        for c in 0..RGB_CHANNELS {
            let x = extract_channel(reference, c);
            let y = extract_channel(test, c);
            sum += self.channel_ssim(&x, &y, width, height);
        }

        Ok((sum / RGB_CHANNELS as f64).clamp(0.0, 1.0))
    }
}

/// Raw moments of one window.
struct WindowStats {
    sum_x: f64,
    sum_y: f64,
    sum_xx: f64,
    sum_yy: f64,
    sum_xy: f64,
    count: f64,
}

impl WindowStats {
    fn ssim(&self, c1: f64, c2: f64) -> f64 {
        let np = self.count;
        let cov_norm = if np > 1.0 { np / (np - 1.0) } else { 1.0 };

        let mu_x = self.sum_x / np;
        let mu_y = self.sum_y / np;
        // Clamp variances at zero against cancellation error.
        let var_x = (cov_norm * (self.sum_xx / np - mu_x * mu_x)).max(0.0);
        let var_y = (cov_norm * (self.sum_yy / np - mu_y * mu_y)).max(0.0);
        let cov_xy = cov_norm * (self.sum_xy / np - mu_x * mu_y);

        let a1 = 2.0 * mu_x * mu_y + c1;
        let a2 = 2.0 * cov_xy + c2;
        let b1 = mu_x * mu_x + mu_y * mu_y + c1;
        let b2 = var_x + var_y + c2;

        (a1 * a2) / (b1 * b2)
    }
}

/// Global SSIM (for images smaller than the window).
fn global_ssim(x: &[f64], y: &[f64], c1: f64, c2: f64) -> f64 {
    if x.is_empty() {
        return 1.0;
    }
    let stats = WindowStats {
        sum_x: x.iter().sum(),
        sum_y: y.iter().sum(),
        sum_xx: x.iter().map(|v| v * v).sum(),
        sum_yy: y.iter().map(|v| v * v).sum(),
        sum_xy: x.iter().zip(y).map(|(a, b)| a * b).sum(),
        count: x.len() as f64,
    };
    stats.ssim(c1, c2)
}

/// Summed-area table with a zero border row and column.
struct SummedArea {
    stride: usize,
    sums: Vec<f64>,
}

impl SummedArea {
    fn build(width: usize, height: usize, value: impl Fn(usize) -> f64) -> Self {
        let stride = width + 1;
        let mut sums = vec![0.0; stride * (height + 1)];
        for y in 0..height {
            let mut row_sum = 0.0;
            for x in 0..width {
                row_sum += value(y * width + x);
                sums[(y + 1) * stride + x + 1] = sums[y * stride + x + 1] + row_sum;
            }
        }
        Self { stride, sums }
    }

    /// Sum over the `n x n` window with top-left corner `(x, y)`.
    fn window(&self, x: usize, y: usize, n: usize) -> f64 {
        let s = &self.sums;
        let w = self.stride;
        s[(y + n) * w + x + n] - s[y * w + x + n] - s[(y + n) * w + x] + s[y * w + x]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TilerError;

    fn textured(width: u32, height: u32, offset: i32) -> PixelBuffer {
        let mut data = Vec::with_capacity((width * height * 3) as usize);
        for y in 0..height {
            for x in 0..width {
                let v = ((x * 7 + y * 13) % 200) as i32 + 20 + offset;
                let v = v.clamp(0, 255) as u8;
                data.extend_from_slice(&[v, v / 2, 255 - v]);
            }
        }
        PixelBuffer::new(width, height, data).unwrap()
    }

    fn with_noise(buffer: &PixelBuffer, amplitude: i32) -> PixelBuffer {
        let mut out = buffer.clone();
        for (i, v) in out.data.iter_mut().enumerate() {
            let delta = ((i as i32 * 37) % (2 * amplitude + 1)) - amplitude;
            *v = (*v as i32 + delta).clamp(0, 255) as u8;
        }
        out
    }

    #[test]
    fn test_ssim_identical_images() {
        let img = textured(64, 64, 0);
        let score = Ssim::default().score(&img, &img.clone()).unwrap();
        assert!((score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_ssim_flat_identical_images() {
        let img = PixelBuffer::filled(32, 32, [128, 128, 128]);
        let score = Ssim::default().score(&img, &img.clone()).unwrap();
        assert!((score - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_ssim_decreases_with_distortion() {
        let img = textured(64, 64, 0);
        let metric = Ssim::default();
        let light = metric.score(&img, &with_noise(&img, 2)).unwrap();
        let heavy = metric.score(&img, &with_noise(&img, 30)).unwrap();
        assert!(light < 1.0);
        assert!(heavy < light);
        assert!(heavy >= 0.0);
    }

    #[test]
    fn test_ssim_is_symmetric() {
        let a = textured(40, 24, 0);
        let b = with_noise(&a, 10);
        let metric = Ssim::default();
        let ab = metric.score(&a, &b).unwrap();
        let ba = metric.score(&b, &a).unwrap();
        assert!((ab - ba).abs() < 1e-9);
    }

    #[test]
    fn test_ssim_small_image_uses_global_statistics() {
        let img = textured(4, 4, 0);
        let shifted = textured(4, 4, 10);
        let metric = Ssim::default();
        assert!((metric.score(&img, &img.clone()).unwrap() - 1.0).abs() < 1e-9);
        assert!(metric.score(&img, &shifted).unwrap() < 1.0);
    }

    #[test]
    fn test_ssim_shape_mismatch() {
        let a = textured(16, 16, 0);
        let b = textured(16, 8, 0);
        assert!(matches!(
            Ssim::default().score(&a, &b),
            Err(TilerError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn test_summed_area_window() {
        let table = SummedArea::build(3, 3, |i| i as f64);
        // Window covering values 4, 5, 7, 8.
        assert_eq!(table.window(1, 1, 2), 24.0);
        assert_eq!(table.window(0, 0, 3), 36.0);
    }

    #[test]
    fn test_window_size_builder() {
        assert_eq!(Ssim::new().window_size(11).window_size, 11);
        assert_eq!(Ssim::new().window_size(0).window_size, 1);
    }
}
