use anyhow::{anyhow, Result};

use crate::detect::backend::DetectorBackend;
use crate::detect::result::RawDetection;

/// Fraction of the frame a dark region must cover before it is reported.
const MIN_AREA_FRACTION: f64 = 0.005;

/// Dependency-free CPU backend.
///
/// Finds the bounding box of below-threshold-luminance pixels in an RGB
/// frame and reports it as a single `cup` candidate. A backlit glass of
/// liquid reads as the darkest contiguous region of the scene; this is a
/// stand-in for a real model, not a classifier.
pub struct LuminanceBackend {
    threshold: u8,
}

impl LuminanceBackend {
    pub fn new() -> Self {
        Self { threshold: 64 }
    }

    /// Override the luminance cut-off (0 = black, 255 = white).
    pub fn with_threshold(mut self, threshold: u8) -> Self {
        self.threshold = threshold;
        self
    }
}

impl Default for LuminanceBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl DetectorBackend for LuminanceBackend {
    fn name(&self) -> &'static str {
        "luminance"
    }

    fn detect(&mut self, pixels: &[u8], width: u32, height: u32) -> Result<Vec<RawDetection>> {
        let w = width as usize;
        let h = height as usize;
        let expected = w
            .checked_mul(h)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if pixels.len() != expected {
            return Err(anyhow!(
                "RGB frame length mismatch: expected {}, got {}",
                expected,
                pixels.len()
            ));
        }

        let mut min_x = w;
        let mut min_y = h;
        let mut max_x = 0usize;
        let mut max_y = 0usize;
        let mut dark = 0u64;

        for y in 0..h {
            for x in 0..w {
                let offset = (y * w + x) * 3;
                let r = pixels[offset] as u32;
                let g = pixels[offset + 1] as u32;
                let b = pixels[offset + 2] as u32;
                // integer BT.601 luma
                let luma = ((299 * r + 587 * g + 114 * b) / 1000) as u8;
                if luma < self.threshold {
                    dark += 1;
                    min_x = min_x.min(x);
                    min_y = min_y.min(y);
                    max_x = max_x.max(x);
                    max_y = max_y.max(y);
                }
            }
        }

        if (dark as f64) < (w * h) as f64 * MIN_AREA_FRACTION {
            return Ok(Vec::new());
        }

        let box_w = (max_x - min_x + 1) as f32;
        let box_h = (max_y - min_y + 1) as f32;
        // density of dark pixels within the box, as a stand-in for a score
        let score = (dark as f32 / (box_w * box_h)).min(1.0);

        Ok(vec![RawDetection {
            label: "cup".to_string(),
            score,
            x: min_x as f32,
            y: min_y as f32,
            w: box_w,
            h: box_h,
        }])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_with_dark_rect(
        width: usize,
        height: usize,
        x0: usize,
        y0: usize,
        x1: usize,
        y1: usize,
    ) -> Vec<u8> {
        let mut pixels = vec![220u8; width * height * 3];
        for y in y0..=y1 {
            for x in x0..=x1 {
                let offset = (y * width + x) * 3;
                pixels[offset] = 20;
                pixels[offset + 1] = 20;
                pixels[offset + 2] = 30;
            }
        }
        pixels
    }

    #[test]
    fn finds_dark_region_bounds() {
        let mut backend = LuminanceBackend::new();
        let pixels = frame_with_dark_rect(64, 48, 16, 12, 47, 35);
        let dets = backend.detect(&pixels, 64, 48).unwrap();
        assert_eq!(dets.len(), 1);
        let det = &dets[0];
        assert_eq!(det.label, "cup");
        assert_eq!(det.x, 16.0);
        assert_eq!(det.y, 12.0);
        assert_eq!(det.w, 32.0);
        assert_eq!(det.h, 24.0);
        assert!(det.score > 0.9);
    }

    #[test]
    fn uniform_bright_frame_yields_nothing() {
        let mut backend = LuminanceBackend::new();
        let pixels = vec![220u8; 64 * 48 * 3];
        assert!(backend.detect(&pixels, 64, 48).unwrap().is_empty());
    }

    #[test]
    fn tiny_speck_is_ignored() {
        let mut backend = LuminanceBackend::new();
        // 2x2 dark patch in a 64x48 frame is below the area floor
        let pixels = frame_with_dark_rect(64, 48, 10, 10, 11, 11);
        assert!(backend.detect(&pixels, 64, 48).unwrap().is_empty());
    }

    #[test]
    fn length_mismatch_is_rejected() {
        let mut backend = LuminanceBackend::new();
        assert!(backend.detect(&[0u8; 10], 64, 48).is_err());
    }
}
