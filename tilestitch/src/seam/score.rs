//! Post-repair seam scoring.
//!
//! Compares the strip of pixels either side of a repaired seam and
//! produces a weighted discontinuity score. High scores flag seams the
//! backend likely botched; the flag is advisory and never fails a run.
//!
//! Pixels are compared in normalized [0, 1] RGB. The Sobel term compares
//! gradient magnitude of Rec. 709 luminance, which catches structural
//! breaks that plain color differences miss.

use image::RgbImage;
use serde::{Deserialize, Serialize};

/// Metric weights for the combined score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreWeights {
    pub rgb_l1: f64,
    pub rgb_l2: f64,
    pub sobel_l1: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            rgb_l1: 1.0,
            rgb_l2: 0.25,
            sobel_l1: 0.5,
        }
    }
}

/// Raw per-metric values for one scored strip pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SeamMetrics {
    pub rgb_l1: f64,
    pub rgb_l2: f64,
    pub sobel_l1: f64,
}

/// Normalized planar view of an RGB strip.
struct Strip {
    w: usize,
    h: usize,
    /// Interleaved RGB in [0, 1]
    rgb: Vec<f32>,
}

impl Strip {
    fn from_image(img: &RgbImage) -> Self {
        let (w, h) = (img.width() as usize, img.height() as usize);
        let rgb = img.as_raw().iter().map(|&b| b as f32 / 255.0).collect();
        Self { w, h, rgb }
    }

    fn luminance(&self) -> Vec<f32> {
        let mut lum = Vec::with_capacity(self.w * self.h);
        for px in self.rgb.chunks_exact(3) {
            lum.push(0.2126 * px[0] + 0.7152 * px[1] + 0.0722 * px[2]);
        }
        lum
    }
}

/// Scores two same-sized strips; returns the weighted score and the raw
/// metrics.
///
/// # Panics
///
/// Panics if the strips differ in size (caller geometry bug).
pub fn score_pair(a: &RgbImage, b: &RgbImage, weights: &ScoreWeights) -> (f64, SeamMetrics) {
    assert_eq!(
        (a.width(), a.height()),
        (b.width(), b.height()),
        "scored strips must agree in size"
    );

    let sa = Strip::from_image(a);
    let sb = Strip::from_image(b);

    let metrics = SeamMetrics {
        rgb_l1: rgb_l1_mean(&sa.rgb, &sb.rgb),
        rgb_l2: rgb_l2_mean(&sa.rgb, &sb.rgb),
        sobel_l1: sobel_l1_mean(&sa, &sb),
    };
    let score = weights.rgb_l1 * metrics.rgb_l1
        + weights.rgb_l2 * metrics.rgb_l2
        + weights.sobel_l1 * metrics.sobel_l1;
    (score, metrics)
}

/// Mean absolute RGB difference per row of a seam strip pair.
///
/// A single bad row (one regenerated scanline out of register) shows up
/// as a spike here even when the whole-strip mean stays low, so the
/// profile maximum feeds the suspicion flag alongside the mean score.
///
/// # Panics
///
/// Panics if the strips differ in size (caller geometry bug).
pub fn l1_profile_per_row(a: &RgbImage, b: &RgbImage) -> Vec<f32> {
    assert_eq!(
        (a.width(), a.height()),
        (b.width(), b.height()),
        "profiled strips must agree in size"
    );
    let (w, h) = (a.width() as usize, a.height() as usize);
    let ar = a.as_raw();
    let br = b.as_raw();

    let mut profile = Vec::with_capacity(h);
    for row in 0..h {
        let start = row * w * 3;
        let end = start + w * 3;
        let sum: f32 = ar[start..end]
            .iter()
            .zip(&br[start..end])
            .map(|(&x, &y)| (x as f32 - y as f32).abs() / 255.0)
            .sum();
        profile.push(sum / (w * 3) as f32);
    }
    profile
}

/// Column-wise counterpart of [`l1_profile_per_row`], for strips that
/// run along a horizontal seam.
///
/// # Panics
///
/// Panics if the strips differ in size (caller geometry bug).
pub fn l1_profile_per_col(a: &RgbImage, b: &RgbImage) -> Vec<f32> {
    assert_eq!(
        (a.width(), a.height()),
        (b.width(), b.height()),
        "profiled strips must agree in size"
    );
    let (w, h) = (a.width() as usize, a.height() as usize);
    let ar = a.as_raw();
    let br = b.as_raw();

    let mut profile = vec![0f32; w];
    for row in 0..h {
        for col in 0..w {
            let i = (row * w + col) * 3;
            for c in 0..3 {
                profile[col] += (ar[i + c] as f32 - br[i + c] as f32).abs() / 255.0;
            }
        }
    }
    for v in &mut profile {
        *v /= (h * 3) as f32;
    }
    profile
}

fn rgb_l1_mean(a: &[f32], b: &[f32]) -> f64 {
    let sum: f64 = a
        .iter()
        .zip(b)
        .map(|(&x, &y)| (x - y).abs() as f64)
        .sum();
    sum / a.len() as f64
}

fn rgb_l2_mean(a: &[f32], b: &[f32]) -> f64 {
    let sum: f64 = a
        .iter()
        .zip(b)
        .map(|(&x, &y)| {
            let d = (x - y) as f64;
            d * d
        })
        .sum();
    sum / a.len() as f64
}

fn sobel_l1_mean(a: &Strip, b: &Strip) -> f64 {
    let ma = sobel_magnitude(&a.luminance(), a.w, a.h);
    let mb = sobel_magnitude(&b.luminance(), b.w, b.h);
    let sum: f64 = ma
        .iter()
        .zip(&mb)
        .map(|(&x, &y)| (x - y).abs() as f64)
        .sum();
    sum / ma.len() as f64
}

/// 3x3 Sobel gradient magnitude with edge-replicated padding.
fn sobel_magnitude(lum: &[f32], w: usize, h: usize) -> Vec<f32> {
    if w < 2 || h < 2 {
        return vec![0.0; w * h];
    }

    let at = |x: isize, y: isize| -> f32 {
        let xc = x.clamp(0, w as isize - 1) as usize;
        let yc = y.clamp(0, h as isize - 1) as usize;
        lum[yc * w + xc]
    };

    let mut out = Vec::with_capacity(w * h);
    for y in 0..h as isize {
        for x in 0..w as isize {
            let gx = at(x - 1, y - 1) + 2.0 * at(x - 1, y) + at(x - 1, y + 1)
                - (at(x + 1, y - 1) + 2.0 * at(x + 1, y) + at(x + 1, y + 1));
            let gy = at(x - 1, y - 1) + 2.0 * at(x, y - 1) + at(x + 1, y - 1)
                - (at(x - 1, y + 1) + 2.0 * at(x, y + 1) + at(x + 1, y + 1));
            out.push((gx * gx + gy * gy).sqrt());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn solid(w: u32, h: u32, v: u8) -> RgbImage {
        RgbImage::from_pixel(w, h, Rgb([v, v, v]))
    }

    #[test]
    fn test_identical_strips_score_zero() {
        let a = solid(8, 16, 120);
        let (score, metrics) = score_pair(&a, &a.clone(), &ScoreWeights::default());
        assert_eq!(score, 0.0);
        assert_eq!(metrics.rgb_l1, 0.0);
        assert_eq!(metrics.sobel_l1, 0.0);
    }

    #[test]
    fn test_uniform_offset_scores_color_terms_only() {
        let a = solid(8, 16, 100);
        let b = solid(8, 16, 150);
        let (_, metrics) = score_pair(&a, &b, &ScoreWeights::default());

        let expected = 50.0 / 255.0;
        assert!((metrics.rgb_l1 - expected).abs() < 1e-6);
        assert!((metrics.rgb_l2 - expected * expected).abs() < 1e-6);
        // Both strips are flat: no gradient difference.
        assert!(metrics.sobel_l1 < 1e-6);
    }

    #[test]
    fn test_structural_break_raises_sobel_term() {
        let flat = solid(8, 16, 128);
        let mut striped = solid(8, 16, 128);
        for y in 0..16 {
            for x in (0..8).step_by(2) {
                striped.put_pixel(x, y, Rgb([0, 0, 0]));
            }
        }

        let (_, metrics) = score_pair(&flat, &striped, &ScoreWeights::default());
        assert!(metrics.sobel_l1 > 0.1, "stripes differ in gradient: {metrics:?}");
    }

    #[test]
    fn test_weights_scale_the_score() {
        let a = solid(8, 8, 100);
        let b = solid(8, 8, 200);

        let (s1, _) = score_pair(&a, &b, &ScoreWeights { rgb_l1: 1.0, rgb_l2: 0.0, sobel_l1: 0.0 });
        let (s2, _) = score_pair(&a, &b, &ScoreWeights { rgb_l1: 2.0, rgb_l2: 0.0, sobel_l1: 0.0 });
        assert!((s2 - 2.0 * s1).abs() < 1e-9);
    }

    #[test]
    fn test_row_profile_spikes_on_bad_row() {
        let a = solid(8, 16, 128);
        let mut b = solid(8, 16, 128);
        for x in 0..8 {
            b.put_pixel(x, 5, Rgb([255, 255, 255]));
        }

        let profile = l1_profile_per_row(&a, &b);
        assert_eq!(profile.len(), 16);
        assert!(profile[5] > 0.4);
        assert!(profile[4] < 1e-6);
    }

    #[test]
    fn test_col_profile_spikes_on_bad_column() {
        let a = solid(16, 8, 128);
        let mut b = solid(16, 8, 128);
        for y in 0..8 {
            b.put_pixel(11, y, Rgb([255, 255, 255]));
        }

        let profile = l1_profile_per_col(&a, &b);
        assert_eq!(profile.len(), 16);
        assert!(profile[11] > 0.4);
        assert!(profile[10] < 1e-6);
    }
}
