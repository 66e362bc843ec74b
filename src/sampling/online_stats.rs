// src/sampling/online_stats.rs
// Per-pixel running moments, neighborhood variance and the variance -> sample count mapping

use glam::Vec4;
use log::warn;

use crate::core::image::FloatImage;
use crate::error::{RenderError, RenderResult};

/// Running `(mean, secondMoment)` of one scalar signal
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RunningMoments {
    pub mean: f32,
    pub second_moment: f32,
    pub count: u32,
}

impl RunningMoments {
    pub fn new() -> Self {
        Self::default()
    }

    /// Blend in one sample. With `blend_rate == None` the rate is
    /// `1 / count`, which reproduces the arithmetic mean.
    pub fn push(&mut self, sample: f32, blend_rate: Option<f32>) {
        let sample = if sample.is_finite() { sample } else { self.mean };
        self.count = self.count.saturating_add(1);
        if self.count == 1 {
            self.mean = sample;
            self.second_moment = sample * sample;
            return;
        }
        let alpha = blend_rate.unwrap_or(1.0 / self.count as f32).clamp(0.0, 1.0);
        self.mean += (sample - self.mean) * alpha;
        self.second_moment += (sample * sample - self.second_moment) * alpha;
    }

    /// Biased variance, never negative
    pub fn variance(&self) -> f32 {
        (self.second_moment - self.mean * self.mean).max(0.0)
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Channel layout of a moments image
pub mod moments_layout {
    /// R: mean luminance, G: second moment, B: history length, A: variance
    pub const MEAN: usize = 0;
    pub const SECOND_MOMENT: usize = 1;
    pub const HISTORY: usize = 2;
    pub const VARIANCE: usize = 3;
}

/// Update a moments image from `luma_source`, reading `previous` and writing
/// `current`. `history_cap` bounds the history length so the implicit rate
/// `1 / history` never drops below `1 / history_cap`.
pub fn update_moments(
    previous: &FloatImage,
    current: &mut FloatImage,
    luma_source: &FloatImage,
    blend_rate: Option<f32>,
    history_cap: u32,
) -> RenderResult<()> {
    if previous.size() != luma_source.size() || current.size() != luma_source.size() {
        return Err(RenderError::config(format!(
            "moments buffers {:?}/{:?} do not match source {:?}",
            previous.size(),
            current.size(),
            luma_source.size()
        )));
    }
    let cap = history_cap.max(1) as f32;
    for ((prev, out), src) in previous
        .texels()
        .iter()
        .zip(current.texels_mut().iter_mut())
        .zip(luma_source.texels())
    {
        let l = crate::core::image::luminance(src.truncate());
        let mut m = RunningMoments {
            mean: prev.x,
            second_moment: prev.y,
            count: prev.z.max(0.0).min(cap - 1.0) as u32,
        };
        m.push(l, blend_rate);
        *out = Vec4::new(m.mean, m.second_moment, m.count as f32, m.variance());
    }
    Ok(())
}

/// Largest neighborhood the spatial variance accepts
pub const MAX_VARIANCE_WINDOW: u32 = 15;

/// Sanitize a configured window size: odd, within `[3, MAX_VARIANCE_WINDOW]`.
pub fn variance_window(n: u32) -> u32 {
    if n > MAX_VARIANCE_WINDOW {
        warn!("Variance window {} clamped to {}", n, MAX_VARIANCE_WINDOW);
    }
    n.clamp(3, MAX_VARIANCE_WINDOW) | 1
}

/// Unbiased variance of luminance over the `n x n` window centred on
/// `(x, y)`, edges clamped. `n` is forced odd and kept within
/// `[3, MAX_VARIANCE_WINDOW]`.
pub fn spatial_variance(image: &FloatImage, x: u32, y: u32, n: u32) -> f32 {
    let n = n.clamp(3, MAX_VARIANCE_WINDOW) | 1;
    let r = (n / 2) as i32;
    let (mut sum, mut sum_sq, mut count) = (0.0f64, 0.0f64, 0u32);
    for dy in -r..=r {
        for dx in -r..=r {
            let t = image.get_clamped(x as i32 + dx, y as i32 + dy);
            let l = crate::core::image::luminance(t.truncate());
            if !l.is_finite() {
                continue;
            }
            sum += l as f64;
            sum_sq += (l as f64) * (l as f64);
            count += 1;
        }
    }
    if count < 2 {
        return 0.0;
    }
    let c = count as f64;
    let mean = sum / c;
    (((sum_sq - c * mean * mean) / (c - 1.0)).max(0.0)) as f32
}

/// Neighborhood variance for every pixel
pub fn spatial_variance_image(image: &FloatImage, n: u32) -> Vec<f32> {
    let (w, h) = image.size();
    let mut out = Vec::with_capacity(w as usize * h as usize);
    for y in 0..h {
        for x in 0..w {
            out.push(spatial_variance(image, x, y, n));
        }
    }
    out
}

/// Map an error estimate to a per-pixel sample count.
///
/// At or below `threshold / 2` gives `min`, at or above `threshold` gives
/// `max`, linear in between. NaN and negative inputs count as zero.
pub fn target_samples(variance: f32, threshold: f32, min: u32, max: u32) -> u32 {
    let (lo, hi) = (min.min(max), min.max(max));
    let v = if variance.is_nan() || variance < 0.0 { 0.0 } else { variance };
    let threshold = if threshold.is_finite() { threshold.max(0.0) } else { 0.0 };
    let low = threshold * 0.5;
    let t = if v <= low {
        0.0
    } else if v >= threshold {
        1.0
    } else {
        (v - low) / (threshold - low).max(f32::EPSILON)
    };
    let samples = lo as f32 + (hi - lo) as f32 * t;
    (samples.round() as u32).clamp(lo, hi)
}
