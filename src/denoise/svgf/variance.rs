// src/denoise/svgf/variance.rs
// Per-pixel variance of the temporally accumulated color: running moments + neighbourhood variance

use glam::Vec4;

use crate::core::image::{luminance, FloatImage};
use crate::error::{RenderError, RenderResult};
use crate::sampling::online_stats::{spatial_variance, RunningMoments};

use super::motion::reproject;
use super::pipelines::SvgfParams;
use super::temporal::texel_at;

/// Variance estimates for one frame
#[derive(Debug, Clone)]
pub struct VarianceEstimate {
    /// Variance the a-trous filter starts from
    pub filter: Vec<f32>,
    /// Debug image: `(filter, temporal, spatial, history)`
    pub debug: FloatImage,
}

/// Update the luminance moments of `accumulated` and derive variances.
///
/// Previous moments are fetched through `motion`, from the same texel the
/// color history came from. The moment blend rate is `1 / history`, so a
/// pixel whose history was just reset, or whose reprojection fails, starts
/// over from its current luminance. While history is shorter than
/// `variance_history_threshold` the spatial estimate drives the filter.
pub fn estimate_variance(
    accumulated: &FloatImage,
    history: &[f32],
    motion: &FloatImage,
    prev_moments: &FloatImage,
    moments: &mut FloatImage,
    params: &SvgfParams,
) -> RenderResult<VarianceEstimate> {
    let (w, h) = accumulated.size();
    let pixels = w as usize * h as usize;
    if history.len() != pixels
        || motion.size() != (w, h)
        || prev_moments.size() != (w, h)
        || moments.size() != (w, h)
    {
        return Err(RenderError::config("variance inputs do not match"));
    }
    let mut filter = Vec::with_capacity(pixels);
    let mut debug = FloatImage::try_new(w, h)?;
    let threshold = params.variance_history_threshold as f32;

    for y in 0..h {
        for x in 0..w {
            let i = (y * w + x) as usize;
            let len = history[i].max(1.0);
            let source = if len > 1.0 {
                reproject(x, y, w, h, motion.get(x, y)).map(|uv| texel_at(prev_moments, uv))
            } else {
                None
            };
            let mut m = match source {
                Some((px, py)) => {
                    let prev = prev_moments.get(px, py);
                    RunningMoments {
                        mean: prev.x,
                        second_moment: prev.y,
                        count: (len - 1.0) as u32,
                    }
                }
                None => RunningMoments::new(),
            };
            m.push(luminance(accumulated.get(x, y).truncate()), None);
            let temporal = m.variance();
            moments.set(x, y, Vec4::new(m.mean, m.second_moment, len, temporal));

            let spatial = spatial_variance(accumulated, x, y, params.variance_kernel);
            let v = if len < threshold { spatial } else { temporal };
            filter.push(v);
            debug.set(x, y, Vec4::new(v, temporal, spatial, len));
        }
    }
    Ok(VarianceEstimate { filter, debug })
}

/// Spatial-only estimate for frames without temporal data
pub fn spatial_only_variance(color: &FloatImage, params: &SvgfParams) -> RenderResult<VarianceEstimate> {
    let (w, h) = color.size();
    let mut filter = Vec::with_capacity(w as usize * h as usize);
    let mut debug = FloatImage::try_new(w, h)?;
    for y in 0..h {
        for x in 0..w {
            let s = spatial_variance(color, x, y, params.variance_kernel);
            filter.push(s);
            debug.set(x, y, Vec4::new(s, 0.0, s, 0.0));
        }
    }
    Ok(VarianceEstimate { filter, debug })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::denoise::svgf::motion::INVALID_MOTION;

    #[test]
    fn test_fresh_history_uses_spatial() {
        let mut img = FloatImage::filled(3, 3, Vec4::ZERO);
        img.set(1, 1, Vec4::new(9.0, 9.0, 9.0, 1.0));
        let prev = FloatImage::filled(3, 3, Vec4::new(5.0, 100.0, 0.0, 0.0));
        let mut moments = FloatImage::new(3, 3);
        let still = FloatImage::new(3, 3);
        let est = estimate_variance(&img, &[1.0; 9], &still, &prev, &mut moments, &SvgfParams::default())
            .unwrap();
        // History 1: moments restart from the current value, spatial drives the filter
        assert!((moments.get(1, 1).x - 9.0).abs() < 1e-4);
        assert_eq!(moments.get(1, 1).w, 0.0);
        assert!((est.filter[4] - 9.0).abs() < 1e-3);
    }

    #[test]
    fn test_long_history_uses_temporal() {
        let img = FloatImage::filled(2, 2, Vec4::splat(1.0));
        // mean 0, second moment 1 over 9 frames -> pushing 1 with rate 1/10
        let prev = FloatImage::filled(2, 2, Vec4::new(0.0, 1.0, 9.0, 1.0));
        let mut moments = FloatImage::new(2, 2);
        let still = FloatImage::new(2, 2);
        let est = estimate_variance(&img, &[10.0; 4], &still, &prev, &mut moments, &SvgfParams::default())
            .unwrap();
        let m = moments.get(0, 0);
        assert!((m.x - 0.1).abs() < 1e-5);
        assert!((m.y - 1.0).abs() < 1e-5);
        assert!((est.filter[0] - (1.0 - 0.01)).abs() < 1e-4);
    }

    #[test]
    fn test_moments_follow_reprojection() {
        let (w, h) = (8u32, 4u32);
        let img = FloatImage::filled(w, h, Vec4::splat(1.0));
        // Previous moments: a bright surface on the left, a dark one on the right
        let mut prev = FloatImage::new(w, h);
        for y in 0..h {
            for x in 0..w {
                let m = if x < 4 { Vec4::new(1.0, 1.0, 5.0, 0.0) } else { Vec4::new(0.0, 0.0, 5.0, 0.0) };
                prev.set(x, y, m);
            }
        }
        // Camera shifted by three pixels: history of pixel x came from x - 3
        let mut motion = FloatImage::new(w, h);
        motion.fill(Vec4::new(-3.0 / w as f32, 0.0, 0.0, 1.0));
        for y in 0..h {
            motion.set(0, y, Vec4::new(INVALID_MOTION, INVALID_MOTION, 0.0, 0.0));
        }
        let mut history = vec![6.0; (w * h) as usize];
        for y in 0..h {
            history[(y * w) as usize] = 1.0;
        }

        let mut moments = FloatImage::new(w, h);
        let est = estimate_variance(&img, &history, &motion, &prev, &mut moments, &SvgfParams::default())
            .unwrap();
        // Pixel 4 continues the bright surface it came from: no variance
        assert!((moments.get(4, 1).x - 1.0).abs() < 1e-5);
        assert!(moments.get(4, 1).w.abs() < 1e-5);
        assert!(est.filter[(w + 4) as usize].abs() < 1e-5);
        // Pixel 7 came from pixel 4, not from the dark texel at its own position
        assert!((moments.get(7, 2).x - 1.0).abs() < 1e-5);
        // No usable history: moments restart
        let fresh = moments.get(0, 3);
        assert!((fresh.x - 1.0).abs() < 1e-5 && (fresh.y - 1.0).abs() < 1e-5);
        assert_eq!(fresh.z, 1.0);
    }
}
