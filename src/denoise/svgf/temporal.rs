// src/denoise/svgf/temporal.rs
// Temporal gradient and history-weighted temporal accumulation

use glam::Vec4;

use crate::core::image::{luminance, FloatImage};
use crate::error::{RenderError, RenderResult};

use super::motion::reproject;
use super::pipelines::SvgfParams;

/// Inputs shared by both temporal phases
pub struct TemporalInputs<'a> {
    pub color: &'a FloatImage,
    pub normal_depth: &'a FloatImage,
    pub motion: &'a FloatImage,
    pub prev_color: &'a FloatImage,
    pub prev_normal_depth: &'a FloatImage,
    /// Per-pixel history length of the previous frame
    pub prev_history: &'a [f32],
}

impl TemporalInputs<'_> {
    fn validate(&self) -> RenderResult<(u32, u32)> {
        let size = self.color.size();
        let pixels = size.0 as usize * size.1 as usize;
        let matches = self.normal_depth.size() == size
            && self.motion.size() == size
            && self.prev_color.size() == size
            && self.prev_normal_depth.size() == size
            && self.prev_history.len() == pixels;
        if !matches {
            return Err(RenderError::config(format!(
                "temporal inputs disagree on size (color {:?})",
                size
            )));
        }
        Ok(size)
    }
}

/// Nearest texel of `img` under `uv`
#[inline]
pub(super) fn texel_at(img: &FloatImage, uv: glam::Vec2) -> (u32, u32) {
    let (w, h) = img.size();
    let x = ((uv.x * w as f32) as u32).min(w - 1);
    let y = ((uv.y * h as f32) as u32).min(h - 1);
    (x, y)
}

/// Luminance of the previous frame used by the gradient: the reprojected
/// texel, or the brightest of its 3x3 neighbourhood.
fn previous_luminance(prev: &FloatImage, px: u32, py: u32, brightest: bool) -> f32 {
    if !brightest {
        return luminance(prev.get(px, py).truncate());
    }
    let mut best = f32::MIN;
    for dy in -1..=1 {
        for dx in -1..=1 {
            let l = luminance(prev.get_clamped(px as i32 + dx, py as i32 + dy).truncate());
            if l.is_finite() {
                best = best.max(l);
            }
        }
    }
    if best == f32::MIN {
        0.0
    } else {
        best
    }
}

/// Normalized luminance change between the current frame and its
/// reprojected history, clamped to `[gradient_min, gradient_max]`. Pixels
/// without valid history get `gradient_min`.
pub fn temporal_gradient(inputs: &TemporalInputs<'_>, params: &SvgfParams) -> RenderResult<Vec<f32>> {
    let (w, h) = inputs.validate()?;
    let lo = params.gradient_min.min(params.gradient_max);
    let hi = params.gradient_min.max(params.gradient_max);
    let mut out = Vec::with_capacity(w as usize * h as usize);
    for y in 0..h {
        for x in 0..w {
            let g = match reproject(x, y, w, h, inputs.motion.get(x, y)) {
                Some(uv) => {
                    let (px, py) = texel_at(inputs.prev_color, uv);
                    let prev = previous_luminance(
                        inputs.prev_color,
                        px,
                        py,
                        params.gradient_brightest_neighbour,
                    );
                    let cur = luminance(inputs.color.get(x, y).truncate());
                    let denom = cur.abs().max(prev.abs()).max(1e-4);
                    let g = (cur - prev).abs() / denom;
                    if g.is_finite() {
                        g
                    } else {
                        hi
                    }
                }
                None => lo,
            };
            out.push(g.clamp(lo, hi));
        }
    }
    Ok(out)
}

/// Product of the normal, depth and color similarity falloffs
pub fn similarity(cur: Vec4, prev: Vec4, cur_nd: Vec4, prev_nd: Vec4, params: &SvgfParams) -> f32 {
    let (n0, n1) = (cur_nd.truncate(), prev_nd.truncate());
    let w_normal = if n0.length_squared() < 1e-8 && n1.length_squared() < 1e-8 {
        // Both background
        1.0
    } else {
        let d = n0.normalize_or_zero().dot(n1.normalize_or_zero()).max(0.0);
        (-(1.0 - d) / params.temporal_normal_sigma.max(1e-4)).exp()
    };
    let (d0, d1) = (cur_nd.w, prev_nd.w);
    let w_depth = if d0 <= 0.0 && d1 <= 0.0 {
        1.0
    } else {
        let rel = (d0 - d1).abs() / d0.abs().max(1e-3);
        (-rel / params.temporal_depth_sigma.max(1e-4)).exp()
    };
    let dl = (luminance(cur.truncate()) - luminance(prev.truncate())).abs();
    let w_color = (-dl / params.temporal_color_sigma.max(1e-4)).exp();
    let s = w_normal * w_depth * w_color;
    if s.is_finite() {
        s
    } else {
        0.0
    }
}

/// Blend the current frame with reprojected history.
///
/// Pixels with no history, invalid motion, off-screen reprojection or a
/// disocclusion get `history = 1` and exactly the current color.
pub fn temporal_accumulate(
    inputs: &TemporalInputs<'_>,
    gradient: Option<&[f32]>,
    has_history: bool,
    params: &SvgfParams,
    out_color: &mut FloatImage,
    out_history: &mut [f32],
) -> RenderResult<()> {
    let (w, h) = inputs.validate()?;
    if out_color.size() != (w, h) || out_history.len() != w as usize * h as usize {
        return Err(RenderError::config("temporal outputs do not match inputs"));
    }
    let max_len = params.max_accum_frames.max(1) as f32;
    let base_alpha = params.alpha.clamp(0.0, 1.0);
    let boost = params.gradient_alpha_boost.clamp(0.0, 1.0);

    for y in 0..h {
        for x in 0..w {
            let i = (y * w + x) as usize;
            let cur = inputs.color.get(x, y);
            let reprojected = if has_history {
                reproject(x, y, w, h, inputs.motion.get(x, y))
            } else {
                None
            };
            let blended = reprojected.and_then(|uv| {
                let (px, py) = texel_at(inputs.prev_color, uv);
                let prev = inputs.prev_color.get(px, py);
                let prev_len = inputs.prev_history[(py * w + px) as usize];
                if !prev.is_finite() || !(prev_len >= 1.0) {
                    return None;
                }
                let sim = similarity(
                    cur,
                    prev,
                    inputs.normal_depth.get(x, y),
                    inputs.prev_normal_depth.get(px, py),
                    params,
                );
                if sim < params.disocclusion_threshold {
                    return None;
                }
                let len = (prev_len + 1.0).min(max_len);
                let mut alpha = base_alpha.max(1.0 / len);
                // Dissimilar history weighs less
                alpha = 1.0 - (1.0 - alpha) * sim;
                if let Some(g) = gradient {
                    let g = g[i].clamp(0.0, 1.0) * boost;
                    alpha += (1.0 - alpha) * g;
                }
                Some((prev.lerp(cur, alpha.clamp(0.0, 1.0)), len))
            });
            let (color, len) = blended.unwrap_or((cur, 1.0));
            out_color.set(x, y, color);
            out_history[i] = len;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::denoise::svgf::motion::INVALID_MOTION;

    struct Frame {
        color: FloatImage,
        nd: FloatImage,
        motion: FloatImage,
        prev: FloatImage,
        prev_nd: FloatImage,
        prev_len: Vec<f32>,
    }

    impl Frame {
        fn new(cur: f32, prev: f32, prev_len: f32) -> Self {
            let nd = FloatImage::filled(4, 4, Vec4::new(0.0, 0.0, 1.0, 2.0));
            Self {
                color: FloatImage::filled(4, 4, Vec4::new(cur, cur, cur, 1.0)),
                nd: nd.clone(),
                motion: FloatImage::new(4, 4),
                prev: FloatImage::filled(4, 4, Vec4::new(prev, prev, prev, 1.0)),
                prev_nd: nd,
                prev_len: vec![prev_len; 16],
            }
        }

        fn inputs(&self) -> TemporalInputs<'_> {
            TemporalInputs {
                color: &self.color,
                normal_depth: &self.nd,
                motion: &self.motion,
                prev_color: &self.prev,
                prev_normal_depth: &self.prev_nd,
                prev_history: &self.prev_len,
            }
        }
    }

    #[test]
    fn test_history_grows_and_saturates() {
        let f = Frame::new(0.5, 0.5, 32.0);
        let mut out = FloatImage::new(4, 4);
        let mut len = vec![0.0; 16];
        temporal_accumulate(&f.inputs(), None, true, &SvgfParams::default(), &mut out, &mut len)
            .unwrap();
        assert!(len.iter().all(|l| *l == 32.0));

        let f = Frame::new(0.5, 0.5, 3.0);
        temporal_accumulate(&f.inputs(), None, true, &SvgfParams::default(), &mut out, &mut len)
            .unwrap();
        assert!(len.iter().all(|l| *l == 4.0));
    }

    #[test]
    fn test_blend_uses_alpha_floor() {
        let f = Frame::new(1.0, 0.9, 31.0);
        let mut out = FloatImage::new(4, 4);
        let mut len = vec![0.0; 16];
        let params = SvgfParams {
            temporal_color_sigma: 1.0e6,
            ..SvgfParams::default()
        };
        temporal_accumulate(&f.inputs(), None, true, &params, &mut out, &mut len).unwrap();
        // alpha = max(0.2, 1/32) = 0.2
        assert!((out.get(1, 1).x - 0.92).abs() < 1e-3);
    }

    #[test]
    fn test_invalid_motion_resets_history() {
        let mut f = Frame::new(0.25, 7.0, 10.0);
        f.motion.fill(Vec4::new(INVALID_MOTION, 0.0, 0.0, 0.0));
        let mut out = FloatImage::new(4, 4);
        let mut len = vec![0.0; 16];
        temporal_accumulate(&f.inputs(), None, true, &SvgfParams::default(), &mut out, &mut len)
            .unwrap();
        assert_eq!(out.texels(), f.color.texels());
        assert!(len.iter().all(|l| *l == 1.0));
    }

    #[test]
    fn test_gradient_flags_change() {
        let f = Frame::new(1.0, 0.5, 4.0);
        let g = temporal_gradient(&f.inputs(), &SvgfParams::default()).unwrap();
        assert!(g.iter().all(|v| (*v - 0.5).abs() < 1e-4));

        let f = Frame::new(0.5, 0.5, 4.0);
        let g = temporal_gradient(&f.inputs(), &SvgfParams::default()).unwrap();
        assert!(g.iter().all(|v| *v < 1e-5));
    }

    #[test]
    fn test_normal_flip_is_dissimilar() {
        let p = SvgfParams::default();
        let a = Vec4::new(0.0, 0.0, 1.0, 2.0);
        let b = Vec4::new(0.0, 0.0, -1.0, 2.0);
        assert!(similarity(Vec4::ONE, Vec4::ONE, a, b, &p) < p.disocclusion_threshold);
        assert!((similarity(Vec4::ONE, Vec4::ONE, a, a, &p) - 1.0).abs() < 1e-6);
    }
}
