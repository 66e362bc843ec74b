// src/denoise/svgf/atrous.rs
// Edge-aware a-trous wavelet filter with variance propagation

use std::mem;

use glam::Vec4;

use crate::core::image::{luminance, FloatImage};
use crate::error::{RenderError, RenderResult};

use super::pipelines::SvgfParams;

/// Guide data shared by all iterations
pub struct FilterGuide<'a> {
    pub normal_depth: &'a FloatImage,
    /// Per-pixel history length; `None` disables the history weight
    pub history: Option<&'a [f32]>,
}

#[inline]
fn normal_weight(n0: Vec4, n1: Vec4, power: f32) -> f32 {
    let (a, b) = (n0.truncate(), n1.truncate());
    if a.length_squared() < 1e-8 && b.length_squared() < 1e-8 {
        return 1.0;
    }
    let d = a.normalize_or_zero().dot(b.normalize_or_zero()).max(0.0);
    d.powf(power.max(0.0))
}

#[inline]
fn depth_weight(d0: f32, d1: f32, phi: f32) -> f32 {
    if d0 <= 0.0 && d1 <= 0.0 {
        return 1.0;
    }
    let rel = (d0 - d1).abs() / d0.abs().max(1e-3);
    (-rel / phi.max(1e-4)).exp()
}

/// One filter pass from `src` into `dst`, step `step`.
fn atrous_pass(
    src: &FloatImage,
    src_var: &[f32],
    dst: &mut FloatImage,
    dst_var: &mut [f32],
    guide: &FilterGuide<'_>,
    params: &SvgfParams,
    step: i32,
) {
    let (w, h) = src.size();
    let taps = params.kernel.taps();
    let r = params.kernel.radius();
    let max_len = params.max_accum_frames.max(1) as f32;

    for y in 0..h {
        for x in 0..w {
            let i = (y * w + x) as usize;
            let center = src.get(x, y);
            if !center.is_finite() {
                dst.set(x, y, Vec4::ZERO);
                dst_var[i] = 0.0;
                continue;
            }
            let l_c = luminance(center.truncate());
            let nd_c = guide.normal_depth.get(x, y);
            let sigma_l = params.phi_color * src_var[i].max(0.0).sqrt() + 1e-6;

            let mut sum_c = Vec4::ZERO;
            let mut sum_w = 0.0f32;
            let mut sum_v = 0.0f32;
            for ky in -r..=r {
                for kx in -r..=r {
                    let qx = x as i32 + kx * step;
                    let qy = y as i32 + ky * step;
                    if qx < 0 || qy < 0 || qx >= w as i32 || qy >= h as i32 {
                        continue;
                    }
                    let (qx, qy) = (qx as u32, qy as u32);
                    let q = src.get(qx, qy);
                    if !q.is_finite() {
                        continue;
                    }
                    let j = (qy * w + qx) as usize;
                    let nd_q = guide.normal_depth.get(qx, qy);
                    let k = taps[(kx + r) as usize] * taps[(ky + r) as usize];
                    let w_l = (-(l_c - luminance(q.truncate())).abs() / sigma_l).exp();
                    let weight = k
                        * w_l
                        * normal_weight(nd_c, nd_q, params.normal_power)
                        * depth_weight(nd_c.w, nd_q.w, params.phi_depth);
                    sum_c += q * weight;
                    sum_w += weight;
                    sum_v += weight * weight * src_var[j];
                }
            }

            let (mut out, var) = if sum_w > 1e-12 {
                (sum_c / sum_w, sum_v / (sum_w * sum_w))
            } else {
                (center, src_var[i])
            };
            if let (true, Some(history)) = (params.use_history_weight, guide.history) {
                // Converged pixels resist further blurring
                let keep = (history[i] / max_len).clamp(0.0, 1.0) * params.history_weight.clamp(0.0, 1.0);
                out = out.lerp(center, keep);
            }
            out.w = center.w;
            dst.set(x, y, out);
            dst_var[i] = var.max(0.0);
        }
    }
}

/// Run `iterations` a-trous passes; step size of pass `i` is
/// `step_multiplier^i`. Each pass reads the previous pass's output and the
/// variance it propagated.
pub fn atrous_filter(
    color: &FloatImage,
    variance: &[f32],
    guide: &FilterGuide<'_>,
    params: &SvgfParams,
    iterations: u32,
) -> RenderResult<FloatImage> {
    let (w, h) = color.size();
    let pixels = w as usize * h as usize;
    if variance.len() != pixels || guide.normal_depth.size() != (w, h) {
        return Err(RenderError::config("a-trous inputs do not match color size"));
    }
    if guide.history.map_or(false, |hl| hl.len() != pixels) {
        return Err(RenderError::config("a-trous history does not match color size"));
    }

    let mut src = color.clone();
    let mut src_var = variance.to_vec();
    let mut dst = FloatImage::try_new(w, h)?;
    let mut dst_var = vec![0.0f32; pixels];

    for i in 0..iterations {
        atrous_pass(&src, &src_var, &mut dst, &mut dst_var, guide, params, params.step_size(i));
        mem::swap(&mut src, &mut dst);
        mem::swap(&mut src_var, &mut dst_var);
    }
    Ok(src)
}
