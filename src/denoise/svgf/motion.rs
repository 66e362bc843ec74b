// src/denoise/svgf/motion.rs
// Screen-space motion vectors from depth and the previous frame's camera

use glam::{Vec2, Vec4};

use crate::core::image::FloatImage;
use crate::error::RenderResult;
use crate::path_tracing::camera::{project_with, ray_direction_with, CameraState};

/// Motion component marking a pixel without usable history
pub const INVALID_MOTION: f32 = 100.0;

/// Distance used for pixels that hit nothing; reprojects by rotation only
const BACKGROUND_DISTANCE: f32 = 1.0e4;

#[inline]
pub fn pixel_uv(x: u32, y: u32, width: u32, height: u32) -> Vec2 {
    Vec2::new(
        (x as f32 + 0.5) / width as f32,
        (y as f32 + 0.5) / height as f32,
    )
}

/// True when `m` carries the invalid flag or garbage
#[inline]
pub fn is_invalid(m: Vec4) -> bool {
    !m.x.is_finite()
        || !m.y.is_finite()
        || m.x.abs() >= INVALID_MOTION
        || m.y.abs() >= INVALID_MOTION
}

/// Previous-frame uv of pixel `(x, y)`, `None` when the motion vector is
/// invalid or lands outside the screen
#[inline]
pub fn reproject(x: u32, y: u32, width: u32, height: u32, motion: Vec4) -> Option<Vec2> {
    if is_invalid(motion) {
        return None;
    }
    let uv = pixel_uv(x, y, width, height) + Vec2::new(motion.x, motion.y);
    let inside = (0.0..=1.0).contains(&uv.x) && (0.0..=1.0).contains(&uv.y);
    inside.then_some(uv)
}

/// Per-pixel motion `(prev_uv - uv, 0, valid)`.
///
/// `normal_depth.w` is the hit distance along the primary ray; zero, negative
/// or non-finite values are treated as background. Without a previous camera
/// every pixel is flagged invalid.
pub fn compute_motion(
    normal_depth: &FloatImage,
    camera: &CameraState,
    previous: Option<&CameraState>,
) -> RenderResult<FloatImage> {
    let (w, h) = normal_depth.size();
    let mut motion = FloatImage::try_new(w, h)?;
    let invalid = Vec4::new(INVALID_MOTION, INVALID_MOTION, 0.0, 0.0);
    let Some(previous) = previous else {
        motion.fill(invalid);
        return Ok(motion);
    };

    let inv_vp = camera.view_projection().inverse();
    let prev_vp = previous.view_projection();
    let origin = camera.position();
    for y in 0..h {
        for x in 0..w {
            let uv = pixel_uv(x, y, w, h);
            let depth = normal_depth.get(x, y).w;
            let distance = if depth.is_finite() && depth > 0.0 {
                depth
            } else {
                BACKGROUND_DISTANCE
            };
            let world = origin + ray_direction_with(&inv_vp, uv) * distance;
            let texel = match project_with(&prev_vp, world) {
                Some(prev_uv) => {
                    let d = prev_uv - uv;
                    Vec4::new(d.x, d.y, 0.0, 1.0)
                }
                None => invalid,
            };
            motion.set(x, y, texel);
        }
    }
    Ok(motion)
}
