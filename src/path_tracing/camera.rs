//! Camera matrices as seen by the accumulation stage and the denoiser.

use glam::{Mat4, Vec2, Vec3, Vec4};

/// Camera-to-world transform plus projection
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraState {
    /// Camera-to-world matrix
    pub world: Mat4,
    /// View-to-clip matrix (depth range 0..1)
    pub projection: Mat4,
}

impl Default for CameraState {
    fn default() -> Self {
        Self {
            world: Mat4::IDENTITY,
            projection: Mat4::perspective_rh(60f32.to_radians(), 1.0, 0.1, 1000.0),
        }
    }
}

impl CameraState {
    pub fn new(world: Mat4, projection: Mat4) -> Self {
        Self { world, projection }
    }

    /// Right-handed camera at `eye` looking at `target`
    pub fn look_at(eye: Vec3, target: Vec3, up: Vec3, fov_y: f32, aspect: f32) -> Self {
        let view = Mat4::look_at_rh(eye, target, up);
        Self {
            world: view.inverse(),
            projection: Mat4::perspective_rh(fov_y, aspect, 0.1, 1000.0),
        }
    }

    pub fn position(&self) -> Vec3 {
        self.world.w_axis.truncate()
    }

    pub fn view(&self) -> Mat4 {
        self.world.inverse()
    }

    pub fn view_projection(&self) -> Mat4 {
        self.projection * self.view()
    }

    /// Bitwise matrix comparison. Any change, however small, counts as motion.
    pub fn matrices_equal(&self, other: &CameraState) -> bool {
        self.world.to_cols_array() == other.world.to_cols_array()
            && self.projection.to_cols_array() == other.projection.to_cols_array()
    }

    /// World-space direction of the primary ray through `uv` (origin top-left)
    pub fn ray_direction(&self, uv: Vec2) -> Vec3 {
        ray_direction_with(&self.view_projection().inverse(), uv)
    }

    /// Screen position of a world point, `None` behind the camera
    pub fn project(&self, world_pos: Vec3) -> Option<Vec2> {
        project_with(&self.view_projection(), world_pos)
    }
}

/// `ray_direction` with a precomputed inverse view-projection, for per-pixel loops
pub fn ray_direction_with(inv_view_projection: &Mat4, uv: Vec2) -> Vec3 {
    let ndc = Vec2::new(uv.x * 2.0 - 1.0, 1.0 - uv.y * 2.0);
    let near = *inv_view_projection * Vec4::new(ndc.x, ndc.y, 0.0, 1.0);
    let far = *inv_view_projection * Vec4::new(ndc.x, ndc.y, 1.0, 1.0);
    let near = near.truncate() / near.w;
    let far = far.truncate() / far.w;
    (far - near).normalize_or_zero()
}

/// `project` with a precomputed view-projection
pub fn project_with(view_projection: &Mat4, world_pos: Vec3) -> Option<Vec2> {
    let clip = *view_projection * world_pos.extend(1.0);
    if clip.w <= 1e-6 {
        return None;
    }
    let ndc = clip.truncate() / clip.w;
    Some(Vec2::new(ndc.x * 0.5 + 0.5, 0.5 - ndc.y * 0.5))
}
