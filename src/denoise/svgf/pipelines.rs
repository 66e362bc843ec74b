// src/denoise/svgf/pipelines.rs
// Tunables for the four SVGF phases: gradient, temporal accumulation, variance, a-trous filter

use serde::{Deserialize, Serialize};

/// Footprint of the a-trous low-pass kernel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum FilterKernel {
    /// B3-spline, weights (1, 4, 6, 4, 1) / 16 per axis
    #[default]
    Box5,
    /// (1, 2, 1) / 4 per axis
    Box3,
}

impl FilterKernel {
    pub fn taps(self) -> &'static [f32] {
        match self {
            FilterKernel::Box5 => &[1.0 / 16.0, 4.0 / 16.0, 6.0 / 16.0, 4.0 / 16.0, 1.0 / 16.0],
            FilterKernel::Box3 => &[0.25, 0.5, 0.25],
        }
    }

    pub fn radius(self) -> i32 {
        (self.taps().len() / 2) as i32
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SvgfParams {
    /// A-trous iterations after a full temporal pass
    pub iterations: u32,
    /// A-trous iterations when running spatially only
    pub spatial_only_iterations: u32,
    pub step_multiplier: u32,
    pub kernel: FilterKernel,

    /// Lower bound of the temporal blend factor
    pub alpha: f32,
    pub max_accum_frames: u32,

    pub use_temporal_gradient: bool,
    /// Compare against the brightest of the 3x3 reprojected neighbourhood
    pub gradient_brightest_neighbour: bool,
    pub gradient_min: f32,
    pub gradient_max: f32,
    /// How far a full-strength gradient pushes alpha toward 1
    pub gradient_alpha_boost: f32,

    /// Temporal similarity falloffs
    pub temporal_normal_sigma: f32,
    pub temporal_depth_sigma: f32,
    pub temporal_color_sigma: f32,
    /// Similarity below which history is dropped as disoccluded
    pub disocclusion_threshold: f32,

    /// Side of the spatial variance window
    pub variance_kernel: u32,
    /// History length below which the spatial variance drives the filter
    pub variance_history_threshold: u32,

    /// Edge-stopping terms of the a-trous filter
    pub phi_color: f32,
    pub normal_power: f32,
    pub phi_depth: f32,
    pub use_history_weight: bool,
    pub history_weight: f32,
}

impl Default for SvgfParams {
    fn default() -> Self {
        Self {
            iterations: 5,
            spatial_only_iterations: 2,
            step_multiplier: 2,
            kernel: FilterKernel::Box5,
            alpha: 0.2,
            max_accum_frames: 32,
            use_temporal_gradient: true,
            gradient_brightest_neighbour: true,
            gradient_min: 0.0,
            gradient_max: 1.0,
            gradient_alpha_boost: 1.0,
            temporal_normal_sigma: 0.2,
            temporal_depth_sigma: 0.1,
            temporal_color_sigma: 4.0,
            disocclusion_threshold: 0.01,
            variance_kernel: 3,
            variance_history_threshold: 4,
            phi_color: 4.0,
            normal_power: 128.0,
            phi_depth: 1.0,
            use_history_weight: true,
            history_weight: 0.5,
        }
    }
}

impl SvgfParams {
    /// Step between taps for a-trous iteration `i`
    pub fn step_size(&self, iteration: u32) -> i32 {
        self.step_multiplier.max(1).saturating_pow(iteration).min(1 << 16) as i32
    }
}
