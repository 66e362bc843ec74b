// src/path_tracing/kernel.rs
// Interface to the opaque ray-generation/shading kernel
// The accumulation stage binds buffers and uniforms and receives two images back

use bytemuck::{Pod, Zeroable};

use crate::core::image::{FloatImage, Rect};
use crate::error::RenderResult;

use super::camera::CameraState;

/// Packed buffer with its declared element layout
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PackedBuffer {
    pub data: Vec<f32>,
    /// Floats per element
    pub stride: usize,
}

impl PackedBuffer {
    pub fn new(data: Vec<f32>, stride: usize) -> Self {
        Self { data, stride }
    }

    pub fn len(&self) -> usize {
        if self.stride == 0 {
            0
        } else {
            self.data.len() / self.stride
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Geometry, BVH and material buffers handed over by the scene builder.
/// Read-only for the pipeline.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SceneBuffers {
    pub triangles: PackedBuffer,
    pub bvh_nodes: PackedBuffer,
    pub materials: PackedBuffer,
    /// Texture arrays as (width, height, layers) plus texels
    pub textures: Vec<(u32, u32, u32, Vec<f32>)>,
    pub triangle_count: u32,
    pub emissive_count: u32,
}

/// Numeric kernel parameters, laid out for a uniform buffer
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable, Debug, PartialEq)]
pub struct KernelParams {
    pub width: u32,
    pub height: u32,
    pub frame: u32,
    pub max_bounces: u32,
    pub samples_per_pixel: u32,
    pub render_mode: u32,
    pub tiles_per_cycle: u32,
    pub interaction_mode: u32,
    pub scissor: [u32; 4],
    pub firefly_clamp: f32,
    pub accumulation_alpha: f32,
    pub environment_intensity: f32,
    pub use_adaptive_sampling: u32,
    pub has_environment_cdf: u32,
    pub has_blue_noise: u32,
    pub environment_cdf_size: u32,
    pub _pad: u32,
}

/// Everything bound for one kernel invocation
pub struct KernelBindings<'a> {
    pub scene: Option<&'a SceneBuffers>,
    pub camera: &'a CameraState,
    pub environment_map: Option<&'a FloatImage>,
    /// Conditional + marginal CDF texture (`environment_cdf_size` wide)
    pub environment_cdf: Option<&'a FloatImage>,
    pub blue_noise: Option<&'a FloatImage>,
    pub adaptive_guidance: Option<&'a FloatImage>,
    pub previous_color: Option<&'a FloatImage>,
    /// Region to shade; `None` for the full frame
    pub scissor: Option<Rect>,
}

/// The kernel's two output images, frame-sized. Only texels inside the
/// scissor rectangle are meaningful.
#[derive(Debug, Clone)]
pub struct KernelOutput {
    pub color: FloatImage,
    pub normal_depth: FloatImage,
}

/// Capability interface over the GPU shading kernel
pub trait ShadingKernel {
    fn invoke(
        &mut self,
        bindings: &KernelBindings<'_>,
        params: &KernelParams,
    ) -> RenderResult<KernelOutput>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_are_uniform_aligned() {
        assert_eq!(std::mem::size_of::<KernelParams>() % 16, 0);
        let p = KernelParams::zeroed();
        assert_eq!(bytemuck::bytes_of(&p).len(), std::mem::size_of::<KernelParams>());
    }

    #[test]
    fn test_packed_buffer_len() {
        let b = PackedBuffer::new(vec![0.0; 12], 4);
        assert_eq!(b.len(), 3);
        assert!(PackedBuffer::default().is_empty());
    }
}
