//! Shared wgpu device/queue and texture upload helpers.
//!
//! The host-side pipeline runs without a GPU; this handle is only touched when
//! an image is copied to a GPU destination (screen texture, environment CDF).

use half::f16;
use once_cell::sync::OnceCell;

use crate::core::image::FloatImage;
use crate::error::{RenderError, RenderResult};

pub struct GpuContext {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub adapter: wgpu::Adapter,
}

static CTX: OnceCell<GpuContext> = OnceCell::new();

fn create_context() -> RenderResult<GpuContext> {
    let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
        backends: wgpu::Backends::all(),
        ..Default::default()
    });
    let adapter = pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions {
        power_preference: wgpu::PowerPreference::HighPerformance,
        compatible_surface: None,
        force_fallback_adapter: false,
    }))
    .ok_or_else(|| RenderError::device("No suitable GPU adapter"))?;

    let (device, queue) = pollster::block_on(adapter.request_device(
        &wgpu::DeviceDescriptor {
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::downlevel_defaults(),
            label: Some("pathforge-device"),
        },
        None,
    ))
    .map_err(|e| RenderError::device(format!("request_device failed: {}", e)))?;

    Ok(GpuContext { device, queue, adapter })
}

/// Get the process-wide GPU context, creating it on first use.
pub fn try_ctx() -> RenderResult<&'static GpuContext> {
    CTX.get_or_try_init(create_context)
}

/// Align to WebGPU's required bytes-per-row for copies.
#[inline]
pub fn align_copy_bpr(unpadded: u32) -> u32 {
    let a = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    ((unpadded + a - 1) / a) * a
}

fn texture_extent(image: &FloatImage) -> wgpu::Extent3d {
    wgpu::Extent3d {
        width: image.width(),
        height: image.height(),
        depth_or_array_layers: 1,
    }
}

/// Create a sampled Rgba32Float texture holding `image`.
pub fn upload_rgba32f(gpu: &GpuContext, image: &FloatImage, label: &str) -> wgpu::Texture {
    let texture = gpu.device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size: texture_extent(image),
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: wgpu::TextureFormat::Rgba32Float,
        usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    });
    write_rgba32f(gpu, &texture, image);
    texture
}

/// Write `image` into an existing Rgba32Float texture of the same size.
pub fn write_rgba32f(gpu: &GpuContext, texture: &wgpu::Texture, image: &FloatImage) {
    gpu.queue.write_texture(
        wgpu::ImageCopyTexture {
            texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        bytemuck::cast_slice(image.texels()),
        wgpu::ImageDataLayout {
            offset: 0,
            bytes_per_row: Some(image.width() * 16),
            rows_per_image: Some(image.height()),
        },
        texture_extent(image),
    );
}

/// Convert `image` to half floats into `staging` and write it into an
/// Rgba16Float texture. `staging` is reused across calls.
pub fn write_rgba16f(
    gpu: &GpuContext,
    texture: &wgpu::Texture,
    image: &FloatImage,
    staging: &mut Vec<f16>,
) {
    staging.clear();
    staging.reserve(image.texels().len() * 4);
    for t in image.texels() {
        staging.extend(t.to_array().iter().map(|c| f16::from_f32(*c)));
    }
    gpu.queue.write_texture(
        wgpu::ImageCopyTexture {
            texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        bytemuck::cast_slice(staging.as_slice()),
        wgpu::ImageDataLayout {
            offset: 0,
            bytes_per_row: Some(image.width() * 8),
            rows_per_image: Some(image.height()),
        },
        texture_extent(image),
    );
}
