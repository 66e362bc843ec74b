// src/lighting/env_cdf.rs
// Importance-sampling tables for equirectangular environment maps
// Builds conditional + marginal CDFs into one float texture for inverse-CDF lookup

use std::f32::consts::PI;
use std::path::Path;

use glam::{Vec2, Vec4};
use log::{debug, info};

use crate::core::image::FloatImage;
use crate::error::{RenderError, RenderResult};
use crate::gpu::{upload_rgba32f, GpuContext};

/// Upper bound on the CDF grid resolution
pub const MAX_CDF_SIZE: u32 = 1024;

/// Largest uniform input; keeps inversion off trailing zero-mass cells
const ONE_MINUS_EPSILON: f32 = 1.0 - f32::EPSILON;

/// Conditional and marginal CDF tables of one environment map.
///
/// Layout of `texture` (`size` wide, `size + 1` high):
/// - row `y < size`, texel `x`: `(cdf, pdf, 0, 1)` of column `x` within row `y`
/// - row `size`, texel `y`: `(cdf, pdf, 0, 1)` of row `y` in the marginal
///
/// `pdf` channels hold the discrete probability mass of a cell, normalized
/// by its row (or the grand total for the marginal). Rows with no energy are
/// all zero.
#[derive(Debug, Clone, PartialEq)]
pub struct EnvironmentCdf {
    texture: FloatImage,
    size: u32,
    total: f32,
}

impl EnvironmentCdf {
    /// Build tables from a float RGBA environment map.
    pub fn build(env: &FloatImage) -> RenderResult<Self> {
        let (width, height) = env.size();
        if width == 0 || height == 0 {
            return Err(RenderError::config("environment map has zero size"));
        }
        let size = width.min(MAX_CDF_SIZE);
        let weighted = weighted_luminance(env);
        let grid = downsample_nearest(&weighted, width, height, size);

        let n = size as usize;
        let mut texture = FloatImage::try_new(size, size + 1)?;
        let mut row_totals = Vec::with_capacity(n);

        for y in 0..n {
            let row = &grid[y * n..(y + 1) * n];
            let total: f32 = row.iter().sum();
            row_totals.push(total);
            write_cdf_row(&mut texture, y as u32, row, total);
        }

        let grand_total: f32 = row_totals.iter().sum();
        // Marginal lives in the extra row; texel x holds source row x
        write_cdf_row(&mut texture, size, &row_totals, grand_total);

        debug!(
            "Environment CDF {}x{} built from {}x{} map (total {:.4})",
            size,
            size + 1,
            width,
            height,
            grand_total
        );
        Ok(Self {
            texture,
            size,
            total: grand_total,
        })
    }

    /// Ingest an image of any supported format and build its tables.
    pub fn from_dynamic(image: &image::DynamicImage) -> RenderResult<Self> {
        Self::build(&FloatImage::from_dynamic(image))
    }

    /// Logical grid size `S`
    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn texture(&self) -> &FloatImage {
        &self.texture
    }

    pub fn into_texture(self) -> FloatImage {
        self.texture
    }

    /// Sum of all weighted luminance cells; zero for a black map
    pub fn total(&self) -> f32 {
        self.total
    }

    pub fn conditional(&self, x: u32, y: u32) -> (f32, f32) {
        let t = self.texture.get(x, y);
        (t.x, t.y)
    }

    pub fn marginal(&self, y: u32) -> (f32, f32) {
        let t = self.texture.get(y, self.size);
        (t.x, t.y)
    }

    /// Map two uniform numbers to an equirectangular uv and its density with
    /// respect to uv area. A black map falls back to uniform sampling.
    pub fn sample(&self, u1: f32, u2: f32) -> (Vec2, f32) {
        let u1 = u1.clamp(0.0, ONE_MINUS_EPSILON);
        let u2 = u2.clamp(0.0, ONE_MINUS_EPSILON);
        if self.total <= 0.0 {
            return (Vec2::new(u1, u2), 1.0);
        }
        let s = self.size;

        let row = invert(s, u2, |i| self.marginal(i).0);
        let (row_cdf, row_mass) = self.marginal(row);
        let dv = cell_offset(u2, row_cdf, row_mass);

        let col = invert(s, u1, |i| self.conditional(i, row).0);
        let (col_cdf, col_mass) = self.conditional(col, row);
        let du = cell_offset(u1, col_cdf, col_mass);

        let uv = Vec2::new(
            (col as f32 + du) / s as f32,
            (row as f32 + dv) / s as f32,
        );
        (uv, row_mass * col_mass * (s * s) as f32)
    }

    /// Density of `uv` under `sample`
    pub fn pdf(&self, uv: Vec2) -> f32 {
        if self.total <= 0.0 {
            return 1.0;
        }
        let s = self.size;
        let x = ((uv.x.clamp(0.0, 1.0) * s as f32) as u32).min(s - 1);
        let y = ((uv.y.clamp(0.0, 1.0) * s as f32) as u32).min(s - 1);
        self.marginal(y).1 * self.conditional(x, y).1 * (s * s) as f32
    }

    /// Upload the table texture (Rgba32Float, `S x (S+1)`)
    pub fn upload_to_gpu(&self, gpu: &GpuContext) -> wgpu::Texture {
        upload_rgba32f(gpu, &self.texture, "environment-cdf")
    }
}

/// Read an environment map from disk into float RGBA.
/// 8-bit sources are normalized to [0,1]; HDR sources keep their range.
pub fn load_environment(path: impl AsRef<Path>) -> RenderResult<FloatImage> {
    let path = path.as_ref();
    let dynamic = image::open(path)?;
    let image = FloatImage::from_dynamic(&dynamic);
    info!(
        "Loaded environment map {} ({}x{})",
        path.display(),
        image.width(),
        image.height()
    );
    Ok(image)
}

/// Per-pixel luminance scaled by the solid angle of its latitude band
pub fn weighted_luminance(env: &FloatImage) -> Vec<f32> {
    let (width, height) = env.size();
    let mut out = Vec::with_capacity(width as usize * height as usize);
    for y in 0..height {
        let theta = (y as f32 + 0.5) / height as f32 * PI;
        let sin_theta = theta.sin();
        for x in 0..width {
            let l = env.luminance_at(x, y);
            out.push(if l.is_finite() { l.max(0.0) * sin_theta } else { 0.0 });
        }
    }
    out
}

fn downsample_nearest(values: &[f32], width: u32, height: u32, size: u32) -> Vec<f32> {
    let mut grid = Vec::with_capacity(size as usize * size as usize);
    for gy in 0..size {
        let sy = (((gy as f32 + 0.5) / size as f32) * height as f32) as u32;
        let sy = sy.min(height - 1);
        for gx in 0..size {
            let sx = (((gx as f32 + 0.5) / size as f32) * width as f32) as u32;
            let sx = sx.min(width - 1);
            grid.push(values[(sy * width + sx) as usize]);
        }
    }
    grid
}

fn write_cdf_row(
    texture: &mut FloatImage,
    row: u32,
    values: &[f32],
    total: f32,
) {
    let mut running = 0.0f32;
    for (i, &v) in values.iter().enumerate() {
        running += v;
        let texel = if total > 0.0 {
            Vec4::new(running / total, v / total, 0.0, 1.0)
        } else {
            Vec4::new(0.0, 0.0, 0.0, 1.0)
        };
        texture.set(i as u32, row, texel);
    }
    // Pin the last entry to exactly 1 against accumulated rounding
    if total > 0.0 && !values.is_empty() {
        let x = values.len() as u32 - 1;
        let mut last = texture.get(x, row);
        last.x = 1.0;
        texture.set(x, row, last);
    }
}

/// First index whose cdf exceeds `u`
fn invert(len: u32, u: f32, cdf_at: impl Fn(u32) -> f32) -> u32 {
    let (mut lo, mut hi) = (0u32, len);
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        if cdf_at(mid) <= u {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    lo.min(len - 1)
}

fn cell_offset(u: f32, cdf_end: f32, mass: f32) -> f32 {
    if mass <= 0.0 {
        return 0.5;
    }
    ((u - (cdf_end - mass)) / mass).clamp(0.0, 1.0)
}
