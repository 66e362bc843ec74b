//! Host-side float images used as render attachments.
//!
//! Every attachment in the pipeline is an RGBA32F grid stored row-major with
//! one `glam::Vec4` per texel. Radiance lives in RGB, normal+depth images keep
//! the world normal in RGB and linear view depth in A.

use glam::{Vec3, Vec4};
use image::DynamicImage;

use crate::error::{RenderError, RenderResult};

/// Rec. 709 luminance weights
pub const LUMINANCE_WEIGHTS: Vec3 = Vec3::new(0.2126, 0.7152, 0.0722);

#[inline]
pub fn luminance(rgb: Vec3) -> f32 {
    rgb.dot(LUMINANCE_WEIGHTS)
}

/// Integer pixel rectangle, `[x, x + width) × [y, y + height)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    pub fn full(width: u32, height: u32) -> Self {
        Self::new(0, 0, width, height)
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn contains(&self, x: u32, y: u32) -> bool {
        x >= self.x && y >= self.y && x < self.x + self.width && y < self.y + self.height
    }

    /// Clip to the `[0, width) × [0, height)` image domain
    pub fn clamp_to(&self, width: u32, height: u32) -> Rect {
        let x = self.x.min(width);
        let y = self.y.min(height);
        Rect {
            x,
            y,
            width: self.width.min(width - x),
            height: self.height.min(height - y),
        }
    }
}

/// RGBA32F image
#[derive(Debug, Clone, PartialEq)]
pub struct FloatImage {
    width: u32,
    height: u32,
    texels: Vec<Vec4>,
}

impl FloatImage {
    /// Allocate a zeroed image, reporting allocation failure instead of aborting.
    pub fn try_new(width: u32, height: u32) -> RenderResult<Self> {
        let len = width as usize * height as usize;
        let mut texels = Vec::new();
        texels.try_reserve_exact(len).map_err(|e| {
            RenderError::resource(format!("cannot allocate {}x{} image: {}", width, height, e))
        })?;
        texels.resize(len, Vec4::ZERO);
        Ok(Self { width, height, texels })
    }

    pub fn new(width: u32, height: u32) -> Self {
        Self::filled(width, height, Vec4::ZERO)
    }

    pub fn filled(width: u32, height: u32, value: Vec4) -> Self {
        Self {
            width,
            height,
            texels: vec![value; width as usize * height as usize],
        }
    }

    pub fn from_texels(width: u32, height: u32, texels: Vec<Vec4>) -> RenderResult<Self> {
        let expected = width as usize * height as usize;
        if texels.len() != expected {
            return Err(RenderError::config(format!(
                "texel count mismatch: expected {}, got {}",
                expected,
                texels.len()
            )));
        }
        Ok(Self { width, height, texels })
    }

    /// Build from any decoded image, normalizing to float RGBA.
    pub fn from_dynamic(image: &DynamicImage) -> Self {
        let rgba = image.to_rgba32f();
        let (width, height) = rgba.dimensions();
        let texels = rgba
            .pixels()
            .map(|p| Vec4::new(p[0], p[1], p[2], p[3]))
            .collect();
        Self { width, height, texels }
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn texels(&self) -> &[Vec4] {
        &self.texels
    }

    pub fn texels_mut(&mut self) -> &mut [Vec4] {
        &mut self.texels
    }

    #[inline]
    fn index(&self, x: u32, y: u32) -> usize {
        y as usize * self.width as usize + x as usize
    }

    #[inline]
    pub fn get(&self, x: u32, y: u32) -> Vec4 {
        self.texels[self.index(x, y)]
    }

    #[inline]
    pub fn set(&mut self, x: u32, y: u32, value: Vec4) {
        let i = self.index(x, y);
        self.texels[i] = value;
    }

    /// Fetch with coordinates clamped to the image edge
    #[inline]
    pub fn get_clamped(&self, x: i32, y: i32) -> Vec4 {
        let cx = x.clamp(0, self.width as i32 - 1) as u32;
        let cy = y.clamp(0, self.height as i32 - 1) as u32;
        self.get(cx, cy)
    }

    /// Nearest-texel fetch at normalized coordinates
    pub fn sample_nearest(&self, uv: glam::Vec2) -> Vec4 {
        let x = (uv.x * self.width as f32).floor() as i32;
        let y = (uv.y * self.height as f32).floor() as i32;
        self.get_clamped(x, y)
    }

    #[inline]
    pub fn luminance_at(&self, x: u32, y: u32) -> f32 {
        luminance(self.get(x, y).truncate())
    }

    pub fn fill(&mut self, value: Vec4) {
        self.texels.fill(value);
    }

    pub fn clear(&mut self) {
        self.fill(Vec4::ZERO);
    }

    /// Copy all texels from an image of identical size.
    pub fn copy_from(&mut self, other: &FloatImage) -> RenderResult<()> {
        if self.size() != other.size() {
            return Err(RenderError::config(format!(
                "copy size mismatch: {:?} vs {:?}",
                self.size(),
                other.size()
            )));
        }
        self.texels.copy_from_slice(&other.texels);
        Ok(())
    }

    /// Copy only the texels inside `rect` from `other` (same size required).
    pub fn copy_rect_from(&mut self, other: &FloatImage, rect: Rect) -> RenderResult<()> {
        if self.size() != other.size() {
            return Err(RenderError::config("rect copy between differently sized images"));
        }
        let r = rect.clamp_to(self.width, self.height);
        for y in r.y..r.y + r.height {
            let start = self.index(r.x, y);
            let end = start + r.width as usize;
            self.texels[start..end].copy_from_slice(&other.texels[start..end]);
        }
        Ok(())
    }

    /// True if any channel of any texel is NaN or infinite
    pub fn has_non_finite(&self) -> bool {
        self.texels.iter().any(|t| !t.is_finite())
    }

    pub fn mean_luminance(&self) -> f32 {
        if self.texels.is_empty() {
            return 0.0;
        }
        let sum: f64 = self
            .texels
            .iter()
            .map(|t| luminance(t.truncate()) as f64)
            .sum();
        (sum / self.texels.len() as f64) as f32
    }
}
