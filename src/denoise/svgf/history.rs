// src/denoise/svgf/history.rs
// Ping-pong history buffers for SVGF and the reasons they get dropped

use crate::core::double_buffer::DoubleBuffer;
use crate::core::image::FloatImage;
use crate::error::RenderResult;
use crate::path_tracing::camera::CameraState;
use crate::pipeline::ResetReason;

/// Why the denoiser history was last invalidated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryReset {
    FirstFrame,
    ResolutionChange,
    Accumulation(ResetReason),
    Explicit,
}

/// Previous-frame state consumed by the temporal phases
pub struct DenoiserHistory {
    /// Temporally accumulated color
    pub color: DoubleBuffer<FloatImage>,
    /// Luminance moments, see `online_stats::moments_layout`
    pub moments: DoubleBuffer<FloatImage>,
    pub history_length: DoubleBuffer<Vec<f32>>,
    /// Normal + depth of the frame that produced `color.read()`
    pub normal_depth: Option<FloatImage>,
    pub camera: Option<CameraState>,
    valid: bool,
    last_reset: HistoryReset,
    width: u32,
    height: u32,
}

impl DenoiserHistory {
    pub fn new(width: u32, height: u32) -> RenderResult<Self> {
        let (w, h) = (width.max(1), height.max(1));
        let pixels = w as usize * h as usize;
        Ok(Self {
            color: DoubleBuffer::new(FloatImage::try_new(w, h)?, FloatImage::try_new(w, h)?),
            moments: DoubleBuffer::new(FloatImage::try_new(w, h)?, FloatImage::try_new(w, h)?),
            history_length: DoubleBuffer::from_fn(|| vec![0.0; pixels]),
            normal_depth: None,
            camera: None,
            valid: false,
            last_reset: HistoryReset::FirstFrame,
            width: w,
            height: h,
        })
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// True once a frame has been committed since the last reset
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn last_reset(&self) -> HistoryReset {
        self.last_reset
    }

    pub fn reset(&mut self, reason: HistoryReset) {
        self.color.for_each_mut(FloatImage::clear);
        self.moments.for_each_mut(FloatImage::clear);
        self.history_length.for_each_mut(|h| h.fill(0.0));
        self.normal_depth = None;
        self.camera = None;
        self.valid = false;
        self.last_reset = reason;
    }

    pub fn resize(&mut self, width: u32, height: u32) -> RenderResult<()> {
        if (width.max(1), height.max(1)) == self.size() {
            return Ok(());
        }
        *self = Self::new(width, height)?;
        self.last_reset = HistoryReset::ResolutionChange;
        Ok(())
    }

    /// Publish this frame's buffers as next frame's history.
    pub fn commit(&mut self, normal_depth: &FloatImage, camera: CameraState) {
        self.color.swap();
        self.moments.swap();
        self.history_length.swap();
        match self.normal_depth.as_mut() {
            Some(nd) if nd.size() == normal_depth.size() => {
                nd.texels_mut().copy_from_slice(normal_depth.texels())
            }
            _ => self.normal_depth = Some(normal_depth.clone()),
        }
        self.camera = Some(camera);
        self.valid = true;
    }

    /// History length of the last committed frame at `(x, y)`
    pub fn length_at(&self, x: u32, y: u32) -> f32 {
        self.history_length.read()[(y * self.width + x) as usize]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec4;

    #[test]
    fn test_commit_then_reset() {
        let mut h = DenoiserHistory::new(2, 2).unwrap();
        assert!(!h.is_valid());
        h.color.write_target().fill(Vec4::ONE);
        h.history_length.write_target().fill(3.0);
        h.commit(&FloatImage::new(2, 2), CameraState::default());
        assert!(h.is_valid());
        assert_eq!(h.color.read().get(1, 1), Vec4::ONE);
        assert_eq!(h.length_at(0, 1), 3.0);

        h.reset(HistoryReset::Explicit);
        h.reset(HistoryReset::Explicit);
        assert!(!h.is_valid());
        assert_eq!(h.length_at(0, 1), 0.0);
        assert!(h.camera.is_none());
        assert_eq!(h.last_reset(), HistoryReset::Explicit);
    }

    #[test]
    fn test_resize_drops_history() {
        let mut h = DenoiserHistory::new(2, 2).unwrap();
        h.commit(&FloatImage::new(2, 2), CameraState::default());
        h.resize(3, 1).unwrap();
        assert_eq!(h.size(), (3, 1));
        assert!(!h.is_valid());
        assert_eq!(h.last_reset(), HistoryReset::ResolutionChange);
    }
}
