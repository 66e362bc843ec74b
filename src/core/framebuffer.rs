//! Frame buffer manager: double-buffered multi-attachment render targets.
//!
//! Two render targets of identical layout (`current` is written this frame,
//! `previous` holds the last completed frame). Resizing rebuilds both.
//! Copies read whichever target was written last: the in-progress frame if
//! anything touched it since the swap, otherwise the completed one.

use half::f16;
use log::{info, warn};

use super::double_buffer::DoubleBuffer;
use super::image::{FloatImage, Rect};
use crate::error::{RenderError, RenderResult};
use crate::gpu::{self, GpuContext};

/// Attachment slot of the path tracer's output radiance
pub const ATTACHMENT_COLOR: usize = 0;
/// Attachment slot of world normal (rgb) + linear depth (a)
pub const ATTACHMENT_NORMAL_DEPTH: usize = 1;

/// A set of equally sized attachments
#[derive(Debug, Clone)]
pub struct RenderTarget {
    attachments: Vec<FloatImage>,
}

impl RenderTarget {
    /// Allocate `count` attachments; on allocation failure fall back to a
    /// single attachment so the pipeline keeps producing color.
    pub fn new(width: u32, height: u32, count: usize) -> RenderResult<Self> {
        let count = count.max(1);
        match Self::allocate(width, height, count) {
            Ok(target) => Ok(target),
            Err(e) if count > 1 => {
                warn!(
                    "{}x{} render target with {} attachments failed ({}); falling back to one",
                    width, height, count, e
                );
                Self::allocate(width, height, 1)
            }
            Err(e) => Err(e),
        }
    }

    fn allocate(width: u32, height: u32, count: usize) -> RenderResult<Self> {
        let attachments = (0..count)
            .map(|_| FloatImage::try_new(width, height))
            .collect::<RenderResult<Vec<_>>>()?;
        Ok(Self { attachments })
    }

    pub fn attachment(&self, index: usize) -> Option<&FloatImage> {
        self.attachments.get(index)
    }

    pub fn attachment_mut(&mut self, index: usize) -> Option<&mut FloatImage> {
        self.attachments.get_mut(index)
    }

    pub fn attachment_count(&self) -> usize {
        self.attachments.len()
    }

    pub fn clear(&mut self) {
        for a in self.attachments.iter_mut() {
            a.clear();
        }
    }

    pub fn size(&self) -> (u32, u32) {
        self.attachments
            .first()
            .map(FloatImage::size)
            .unwrap_or((0, 0))
    }
}

/// Where `copy_attachment` sends its texels
pub enum CopyTarget<'a> {
    /// Host image of the same size
    Image(&'a mut FloatImage),
    /// Rgba16Float GPU texture, typically the presentation surface
    Screen {
        gpu: &'a GpuContext,
        texture: &'a wgpu::Texture,
    },
}

/// Reusable state for full-frame copies (half-float staging for GPU targets)
#[derive(Default)]
struct CopyPass {
    staging: Vec<f16>,
    copies: u64,
}

/// Double-buffered render targets
pub struct FrameBuffers {
    buffers: DoubleBuffer<RenderTarget>,
    width: u32,
    height: u32,
    attachment_count: usize,
    /// Current target written since the last swap
    dirty: bool,
    copy_pass: Option<CopyPass>,
}

impl FrameBuffers {
    pub fn new(width: u32, height: u32, attachment_count: usize) -> RenderResult<Self> {
        let width = width.max(1);
        let height = height.max(1);
        let current = RenderTarget::new(width, height, attachment_count)?;
        let previous = RenderTarget::new(width, height, current.attachment_count())?;
        Ok(Self {
            attachment_count: current.attachment_count(),
            buffers: DoubleBuffer::new(current, previous),
            width,
            height,
            dirty: false,
            copy_pass: None,
        })
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Number of attachments actually allocated (may be below the request
    /// after an allocation fallback)
    pub fn attachment_count(&self) -> usize {
        self.attachment_count
    }

    pub fn current(&self) -> &RenderTarget {
        self.buffers.current()
    }

    pub fn previous(&self) -> &RenderTarget {
        self.buffers.read()
    }

    /// Target holding the most recently written texels
    pub fn latest(&self) -> &RenderTarget {
        if self.dirty {
            self.buffers.current()
        } else {
            self.buffers.read()
        }
    }

    /// Previous frame for reading, current frame for writing
    pub fn split(&mut self) -> (&RenderTarget, &mut RenderTarget) {
        self.dirty = true;
        self.buffers.split()
    }

    pub fn swap(&mut self) {
        self.buffers.swap();
        self.dirty = false;
    }

    pub fn swap_count(&self) -> u64 {
        self.buffers.swap_count()
    }

    pub fn clear(&mut self) {
        self.buffers.for_each_mut(RenderTarget::clear);
        self.dirty = false;
    }

    /// Seed the current target with the previous one, so a partially
    /// rewritten frame shows last frame's texels outside the written region.
    pub fn carry_previous(&mut self) -> RenderResult<()> {
        let (prev, cur) = self.split();
        for i in 0..cur.attachment_count() {
            if let (Some(src), Some(dst)) = (prev.attachment(i), cur.attachment_mut(i)) {
                dst.copy_from(src)?;
            }
        }
        Ok(())
    }

    /// Destroy and recreate both targets at the new resolution.
    pub fn resize(&mut self, width: u32, height: u32) -> RenderResult<()> {
        if (width.max(1), height.max(1)) == (self.width, self.height) {
            return Ok(());
        }
        let requested = self.attachment_count.max(2);
        *self = Self::new(width, height, requested)?;
        info!("Frame buffers resized to {}x{}", self.width, self.height);
        Ok(())
    }

    pub fn copy_count(&self) -> u64 {
        self.copy_pass.as_ref().map_or(0, |p| p.copies)
    }

    /// Copy one attachment of the latest written target to `target`.
    pub fn copy_attachment(&mut self, index: usize, target: CopyTarget<'_>) -> RenderResult<()> {
        // Borrow fields disjointly so `copy_pass` can be mutated while the
        // source attachment is held (same selection as `latest()`).
        let latest = if self.dirty {
            self.buffers.current()
        } else {
            self.buffers.read()
        };
        let source = latest.attachment(index).ok_or_else(|| {
            RenderError::missing(format!("attachment {} not allocated", index))
        })?;
        let pass = self.copy_pass.get_or_insert_with(CopyPass::default);
        match target {
            CopyTarget::Image(dest) => {
                if dest.size() != source.size() {
                    *dest = FloatImage::try_new(source.width(), source.height())?;
                }
                dest.copy_rect_from(source, Rect::full(source.width(), source.height()))?;
            }
            CopyTarget::Screen { gpu, texture } => {
                let size = texture.size();
                if (size.width, size.height) != source.size() {
                    return Err(RenderError::config(format!(
                        "screen texture {}x{} does not match frame {}x{}",
                        size.width,
                        size.height,
                        source.width(),
                        source.height()
                    )));
                }
                gpu::write_rgba16f(gpu, texture, source, &mut pass.staging);
            }
        }
        pass.copies += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec4;

    #[test]
    fn test_swap_exchanges_targets() {
        let mut fb = FrameBuffers::new(4, 4, 2).unwrap();
        {
            let (_, cur) = fb.split();
            cur.attachment_mut(ATTACHMENT_COLOR).unwrap().fill(Vec4::ONE);
        }
        fb.swap();
        assert_eq!(fb.previous().attachment(0).unwrap().get(0, 0), Vec4::ONE);
        assert_eq!(fb.current().attachment(0).unwrap().get(0, 0), Vec4::ZERO);
    }

    #[test]
    fn test_clear_resets_both() {
        let mut fb = FrameBuffers::new(2, 2, 2).unwrap();
        fb.split().1.attachment_mut(1).unwrap().fill(Vec4::ONE);
        fb.swap();
        fb.split().1.attachment_mut(1).unwrap().fill(Vec4::ONE);
        fb.clear();
        assert_eq!(fb.current().attachment(1).unwrap().get(1, 1), Vec4::ZERO);
        assert_eq!(fb.previous().attachment(1).unwrap().get(1, 1), Vec4::ZERO);
    }

    #[test]
    fn test_copy_attachment_to_image() {
        let mut fb = FrameBuffers::new(3, 2, 2).unwrap();
        fb.split().1.attachment_mut(ATTACHMENT_NORMAL_DEPTH).unwrap().fill(Vec4::splat(0.5));
        let mut dest = FloatImage::new(1, 1);
        fb.copy_attachment(ATTACHMENT_NORMAL_DEPTH, CopyTarget::Image(&mut dest)).unwrap();
        assert_eq!(dest.size(), (3, 2));
        assert_eq!(dest.get(2, 1), Vec4::splat(0.5));
        assert!(fb.copy_attachment(7, CopyTarget::Image(&mut dest)).is_err());
    }

    #[test]
    fn test_copy_follows_swaps() {
        let mut fb = FrameBuffers::new(2, 2, 2).unwrap();
        fb.split().1.attachment_mut(ATTACHMENT_COLOR).unwrap().fill(Vec4::splat(0.7));
        fb.swap();
        let mut dest = FloatImage::new(2, 2);
        fb.copy_attachment(ATTACHMENT_COLOR, CopyTarget::Image(&mut dest)).unwrap();
        assert_eq!(dest.get(1, 1), Vec4::splat(0.7));

        // A frame in flight is what gets copied until the next swap
        fb.split().1.attachment_mut(ATTACHMENT_COLOR).unwrap().fill(Vec4::splat(0.2));
        fb.copy_attachment(ATTACHMENT_COLOR, CopyTarget::Image(&mut dest)).unwrap();
        assert_eq!(dest.get(0, 0), Vec4::splat(0.2));
        fb.swap();
        fb.copy_attachment(ATTACHMENT_COLOR, CopyTarget::Image(&mut dest)).unwrap();
        assert_eq!(dest.get(0, 0), Vec4::splat(0.2));
        assert_eq!(fb.copy_count(), 3);
    }

    #[test]
    fn test_resize_recreates() {
        let mut fb = FrameBuffers::new(4, 4, 2).unwrap();
        fb.split().1.attachment_mut(0).unwrap().fill(Vec4::ONE);
        fb.resize(8, 2).unwrap();
        assert_eq!(fb.size(), (8, 2));
        assert_eq!(fb.current().size(), (8, 2));
        assert_eq!(fb.current().attachment(0).unwrap().get(0, 0), Vec4::ZERO);
    }

    #[test]
    fn test_carry_previous() {
        let mut fb = FrameBuffers::new(2, 2, 1).unwrap();
        fb.split().1.attachment_mut(0).unwrap().fill(Vec4::splat(3.0));
        fb.swap();
        fb.carry_previous().unwrap();
        assert_eq!(fb.current().attachment(0).unwrap().get(1, 0), Vec4::splat(3.0));
    }
}
