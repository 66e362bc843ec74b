//! Core engine modules
//!
//! Contains foundational types shared by every stage: host images,
//! ping-pong pairs, frame buffers and the latency readback.

pub mod double_buffer;
pub mod framebuffer;
pub mod image;
pub mod readback;

pub use double_buffer::DoubleBuffer;
pub use framebuffer::{CopyTarget, FrameBuffers, RenderTarget};
pub use image::{luminance, FloatImage, Rect};
pub use readback::LatencyReadback;
