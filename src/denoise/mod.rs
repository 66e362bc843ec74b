//! Denoising of the path tracer output

pub mod svgf;

pub use svgf::pipelines::{FilterKernel, SvgfParams};
pub use svgf::{DenoisePath, DenoiserStage};
