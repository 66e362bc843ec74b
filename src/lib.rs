//! Progressive path-traced render pipeline.
//!
//! A host owns a [`Pipeline`] of stages (environment importance sampling,
//! path-trace accumulation, adaptive sampling, temporal-spatial denoising,
//! auto-exposure), feeds it camera state and scene/environment events, and
//! calls [`Pipeline::render_frame`] once per display frame. The shading
//! kernel itself is supplied through [`ShadingKernel`].

pub mod config;
pub mod core;
pub mod denoise;
pub mod error;
pub mod gpu;
pub mod lighting;
pub mod path_tracing;
pub mod pipeline;
pub mod post;
pub mod sampling;

pub use crate::config::PipelineConfig;
pub use crate::core::image::{FloatImage, Rect};
pub use crate::denoise::{DenoiserStage, SvgfParams};
pub use crate::error::{RenderError, RenderResult};
pub use crate::lighting::{EnvironmentCdf, EnvironmentStage};
pub use crate::path_tracing::{
    AccumulationParams, CameraState, PathTraceStage, RenderMode, ShadingKernel, TileScheduler,
};
pub use crate::pipeline::{keys, Pipeline, PipelineContext, PipelineEvent, ResetReason, Stage};
pub use crate::post::ExposureStage;
pub use crate::sampling::AdaptiveSamplingStage;

/// Assemble the standard stage order for `config`:
/// environment, path tracer, adaptive sampling, denoiser, exposure.
pub fn build_pipeline<K>(config: &PipelineConfig, kernel: K) -> RenderResult<Pipeline>
where
    K: ShadingKernel + 'static,
{
    let (w, h) = (config.width.max(1), config.height.max(1));
    let mut pipeline = Pipeline::new(w, h);
    pipeline.add_stage(Box::new(EnvironmentStage::new()))?;
    pipeline.add_stage(Box::new(PathTraceStage::new(
        kernel,
        config.accumulation,
        w,
        h,
    )?))?;
    pipeline.add_stage(Box::new(AdaptiveSamplingStage::new(config.adaptive, w, h)))?;
    pipeline.add_stage(Box::new(DenoiserStage::new(config.denoiser, w, h)?))?;
    pipeline.add_stage(Box::new(ExposureStage::new(config.exposure)))?;
    log::info!("Pipeline built: {:?}", pipeline.stage_names());
    Ok(pipeline)
}
