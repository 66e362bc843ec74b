// src/denoise/svgf/mod.rs
// Spatiotemporal variance-guided filtering of the accumulated path tracer output
// Phases: motion + temporal gradient, temporal accumulation, variance, a-trous

pub mod atrous;
pub mod history;
pub mod motion;
pub mod pipelines;
pub mod temporal;
pub mod variance;

use std::sync::Arc;

use glam::Vec4;
use log::{debug, warn};

use crate::config::merge_parameters;
use crate::core::image::FloatImage;
use crate::error::RenderResult;
use crate::path_tracing::camera::CameraState;
use crate::path_tracing::tile_dispatch::RenderMode;
use crate::pipeline::{keys, ExecutionMode, PipelineContext, PipelineEvent, ResetReason, Stage};
use crate::sampling::online_stats::variance_window;

use atrous::{atrous_filter, FilterGuide};
use history::{DenoiserHistory, HistoryReset};
use motion::compute_motion;
use pipelines::SvgfParams;
use temporal::{temporal_accumulate, temporal_gradient, TemporalInputs};
use variance::{estimate_variance, spatial_only_variance};

pub const STAGE_NAME: &str = "denoiser";

/// Which path the last `render` took
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenoisePath {
    Idle,
    PassThrough,
    SpatialOnly,
    Temporal,
}

pub struct DenoiserStage {
    enabled: bool,
    mode: ExecutionMode,
    params: SvgfParams,
    history: DenoiserHistory,
    last_path: DenoisePath,
}

impl DenoiserStage {
    pub fn new(mut params: SvgfParams, width: u32, height: u32) -> RenderResult<Self> {
        params.variance_kernel = variance_window(params.variance_kernel);
        Ok(Self {
            enabled: true,
            mode: ExecutionMode::PerTile,
            params,
            history: DenoiserHistory::new(width, height)?,
            last_path: DenoisePath::Idle,
        })
    }

    pub fn params(&self) -> &SvgfParams {
        &self.params
    }

    pub fn history(&self) -> &DenoiserHistory {
        &self.history
    }

    pub fn last_path(&self) -> DenoisePath {
        self.last_path
    }

    /// Temporal phases only make sense on frames where every pixel has a
    /// fresh sample.
    fn wants_temporal(ctx: &PipelineContext) -> bool {
        let mode = ctx
            .int_state(keys::RENDER_MODE)
            .map(RenderMode::from_index)
            .unwrap_or_default();
        mode == RenderMode::Progressive || ctx.bool_state(keys::IS_CYCLE_COMPLETE).unwrap_or(true)
    }

    fn run_temporal(
        &mut self,
        ctx: &mut PipelineContext,
        color: &FloatImage,
        normal_depth: &FloatImage,
        camera: CameraState,
    ) -> RenderResult<()> {
        let (w, h) = color.size();
        let motion = compute_motion(normal_depth, &camera, self.history.camera.as_ref())?;
        let has_history = self.history.is_valid()
            && self
                .history
                .normal_depth
                .as_ref()
                .map_or(false, |nd| nd.size() == (w, h));
        let placeholder;
        let prev_nd = match self.history.normal_depth.as_ref() {
            Some(nd) if has_history => nd,
            _ => {
                placeholder = FloatImage::try_new(w, h)?;
                &placeholder
            }
        };

        let mut gradient_image = None;
        {
            let (prev_color, cur_color) = self.history.color.split();
            let (prev_len, cur_len) = self.history.history_length.split();
            let inputs = TemporalInputs {
                color,
                normal_depth,
                motion: &motion,
                prev_color,
                prev_normal_depth: prev_nd,
                prev_history: prev_len,
            };
            let gradient = if self.params.use_temporal_gradient && has_history {
                Some(temporal_gradient(&inputs, &self.params)?)
            } else {
                None
            };
            temporal_accumulate(
                &inputs,
                gradient.as_deref(),
                has_history,
                &self.params,
                cur_color,
                cur_len,
            )?;
            if let Some(g) = gradient {
                let texels = g.iter().map(|v| Vec4::new(*v, *v, *v, 1.0)).collect();
                gradient_image = Some(FloatImage::from_texels(w, h, texels)?);
            }
        }

        let estimate = {
            let (prev_moments, cur_moments) = self.history.moments.split();
            estimate_variance(
                self.history.color.current(),
                self.history.history_length.current(),
                &motion,
                prev_moments,
                cur_moments,
                &self.params,
            )?
        };

        let lengths = self.history.history_length.current().clone();
        let guide = FilterGuide {
            normal_depth,
            history: Some(&lengths),
        };
        let filtered = atrous_filter(
            self.history.color.current(),
            &estimate.filter,
            &guide,
            &self.params,
            self.params.iterations,
        )?;
        self.history.commit(normal_depth, camera);

        let max_len = self.params.max_accum_frames.max(1) as f32;
        let hl_texels = lengths
            .iter()
            .map(|l| Vec4::new(*l, *l / max_len, 0.0, 1.0))
            .collect();
        ctx.set_image(keys::DENOISED_COLOR, filtered);
        ctx.set_image(keys::DENOISER_MOTION, motion);
        ctx.set_image(keys::DENOISER_VARIANCE, estimate.debug);
        ctx.set_image(
            keys::DENOISER_HISTORY_LENGTH,
            FloatImage::from_texels(w, h, hl_texels)?,
        );
        match gradient_image {
            Some(g) => ctx.set_image(keys::DENOISER_GRADIENT, g),
            None => {
                ctx.remove(keys::DENOISER_GRADIENT);
            }
        }
        self.last_path = DenoisePath::Temporal;
        Ok(())
    }

    fn run_spatial(
        &mut self,
        ctx: &mut PipelineContext,
        color: &FloatImage,
        normal_depth: &FloatImage,
    ) -> RenderResult<()> {
        let estimate = spatial_only_variance(color, &self.params)?;
        let guide = FilterGuide {
            normal_depth,
            history: None,
        };
        let filtered = atrous_filter(
            color,
            &estimate.filter,
            &guide,
            &self.params,
            self.params.spatial_only_iterations.min(self.params.iterations),
        )?;
        ctx.set_image(keys::DENOISED_COLOR, filtered);
        ctx.set_image(keys::DENOISER_VARIANCE, estimate.debug);
        self.last_path = DenoisePath::SpatialOnly;
        Ok(())
    }
}

impl Stage for DenoiserStage {
    fn name(&self) -> &str {
        STAGE_NAME
    }

    fn enabled(&self) -> bool {
        self.enabled
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
        if !enabled {
            self.history.reset(HistoryReset::Explicit);
        }
    }

    fn execution_mode(&self) -> &ExecutionMode {
        &self.mode
    }

    fn render(&mut self, ctx: &mut PipelineContext) -> RenderResult<()> {
        let Some(color) = ctx.image(keys::PATHTRACER_COLOR).cloned() else {
            debug!("No path tracer output; denoiser idle");
            self.last_path = DenoisePath::Idle;
            return Ok(());
        };
        let Some(normal_depth) = ctx.image(keys::PATHTRACER_NORMAL_DEPTH).cloned() else {
            debug!("No normal/depth guide; passing color through");
            ctx.set_image(keys::DENOISED_COLOR, Arc::clone(&color));
            self.last_path = DenoisePath::PassThrough;
            return Ok(());
        };
        if normal_depth.size() != color.size() {
            warn!(
                "Normal/depth {:?} does not match color {:?}; passing color through",
                normal_depth.size(),
                color.size()
            );
            ctx.set_image(keys::DENOISED_COLOR, color);
            self.last_path = DenoisePath::PassThrough;
            return Ok(());
        }
        let (w, h) = color.size();
        self.history.resize(w, h)?;

        if Self::wants_temporal(ctx) {
            let camera = ctx.camera_state(keys::CAMERA).unwrap_or_default();
            self.run_temporal(ctx, &color, &normal_depth, camera)
        } else {
            self.run_spatial(ctx, &color, &normal_depth)
        }
    }

    fn reset(&mut self) {
        self.history.reset(HistoryReset::Explicit);
        self.last_path = DenoisePath::Idle;
    }

    fn set_size(&mut self, width: u32, height: u32) -> RenderResult<()> {
        self.history.resize(width, height)
    }

    fn on_event(&mut self, event: &PipelineEvent, _ctx: &mut PipelineContext) {
        match event {
            // Camera motion is what reprojection is for
            PipelineEvent::AccumulationReset {
                reason: ResetReason::CameraMoved,
            } => {}
            PipelineEvent::AccumulationReset { reason } => {
                self.history.reset(HistoryReset::Accumulation(*reason));
            }
            _ => {}
        }
    }

    fn update_parameters(&mut self, patch: &serde_json::Value) -> RenderResult<()> {
        let mut next: SvgfParams = merge_parameters(&self.params, patch)?;
        next.variance_kernel = variance_window(next.variance_kernel);
        if next.max_accum_frames != self.params.max_accum_frames {
            self.history.reset(HistoryReset::Explicit);
        }
        self.params = next;
        Ok(())
    }
}
