// src/sampling/adaptive.rs
// Adaptive sampling stage: per-pixel error estimate -> sample-count guidance for the kernel

use glam::Vec4;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::config::merge_parameters;
use crate::core::double_buffer::DoubleBuffer;
use crate::core::image::FloatImage;
use crate::error::RenderResult;
use crate::pipeline::{keys, ExecutionMode, PipelineContext, PipelineEvent, Stage};

use super::online_stats::{spatial_variance_image, target_samples, update_moments, variance_window};

pub const STAGE_NAME: &str = "adaptiveSampling";

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaptiveSamplingParams {
    /// Error level at which a pixel gets `max_samples`
    pub threshold: f32,
    pub min_samples: u32,
    pub max_samples: u32,
    /// Side of the square spatial-variance window
    pub neighborhood: u32,
    /// Weight of the temporal term in the blended error
    pub temporal_weight: f32,
    /// Fixed moment blend rate; `None` averages over the whole history
    pub blend_rate: Option<f32>,
    pub max_history: u32,
}

impl Default for AdaptiveSamplingParams {
    fn default() -> Self {
        Self {
            threshold: 0.02,
            min_samples: 1,
            max_samples: 8,
            neighborhood: 3,
            temporal_weight: 0.5,
            blend_rate: None,
            max_history: 256,
        }
    }
}

pub struct AdaptiveSamplingStage {
    enabled: bool,
    mode: ExecutionMode,
    params: AdaptiveSamplingParams,
    moments: DoubleBuffer<FloatImage>,
    frames: u32,
}

impl AdaptiveSamplingStage {
    pub fn new(mut params: AdaptiveSamplingParams, width: u32, height: u32) -> Self {
        params.neighborhood = variance_window(params.neighborhood);
        let (w, h) = (width.max(1), height.max(1));
        Self {
            enabled: true,
            mode: ExecutionMode::PerCompletedCycle,
            params,
            moments: DoubleBuffer::from_fn(|| FloatImage::new(w, h)),
            frames: 0,
        }
    }

    pub fn params(&self) -> &AdaptiveSamplingParams {
        &self.params
    }

    /// Frames folded into the moments since the last reset
    pub fn frames(&self) -> u32 {
        self.frames
    }

    /// Moments of the last completed update
    pub fn moments(&self) -> &FloatImage {
        self.moments.read()
    }
}

impl Stage for AdaptiveSamplingStage {
    fn name(&self) -> &str {
        STAGE_NAME
    }

    fn enabled(&self) -> bool {
        self.enabled
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    fn execution_mode(&self) -> &ExecutionMode {
        &self.mode
    }

    fn render(&mut self, ctx: &mut PipelineContext) -> RenderResult<()> {
        let Some(color) = ctx.image(keys::PATHTRACER_COLOR).cloned() else {
            debug!("No path tracer output yet; adaptive sampling idle");
            return Ok(());
        };
        let (w, h) = color.size();
        if self.moments.read().size() != (w, h) {
            self.set_size(w, h)?;
        }

        {
            let (prev, cur) = self.moments.split();
            update_moments(prev, cur, &color, self.params.blend_rate, self.params.max_history)?;
        }
        self.frames = self.frames.saturating_add(1);

        let spatial = spatial_variance_image(&color, self.params.neighborhood);
        let weight = self.params.temporal_weight.clamp(0.0, 1.0);
        let moments = self.moments.current();
        let mut guidance = FloatImage::try_new(w, h)?;
        let mut variance = FloatImage::try_new(w, h)?;
        for (i, ((g, v), m)) in guidance
            .texels_mut()
            .iter_mut()
            .zip(variance.texels_mut().iter_mut())
            .zip(moments.texels())
            .enumerate()
        {
            let temporal = m.w;
            let s = spatial[i];
            let total = s + (temporal - s) * weight;
            let samples = target_samples(
                total,
                self.params.threshold,
                self.params.min_samples,
                self.params.max_samples,
            );
            *g = Vec4::new(samples as f32, total, temporal, s);
            *v = Vec4::new(total, temporal, s, 1.0);
        }
        self.moments.swap();

        ctx.set_image(keys::ADAPTIVE_GUIDANCE, guidance);
        ctx.set_image(keys::ADAPTIVE_VARIANCE, variance);
        Ok(())
    }

    fn reset(&mut self) {
        self.moments.for_each_mut(FloatImage::clear);
        self.frames = 0;
    }

    fn set_size(&mut self, width: u32, height: u32) -> RenderResult<()> {
        let (w, h) = (width.max(1), height.max(1));
        let current = FloatImage::try_new(w, h)?;
        let previous = FloatImage::try_new(w, h)?;
        self.moments = DoubleBuffer::new(current, previous);
        self.frames = 0;
        Ok(())
    }

    fn on_event(&mut self, event: &PipelineEvent, ctx: &mut PipelineContext) {
        if let PipelineEvent::AccumulationReset { .. } = event {
            self.reset();
            ctx.remove(keys::ADAPTIVE_GUIDANCE);
        }
    }

    fn update_parameters(&mut self, patch: &serde_json::Value) -> RenderResult<()> {
        let mut next: AdaptiveSamplingParams = merge_parameters(&self.params, patch)?;
        next.neighborhood = variance_window(next.neighborhood);
        if next.blend_rate != self.params.blend_rate || next.max_history != self.params.max_history {
            self.reset();
        }
        self.params = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::StateValue;
    use crate::path_tracing::RenderMode;

    #[test]
    fn test_oversized_neighborhood_is_clamped() {
        let params = AdaptiveSamplingParams {
            neighborhood: 10_000,
            ..AdaptiveSamplingParams::default()
        };
        let mut stage = AdaptiveSamplingStage::new(params, 4, 4);
        assert_eq!(stage.params().neighborhood, 15);
        stage.update_parameters(&serde_json::json!({ "neighborhood": 2 })).unwrap();
        assert_eq!(stage.params().neighborhood, 3);
    }

    #[test]
    fn test_idle_without_color() {
        let mut ctx = PipelineContext::new(4, 4);
        let mut stage = AdaptiveSamplingStage::new(AdaptiveSamplingParams::default(), 4, 4);
        stage.render(&mut ctx).unwrap();
        assert!(!ctx.has_image(keys::ADAPTIVE_GUIDANCE));
        assert_eq!(stage.frames(), 0);
    }

    #[test]
    fn test_flat_image_needs_min_samples() {
        let mut ctx = PipelineContext::new(4, 4);
        ctx.set_image(keys::PATHTRACER_COLOR, FloatImage::filled(4, 4, Vec4::splat(0.5)));
        let mut stage = AdaptiveSamplingStage::new(AdaptiveSamplingParams::default(), 4, 4);
        for _ in 0..3 {
            stage.render(&mut ctx).unwrap();
        }
        let guidance = ctx.image(keys::ADAPTIVE_GUIDANCE).unwrap();
        assert!(guidance.texels().iter().all(|g| g.x == 1.0));
        assert_eq!(stage.frames(), 3);
    }

    #[test]
    fn test_noisy_pixel_gets_more_samples() {
        let mut ctx = PipelineContext::new(5, 5);
        let mut img = FloatImage::filled(5, 5, Vec4::splat(0.1));
        img.set(2, 2, Vec4::splat(5.0));
        ctx.set_image(keys::PATHTRACER_COLOR, img);
        let mut stage = AdaptiveSamplingStage::new(AdaptiveSamplingParams::default(), 5, 5);
        stage.render(&mut ctx).unwrap();
        let guidance = ctx.image(keys::ADAPTIVE_GUIDANCE).unwrap();
        assert_eq!(guidance.get(2, 2).x, 8.0);
        assert_eq!(guidance.get(0, 4).x, 1.0);
    }

    #[test]
    fn test_waits_for_completed_cycle() {
        let mut ctx = PipelineContext::new(2, 2);
        let stage = AdaptiveSamplingStage::new(AdaptiveSamplingParams::default(), 2, 2);
        ctx.set_state(keys::RENDER_MODE, StateValue::Int(RenderMode::Tiled.as_index()));
        ctx.set_state(keys::IS_CYCLE_COMPLETE, StateValue::Bool(false));
        assert!(!stage.execution_mode().should_execute(&ctx));
    }

    #[test]
    fn test_accumulation_reset_clears_history() {
        let mut ctx = PipelineContext::new(2, 2);
        ctx.set_image(keys::PATHTRACER_COLOR, FloatImage::filled(2, 2, Vec4::ONE));
        let mut stage = AdaptiveSamplingStage::new(AdaptiveSamplingParams::default(), 2, 2);
        stage.render(&mut ctx).unwrap();
        stage.on_event(
            &PipelineEvent::AccumulationReset {
                reason: crate::pipeline::ResetReason::CameraMoved,
            },
            &mut ctx,
        );
        assert_eq!(stage.frames(), 0);
        assert!(stage.moments().texels().iter().all(|t| *t == Vec4::ZERO));
    }
}
