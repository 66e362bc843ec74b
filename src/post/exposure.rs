//! Auto-exposure from the log-average luminance of the displayed image
//!
//! The average is read back with one frame of latency, so this frame is
//! exposed with the statistic measured on the previous one.

use glam::Vec4;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::config::merge_parameters;
use crate::core::image::{luminance, FloatImage};
use crate::core::readback::{LatencyReadback, ReadbackStats};
use crate::error::RenderResult;
use crate::pipeline::{keys, ExecutionMode, PipelineContext, PipelineEvent, Stage, StateValue};

pub const STAGE_NAME: &str = "exposure";

const LOG_EPSILON: f32 = 1e-4;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExposureParams {
    /// Middle-grey target for the log-average luminance
    pub key_value: f32,
    pub min_exposure: f32,
    pub max_exposure: f32,
    /// Fraction of the remaining distance covered per frame, 1 = instant
    pub adaptation_speed: f32,
    /// Fixed exposure; disables adaptation
    pub manual_exposure: Option<f32>,
}

impl Default for ExposureParams {
    fn default() -> Self {
        Self {
            key_value: 0.18,
            min_exposure: 1.0 / 64.0,
            max_exposure: 64.0,
            adaptation_speed: 0.1,
            manual_exposure: None,
        }
    }
}

/// `exp(mean(ln(eps + L)))` over finite texels; `None` for an empty image
pub fn log_average_luminance(image: &FloatImage) -> Option<f32> {
    let (mut sum, mut count) = (0.0f64, 0u64);
    for t in image.texels() {
        let l = luminance(t.truncate());
        if l.is_finite() {
            sum += ((LOG_EPSILON + l.max(0.0)) as f64).ln();
            count += 1;
        }
    }
    (count > 0).then(|| (sum / count as f64).exp() as f32)
}

pub struct ExposureStage {
    enabled: bool,
    mode: ExecutionMode,
    params: ExposureParams,
    readback: LatencyReadback,
    exposure: f32,
}

fn has_source(ctx: &PipelineContext) -> bool {
    ctx.has_image(keys::DENOISED_COLOR) || ctx.has_image(keys::PATHTRACER_COLOR)
}

impl ExposureStage {
    pub fn new(params: ExposureParams) -> Self {
        Self {
            enabled: true,
            mode: ExecutionMode::Conditional(Box::new(has_source)),
            params,
            readback: LatencyReadback::new(params.key_value),
            exposure: 1.0,
        }
    }

    pub fn exposure(&self) -> f32 {
        self.exposure
    }

    pub fn readback_stats(&self) -> ReadbackStats {
        self.readback.stats()
    }

    fn target_exposure(&self, average: f32) -> f32 {
        let lo = self.params.min_exposure.max(f32::MIN_POSITIVE);
        let hi = self.params.max_exposure.max(lo);
        if let Some(manual) = self.params.manual_exposure {
            return manual.clamp(lo, hi);
        }
        (self.params.key_value / average.max(LOG_EPSILON)).clamp(lo, hi)
    }
}

impl Stage for ExposureStage {
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
        let Some(source) = ctx
            .image(keys::DENOISED_COLOR)
            .or_else(|| ctx.image(keys::PATHTRACER_COLOR))
            .cloned()
        else {
            return Ok(());
        };

        // Last frame's statistic; this frame's goes in flight
        let average = self.readback.poll();
        let measured = log_average_luminance(&source).unwrap_or(f32::NAN);
        self.readback.request(measured);

        let target = self.target_exposure(average);
        let speed = self.params.adaptation_speed.clamp(0.0, 1.0);
        let next = self.exposure + (target - self.exposure) * speed;
        if next.is_finite() {
            self.exposure = next;
        }
        debug!(
            "Exposure {:.4} (average {:.4}, target {:.4})",
            self.exposure, average, target
        );

        let mut exposed = FloatImage::try_new(source.width(), source.height())?;
        for (out, t) in exposed.texels_mut().iter_mut().zip(source.texels()) {
            let rgb = t.truncate() * self.exposure;
            *out = Vec4::new(rgb.x, rgb.y, rgb.z, t.w);
        }
        ctx.set_state(keys::EXPOSURE_VALUE, StateValue::Float(self.exposure));
        ctx.set_image(keys::EXPOSURE_COLOR, exposed);
        Ok(())
    }

    fn reset(&mut self) {
        self.readback.reset(self.params.key_value);
        self.exposure = 1.0;
    }

    fn on_event(&mut self, event: &PipelineEvent, _ctx: &mut PipelineContext) {
        if let PipelineEvent::EnvironmentLoaded(_) | PipelineEvent::SceneUpdated(_) = event {
            self.reset();
        }
    }

    fn update_parameters(&mut self, patch: &serde_json::Value) -> RenderResult<()> {
        self.params = merge_parameters(&self.params, patch)?;
        Ok(())
    }
}
