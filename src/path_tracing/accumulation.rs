// src/path_tracing/accumulation.rs
// Progressive accumulation stage driving the shading kernel once per tick
// Owns the frame counter, interaction mode, tile scheduling and the frame buffers

use std::collections::HashSet;
use std::sync::Arc;

use glam::Vec4;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::config::merge_parameters;
use crate::core::framebuffer::{CopyTarget, FrameBuffers, ATTACHMENT_COLOR, ATTACHMENT_NORMAL_DEPTH};
use crate::core::image::{FloatImage, Rect};
use crate::error::{RenderError, RenderResult};
use crate::pipeline::{
    keys, ExecutionMode, PipelineContext, PipelineEvent, ResetReason, Stage, StateValue,
};

use super::camera::CameraState;
use super::kernel::{KernelBindings, KernelParams, SceneBuffers, ShadingKernel};
use super::tile_dispatch::{RenderMode, TileAdvance, TileConfig, TileScheduler};

pub const STAGE_NAME: &str = "pathtracer";

/// Parameters of the accumulation stage
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccumulationParams {
    pub render_mode: RenderMode,
    pub tiles: TileConfig,
    /// Samples per pixel before the render is complete
    pub max_frames: u32,
    pub max_bounces: u32,
    pub samples_per_pixel: u32,
    /// Radiance clamp against fireflies
    pub firefly_clamp: f32,
    pub environment_intensity: f32,
    /// Bounces while the camera moves
    pub interaction_bounces: u32,
    pub interaction_samples: u32,
    /// Ticks with an unchanged camera before leaving interaction mode
    pub interaction_cooldown_frames: u32,
    /// Floor of the accumulation blend factor
    pub min_alpha: f32,
    pub use_adaptive_sampling: bool,
}

impl Default for AccumulationParams {
    fn default() -> Self {
        Self {
            render_mode: RenderMode::Progressive,
            tiles: TileConfig::default(),
            max_frames: 1024,
            max_bounces: 8,
            samples_per_pixel: 1,
            firefly_clamp: 10.0,
            environment_intensity: 1.0,
            interaction_bounces: 2,
            interaction_samples: 1,
            interaction_cooldown_frames: 1,
            min_alpha: 1e-3,
            use_adaptive_sampling: true,
        }
    }
}

impl AccumulationParams {
    /// True when going from `self` to `other` invalidates accumulated samples
    fn invalidates(&self, other: &AccumulationParams) -> bool {
        self.render_mode != other.render_mode
            || self.max_bounces != other.max_bounces
            || self.samples_per_pixel != other.samples_per_pixel
            || self.firefly_clamp != other.firefly_clamp
            || self.environment_intensity != other.environment_intensity
    }
}

/// Blend factor of the new sample into the accumulated image.
///
/// `frame` counts ticks since accumulation (re)started. In tiled mode every
/// pixel receives one new sample per cycle after the full bootstrap frame.
/// Starts at 1, never increases, never reaches 0.
pub fn accumulation_alpha(frame: u32, mode: RenderMode, tiles_per_cycle: u32, min_alpha: f32) -> f32 {
    let samples_before = match mode {
        RenderMode::Progressive => frame,
        RenderMode::Tiled if frame == 0 => 0,
        RenderMode::Tiled => 1 + (frame - 1) / tiles_per_cycle.max(1),
    };
    let floor = if min_alpha > 0.0 { min_alpha } else { f32::MIN_POSITIVE };
    (1.0 / (1.0 + samples_before as f32)).max(floor).min(1.0)
}

/// Path-trace accumulation stage
pub struct PathTraceStage<K: ShadingKernel> {
    enabled: bool,
    mode: ExecutionMode,
    params: AccumulationParams,
    kernel: K,
    scheduler: TileScheduler,
    framebuffers: FrameBuffers,
    scene: Option<Arc<SceneBuffers>>,
    frame: u32,
    interaction_mode: bool,
    still_frames: u32,
    cached_camera: Option<CameraState>,
    complete: bool,
    /// Restart requested where no context was at hand; broadcast on the next
    /// event delivery or render
    pending_reset: Option<ResetReason>,
    warned_missing: HashSet<&'static str>,
}

impl<K: ShadingKernel> PathTraceStage<K> {
    pub fn new(kernel: K, params: AccumulationParams, width: u32, height: u32) -> RenderResult<Self> {
        Ok(Self {
            enabled: true,
            mode: ExecutionMode::Always,
            params,
            kernel,
            scheduler: TileScheduler::new(params.tiles, width, height),
            framebuffers: FrameBuffers::new(width, height, 2)?,
            scene: None,
            frame: 0,
            interaction_mode: false,
            still_frames: 0,
            cached_camera: None,
            complete: false,
            pending_reset: None,
            warned_missing: HashSet::new(),
        })
    }

    pub fn frame(&self) -> u32 {
        self.frame
    }

    pub fn is_interacting(&self) -> bool {
        self.interaction_mode
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    pub fn params(&self) -> &AccumulationParams {
        &self.params
    }

    pub fn framebuffers(&self) -> &FrameBuffers {
        &self.framebuffers
    }

    pub fn framebuffers_mut(&mut self) -> &mut FrameBuffers {
        &mut self.framebuffers
    }

    pub fn kernel(&self) -> &K {
        &self.kernel
    }

    pub fn tiles_per_cycle(&self) -> u32 {
        match self.params.render_mode {
            RenderMode::Progressive => 1,
            RenderMode::Tiled => self.scheduler.tile_count(),
        }
    }

    /// Frame count at which accumulation stops.
    ///
    /// Tiled renders stop on a cycle boundary: the full bootstrap frame is the
    /// first sample of every pixel, then `max_frames - 1` whole tile cycles.
    pub fn completion_threshold(&self) -> u32 {
        match self.params.render_mode {
            RenderMode::Progressive => self.params.max_frames,
            RenderMode::Tiled if self.params.max_frames == 0 => 0,
            RenderMode::Tiled => (self.params.max_frames - 1)
                .saturating_mul(self.tiles_per_cycle())
                .saturating_add(1),
        }
    }

    /// Zero the frame counter and drop accumulated history
    fn restart(&mut self) {
        self.frame = 0;
        self.complete = false;
        self.framebuffers.clear();
    }

    fn restart_with_event(&mut self, reason: ResetReason, ctx: &mut PipelineContext) {
        self.pending_reset = None;
        self.restart();
        ctx.emit(PipelineEvent::AccumulationReset { reason });
    }

    fn flush_pending_reset(&mut self, ctx: &mut PipelineContext) {
        if let Some(reason) = self.pending_reset.take() {
            self.restart_with_event(reason, ctx);
        }
    }

    /// Compare the published camera against the cached matrices and update
    /// interaction mode.
    fn track_camera(&mut self, ctx: &mut PipelineContext) {
        let camera = ctx
            .camera_state(keys::CAMERA)
            .or(self.cached_camera)
            .unwrap_or_default();
        let moved = self
            .cached_camera
            .map_or(false, |cached| !cached.matrices_equal(&camera));
        self.cached_camera = Some(camera);

        if moved {
            if !self.interaction_mode {
                debug!("Camera moved; entering interaction mode");
            }
            self.interaction_mode = true;
            self.still_frames = 0;
            ctx.emit(PipelineEvent::CameraMoved);
            self.restart_with_event(ResetReason::CameraMoved, ctx);
        } else if self.interaction_mode {
            self.still_frames += 1;
            if self.still_frames >= self.params.interaction_cooldown_frames.max(1) {
                debug!("Camera settled; leaving interaction mode");
                self.interaction_mode = false;
                self.restart_with_event(ResetReason::InteractionEnded, ctx);
            }
        }
    }

    fn optional_image(&mut self, ctx: &PipelineContext, key: &'static str) -> Option<Arc<FloatImage>> {
        match ctx.image(key) {
            Some(img) => {
                self.warned_missing.remove(key);
                Some(img.clone())
            }
            None => {
                if self.warned_missing.insert(key) {
                    warn!("'{}' not available; rendering without it", key);
                }
                None
            }
        }
    }

    fn kernel_params(&self, adv: &TileAdvance, alpha: f32, width: u32, height: u32) -> KernelParams {
        let scissor = adv.bounds.unwrap_or(Rect::full(width, height));
        let (bounces, spp) = if self.interaction_mode {
            (
                self.params.interaction_bounces.min(self.params.max_bounces),
                self.params.interaction_samples.max(1),
            )
        } else {
            (self.params.max_bounces, self.params.samples_per_pixel.max(1))
        };
        KernelParams {
            width,
            height,
            frame: self.frame,
            max_bounces: bounces,
            samples_per_pixel: spp,
            render_mode: self.params.render_mode.as_index() as u32,
            tiles_per_cycle: self.tiles_per_cycle(),
            interaction_mode: self.interaction_mode as u32,
            scissor: [scissor.x, scissor.y, scissor.width, scissor.height],
            firefly_clamp: self.params.firefly_clamp,
            accumulation_alpha: alpha,
            environment_intensity: self.params.environment_intensity,
            use_adaptive_sampling: 0,
            has_environment_cdf: 0,
            has_blue_noise: 0,
            environment_cdf_size: 0,
            _pad: 0,
        }
    }

    fn publish_state(&self, ctx: &mut PipelineContext, adv: &TileAdvance) {
        ctx.set_state(keys::FRAME, StateValue::Int(self.frame as i64));
        ctx.set_state(keys::INTERACTION_MODE, StateValue::Bool(self.interaction_mode));
        ctx.set_state(
            keys::RENDER_MODE,
            StateValue::Int(self.params.render_mode.as_index()),
        );
        ctx.set_state(keys::TILE_COUNT, StateValue::Int(self.tiles_per_cycle() as i64));
        ctx.set_state(keys::IS_CYCLE_COMPLETE, StateValue::Bool(adv.is_cycle_complete));
        ctx.set_state(keys::IS_COMPLETE, StateValue::Bool(self.complete));
        match adv.bounds {
            Some(r) => ctx.set_state(keys::TILE_BOUNDS, StateValue::Rect(r)),
            None => {
                ctx.remove(keys::TILE_BOUNDS);
            }
        }
    }
}

/// Blend the kernel's samples inside `rect` into the write target.
/// Non-finite samples keep the accumulated value.
fn blend_rect(
    prev: &FloatImage,
    cur: &mut FloatImage,
    samples: &FloatImage,
    rect: Rect,
    alpha: f32,
) {
    for y in rect.y..rect.y + rect.height {
        for x in rect.x..rect.x + rect.width {
            let old = prev.get(x, y);
            let sample = samples.get(x, y);
            let value = if !sample.is_finite() {
                old
            } else if alpha >= 1.0 {
                sample
            } else {
                old.lerp(sample, alpha)
            };
            cur.set(x, y, value);
        }
    }
}

fn copy_samples(cur: &mut FloatImage, samples: &FloatImage, rect: Rect) {
    for y in rect.y..rect.y + rect.height {
        for x in rect.x..rect.x + rect.width {
            let s = samples.get(x, y);
            cur.set(x, y, if s.is_finite() { s } else { Vec4::ZERO });
        }
    }
}

impl<K: ShadingKernel> Stage for PathTraceStage<K> {
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
        self.flush_pending_reset(ctx);
        self.track_camera(ctx);

        let threshold = self.completion_threshold();
        if !self.interaction_mode && self.frame >= threshold {
            if !self.complete {
                self.complete = true;
                info!("Accumulation complete after {} frames", self.frame);
                ctx.emit(PipelineEvent::RenderComplete { frame: self.frame });
            }
            ctx.set_state(keys::IS_COMPLETE, StateValue::Bool(true));
            ctx.set_state(keys::IS_CYCLE_COMPLETE, StateValue::Bool(false));
            return Ok(());
        }

        let (width, height) = self.framebuffers.size();
        let mode = self.params.render_mode;
        let adv = if self.interaction_mode {
            TileAdvance {
                tile_index: None,
                bounds: None,
                is_cycle_complete: true,
            }
        } else {
            self.scheduler.advance(mode, self.frame)
        };
        if mode == RenderMode::Tiled
            && !self.interaction_mode
            && self.frame > 0
            && self.scheduler.linear_index(mode, self.frame) == 0
        {
            self.framebuffers.carry_previous()?;
        }

        let alpha = if self.interaction_mode {
            1.0
        } else {
            accumulation_alpha(self.frame, mode, self.tiles_per_cycle(), self.params.min_alpha)
        };

        let env_map = self.optional_image(ctx, keys::ENVIRONMENT_MAP);
        let env_cdf = self.optional_image(ctx, keys::ENVIRONMENT_CDF);
        let blue_noise = self.optional_image(ctx, keys::BLUE_NOISE);
        let guidance = if self.params.use_adaptive_sampling {
            ctx.image(keys::ADAPTIVE_GUIDANCE).cloned()
        } else {
            None
        };
        let cdf_size = ctx
            .int_state(keys::ENVIRONMENT_CDF_SIZE)
            .map(|s| s.max(0) as u32)
            .unwrap_or(0);

        let mut params = self.kernel_params(&adv, alpha, width, height);
        params.has_environment_cdf = (env_cdf.is_some() && cdf_size > 0) as u32;
        params.environment_cdf_size = if params.has_environment_cdf == 1 { cdf_size } else { 0 };
        params.has_blue_noise = blue_noise.is_some() as u32;
        params.use_adaptive_sampling = guidance.is_some() as u32;

        let camera = self.cached_camera.unwrap_or_default();
        let output = {
            let bindings = KernelBindings {
                scene: self.scene.as_deref(),
                camera: &camera,
                environment_map: env_map.as_deref(),
                environment_cdf: if params.has_environment_cdf == 1 {
                    env_cdf.as_deref()
                } else {
                    None
                },
                blue_noise: blue_noise.as_deref(),
                adaptive_guidance: guidance.as_deref(),
                previous_color: self.framebuffers.previous().attachment(ATTACHMENT_COLOR),
                scissor: adv.bounds,
            };
            self.kernel.invoke(&bindings, &params)?
        };
        if output.color.size() != (width, height) || output.normal_depth.size() != (width, height) {
            return Err(RenderError::resource(format!(
                "kernel returned {:?}/{:?}, expected {}x{}",
                output.color.size(),
                output.normal_depth.size(),
                width,
                height
            )));
        }

        let rect = adv.bounds.unwrap_or(Rect::full(width, height));
        let (color, normal_depth) = {
            let (prev, cur) = self.framebuffers.split();
            if let (Some(p), Some(c)) = (
                prev.attachment(ATTACHMENT_COLOR),
                cur.attachment_mut(ATTACHMENT_COLOR),
            ) {
                blend_rect(p, c, &output.color, rect, alpha);
            }
            if let Some(nd) = cur.attachment_mut(ATTACHMENT_NORMAL_DEPTH) {
                copy_samples(nd, &output.normal_depth, rect);
            }
            (
                cur.attachment(ATTACHMENT_COLOR).cloned(),
                cur.attachment(ATTACHMENT_NORMAL_DEPTH).cloned(),
            )
        };

        if let Some(color) = color {
            ctx.set_image(keys::PATHTRACER_COLOR, color);
        }
        match normal_depth {
            Some(nd) => ctx.set_image(keys::PATHTRACER_NORMAL_DEPTH, nd),
            None => {
                ctx.remove(keys::PATHTRACER_NORMAL_DEPTH);
            }
        }
        self.publish_state(ctx, &adv);

        if adv.is_cycle_complete {
            self.framebuffers.swap();
            if mode == RenderMode::Tiled && !self.interaction_mode && self.frame > 0 {
                ctx.emit(PipelineEvent::TileCycleComplete { frame: self.frame });
            }
        }
        if !self.interaction_mode {
            self.frame += 1;
        }
        Ok(())
    }

    fn reset(&mut self) {
        self.restart();
        self.pending_reset = None;
        self.interaction_mode = false;
        self.still_frames = 0;
        self.cached_camera = None;
    }

    fn set_size(&mut self, width: u32, height: u32) -> RenderResult<()> {
        self.framebuffers.resize(width, height)?;
        self.scheduler.set_size(width, height);
        self.restart();
        Ok(())
    }

    fn dispose(&mut self) {
        self.scene = None;
        self.framebuffers.clear();
    }

    fn on_event(&mut self, event: &PipelineEvent, ctx: &mut PipelineContext) {
        match event {
            PipelineEvent::SceneUpdated(scene) => {
                self.scene = Some(scene.clone());
                self.restart_with_event(ResetReason::SceneChanged, ctx);
            }
            PipelineEvent::AccumulationReset {
                reason: ResetReason::EnvironmentChanged,
            } => self.restart(),
            _ => self.flush_pending_reset(ctx),
        }
    }

    fn update_parameters(&mut self, patch: &serde_json::Value) -> RenderResult<()> {
        let next: AccumulationParams = merge_parameters(&self.params, patch)?;
        if next.tiles.grid_size != self.params.tiles.grid_size {
            self.scheduler.set_grid_size(next.tiles.grid_size);
        }
        let invalidates = self.params.invalidates(&next);
        if next.max_frames > self.params.max_frames {
            self.complete = false;
        }
        self.params = next;
        self.params.tiles.grid_size = self.scheduler.grid_size();
        if invalidates {
            self.restart();
            self.pending_reset = Some(ResetReason::ParametersChanged);
        }
        Ok(())
    }

    fn copy_attachment(&mut self, index: usize, target: CopyTarget<'_>) -> RenderResult<bool> {
        self.framebuffers.copy_attachment(index, target)?;
        Ok(true)
    }
}
