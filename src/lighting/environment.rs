// src/lighting/environment.rs
// Environment stage: owns the environment map and its importance-sampling tables
// CDF builds run on a worker thread and are picked up without blocking the tick

use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::sync::Arc;
use std::thread;

use log::{info, warn};

use crate::core::image::FloatImage;
use crate::error::{RenderError, RenderResult};
use crate::pipeline::{
    keys, ExecutionMode, PipelineContext, PipelineEvent, ResetReason, Stage, StateValue,
};

use super::env_cdf::EnvironmentCdf;

pub const STAGE_NAME: &str = "environment";

struct PendingBuild {
    generation: u64,
    map: Arc<FloatImage>,
    receiver: Receiver<RenderResult<EnvironmentCdf>>,
}

pub struct EnvironmentStage {
    enabled: bool,
    mode: ExecutionMode,
    generation: u64,
    pending: Option<PendingBuild>,
    map: Option<Arc<FloatImage>>,
    cdf: Option<Arc<FloatImage>>,
    cdf_size: u32,
    gpu_texture: Option<wgpu::Texture>,
}

impl Default for EnvironmentStage {
    fn default() -> Self {
        Self::new()
    }
}

impl EnvironmentStage {
    pub fn new() -> Self {
        Self {
            enabled: true,
            mode: ExecutionMode::Always,
            generation: 0,
            pending: None,
            map: None,
            cdf: None,
            cdf_size: 0,
            gpu_texture: None,
        }
    }

    /// Start building tables for `map` on a worker thread. A build still in
    /// flight for an older map is abandoned.
    pub fn set_environment(&mut self, map: Arc<FloatImage>) -> RenderResult<()> {
        self.generation += 1;
        let generation = self.generation;
        let (sender, receiver) = mpsc::channel();
        let source = map.clone();
        thread::Builder::new()
            .name(format!("env-cdf-{}", generation))
            .spawn(move || {
                // The receiver is gone when a newer map superseded this one
                let _ = sender.send(EnvironmentCdf::build(&source));
            })
            .map_err(|e| RenderError::resource(format!("failed to spawn CDF build: {}", e)))?;
        info!(
            "Environment CDF build #{} started for {}x{} map",
            generation,
            map.width(),
            map.height()
        );
        self.pending = Some(PendingBuild {
            generation,
            map,
            receiver,
        });
        Ok(())
    }

    pub fn is_building(&self) -> bool {
        self.pending.is_some()
    }

    pub fn cdf_size(&self) -> u32 {
        self.cdf_size
    }

    pub fn gpu_texture(&self) -> Option<&wgpu::Texture> {
        self.gpu_texture.as_ref()
    }

    /// Check the worker without blocking. Returns true when new tables landed.
    fn poll_build(&mut self, ctx: &mut PipelineContext) -> bool {
        let Some(pending) = self.pending.as_ref() else {
            return false;
        };
        let result = match pending.receiver.try_recv() {
            Ok(result) => result,
            Err(TryRecvError::Empty) => return false,
            Err(TryRecvError::Disconnected) => {
                warn!("Environment CDF build #{} vanished", pending.generation);
                self.pending = None;
                return false;
            }
        };
        let Some(pending) = self.pending.take() else {
            return false;
        };
        match result {
            Ok(cdf) => {
                self.cdf_size = cdf.size();
                if let Some(gpu) = ctx.renderer().gpu {
                    self.gpu_texture = Some(cdf.upload_to_gpu(gpu));
                }
                self.map = Some(pending.map);
                self.cdf = Some(Arc::new(cdf.into_texture()));
                info!(
                    "Environment CDF build #{} ready ({}x{})",
                    pending.generation,
                    self.cdf_size,
                    self.cdf_size + 1
                );
                true
            }
            Err(e) => {
                warn!(
                    "Environment CDF build #{} failed, keeping previous tables: {}",
                    pending.generation, e
                );
                false
            }
        }
    }

    fn publish(&self, ctx: &mut PipelineContext) {
        if let (Some(map), Some(cdf)) = (&self.map, &self.cdf) {
            ctx.set_image(keys::ENVIRONMENT_MAP, map.clone());
            ctx.set_image(keys::ENVIRONMENT_CDF, cdf.clone());
            ctx.set_state(keys::ENVIRONMENT_CDF_SIZE, StateValue::Int(self.cdf_size as i64));
        }
    }
}

impl Stage for EnvironmentStage {
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
        if self.poll_build(ctx) {
            self.publish(ctx);
            ctx.emit(PipelineEvent::AccumulationReset {
                reason: ResetReason::EnvironmentChanged,
            });
        } else {
            self.publish(ctx);
        }
        Ok(())
    }

    // Tables describe the map, not accumulated history
    fn reset(&mut self) {}

    fn dispose(&mut self) {
        self.pending = None;
        self.map = None;
        self.cdf = None;
        self.gpu_texture = None;
    }

    fn on_event(&mut self, event: &PipelineEvent, _ctx: &mut PipelineContext) {
        if let PipelineEvent::EnvironmentLoaded(map) = event {
            if let Err(e) = self.set_environment(map.clone()) {
                warn!("Environment change ignored: {}", e);
            }
        }
    }
}
