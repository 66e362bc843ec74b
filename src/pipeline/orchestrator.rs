//! Stage orchestrator: ordered stage list, shared context and event dispatch.
//!
//! One `render_frame` call is one tick. Stages run in insertion order when
//! enabled and when their execution mode allows it. A failing stage is logged
//! and skipped; the tick always completes.

use log::{debug, error, info, warn};

use crate::core::framebuffer::{CopyTarget, ATTACHMENT_COLOR};
use crate::core::image::FloatImage;
use crate::error::{RenderError, RenderResult};
use crate::gpu::GpuContext;

use super::context::{keys, PipelineContext};
use super::events::{EventKind, EventListener, PipelineEvent, SubscriptionId};
use super::stage::Stage;

/// Upper bound on event rounds per dispatch, guards against stages that
/// answer an event by publishing another one forever
const MAX_EVENT_ROUNDS: usize = 32;

/// Images `present` looks for, best first
const PRESENT_PRIORITY: [&str; 3] = [
    keys::EXPOSURE_COLOR,
    keys::DENOISED_COLOR,
    keys::PATHTRACER_COLOR,
];

/// What happened during one tick
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameReport {
    pub tick: u64,
    pub executed: Vec<String>,
    pub skipped: Vec<String>,
    pub failed: Vec<String>,
}

/// Ordered stage pipeline
pub struct Pipeline {
    stages: Vec<Box<dyn Stage>>,
    context: PipelineContext,
    tick: u64,
}

impl Pipeline {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            stages: Vec::new(),
            context: PipelineContext::new(width, height),
            tick: 0,
        }
    }

    /// Attach a GPU for copies to GPU destinations
    pub fn with_gpu(mut self, gpu: &'static GpuContext) -> Self {
        self.context.set_gpu(Some(gpu));
        self
    }

    /// Append a stage; names must be unique.
    pub fn add_stage(&mut self, mut stage: Box<dyn Stage>) -> RenderResult<()> {
        if self.stages.iter().any(|s| s.name() == stage.name()) {
            return Err(RenderError::config(format!(
                "stage '{}' already registered",
                stage.name()
            )));
        }
        let (w, h) = self.context.size();
        stage.set_size(w, h)?;
        self.stages.push(stage);
        Ok(())
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    pub fn stage(&self, name: &str) -> Option<&dyn Stage> {
        self.stages
            .iter()
            .find(|s| s.name() == name)
            .map(|s| s.as_ref())
    }

    pub fn context(&self) -> &PipelineContext {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut PipelineContext {
        &mut self.context
    }

    pub fn tick_count(&self) -> u64 {
        self.tick
    }

    pub fn subscribe(&mut self, kind: EventKind, listener: EventListener) -> SubscriptionId {
        self.context.bus().subscribe(kind, listener)
    }

    pub fn subscribe_all(&mut self, listener: EventListener) -> SubscriptionId {
        self.context.bus().subscribe_all(listener)
    }

    /// Queue an event from the host (UI, asset loader, scene builder).
    /// Delivered to stages at the start of the next tick.
    pub fn publish(&mut self, event: PipelineEvent) {
        self.context.emit(event);
    }

    /// Run one tick.
    pub fn render_frame(&mut self) -> FrameReport {
        let mut report = FrameReport {
            tick: self.tick,
            ..Default::default()
        };
        self.dispatch_events();

        for i in 0..self.stages.len() {
            let stage = &mut self.stages[i];
            let name = stage.name().to_string();
            if !stage.enabled() || !stage.execution_mode().should_execute(&self.context) {
                debug!("Stage '{}' skipped on tick {}", name, self.tick);
                report.skipped.push(name);
                continue;
            }
            match stage.render(&mut self.context) {
                Ok(()) => report.executed.push(name),
                Err(e) => {
                    error!("[{}] stage '{}' failed: {}", e.category(), name, e);
                    report.failed.push(name);
                }
            }
            self.dispatch_events();
        }

        self.tick += 1;
        report
    }

    /// Deliver queued events: pipeline-level handling first, then every
    /// stage in order.
    fn dispatch_events(&mut self) {
        for _ in 0..MAX_EVENT_ROUNDS {
            let events = self.context.bus().drain();
            if events.is_empty() {
                return;
            }
            for event in events {
                self.handle_event(&event);
                for stage in self.stages.iter_mut() {
                    stage.on_event(&event, &mut self.context);
                }
            }
        }
        warn!("Event dispatch did not settle after {} rounds", MAX_EVENT_ROUNDS);
    }

    fn handle_event(&mut self, event: &PipelineEvent) {
        match event {
            PipelineEvent::Reset => self.reset_stages(),
            PipelineEvent::Resize { width, height } => self.apply_size(*width, *height),
            PipelineEvent::SetEnabled { stage, enabled } => {
                match self.stages.iter_mut().find(|s| s.name() == stage.as_str()) {
                    Some(s) => s.set_enabled(*enabled),
                    None => warn!("setEnabled for unknown stage '{}'", stage),
                }
            }
            PipelineEvent::UpdateParameters { stage, params } => {
                match self.stages.iter_mut().find(|s| s.name() == stage.as_str()) {
                    Some(s) => {
                        if let Err(e) = s.update_parameters(params) {
                            warn!("Parameter update for '{}' rejected: {}", stage, e);
                        }
                    }
                    None => warn!("updateParameters for unknown stage '{}'", stage),
                }
            }
            _ => {}
        }
    }

    /// Reset every stage immediately (idempotent).
    pub fn reset(&mut self) {
        self.reset_stages();
        self.dispatch_events();
    }

    fn reset_stages(&mut self) {
        info!("Pipeline reset");
        for stage in self.stages.iter_mut() {
            stage.reset();
        }
    }

    /// Resize immediately; zero dimensions clamp to 1.
    pub fn resize(&mut self, width: u32, height: u32) {
        self.apply_size(width, height);
        self.dispatch_events();
    }

    fn apply_size(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            warn!("Resize to {}x{} clamped to at least 1x1", width, height);
        }
        let (width, height) = (width.max(1), height.max(1));
        if self.context.size() == (width, height) {
            return;
        }
        self.context.set_size(width, height);
        for stage in self.stages.iter_mut() {
            if let Err(e) = stage.set_size(width, height) {
                error!("Stage '{}' failed to resize: {}", stage.name(), e);
            }
        }
        info!("Pipeline resized to {}x{}", width, height);
    }

    /// Key of the image `present` would show
    pub fn output_key(&self) -> Option<&'static str> {
        PRESENT_PRIORITY
            .iter()
            .copied()
            .find(|k| self.context.has_image(k))
    }

    /// Copy the best available image into `dest`. The raw path tracer output
    /// comes straight from the owning stage's frame buffers. With nothing
    /// rendered yet `dest` is cleared to black, so a frame is always produced.
    pub fn present(&mut self, dest: &mut FloatImage) {
        let (w, h) = self.context.size();
        let key = self.output_key();
        if key == Some(keys::PATHTRACER_COLOR) && self.copy_from_frame_buffers(ATTACHMENT_COLOR, dest) {
            return;
        }
        match key.and_then(|k| self.context.image(k)) {
            Some(img) => {
                if dest.size() != img.size() {
                    *dest = FloatImage::new(img.width(), img.height());
                }
                dest.texels_mut().copy_from_slice(img.texels());
            }
            None => {
                if dest.size() != (w, h) {
                    *dest = FloatImage::new(w, h);
                } else {
                    dest.clear();
                }
            }
        }
    }

    /// Copy `index` from the first stage that owns frame buffers
    fn copy_from_frame_buffers(&mut self, index: usize, dest: &mut FloatImage) -> bool {
        for stage in self.stages.iter_mut() {
            match stage.copy_attachment(index, CopyTarget::Image(&mut *dest)) {
                Ok(true) => return true,
                Ok(false) => {}
                Err(e) => {
                    warn!("Copy of attachment {} from '{}' failed: {}", index, stage.name(), e);
                    return false;
                }
            }
        }
        false
    }

    /// Tear down all stages and clear the context.
    pub fn dispose(&mut self) {
        for stage in self.stages.iter_mut() {
            stage.dispose();
        }
        self.stages.clear();
        self.context.clear();
    }
}
