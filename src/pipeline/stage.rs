//! Stage definition and execution-mode policy

use crate::core::framebuffer::CopyTarget;
use crate::error::RenderResult;

use super::context::{keys, PipelineContext};
use super::events::PipelineEvent;
use crate::path_tracing::tile_dispatch::RenderMode;

pub type StagePredicate = Box<dyn Fn(&PipelineContext) -> bool>;

/// When the orchestrator runs a stage
pub enum ExecutionMode {
    /// Every tick
    Always,
    /// Every tick in progressive mode; in tiled mode only on the frame that
    /// completes the tile grid
    PerCompletedCycle,
    /// Every tick; the stage inspects the tile state itself
    PerTile,
    /// Stage-supplied predicate
    Conditional(StagePredicate),
}

impl ExecutionMode {
    pub fn should_execute(&self, ctx: &PipelineContext) -> bool {
        match self {
            ExecutionMode::Always | ExecutionMode::PerTile => true,
            ExecutionMode::PerCompletedCycle => {
                let mode = ctx
                    .int_state(keys::RENDER_MODE)
                    .map(RenderMode::from_index)
                    .unwrap_or_default();
                match mode {
                    RenderMode::Progressive => true,
                    RenderMode::Tiled => ctx.bool_state(keys::IS_CYCLE_COMPLETE).unwrap_or(true),
                }
            }
            ExecutionMode::Conditional(predicate) => predicate(ctx),
        }
    }
}

impl std::fmt::Debug for ExecutionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionMode::Always => write!(f, "Always"),
            ExecutionMode::PerCompletedCycle => write!(f, "PerCompletedCycle"),
            ExecutionMode::PerTile => write!(f, "PerTile"),
            ExecutionMode::Conditional(_) => write!(f, "Conditional(..)"),
        }
    }
}

/// A unit of per-frame work. Stages talk to each other only through context
/// keys and bus events.
pub trait Stage {
    /// Unique name, also the target of `UpdateParameters`/`SetEnabled`
    fn name(&self) -> &str;

    fn enabled(&self) -> bool;

    fn set_enabled(&mut self, enabled: bool);

    fn execution_mode(&self) -> &ExecutionMode;

    /// Do this frame's work, reading inputs from and publishing outputs to
    /// the context.
    fn render(&mut self, ctx: &mut PipelineContext) -> RenderResult<()>;

    /// Drop frame counters and history. Must be idempotent.
    fn reset(&mut self);

    /// Resolution change; called before the next render
    fn set_size(&mut self, _width: u32, _height: u32) -> RenderResult<()> {
        Ok(())
    }

    /// Release resources at teardown
    fn dispose(&mut self) {}

    /// Bus delivery, after the publishing stage returned
    fn on_event(&mut self, _event: &PipelineEvent, _ctx: &mut PipelineContext) {}

    /// Apply a partial parameter set
    fn update_parameters(&mut self, _patch: &serde_json::Value) -> RenderResult<()> {
        Ok(())
    }

    /// Copy one attachment of the stage's own frame buffers. Returns
    /// `Ok(false)` for stages without frame buffers.
    fn copy_attachment(&mut self, _index: usize, _target: CopyTarget<'_>) -> RenderResult<bool> {
        Ok(false)
    }
}
