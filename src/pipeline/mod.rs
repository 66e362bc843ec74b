//! Stage orchestration framework
//!
//! Ordered stages, a shared key-value context and a typed event bus. Stages
//! never reference each other; they exchange images and state through
//! context keys and signal resets and parameter changes through events.

pub mod context;
pub mod events;
pub mod orchestrator;
pub mod stage;

pub use context::{keys, ContextValue, PipelineContext, RendererHandle, StateValue};
pub use events::{EventBus, EventKind, PipelineEvent, ResetReason, SubscriptionId};
pub use orchestrator::{FrameReport, Pipeline};
pub use stage::{ExecutionMode, Stage, StagePredicate};
