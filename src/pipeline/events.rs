//! Typed publish/subscribe channel between stages and the host.
//!
//! Subscribers registered on the bus are invoked synchronously from
//! `publish`, in registration order. Every published event is also queued so
//! the orchestrator can hand it to the stages (`Stage::on_event`) once the
//! publishing stage has returned.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::core::image::FloatImage;
use crate::path_tracing::kernel::SceneBuffers;

/// Why accumulated history was thrown away
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResetReason {
    CameraMoved,
    InteractionEnded,
    ParametersChanged,
    SceneChanged,
    EnvironmentChanged,
}

/// Everything that can travel over the bus
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineEvent {
    /// Whole-pipeline reset
    Reset,
    Resize { width: u32, height: u32 },
    /// Partial parameter set for one stage (`stageName:updateParameters`)
    UpdateParameters {
        stage: String,
        params: serde_json::Value,
    },
    /// `stageName:setEnabled`
    SetEnabled { stage: String, enabled: bool },
    CameraMoved,
    AccumulationReset { reason: ResetReason },
    TileCycleComplete { frame: u32 },
    RenderComplete { frame: u32 },
    EnvironmentLoaded(Arc<FloatImage>),
    SceneUpdated(Arc<SceneBuffers>),
}

/// Payload-free discriminant, used to filter subscriptions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Reset,
    Resize,
    UpdateParameters,
    SetEnabled,
    CameraMoved,
    AccumulationReset,
    TileCycleComplete,
    RenderComplete,
    EnvironmentLoaded,
    SceneUpdated,
}

impl PipelineEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            PipelineEvent::Reset => EventKind::Reset,
            PipelineEvent::Resize { .. } => EventKind::Resize,
            PipelineEvent::UpdateParameters { .. } => EventKind::UpdateParameters,
            PipelineEvent::SetEnabled { .. } => EventKind::SetEnabled,
            PipelineEvent::CameraMoved => EventKind::CameraMoved,
            PipelineEvent::AccumulationReset { .. } => EventKind::AccumulationReset,
            PipelineEvent::TileCycleComplete { .. } => EventKind::TileCycleComplete,
            PipelineEvent::RenderComplete { .. } => EventKind::RenderComplete,
            PipelineEvent::EnvironmentLoaded(_) => EventKind::EnvironmentLoaded,
            PipelineEvent::SceneUpdated(_) => EventKind::SceneUpdated,
        }
    }
}

pub type EventListener = Box<dyn FnMut(&PipelineEvent)>;

/// Handle returned by `subscribe`, used to unsubscribe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Subscription {
    id: SubscriptionId,
    filter: Option<EventKind>,
    listener: EventListener,
}

/// Single-threaded event bus
#[derive(Default)]
pub struct EventBus {
    subscriptions: Vec<Subscription>,
    outbox: VecDeque<PipelineEvent>,
    next_id: u64,
    published: u64,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Listen for one kind of event
    pub fn subscribe(&mut self, kind: EventKind, listener: EventListener) -> SubscriptionId {
        self.add(Some(kind), listener)
    }

    /// Listen for every event
    pub fn subscribe_all(&mut self, listener: EventListener) -> SubscriptionId {
        self.add(None, listener)
    }

    fn add(&mut self, filter: Option<EventKind>, listener: EventListener) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.subscriptions.push(Subscription { id, filter, listener });
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.subscriptions.len();
        self.subscriptions.retain(|s| s.id != id);
        self.subscriptions.len() != before
    }

    pub fn publish(&mut self, event: PipelineEvent) {
        let kind = event.kind();
        for sub in self.subscriptions.iter_mut() {
            if sub.filter.map_or(true, |f| f == kind) {
                (sub.listener)(&event);
            }
        }
        self.published += 1;
        self.outbox.push_back(event);
    }

    /// Take the queued events for stage delivery
    pub fn drain(&mut self) -> Vec<PipelineEvent> {
        self.outbox.drain(..).collect()
    }

    pub fn has_pending(&self) -> bool {
        !self.outbox.is_empty()
    }

    pub fn published_count(&self) -> u64 {
        self.published
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriptions", &self.subscriptions.len())
            .field("pending", &self.outbox.len())
            .field("published", &self.published)
            .finish()
    }
}
