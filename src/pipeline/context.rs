//! Shared key-value context for inter-stage handoff.
//!
//! Producers overwrite their keys every frame. A missing key means the
//! producing stage is disabled or not ready yet; readers treat that as
//! "feature unavailable this frame".

use std::collections::HashMap;
use std::sync::Arc;

use crate::core::image::{FloatImage, Rect};
use crate::gpu::GpuContext;
use crate::path_tracing::camera::CameraState;

use super::events::{EventBus, PipelineEvent};

/// Well-known context keys
pub mod keys {
    pub const PATHTRACER_COLOR: &str = "pathtracer:color";
    pub const PATHTRACER_NORMAL_DEPTH: &str = "pathtracer:normalDepth";
    pub const FRAME: &str = "pathtracer:frame";
    pub const INTERACTION_MODE: &str = "interactionMode";
    pub const RENDER_MODE: &str = "renderMode";
    pub const TILE_COUNT: &str = "tileCount";
    pub const TILE_BOUNDS: &str = "tileBounds";
    pub const IS_CYCLE_COMPLETE: &str = "isCycleComplete";
    pub const IS_COMPLETE: &str = "isComplete";
    pub const CAMERA: &str = "camera";

    pub const ENVIRONMENT_MAP: &str = "environment:map";
    pub const ENVIRONMENT_CDF: &str = "environment:cdf";
    pub const ENVIRONMENT_CDF_SIZE: &str = "environment:cdfSize";
    pub const BLUE_NOISE: &str = "blueNoise";

    pub const ADAPTIVE_GUIDANCE: &str = "adaptiveSampling:guidance";
    pub const ADAPTIVE_VARIANCE: &str = "adaptiveSampling:variance";

    pub const DENOISED_COLOR: &str = "denoiser:color";
    pub const DENOISER_MOTION: &str = "denoiser:motion";
    pub const DENOISER_GRADIENT: &str = "denoiser:gradient";
    pub const DENOISER_VARIANCE: &str = "denoiser:variance";
    pub const DENOISER_HISTORY_LENGTH: &str = "denoiser:historyLength";

    pub const EXPOSURE_VALUE: &str = "exposure:value";
    pub const EXPOSURE_COLOR: &str = "exposure:color";
}

/// Scalar and small structured state
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum StateValue {
    Bool(bool),
    Int(i64),
    Float(f32),
    Rect(Rect),
    Camera(CameraState),
}

/// One context slot
#[derive(Debug, Clone)]
pub enum ContextValue {
    Image(Arc<FloatImage>),
    State(StateValue),
}

/// What stages know about the renderer they run on
#[derive(Clone, Copy)]
pub struct RendererHandle {
    pub width: u32,
    pub height: u32,
    pub gpu: Option<&'static GpuContext>,
}

impl std::fmt::Debug for RendererHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RendererHandle")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("gpu", &self.gpu.is_some())
            .finish()
    }
}

/// Per-pipeline shared state
#[derive(Debug)]
pub struct PipelineContext {
    values: HashMap<String, ContextValue>,
    renderer: RendererHandle,
    bus: EventBus,
}

impl PipelineContext {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            values: HashMap::new(),
            renderer: RendererHandle {
                width: width.max(1),
                height: height.max(1),
                gpu: None,
            },
            bus: EventBus::new(),
        }
    }

    pub fn renderer(&self) -> &RendererHandle {
        &self.renderer
    }

    pub fn set_gpu(&mut self, gpu: Option<&'static GpuContext>) {
        self.renderer.gpu = gpu;
    }

    pub fn size(&self) -> (u32, u32) {
        (self.renderer.width, self.renderer.height)
    }

    pub(crate) fn set_size(&mut self, width: u32, height: u32) {
        self.renderer.width = width;
        self.renderer.height = height;
    }

    pub fn bus(&mut self) -> &mut EventBus {
        &mut self.bus
    }

    /// Publish on the bus
    pub fn emit(&mut self, event: PipelineEvent) {
        self.bus.publish(event);
    }

    pub fn set_image(&mut self, key: &str, image: impl Into<Arc<FloatImage>>) {
        self.values
            .insert(key.to_string(), ContextValue::Image(image.into()));
    }

    pub fn image(&self, key: &str) -> Option<&Arc<FloatImage>> {
        match self.values.get(key) {
            Some(ContextValue::Image(img)) => Some(img),
            _ => None,
        }
    }

    pub fn has_image(&self, key: &str) -> bool {
        self.image(key).is_some()
    }

    pub fn set_state(&mut self, key: &str, value: StateValue) {
        self.values.insert(key.to_string(), ContextValue::State(value));
    }

    pub fn state(&self, key: &str) -> Option<StateValue> {
        match self.values.get(key) {
            Some(ContextValue::State(s)) => Some(*s),
            _ => None,
        }
    }

    pub fn bool_state(&self, key: &str) -> Option<bool> {
        match self.state(key) {
            Some(StateValue::Bool(b)) => Some(b),
            _ => None,
        }
    }

    pub fn int_state(&self, key: &str) -> Option<i64> {
        match self.state(key) {
            Some(StateValue::Int(i)) => Some(i),
            _ => None,
        }
    }

    pub fn float_state(&self, key: &str) -> Option<f32> {
        match self.state(key) {
            Some(StateValue::Float(f)) => Some(f),
            _ => None,
        }
    }

    pub fn rect_state(&self, key: &str) -> Option<Rect> {
        match self.state(key) {
            Some(StateValue::Rect(r)) => Some(r),
            _ => None,
        }
    }

    pub fn camera_state(&self, key: &str) -> Option<CameraState> {
        match self.state(key) {
            Some(StateValue::Camera(c)) => Some(c),
            _ => None,
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<ContextValue> {
        self.values.remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    /// Drop every key (explicit teardown only)
    pub fn clear(&mut self) {
        self.values.clear();
    }
}
