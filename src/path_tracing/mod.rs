// src/path_tracing/mod.rs
// Progressive path tracing: camera state, kernel interface, tile traversal and accumulation.

pub mod accumulation;
pub mod camera;
pub mod kernel;
pub mod tile_dispatch;

pub use accumulation::{accumulation_alpha, AccumulationParams, PathTraceStage};
pub use camera::CameraState;
pub use kernel::{KernelBindings, KernelOutput, KernelParams, PackedBuffer, SceneBuffers, ShadingKernel};
pub use tile_dispatch::{RenderMode, TileAdvance, TileConfig, TileScheduler};
