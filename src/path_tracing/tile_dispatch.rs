// src/path_tracing/tile_dispatch.rs
// Tile scheduler for progressive tiled rendering
// Splits the frame into a grid and walks it center-out, one tile per frame

use std::collections::HashMap;

use log::warn;
use serde::{Deserialize, Serialize};

use crate::core::image::Rect;

/// Grid sizes above this only warn; cost grows with the square of the grid
pub const SOFT_MAX_GRID_SIZE: u32 = 16;

/// How frames map onto the image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderMode {
    /// Whole image every frame
    #[default]
    Progressive,
    /// One tile per frame after a full bootstrap frame
    Tiled,
}

impl RenderMode {
    /// Numeric mode published to the context (0 = progressive)
    pub fn as_index(self) -> i64 {
        match self {
            RenderMode::Progressive => 0,
            RenderMode::Tiled => 1,
        }
    }

    pub fn from_index(index: i64) -> Self {
        if index == 0 {
            RenderMode::Progressive
        } else {
            RenderMode::Tiled
        }
    }
}

/// Configuration for tiled rendering
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TileConfig {
    /// Tiles per side; the cycle has `grid_size²` tiles
    pub grid_size: u32,
    /// Warning threshold for `grid_size`
    pub soft_max_grid: u32,
}

impl Default for TileConfig {
    fn default() -> Self {
        Self {
            grid_size: 3,
            soft_max_grid: SOFT_MAX_GRID_SIZE,
        }
    }
}

/// Result of mapping a frame number onto the tile grid
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileAdvance {
    /// Tile rendered this frame; `None` for full-frame renders
    pub tile_index: Option<u32>,
    /// Scissor rectangle; `None` means the whole image
    pub bounds: Option<Rect>,
    /// True when every tile has been visited once in this cycle
    pub is_cycle_complete: bool,
}

impl TileAdvance {
    fn full_frame() -> Self {
        Self {
            tile_index: None,
            bounds: None,
            is_cycle_complete: true,
        }
    }
}

/// Deterministic tile traversal with cached bounds
#[derive(Debug, Clone)]
pub struct TileScheduler {
    grid_size: u32,
    soft_max_grid: u32,
    width: u32,
    height: u32,
    order: Vec<u32>,
    bounds_cache: HashMap<(u32, u32, u32, u32), Rect>,
}

impl TileScheduler {
    pub fn new(config: TileConfig, width: u32, height: u32) -> Self {
        let soft_max_grid = config.soft_max_grid.max(1);
        let grid_size = sanitize_grid_size(config.grid_size, soft_max_grid);
        Self {
            grid_size,
            soft_max_grid,
            width: width.max(1),
            height: height.max(1),
            order: spiral_order(grid_size),
            bounds_cache: HashMap::new(),
        }
    }

    pub fn grid_size(&self) -> u32 {
        self.grid_size
    }

    /// Tiles in one full cycle
    pub fn tile_count(&self) -> u32 {
        self.grid_size * self.grid_size
    }

    pub fn order(&self) -> &[u32] {
        &self.order
    }

    /// Change the grid at runtime. Regenerates the traversal order and drops
    /// cached bounds; the caller's frame counter is left alone.
    pub fn set_grid_size(&mut self, grid_size: u32) {
        let grid_size = sanitize_grid_size(grid_size, self.soft_max_grid);
        if grid_size == self.grid_size {
            return;
        }
        self.grid_size = grid_size;
        self.order = spiral_order(grid_size);
        self.bounds_cache.clear();
    }

    pub fn set_size(&mut self, width: u32, height: u32) {
        self.width = width.max(1);
        self.height = height.max(1);
    }

    /// Pixel bounds of `tile_index` for the scheduler's image size
    pub fn bounds(&mut self, tile_index: u32) -> Rect {
        let key = (tile_index, self.grid_size, self.width, self.height);
        *self
            .bounds_cache
            .entry(key)
            .or_insert_with(|| bounds_of(key.0, key.1, key.2, key.3))
    }

    pub fn cached_bounds(&self) -> usize {
        self.bounds_cache.len()
    }

    /// Map a frame number to this frame's tile.
    pub fn advance(&mut self, mode: RenderMode, frame: u32) -> TileAdvance {
        if mode == RenderMode::Progressive || frame == 0 {
            return TileAdvance::full_frame();
        }
        let count = self.tile_count();
        let linear = (frame - 1) % count;
        let tile_index = self.order[linear as usize];
        TileAdvance {
            tile_index: Some(tile_index),
            bounds: Some(self.bounds(tile_index)),
            is_cycle_complete: linear == count - 1,
        }
    }

    /// Position of `frame` inside the current cycle (0-based); full-frame
    /// renders report 0.
    pub fn linear_index(&self, mode: RenderMode, frame: u32) -> u32 {
        if mode == RenderMode::Progressive || frame == 0 {
            0
        } else {
            (frame - 1) % self.tile_count()
        }
    }
}

fn sanitize_grid_size(grid_size: u32, soft_max: u32) -> u32 {
    if grid_size == 0 {
        warn!("Tile grid size 0 is invalid; clamping to 1");
        return 1;
    }
    if grid_size > soft_max {
        warn!(
            "Tile grid size {} exceeds {}; {} tiles per cycle",
            grid_size,
            soft_max,
            grid_size * grid_size
        );
    }
    grid_size
}

/// Pixel rectangle of one tile. Edge tiles are clipped to the image and may
/// be empty when `grid_size` does not divide the image evenly.
pub fn bounds_of(tile_index: u32, grid_size: u32, width: u32, height: u32) -> Rect {
    let grid_size = grid_size.max(1);
    let tile_w = (width + grid_size - 1) / grid_size;
    let tile_h = (height + grid_size - 1) / grid_size;
    let x = ((tile_index % grid_size) * tile_w).min(width);
    let y = ((tile_index / grid_size) * tile_h).min(height);
    Rect {
        x,
        y,
        width: tile_w.min(width - x),
        height: tile_h.min(height - y),
    }
}

struct SpiralKey {
    manhattan: f32,
    euclidean: f32,
    angle: f32,
    index: u32,
}

/// Center-out traversal order of a `grid_size × grid_size` grid, sorted by
/// Manhattan distance, Euclidean distance, angle, then index.
pub fn spiral_order(grid_size: u32) -> Vec<u32> {
    let grid_size = grid_size.max(1);
    let center = (grid_size as f32 - 1.0) * 0.5;
    let mut keys: Vec<SpiralKey> = (0..grid_size * grid_size)
        .map(|index| {
            let dx = (index % grid_size) as f32 - center;
            let dy = (index / grid_size) as f32 - center;
            let mut angle = dy.atan2(dx);
            if angle < 0.0 {
                angle += std::f32::consts::TAU;
            }
            SpiralKey {
                manhattan: dx.abs() + dy.abs(),
                euclidean: (dx * dx + dy * dy).sqrt(),
                angle,
                index,
            }
        })
        .collect();

    keys.sort_by(|a, b| {
        a.manhattan
            .total_cmp(&b.manhattan)
            .then_with(|| a.euclidean.total_cmp(&b.euclidean))
            .then_with(|| a.angle.total_cmp(&b.angle))
            .then_with(|| a.index.cmp(&b.index))
    });
    keys.into_iter().map(|k| k.index).collect()
}
