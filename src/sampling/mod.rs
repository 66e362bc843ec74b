//! Online per-pixel statistics and adaptive sample allocation

pub mod adaptive;
pub mod online_stats;

pub use adaptive::{AdaptiveSamplingParams, AdaptiveSamplingStage};
pub use online_stats::{spatial_variance, target_samples, update_moments, RunningMoments};
