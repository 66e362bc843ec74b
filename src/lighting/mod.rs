// src/lighting/mod.rs
// Environment lighting: map ingestion, importance-sampling tables and the environment stage

pub mod env_cdf;
pub mod environment;

pub use env_cdf::{load_environment, EnvironmentCdf, MAX_CDF_SIZE};
pub use environment::EnvironmentStage;
