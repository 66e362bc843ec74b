//! Post-processing of the denoised image

pub mod exposure;

pub use exposure::{log_average_luminance, ExposureParams, ExposureStage};
