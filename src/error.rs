//! Central error handling for the pathforge pipeline
//!
//! Provides a unified RenderError enum with consistent categorization.
//! Nothing in the render loop is user-fatal: the orchestrator logs stage
//! errors and keeps ticking, so these values mostly travel as far as
//! `Pipeline::render_frame`.

/// Centralized error type for all pipeline operations
#[derive(thiserror::Error, Debug)]
pub enum RenderError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Resource error: {0}")]
    Resource(String),

    #[error("Missing input: {0}")]
    MissingInput(String),

    #[error("Device error: {0}")]
    Device(String),

    #[error("Readback error: {0}")]
    Readback(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RenderError {
    /// Short category tag, used as a log prefix
    pub fn category(&self) -> &'static str {
        match self {
            RenderError::Config(_) => "Config",
            RenderError::Resource(_) => "Resource",
            RenderError::MissingInput(_) => "MissingInput",
            RenderError::Device(_) => "Device",
            RenderError::Readback(_) => "Readback",
            RenderError::Io(_) => "IO",
            RenderError::Image(_) => "Image",
            RenderError::Json(_) => "JSON",
        }
    }

    /// Convenience constructors for common error types
    pub fn config<T: ToString>(msg: T) -> Self {
        RenderError::Config(msg.to_string())
    }

    pub fn resource<T: ToString>(msg: T) -> Self {
        RenderError::Resource(msg.to_string())
    }

    pub fn missing<T: ToString>(msg: T) -> Self {
        RenderError::MissingInput(msg.to_string())
    }

    pub fn device<T: ToString>(msg: T) -> Self {
        RenderError::Device(msg.to_string())
    }

    pub fn readback<T: ToString>(msg: T) -> Self {
        RenderError::Readback(msg.to_string())
    }
}

/// Result type alias for pipeline operations
pub type RenderResult<T> = Result<T, RenderError>;
