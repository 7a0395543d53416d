//! Error types shared across NeonCut crates.

use std::path::PathBuf;

/// Top-level error type for NeonCut operations.
#[derive(Debug, thiserror::Error)]
pub enum NeoncutError {
    #[error("Render error: {message}")]
    Render { message: String },

    #[error("Audio error: {message}")]
    Audio { message: String },

    #[error("Decode error: {message}")]
    Decode { message: String },

    #[error("Export error: {message}")]
    Export { message: String },

    #[error("Capture sink error: {message}")]
    Capture { message: String },

    #[error("Timeline error: {message}")]
    Timeline { message: String },

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Invalid session state: {message}")]
    InvalidState { message: String },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("File not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Image(#[from] image::ImageError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias using NeoncutError.
pub type NeoncutResult<T> = Result<T, NeoncutError>;

impl NeoncutError {
    pub fn render(msg: impl Into<String>) -> Self {
        Self::Render {
            message: msg.into(),
        }
    }

    pub fn audio(msg: impl Into<String>) -> Self {
        Self::Audio {
            message: msg.into(),
        }
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode {
            message: msg.into(),
        }
    }

    pub fn export(msg: impl Into<String>) -> Self {
        Self::Export {
            message: msg.into(),
        }
    }

    pub fn capture(msg: impl Into<String>) -> Self {
        Self::Capture {
            message: msg.into(),
        }
    }

    pub fn timeline(msg: impl Into<String>) -> Self {
        Self::Timeline {
            message: msg.into(),
        }
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState {
            message: msg.into(),
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Whether this error came from acquiring or driving a capture sink.
    pub fn is_capture(&self) -> bool {
        matches!(self, Self::Capture { .. })
    }
}
