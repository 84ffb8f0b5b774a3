//! Error types for the Hugo voice assistant

use thiserror::Error;

/// Result type alias for Hugo operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the voice assistant
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// A model or backend could not be loaded; the pipeline cannot start
    #[error("model load error: {0}")]
    ModelLoad(String),

    /// A single transcription or synthesis call failed or timed out
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Audio device or stream error
    #[error("device error: {0}")]
    Device(String),

    /// Downstream responder error
    #[error("agent error: {0}")]
    Agent(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Whether this error leaves the pipeline able to continue
    ///
    /// Only model-load and configuration failures are fatal; everything else
    /// drops a single turn.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        !matches!(self, Self::ModelLoad(_) | Self::Config(_))
    }
}
