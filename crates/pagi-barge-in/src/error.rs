//! Error types for the PAGI barge-in arbiter

use thiserror::Error;

/// Result type alias for barge-in operations
pub type BargeInResult<T> = Result<T, BargeInError>;

/// Errors that can occur around the interruption arbiter.
///
/// The arbiter's own operations are total; these only surface from config
/// loading, trace replay and the session handle.
#[derive(Error, Debug)]
pub enum BargeInError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Config load error: {0}")]
    ConfigLoad(#[from] config::ConfigError),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Trace error on line {line}: {message}")]
    Trace { line: usize, message: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Channel send error: {0}")]
    ChannelSend(String),

    #[error("Session task failed: {0}")]
    Session(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl<T> From<tokio::sync::mpsc::error::SendError<T>> for BargeInError {
    fn from(err: tokio::sync::mpsc::error::SendError<T>) -> Self {
        BargeInError::ChannelSend(err.to_string())
    }
}
