//! Error types for Synheart Strain

use thiserror::Error;

/// Errors that can occur while running the engine
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Failed to parse input event: {0}")]
    ParseError(String),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Persistence sink unavailable: {0}")]
    SinkUnavailable(String),

    #[error("State consumer closed")]
    ConsumerClosed,

    #[error("State consumer is full; snapshot dropped")]
    ConsumerFull,

    #[error("Engine is no longer running")]
    EngineStopped,
}
