//! Error types for clientgate.

use thiserror::Error;

/// Main error type for clientgate operations.
#[derive(Error, Debug)]
pub enum GateError {
    /// Limiter parameters that can never produce a working limiter
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Configuration file or environment could not be loaded
    #[error("Configuration error: {0}")]
    Config(String),

    /// The limiter was built outside of a Tokio runtime
    #[error("No Tokio runtime available to drive window resets")]
    NoRuntime,

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for GateError {
    fn from(err: config::ConfigError) -> Self {
        GateError::Config(err.to_string())
    }
}

/// Result type alias for clientgate operations.
pub type Result<T> = std::result::Result<T, GateError>;
