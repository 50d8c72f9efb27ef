//! Error types for the terminal client.

use thiserror::Error;

use crate::{
    domain::ValueObjectError,
    error::{ApiError, ConfigError},
};

/// Client-specific errors
#[derive(Debug, Error)]
pub enum ClientError {
    /// Invalid endpoints or identity
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Chat HTTP API failure
    #[error(transparent)]
    Api(#[from] ApiError),

    /// Invalid room or user identifier
    #[error(transparent)]
    InvalidIdentifier(#[from] ValueObjectError),

    /// Local file error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Reconnection attempts exhausted
    #[error("Connection lost: failed to reconnect after {0} attempts")]
    ConnectionLost(u32),
}
