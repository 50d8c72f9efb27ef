//! Error types surfaced to callers of the chat client.
//!
//! Realtime failures never show up here: they are logged and contained by
//! the connection registry. Only configuration and HTTP API failures are
//! returned.

use reqwest::StatusCode;
use thiserror::Error;

use crate::domain::ValueObjectError;

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid {kind} URL '{url}': {reason}")]
    InvalidUrl {
        kind: &'static str,
        url: String,
        reason: String,
    },

    #[error("unsupported scheme '{scheme}' for {kind} URL (expected one of {expected})")]
    UnsupportedScheme {
        kind: &'static str,
        scheme: String,
        expected: String,
    },

    #[error(transparent)]
    InvalidIdentity(#[from] ValueObjectError),

    #[error("endpoints are not configured")]
    EndpointsNotConfigured,

    #[error("credentials are not configured")]
    CredentialsNotConfigured,
}

/// HTTP API errors
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("server returned {status}: {body}")]
    Status { status: StatusCode, body: String },
}
