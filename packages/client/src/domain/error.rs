//! Domain errors.

use thiserror::Error;

/// Value object validation errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValueObjectError {
    #[error("chat id must not be empty")]
    ChatIdEmpty,

    #[error("user id must not be empty")]
    UserIdEmpty,
}

/// Inbound frame decoding errors
#[derive(Debug, Error)]
pub enum MessageError {
    #[error("frame is not valid JSON: {0}")]
    InvalidJson(#[source] serde_json::Error),

    #[error("frame is not a chat message: {0}")]
    InvalidMessage(#[source] serde_json::Error),

    #[error("message has no messageId")]
    MissingMessageId,
}

/// Realtime transport errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    #[error("failed to connect: {0}")]
    Connect(String),

    #[error("failed to send frame: {0}")]
    Send(String),

    #[error("failed to receive frame: {0}")]
    Receive(String),

    #[error("failed to close connection: {0}")]
    Close(String),
}
