//! Transport trait definitions.
//!
//! The realtime layer needs a way to open a socket and exchange text frames.
//! It depends only on these traits; `infrastructure::websocket` provides the
//! tokio-tungstenite implementation and tests provide in-memory doubles.

use async_trait::async_trait;

use super::error::TransportError;

/// Opens realtime sockets
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a socket to `url`. Resolves once the handshake completed.
    async fn connect(&self, url: &str) -> Result<Box<dyn Socket>, TransportError>;
}

/// An open realtime socket exchanging text frames
#[async_trait]
pub trait Socket: Send {
    /// Send one text frame
    async fn send(&mut self, frame: String) -> Result<(), TransportError>;

    /// Receive the next text frame.
    ///
    /// `None` means the peer closed the connection. Must be cancel safe: the
    /// connection task polls it inside `tokio::select!`.
    async fn recv(&mut self) -> Option<Result<String, TransportError>>;

    /// Close the socket
    async fn close(&mut self) -> Result<(), TransportError>;
}
