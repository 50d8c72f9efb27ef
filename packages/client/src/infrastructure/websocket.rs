//! WebSocket を使った Connector 実装
//!
//! ## 責務
//!
//! - tokio-tungstenite によるハンドシェイク
//! - テキストフレームの送受信（ping/pong は tungstenite が処理）
//!
//! UTF-8 として解釈できるバイナリフレームはテキストとして扱い、
//! それ以外のバイナリフレームはログに残して読み飛ばします。

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async, tungstenite::protocol::Message,
};

use crate::domain::{Connector, Socket, TransportError};

/// Opens realtime sockets with tokio-tungstenite
#[derive(Debug, Clone, Copy, Default)]
pub struct TungsteniteConnector;

impl TungsteniteConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for TungsteniteConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn Socket>, TransportError> {
        let (stream, response) = connect_async(url)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        tracing::debug!("Handshake completed with status {}", response.status());
        Ok(Box::new(TungsteniteSocket { stream }))
    }
}

/// Socket over a tungstenite WebSocket stream
pub struct TungsteniteSocket {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Socket for TungsteniteSocket {
    async fn send(&mut self, frame: String) -> Result<(), TransportError> {
        self.stream
            .send(Message::Text(frame.into()))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<String, TransportError>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text.to_string())),
                Ok(Message::Binary(data)) => match String::from_utf8(data.to_vec()) {
                    Ok(text) => return Some(Ok(text)),
                    Err(_) => {
                        tracing::warn!("Ignoring {} bytes of binary data", data.len());
                    }
                },
                Ok(Message::Close(frame)) => {
                    tracing::debug!("Received close frame: {:?}", frame);
                    return None;
                }
                // ping/pong and raw frames
                Ok(_) => {}
                Err(e) => return Some(Err(TransportError::Receive(e.to_string()))),
            }
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.stream
            .close(None)
            .await
            .map_err(|e| TransportError::Close(e.to_string()))
    }
}
