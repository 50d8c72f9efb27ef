//! Infrastructure implementations of the domain's outbound capabilities.
//!
//! - `websocket`: realtime transport over tokio-tungstenite
//! - `http`: chat HTTP API over reqwest

pub mod http;
pub mod websocket;

pub use http::{ChatApi, ChatRoom, UploadFile, UploadedFile};
pub use websocket::TungsteniteConnector;
