//! Chat synchronization client library.
//!
//! Keeps a live, deduplicated and ordered view of every chat room the host
//! opens, over one WebSocket connection per room, and wraps the chat HTTP API
//! used around it (room lookup, attachments).
//!
//! [`ChatClient`] bundles the pieces for an embedding host; the terminal
//! front end in `ui` is built on top of it.

// layers
pub mod config;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod realtime;
pub mod ui;

use std::sync::Arc;

use chatlink_shared::time::{Clock, SystemClock};
use tokio::sync::broadcast;

use crate::{
    config::ChatConfig,
    domain::{ChatId, ChatMessage, Connector, OutgoingMessage, UserId},
    error::{ApiError, ConfigError},
    infrastructure::{ChatApi, ChatRoom, TungsteniteConnector, UploadFile, UploadedFile},
    realtime::{ConnectionEvent, ConnectionRegistry, ConnectionState, Subscription},
};

/// Entry point for embedding hosts
///
/// Cheap to clone; clones share configuration, connections and streams.
#[derive(Clone)]
pub struct ChatClient {
    config: ChatConfig,
    registry: ConnectionRegistry,
    api: ChatApi,
}

impl ChatClient {
    /// Client over WebSocket (tokio-tungstenite) with the system clock
    pub fn new() -> Self {
        Self::with_connector(Arc::new(TungsteniteConnector), Arc::new(SystemClock))
    }

    pub fn with_connector(connector: Arc<dyn Connector>, clock: Arc<dyn Clock>) -> Self {
        let config = ChatConfig::new();
        Self {
            registry: ConnectionRegistry::with_clock(connector, config.clone(), clock),
            api: ChatApi::new(config.clone()),
            config,
        }
    }

    pub fn config(&self) -> &ChatConfig {
        &self.config
    }

    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    pub fn api(&self) -> &ChatApi {
        &self.api
    }

    pub async fn configure_urls(&self, api_base: &str, realtime_base: &str) -> Result<(), ConfigError> {
        self.config.configure_urls(api_base, realtime_base).await
    }

    pub async fn configure_auth(&self, user_id: &str, token: &str) -> Result<(), ConfigError> {
        self.config.configure_auth(user_id, token).await
    }

    pub async fn open_chat(&self, target_user_id: &UserId) -> Result<ChatRoom, ApiError> {
        self.api.open_chat(target_user_id).await
    }

    pub async fn connect(&self, chat_id: &ChatId) {
        self.registry.connect(chat_id).await
    }

    pub async fn send(&self, chat_id: &ChatId, draft: OutgoingMessage) -> Option<ChatMessage> {
        self.registry.send(chat_id, draft).await
    }

    pub async fn listen(&self, chat_id: &ChatId) -> Subscription {
        self.registry.listen(chat_id).await
    }

    pub async fn disconnect_all(&self) {
        self.registry.disconnect_all().await
    }

    pub async fn connection_state(&self, chat_id: &ChatId) -> ConnectionState {
        self.registry.connection_state(chat_id).await
    }

    pub async fn upload_files(
        &self,
        chat_id: &ChatId,
        files: Vec<UploadFile>,
    ) -> Result<Vec<UploadedFile>, ApiError> {
        self.api.upload_files(chat_id, files).await
    }

    pub async fn get_file(&self, chat_id: &ChatId, file_url: &str) -> Result<Vec<u8>, ApiError> {
        self.api.get_file(chat_id, file_url).await
    }

    /// Connection lifecycle notifications
    pub fn events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.registry.subscribe_events()
    }
}

impl Default for ChatClient {
    fn default() -> Self {
        Self::new()
    }
}
