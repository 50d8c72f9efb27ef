//! Connection registry.
//!
//! Owns at most one realtime connection per chat room and the message stream
//! of every room touched in this session. Consumers never see sockets: they
//! read streams through [`ConnectionRegistry::listen`] and queue outbound
//! messages through [`ConnectionRegistry::send`].
//!
//! ## Connection task
//!
//! `connect` stores a `Connecting` entry and spawns one task per connection.
//! The task performs the handshake, marks the entry `Open`, then multiplexes
//! outbound commands and inbound frames until either side closes. On exit it
//! removes the entry, unless the entry has been replaced in the meantime
//! (each connection carries a generation id).

use std::{collections::HashMap, fmt, sync::Arc};

use chatlink_shared::time::{Clock, SystemClock};
use tokio::sync::{Mutex, broadcast, mpsc};

use crate::{
    config::ChatConfig,
    domain::{ChatId, ChatMessage, Connector, InboundFrame, OutgoingMessage, Socket},
};

use super::stream::{MessageStream, Subscription};

const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Lifecycle of a realtime connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Connecting,
    Open,
    /// Terminal; the registry holds no entry for the room
    Closed,
}

impl ConnectionState {
    /// Whether a new connection for the room must not be opened
    pub fn is_live(self) -> bool {
        matches!(self, Self::Connecting | Self::Open)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Connecting => "connecting",
            Self::Open => "open",
            Self::Closed => "closed",
        };
        f.write_str(label)
    }
}

/// Lifecycle notification for one room
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionEvent {
    pub chat_id: ChatId,
    pub state: ConnectionState,
}

/// Commands from the registry to a connection task
#[derive(Debug)]
enum Command {
    Send(String),
    Close,
}

struct ConnectionEntry {
    /// Generation id, unique within the registry
    id: u64,
    state: ConnectionState,
    commands: mpsc::UnboundedSender<Command>,
}

#[derive(Default)]
struct RegistryState {
    connections: HashMap<ChatId, ConnectionEntry>,
    streams: HashMap<ChatId, MessageStream>,
    next_connection_id: u64,
}

impl RegistryState {
    fn stream_mut(&mut self, chat_id: &ChatId) -> &mut MessageStream {
        self.streams.entry(chat_id.clone()).or_default()
    }

    fn is_current(&self, chat_id: &ChatId, connection_id: u64) -> bool {
        self.connections
            .get(chat_id)
            .is_some_and(|entry| entry.id == connection_id)
    }

    fn allocate_connection_id(&mut self) -> u64 {
        self.next_connection_id += 1;
        self.next_connection_id
    }
}

/// Shared pieces handed to every connection task
struct Shared {
    state: Mutex<RegistryState>,
    events: broadcast::Sender<ConnectionEvent>,
}

impl Shared {
    fn notify(&self, chat_id: &ChatId, state: ConnectionState) {
        // no subscribers is fine
        let _ = self.events.send(ConnectionEvent {
            chat_id: chat_id.clone(),
            state,
        });
    }
}

/// Registry of per-room realtime connections and message streams
///
/// Cheap to clone; clones share the same connections and streams.
#[derive(Clone)]
pub struct ConnectionRegistry {
    connector: Arc<dyn Connector>,
    config: ChatConfig,
    clock: Arc<dyn Clock>,
    shared: Arc<Shared>,
}

impl ConnectionRegistry {
    pub fn new(connector: Arc<dyn Connector>, config: ChatConfig) -> Self {
        Self::with_clock(connector, config, Arc::new(SystemClock))
    }

    pub fn with_clock(
        connector: Arc<dyn Connector>,
        config: ChatConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            connector,
            config,
            clock,
            shared: Arc::new(Shared {
                state: Mutex::new(RegistryState::default()),
                events,
            }),
        }
    }

    /// Open the realtime connection for a room.
    ///
    /// No-op while a connection for the room is connecting or open. The
    /// outcome is reported through [`subscribe_events`](Self::subscribe_events).
    pub async fn connect(&self, chat_id: &ChatId) {
        let url = match self.config.snapshot().await.realtime_url(chat_id) {
            Ok(url) => url,
            Err(e) => {
                tracing::error!("Cannot connect to chat '{}': {}", chat_id, e);
                return;
            }
        };

        let (connection_id, commands) = {
            let mut state = self.shared.state.lock().await;

            if let Some(entry) = state.connections.get(chat_id)
                && entry.state.is_live()
            {
                tracing::debug!(
                    "Connection for chat '{}' is already {}, skipping connect",
                    chat_id,
                    entry.state
                );
                return;
            }

            state.stream_mut(chat_id);
            let connection_id = state.allocate_connection_id();
            let (sender, commands) = mpsc::unbounded_channel();
            state.connections.insert(
                chat_id.clone(),
                ConnectionEntry {
                    id: connection_id,
                    state: ConnectionState::Connecting,
                    commands: sender,
                },
            );
            (connection_id, commands)
        };

        tracing::info!("Connecting to chat '{}'", chat_id);
        self.shared.notify(chat_id, ConnectionState::Connecting);

        tokio::spawn(run_connection(
            self.shared.clone(),
            self.connector.clone(),
            chat_id.clone(),
            connection_id,
            url.to_string(),
            commands,
        ));
    }

    /// Queue a message on the room's open connection.
    ///
    /// The message is completed with the room, the configured user, the
    /// current time and, if missing, a generated message id. Returns the
    /// completed message, or `None` when it was dropped because the room has
    /// no open connection. Delivery is not awaited.
    pub async fn send(&self, chat_id: &ChatId, draft: OutgoingMessage) -> Option<ChatMessage> {
        let settings = self.config.snapshot().await;
        let sender_id = match settings.credentials() {
            Ok(credentials) => credentials.user_id.clone(),
            Err(e) => {
                tracing::warn!("Dropping message for chat '{}': {}", chat_id, e);
                return None;
            }
        };

        let mut state = self.shared.state.lock().await;
        state.stream_mut(chat_id);

        let Some(entry) = state
            .connections
            .get(chat_id)
            .filter(|entry| entry.state == ConnectionState::Open)
        else {
            tracing::warn!(
                "Connection for chat '{}' is not open, dropping message",
                chat_id
            );
            return None;
        };

        let message = draft.into_message(chat_id, &sender_id, self.clock.now());
        let frame = match serde_json::to_string(&message) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::error!("Failed to serialize message: {}", e);
                return None;
            }
        };

        if entry.commands.send(Command::Send(frame)).is_err() {
            tracing::warn!(
                "Connection for chat '{}' is shutting down, dropping message",
                chat_id
            );
            return None;
        }

        tracing::debug!(
            "Queued message '{}' for chat '{}'",
            message.message_id,
            chat_id
        );
        Some(message)
    }

    /// Live view of a room's messages, starting with the current snapshot.
    pub async fn listen(&self, chat_id: &ChatId) -> Subscription {
        let mut state = self.shared.state.lock().await;
        state.stream_mut(chat_id).subscribe()
    }

    /// Close every connection and drop every stream.
    ///
    /// Entries are gone as soon as this returns; sockets finish closing in
    /// their tasks. Existing subscriptions end.
    pub async fn disconnect_all(&self) {
        tracing::info!("Disconnecting all chats");

        let closed = {
            let mut state = self.shared.state.lock().await;
            let connections = std::mem::take(&mut state.connections);
            state.streams.clear();
            connections
        };

        for (chat_id, entry) in closed {
            if !entry.state.is_live() {
                continue;
            }
            match entry.commands.send(Command::Close) {
                Ok(()) => tracing::info!("Requested close for chat '{}'", chat_id),
                Err(_) => tracing::warn!(
                    "Connection task for chat '{}' already stopped",
                    chat_id
                ),
            }
            self.shared.notify(&chat_id, ConnectionState::Closed);
        }
    }

    /// Current lifecycle state of a room's connection
    pub async fn connection_state(&self, chat_id: &ChatId) -> ConnectionState {
        let state = self.shared.state.lock().await;
        state
            .connections
            .get(chat_id)
            .map_or(ConnectionState::Closed, |entry| entry.state)
    }

    /// Rooms with a connecting or open connection
    pub async fn active_chats(&self) -> Vec<ChatId> {
        let state = self.shared.state.lock().await;
        let mut chats: Vec<ChatId> = state.connections.keys().cloned().collect();
        chats.sort();
        chats
    }

    /// Lifecycle notifications for all rooms
    pub fn subscribe_events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.shared.events.subscribe()
    }
}

async fn run_connection(
    shared: Arc<Shared>,
    connector: Arc<dyn Connector>,
    chat_id: ChatId,
    connection_id: u64,
    url: String,
    mut commands: mpsc::UnboundedReceiver<Command>,
) {
    let connected = tokio::select! {
        result = connector.connect(&url) => Some(result),
        _ = wait_for_close(&mut commands) => None,
    };

    let mut socket = match connected {
        Some(Ok(socket)) => socket,
        Some(Err(e)) => {
            tracing::warn!("Connection to chat '{}' failed: {}", chat_id, e);
            remove_entry(&shared, &chat_id, connection_id).await;
            return;
        }
        None => {
            tracing::info!("Connection to chat '{}' cancelled during handshake", chat_id);
            remove_entry(&shared, &chat_id, connection_id).await;
            return;
        }
    };

    if !mark_open(&shared, &chat_id, connection_id).await {
        tracing::info!(
            "Connection to chat '{}' was released during handshake, closing",
            chat_id
        );
        close_socket(socket.as_mut(), &chat_id).await;
        return;
    }
    tracing::info!("Connected to chat '{}'", chat_id);
    shared.notify(&chat_id, ConnectionState::Open);

    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Send(frame)) => {
                    if let Err(e) = socket.send(frame).await {
                        tracing::warn!("Connection to chat '{}' lost: {}", chat_id, e);
                        break;
                    }
                }
                Some(Command::Close) | None => {
                    close_socket(socket.as_mut(), &chat_id).await;
                    break;
                }
            },
            frame = socket.recv() => match frame {
                Some(Ok(text)) => handle_frame(&shared, &chat_id, connection_id, &text).await,
                Some(Err(e)) => {
                    tracing::warn!("Connection to chat '{}' lost: {}", chat_id, e);
                    break;
                }
                None => {
                    tracing::warn!("Connection to chat '{}' closed by server", chat_id);
                    break;
                }
            },
        }
    }

    remove_entry(&shared, &chat_id, connection_id).await;
}

/// Resolves once a close is requested or the registry dropped the entry.
async fn wait_for_close(commands: &mut mpsc::UnboundedReceiver<Command>) {
    while let Some(command) = commands.recv().await {
        match command {
            Command::Close => return,
            // sends are only queued on open connections
            Command::Send(_) => continue,
        }
    }
}

async fn close_socket(socket: &mut dyn Socket, chat_id: &ChatId) {
    if let Err(e) = socket.close().await {
        tracing::warn!("Failed to close connection to chat '{}': {}", chat_id, e);
    } else {
        tracing::info!("Closed connection to chat '{}'", chat_id);
    }
}

async fn mark_open(shared: &Shared, chat_id: &ChatId, connection_id: u64) -> bool {
    let mut state = shared.state.lock().await;
    match state.connections.get_mut(chat_id) {
        Some(entry) if entry.id == connection_id => {
            entry.state = ConnectionState::Open;
            true
        }
        _ => false,
    }
}

async fn remove_entry(shared: &Shared, chat_id: &ChatId, connection_id: u64) {
    let removed = {
        let mut state = shared.state.lock().await;
        if state.is_current(chat_id, connection_id) {
            state.connections.remove(chat_id);
            true
        } else {
            false
        }
    };

    if removed {
        tracing::info!("Connection for chat '{}' removed", chat_id);
        shared.notify(chat_id, ConnectionState::Closed);
    }
}

async fn handle_frame(shared: &Shared, chat_id: &ChatId, connection_id: u64, text: &str) {
    let mut message = match ChatMessage::decode(text) {
        Ok(InboundFrame::Message(message)) => message,
        Ok(InboundFrame::Heartbeat) => {
            tracing::trace!("Heartbeat from chat '{}'", chat_id);
            return;
        }
        Err(e) => {
            tracing::error!("Discarding malformed frame from chat '{}': {}", chat_id, e);
            return;
        }
    };

    if message.chat_id.is_empty() {
        message.chat_id = chat_id.as_str().to_string();
    } else if message.chat_id != chat_id.as_str() {
        tracing::warn!(
            "Message '{}' names chat '{}' but arrived on chat '{}'",
            message.message_id,
            message.chat_id,
            chat_id
        );
    }

    let mut state = shared.state.lock().await;
    if !state.is_current(chat_id, connection_id) {
        tracing::debug!(
            "Dropping frame from released connection to chat '{}'",
            chat_id
        );
        return;
    }

    let message_id = message.message_id.clone();
    if state.stream_mut(chat_id).accept(message) {
        tracing::debug!("Accepted message '{}' in chat '{}'", message_id, chat_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::{Credentials, Endpoints, Settings},
        domain::{TransportError, transport::MockConnector},
    };
    use async_trait::async_trait;
    use chatlink_shared::time::FixedClock;
    use std::{
        sync::atomic::{AtomicBool, AtomicUsize, Ordering},
        time::Duration,
    };

    // ========================================
    // テスト作業記録
    // ========================================
    // 【何をテストするか】
    // - ConnectionRegistry の接続管理（冪等な connect、close 時の削除）
    // - 受信フレームの振り分け（不正フレーム・heartbeat・重複の除外）
    // - send のメッセージ補完と、未接続時の破棄
    // - disconnect_all による全接続・全ストリームの破棄
    //
    // 【どのようなシナリオをテストするか】
    // - チャネルで実装したテスト用ソケットで、サーバー側の送受信を再現する
    // - MockConnector でハンドシェイク回数を検証する
    // ========================================

    const WAIT: Duration = Duration::from_secs(2);

    /// Server side of a [`ChannelSocket`]
    struct Remote {
        inbound: Option<mpsc::UnboundedSender<String>>,
        outbound: mpsc::UnboundedReceiver<String>,
        closed: Arc<AtomicBool>,
    }

    impl Remote {
        fn push(&self, frame: &str) {
            self.inbound
                .as_ref()
                .expect("remote already hung up")
                .send(frame.to_string())
                .unwrap();
        }

        fn hang_up(&mut self) {
            self.inbound = None;
        }

        async fn next_sent(&mut self) -> serde_json::Value {
            let frame = tokio::time::timeout(WAIT, self.outbound.recv())
                .await
                .expect("timed out waiting for a sent frame")
                .expect("socket dropped");
            serde_json::from_str(&frame).unwrap()
        }
    }

    /// In-memory socket driven by a [`Remote`]
    struct ChannelSocket {
        inbound: mpsc::UnboundedReceiver<String>,
        outbound: mpsc::UnboundedSender<String>,
        closed: Arc<AtomicBool>,
    }

    fn socket_pair() -> (ChannelSocket, Remote) {
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));
        (
            ChannelSocket {
                inbound: inbound_rx,
                outbound: outbound_tx,
                closed: closed.clone(),
            },
            Remote {
                inbound: Some(inbound_tx),
                outbound: outbound_rx,
                closed,
            },
        )
    }

    #[async_trait]
    impl Socket for ChannelSocket {
        async fn send(&mut self, frame: String) -> Result<(), TransportError> {
            self.outbound
                .send(frame)
                .map_err(|e| TransportError::Send(e.to_string()))
        }

        async fn recv(&mut self) -> Option<Result<String, TransportError>> {
            self.inbound.recv().await.map(Ok)
        }

        async fn close(&mut self) -> Result<(), TransportError> {
            self.closed.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Connector handing out prepared sockets in order
    struct QueueConnector {
        sockets: std::sync::Mutex<Vec<ChannelSocket>>,
        urls: std::sync::Mutex<Vec<String>>,
    }

    impl QueueConnector {
        fn new(sockets: Vec<ChannelSocket>) -> Self {
            Self {
                sockets: std::sync::Mutex::new(sockets),
                urls: std::sync::Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Connector for QueueConnector {
        async fn connect(&self, url: &str) -> Result<Box<dyn Socket>, TransportError> {
            self.urls.lock().unwrap().push(url.to_string());
            let mut sockets = self.sockets.lock().unwrap();
            if sockets.is_empty() {
                return Err(TransportError::Connect("connection refused".to_string()));
            }
            Ok(Box::new(sockets.remove(0)))
        }
    }

    fn configured() -> ChatConfig {
        ChatConfig::with_settings(Settings {
            endpoints: Some(Endpoints::new("http://localhost:8080", "ws://localhost:8080").unwrap()),
            credentials: Some(Credentials::new("alice", "secret").unwrap()),
        })
    }

    fn registry_with(connector: Arc<dyn Connector>) -> ConnectionRegistry {
        ConnectionRegistry::with_clock(
            connector,
            configured(),
            Arc::new(FixedClock::from_millis(1_704_067_200_000)),
        )
    }

    fn room(id: &str) -> ChatId {
        ChatId::new(id).unwrap()
    }

    fn frame(id: &str, created_at: &str, sequence: Option<i64>) -> String {
        let mut value = serde_json::json!({
            "messageId": id,
            "chatId": "room-1",
            "senderId": "bob",
            "type": "text",
            "content": format!("body of {id}"),
            "createdAt": created_at,
        });
        if let Some(sequence) = sequence {
            value["sequence"] = sequence.into();
        }
        value.to_string()
    }

    async fn wait_for_state(
        events: &mut broadcast::Receiver<ConnectionEvent>,
        chat_id: &ChatId,
        expected: ConnectionState,
    ) {
        tokio::time::timeout(WAIT, async {
            loop {
                let event = events.recv().await.expect("event channel closed");
                if &event.chat_id == chat_id && event.state == expected {
                    return;
                }
            }
        })
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {expected} on {chat_id}"));
    }

    async fn wait_for_len(subscription: &mut Subscription, len: usize) -> Vec<ChatMessage> {
        tokio::time::timeout(WAIT, async {
            loop {
                let snapshot = subscription.next().await.expect("stream dropped");
                if snapshot.len() >= len {
                    return snapshot;
                }
            }
        })
        .await
        .expect("timed out waiting for messages")
    }

    async fn open_room(registry: &ConnectionRegistry, chat_id: &ChatId) {
        let mut events = registry.subscribe_events();
        registry.connect(chat_id).await;
        wait_for_state(&mut events, chat_id, ConnectionState::Open).await;
    }

    #[tokio::test]
    async fn test_connect_twice_while_connecting_opens_one_socket() {
        // テスト項目: CONNECTING 中に 2 回 connect しても接続は 1 本だけ
        // given (前提条件):
        let calls = Arc::new(AtomicUsize::new(0));
        let mut connector = MockConnector::new();
        let counter = calls.clone();
        let mut remotes = Vec::new();
        let mut sockets = Vec::new();
        for _ in 0..2 {
            let (socket, remote) = socket_pair();
            sockets.push(socket);
            remotes.push(remote);
        }
        let sockets = std::sync::Mutex::new(sockets);
        connector
            .expect_connect()
            .withf(|url| url.contains("chatId=room-1"))
            .returning(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
                let socket = sockets.lock().unwrap().remove(0);
                Ok(Box::new(socket) as Box<dyn Socket>)
            });
        let registry = registry_with(Arc::new(connector));
        let chat_id = room("room-1");
        let mut events = registry.subscribe_events();

        // when (操作):
        registry.connect(&chat_id).await;
        registry.connect(&chat_id).await;
        wait_for_state(&mut events, &chat_id, ConnectionState::Open).await;
        registry.connect(&chat_id).await;
        tokio::task::yield_now().await;

        // then (期待する結果):
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(
            registry.connection_state(&chat_id).await,
            ConnectionState::Open
        );
        assert_eq!(registry.active_chats().await, vec![chat_id]);
    }

    #[tokio::test]
    async fn test_connect_uses_latest_configuration() {
        // テスト項目: 設定変更後の接続には最新の URL と認証情報が使われる
        // given (前提条件):
        let (socket, _remote) = socket_pair();
        let connector = Arc::new(QueueConnector::new(vec![socket]));
        let config = configured();
        let registry =
            ConnectionRegistry::new(connector.clone(), config.clone());
        config
            .configure_urls("https://api.example.com", "wss://rt.example.com/")
            .await
            .unwrap();
        config.configure_auth("carol", "fresh").await.unwrap();
        let chat_id = room("room-9");

        // when (操作):
        open_room(&registry, &chat_id).await;

        // then (期待する結果):
        let urls = connector.urls.lock().unwrap().clone();
        assert_eq!(
            urls,
            vec!["wss://rt.example.com/chat?chatId=room-9&userId=carol&token=fresh".to_string()]
        );
    }

    #[tokio::test]
    async fn test_connect_without_configuration_is_noop() {
        // テスト項目: 未設定のまま connect しても接続は試行されない
        // given (前提条件):
        let connector = Arc::new(QueueConnector::new(vec![]));
        let registry = ConnectionRegistry::new(connector.clone(), ChatConfig::new());
        let chat_id = room("room-1");

        // when (操作):
        registry.connect(&chat_id).await;

        // then (期待する結果):
        assert!(connector.urls.lock().unwrap().is_empty());
        assert_eq!(
            registry.connection_state(&chat_id).await,
            ConnectionState::Closed
        );
    }

    #[tokio::test]
    async fn test_failed_handshake_removes_entry() {
        // テスト項目: ハンドシェイク失敗時はエントリが削除され、再接続できる
        // given (前提条件):
        let (socket, _remote) = socket_pair();
        let connector = Arc::new(QueueConnector::new(vec![]));
        let registry = registry_with(connector.clone());
        let chat_id = room("room-1");
        let mut events = registry.subscribe_events();

        // when (操作):
        registry.connect(&chat_id).await;
        wait_for_state(&mut events, &chat_id, ConnectionState::Closed).await;
        connector.sockets.lock().unwrap().push(socket);
        registry.connect(&chat_id).await;
        wait_for_state(&mut events, &chat_id, ConnectionState::Open).await;

        // then (期待する結果):
        assert_eq!(connector.urls.lock().unwrap().len(), 2);
        assert_eq!(
            registry.connection_state(&chat_id).await,
            ConnectionState::Open
        );
    }

    #[tokio::test]
    async fn test_lifecycle_events_in_order() {
        // テスト項目: Connecting → Open → Closed の順にイベントが通知される
        // given (前提条件):
        let (socket, mut remote) = socket_pair();
        let registry = registry_with(Arc::new(QueueConnector::new(vec![socket])));
        let chat_id = room("room-1");
        let mut events = registry.subscribe_events();

        // when (操作):
        registry.connect(&chat_id).await;
        let connecting = events.recv().await.unwrap();
        let open = events.recv().await.unwrap();
        remote.hang_up();
        let closed = tokio::time::timeout(WAIT, events.recv()).await.unwrap().unwrap();

        // then (期待する結果):
        assert_eq!(connecting.state, ConnectionState::Connecting);
        assert_eq!(open.state, ConnectionState::Open);
        assert_eq!(closed.state, ConnectionState::Closed);
        assert_eq!(
            registry.connection_state(&chat_id).await,
            ConnectionState::Closed
        );
    }

    #[tokio::test]
    async fn test_inbound_frames_are_ordered_and_deduplicated() {
        // テスト項目: 順不同・重複して届いたフレームが整列・重複排除される
        // given (前提条件):
        let (socket, remote) = socket_pair();
        let registry = registry_with(Arc::new(QueueConnector::new(vec![socket])));
        let chat_id = room("room-1");
        open_room(&registry, &chat_id).await;
        let mut subscription = registry.listen(&chat_id).await;

        // when (操作):
        remote.push(&frame("1", "2024-01-01T00:00:10Z", Some(1)));
        remote.push(&frame("1", "2024-01-01T00:00:10Z", Some(1)));
        remote.push(&frame("2", "2024-01-01T00:00:09Z", None));
        let snapshot = wait_for_len(&mut subscription, 2).await;

        // then (期待する結果):
        let ids: Vec<&str> = snapshot.iter().map(|m| m.message_id.as_str()).collect();
        assert_eq!(ids, vec!["2", "1"]);
    }

    #[tokio::test]
    async fn test_heartbeat_and_malformed_frames_are_discarded() {
        // テスト項目: heartbeat・不正フレームは破棄され、接続は維持される
        // given (前提条件):
        let (socket, remote) = socket_pair();
        let registry = registry_with(Arc::new(QueueConnector::new(vec![socket])));
        let chat_id = room("room-1");
        open_room(&registry, &chat_id).await;
        let mut subscription = registry.listen(&chat_id).await;

        // when (操作):
        remote.push(r#"{"type":"heartbeat"}"#);
        remote.push(r#"{"messageId":"hb","type":"heartbeat","createdAt":"2024-01-01T00:00:00Z"}"#);
        remote.push("{not json");
        remote.push(r#"{"messageId":"x","type":"text"}"#);
        remote.push(&frame("1", "2024-01-01T00:00:00Z", None));
        let snapshot = wait_for_len(&mut subscription, 1).await;

        // then (期待する結果):
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].message_id, "1");
        assert_eq!(
            registry.connection_state(&chat_id).await,
            ConnectionState::Open
        );
    }

    #[tokio::test]
    async fn test_missing_chat_id_is_filled_from_connection() {
        // テスト項目: chatId のないメッセージには接続先のチャット ID が補われる
        // given (前提条件):
        let (socket, remote) = socket_pair();
        let registry = registry_with(Arc::new(QueueConnector::new(vec![socket])));
        let chat_id = room("room-1");
        open_room(&registry, &chat_id).await;
        let mut subscription = registry.listen(&chat_id).await;

        // when (操作):
        remote.push(r#"{"messageId":"1","type":"text","content":"hi","createdAt":"2024-01-01T00:00:00Z"}"#);
        let snapshot = wait_for_len(&mut subscription, 1).await;

        // then (期待する結果):
        assert_eq!(snapshot[0].chat_id, "room-1");
    }

    #[tokio::test]
    async fn test_send_stamps_and_transmits_message() {
        // テスト項目: send は chatId・senderId・createdAt・messageId を補って送信する
        // given (前提条件):
        let (socket, mut remote) = socket_pair();
        let registry = registry_with(Arc::new(QueueConnector::new(vec![socket])));
        let chat_id = room("room-1");
        open_room(&registry, &chat_id).await;

        // when (操作):
        let generated = registry.send(&chat_id, OutgoingMessage::text("hello")).await;
        let supplied = registry
            .send(
                &chat_id,
                OutgoingMessage::file("uploads/a.png", "a.png").with_message_id("client-1"),
            )
            .await;
        let first = remote.next_sent().await;
        let second = remote.next_sent().await;

        // then (期待する結果):
        let generated = generated.expect("message should be queued");
        assert_eq!(first["messageId"], generated.message_id.as_str());
        assert!(uuid::Uuid::parse_str(&generated.message_id).is_ok());
        assert_eq!(first["chatId"], "room-1");
        assert_eq!(first["senderId"], "alice");
        assert_eq!(first["type"], "text");
        assert_eq!(first["content"], "hello");
        assert_eq!(first["createdAt"], "2024-01-01T00:00:00.000Z");

        assert_eq!(supplied.unwrap().message_id, "client-1");
        assert_eq!(second["messageId"], "client-1");
        assert_eq!(second["type"], "file");
        assert_eq!(second["fileUrl"], "uploads/a.png");
    }

    #[tokio::test]
    async fn test_send_without_connection_is_dropped() {
        // テスト項目: 接続がない状態の send は破棄され、ストリームも変化しない
        // given (前提条件):
        let registry = registry_with(Arc::new(QueueConnector::new(vec![])));
        let chat_id = room("room-1");

        // when (操作):
        let result = registry.send(&chat_id, OutgoingMessage::text("hello")).await;

        // then (期待する結果):
        assert!(result.is_none());
        let subscription = registry.listen(&chat_id).await;
        assert!(subscription.snapshot().is_empty());
    }

    #[tokio::test]
    async fn test_send_while_connecting_is_dropped() {
        // テスト項目: CONNECTING 中の send は破棄される
        // given (前提条件):
        let (_gate_tx, gate_rx) = tokio::sync::oneshot::channel::<()>();
        let registry = registry_with(Arc::new(GatedConnector {
            gate: tokio::sync::Mutex::new(Some(gate_rx)),
            socket: std::sync::Mutex::new(None),
        }));
        let chat_id = room("room-1");

        // when (操作):
        registry.connect(&chat_id).await;
        let result = registry.send(&chat_id, OutgoingMessage::text("early")).await;

        // then (期待する結果):
        assert!(result.is_none());
        assert_eq!(
            registry.connection_state(&chat_id).await,
            ConnectionState::Connecting
        );
    }

    #[tokio::test]
    async fn test_disconnect_all_clears_connections_and_streams() {
        // テスト項目: disconnect_all で全接続・全ストリームが破棄され、購読は終了する
        // given (前提条件):
        let (socket_1, remote_1) = socket_pair();
        let (socket_2, remote_2) = socket_pair();
        let registry = registry_with(Arc::new(QueueConnector::new(vec![socket_1, socket_2])));
        let room_1 = room("room-1");
        let room_2 = room("room-2");
        open_room(&registry, &room_1).await;
        open_room(&registry, &room_2).await;
        let mut subscription = registry.listen(&room_1).await;
        remote_1.push(&frame("1", "2024-01-01T00:00:00Z", None));
        wait_for_len(&mut subscription, 1).await;

        // when (操作):
        registry.disconnect_all().await;

        // then (期待する結果):
        assert_eq!(subscription.next().await, None);
        assert!(registry.active_chats().await.is_empty());
        assert_eq!(
            registry.connection_state(&room_1).await,
            ConnectionState::Closed
        );
        tokio::time::timeout(WAIT, async {
            while !(remote_1.closed.load(Ordering::SeqCst) && remote_2.closed.load(Ordering::SeqCst)) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("sockets should be closed");
        let fresh = registry.listen(&room_1).await;
        assert!(fresh.snapshot().is_empty());
        assert!(registry.send(&room_1, OutgoingMessage::text("late")).await.is_none());
    }

    #[tokio::test]
    async fn test_disconnect_during_handshake_never_opens() {
        // テスト項目: ハンドシェイク中に disconnect_all すると接続は開かれない
        // given (前提条件):
        let (gate_tx, gate_rx) = tokio::sync::oneshot::channel::<()>();
        let (socket, remote) = socket_pair();
        let registry = registry_with(Arc::new(GatedConnector {
            gate: tokio::sync::Mutex::new(Some(gate_rx)),
            socket: std::sync::Mutex::new(Some(socket)),
        }));
        let chat_id = room("room-1");
        let mut events = registry.subscribe_events();

        // when (操作):
        registry.connect(&chat_id).await;
        wait_for_state(&mut events, &chat_id, ConnectionState::Connecting).await;
        registry.disconnect_all().await;
        let _ = gate_tx.send(());
        tokio::time::sleep(Duration::from_millis(20)).await;

        // then (期待する結果):
        assert_eq!(
            registry.connection_state(&chat_id).await,
            ConnectionState::Closed
        );
        assert!(!remote.closed.load(Ordering::SeqCst));
        while let Ok(event) = events.try_recv() {
            assert_ne!(event.state, ConnectionState::Open);
        }
    }

    /// Connector whose handshake completes only once the gate opens
    struct GatedConnector {
        gate: tokio::sync::Mutex<Option<tokio::sync::oneshot::Receiver<()>>>,
        socket: std::sync::Mutex<Option<ChannelSocket>>,
    }

    #[async_trait]
    impl Connector for GatedConnector {
        async fn connect(&self, _url: &str) -> Result<Box<dyn Socket>, TransportError> {
            if let Some(gate) = self.gate.lock().await.take() {
                let _ = gate.await;
            }
            let socket = self.socket.lock().unwrap().take();
            socket
                .map(|socket| Box::new(socket) as Box<dyn Socket>)
                .ok_or_else(|| TransportError::Connect("no socket".to_string()))
        }
    }

    #[tokio::test]
    async fn test_stale_connection_frames_do_not_reach_new_stream() {
        // テスト項目: 置き換え前の接続から届いたフレームは新しいストリームに入らない
        // given (前提条件):
        let (old_socket, old_remote) = socket_pair();
        let (new_socket, new_remote) = socket_pair();
        let registry = registry_with(Arc::new(QueueConnector::new(vec![old_socket, new_socket])));
        let chat_id = room("room-1");
        open_room(&registry, &chat_id).await;
        registry.disconnect_all().await;
        open_room(&registry, &chat_id).await;
        let mut subscription = registry.listen(&chat_id).await;

        // when (操作):
        if let Some(inbound) = old_remote.inbound.as_ref() {
            let _ = inbound.send(frame("stale", "2024-01-01T00:00:00Z", None));
        }
        new_remote.push(&frame("fresh", "2024-01-01T00:00:01Z", None));
        let snapshot = wait_for_len(&mut subscription, 1).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        // then (期待する結果):
        assert_eq!(snapshot[0].message_id, "fresh");
        assert_eq!(subscription.snapshot().len(), 1);
        assert_eq!(
            registry.connection_state(&chat_id).await,
            ConnectionState::Open
        );
    }

    #[tokio::test]
    async fn test_remote_close_removes_only_that_room() {
        // テスト項目: 片方のチャットがサーバーから切断されても他方には影響しない
        // given (前提条件):
        let (socket_1, mut remote_1) = socket_pair();
        let (socket_2, _remote_2) = socket_pair();
        let registry = registry_with(Arc::new(QueueConnector::new(vec![socket_1, socket_2])));
        let room_1 = room("room-1");
        let room_2 = room("room-2");
        open_room(&registry, &room_1).await;
        open_room(&registry, &room_2).await;
        let mut events = registry.subscribe_events();

        // when (操作):
        remote_1.hang_up();
        wait_for_state(&mut events, &room_1, ConnectionState::Closed).await;

        // then (期待する結果):
        assert_eq!(registry.active_chats().await, vec![room_2.clone()]);
        assert_eq!(
            registry.connection_state(&room_2).await,
            ConnectionState::Open
        );
        assert!(registry.send(&room_2, OutgoingMessage::text("still here")).await.is_some());
        assert!(registry.send(&room_1, OutgoingMessage::text("gone")).await.is_none());
    }
}
