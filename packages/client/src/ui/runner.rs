//! Client execution logic with reconnection support.

use std::{pin::Pin, time::Duration};

use tokio::{sync::broadcast::error::RecvError, time::Sleep};

use crate::{
    ChatClient,
    domain::{ChatId, UserId},
    realtime::ConnectionState,
};

use super::{
    domain::should_attempt_reconnect,
    error::ClientError,
    formatter::MessageFormatter,
    session::{Flow, Session},
};

const MAX_RECONNECT_ATTEMPTS: u32 = 5;
const RECONNECT_INTERVAL_SECS: u64 = 5;

/// Room to join
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomTarget {
    /// Known chat room id
    Chat(String),
    /// Room shared with this user, resolved through the chat API
    User(String),
}

/// Command-line options of the terminal client
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub api_url: String,
    pub ws_url: String,
    pub user_id: String,
    pub token: String,
    pub room: RoomTarget,
}

/// Run the terminal client until the user quits or reconnection gives up
pub async fn run_client(options: ClientOptions) -> Result<(), ClientError> {
    let client = ChatClient::new();
    client
        .configure_urls(&options.api_url, &options.ws_url)
        .await?;
    client
        .configure_auth(&options.user_id, &options.token)
        .await?;

    let user_id = UserId::new(options.user_id.as_str())?;
    let chat_id = resolve_room(&client, &options.room).await?;

    print!("{}", MessageFormatter::format_welcome(&user_id, &chat_id));
    let session = Session::new(client.clone(), chat_id, user_id);

    let result = run_session(&session).await;
    client.disconnect_all().await;
    result
}

async fn resolve_room(client: &ChatClient, room: &RoomTarget) -> Result<ChatId, ClientError> {
    match room {
        RoomTarget::Chat(chat_id) => Ok(ChatId::new(chat_id.as_str())?),
        RoomTarget::User(target) => {
            let target = UserId::new(target.as_str())?;
            let room = client.open_chat(&target).await?;
            Ok(ChatId::new(room.id)?)
        }
    }
}

async fn run_session(session: &Session) -> Result<(), ClientError> {
    let client = session.client();
    let chat_id = session.chat_id();

    // subscribe before connecting so that the first outcome is observed
    let mut events = client.events();
    let printer = session.spawn_printer().await;
    let mut input_rx = session.spawn_input_reader();

    tracing::info!("Connecting to chat '{}'", chat_id);
    client.connect(chat_id).await;

    let mut reconnect_count = 0;
    let mut reconnect_timer: Option<Pin<Box<Sleep>>> = None;

    let result = loop {
        tokio::select! {
            line = input_rx.recv() => {
                let Some(line) = line else {
                    break Ok(());
                };
                if session.handle_line(&line).await == Flow::Quit {
                    break Ok(());
                }
            }
            event = events.recv() => {
                let event = match event {
                    Ok(event) => event,
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!("Skipped {} connection events", skipped);
                        continue;
                    }
                    Err(RecvError::Closed) => break Ok(()),
                };
                if event.chat_id != *chat_id {
                    continue;
                }

                match event.state {
                    ConnectionState::Open => {
                        tracing::info!("Connected to chat '{}'", chat_id);
                        reconnect_count = 0;
                    }
                    ConnectionState::Connecting => {}
                    ConnectionState::Closed => {
                        if !should_attempt_reconnect(&event, chat_id, reconnect_count, MAX_RECONNECT_ATTEMPTS) {
                            tracing::error!(
                                "Failed to reconnect after {} attempts. Exiting.",
                                MAX_RECONNECT_ATTEMPTS
                            );
                            break Err(ClientError::ConnectionLost(MAX_RECONNECT_ATTEMPTS));
                        }

                        reconnect_count += 1;
                        tracing::info!(
                            "Reconnecting in {} seconds... (attempt {}/{})",
                            RECONNECT_INTERVAL_SECS,
                            reconnect_count,
                            MAX_RECONNECT_ATTEMPTS
                        );
                        reconnect_timer = Some(Box::pin(tokio::time::sleep(Duration::from_secs(
                            RECONNECT_INTERVAL_SECS,
                        ))));
                    }
                }
            }
            _ = async {
                if let Some(timer) = reconnect_timer.as_mut() {
                    timer.await;
                }
            }, if reconnect_timer.is_some() => {
                reconnect_timer = None;
                client.connect(chat_id).await;
            }
        }
    };

    printer.abort();
    result
}
