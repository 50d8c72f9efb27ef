//! Terminal chat client with per-room realtime sync and reconnection support.
//!
//! Joins one chat room, prints every message of the room once (deduplicated
//! and ordered by creation time) and sends lines typed at the prompt.
//! Reconnects when the connection drops (max 5 attempts with 5 second interval).
//!
//! Run with:
//! ```not_rust
//! cargo run --bin chatlink-client -- --user-id alice --target bob
//! cargo run --bin chatlink-client -- -u alice -c 6f1c2d --token secret
//! ```

use clap::{ArgGroup, Parser};

use chatlink_client::ui::{ClientOptions, RoomTarget, run_client};
use chatlink_shared::logger::setup_logger;

#[derive(Parser, Debug)]
#[command(name = "chatlink-client")]
#[command(about = "Terminal chat client with realtime room sync", long_about = None)]
#[command(group(ArgGroup::new("room").required(true).args(["chat_id", "target"])))]
struct Args {
    /// Your user ID
    #[arg(short = 'u', long)]
    user_id: String,

    /// Bearer token sent with every request (may be empty)
    #[arg(short = 't', long, default_value = "")]
    token: String,

    /// Chat room ID to join
    #[arg(short = 'c', long)]
    chat_id: Option<String>,

    /// User to chat with; the shared room is looked up through the API
    #[arg(long)]
    target: Option<String>,

    /// Chat HTTP API base URL
    #[arg(long, default_value = "http://127.0.0.1:8080/api")]
    api_url: String,

    /// Realtime (WebSocket) base URL
    #[arg(long, default_value = "ws://127.0.0.1:8080")]
    ws_url: String,
}

impl Args {
    fn room(&self) -> RoomTarget {
        match (&self.chat_id, &self.target) {
            (Some(chat_id), _) => RoomTarget::Chat(chat_id.clone()),
            (None, target) => RoomTarget::User(target.clone().unwrap_or_default()),
        }
    }
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    setup_logger(env!("CARGO_BIN_NAME"), "info");

    let args = Args::parse();
    let options = ClientOptions {
        room: args.room(),
        api_url: args.api_url,
        ws_url: args.ws_url,
        user_id: args.user_id,
        token: args.token,
    };

    if let Err(e) = run_client(options).await {
        tracing::error!("Client error: {}", e);
        std::process::exit(1);
    }
}
