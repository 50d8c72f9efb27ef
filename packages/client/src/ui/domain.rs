//! Domain logic for the terminal client.
//!
//! This module contains pure functions that implement the front end's
//! decisions without side effects, making them easy to test.

use std::path::PathBuf;

use crate::{
    domain::ChatId,
    realtime::{ConnectionEvent, ConnectionState},
};

/// Usage shown for unknown or malformed commands
pub const USAGE: &str = "Commands: /upload <path>, /download <fileUrl> <dest>, /quit";

/// One line of user input
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputCommand {
    /// Plain text message
    Send(String),
    Upload(PathBuf),
    Download { file_url: String, dest: PathBuf },
    Quit,
    /// Unknown or malformed command, with the reason
    Invalid(String),
}

/// Parse a line of user input.
///
/// Lines starting with `/` are commands; anything else is sent as text.
/// Surrounding whitespace is ignored.
pub fn parse_input(line: &str) -> InputCommand {
    let line = line.trim();
    let Some(command) = line.strip_prefix('/') else {
        return InputCommand::Send(line.to_string());
    };

    let mut parts = command.split_whitespace();
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some("quit"), None, ..) => InputCommand::Quit,
        (Some("upload"), Some(path), None, _) => InputCommand::Upload(PathBuf::from(path)),
        (Some("download"), Some(file_url), Some(dest), None) => InputCommand::Download {
            file_url: file_url.to_string(),
            dest: PathBuf::from(dest),
        },
        (Some(name @ ("quit" | "upload" | "download")), ..) => {
            InputCommand::Invalid(format!("wrong arguments for /{}", name))
        }
        _ => InputCommand::Invalid(format!("unknown command '{}'", line)),
    }
}

/// Check if the client should attempt to reconnect after a lifecycle event.
///
/// # Arguments
///
/// * `event` - The lifecycle event that occurred
/// * `chat_id` - The room the client is attached to
/// * `current_attempt` - The number of consecutive attempts made so far
/// * `max_attempts` - The maximum number of reconnection attempts allowed
///
/// # Returns
///
/// `true` if the event closes the client's room and attempts remain
pub fn should_attempt_reconnect(
    event: &ConnectionEvent,
    chat_id: &ChatId,
    current_attempt: u32,
    max_attempts: u32,
) -> bool {
    if event.chat_id != *chat_id || event.state != ConnectionState::Closed {
        return false;
    }

    current_attempt < max_attempts
}
