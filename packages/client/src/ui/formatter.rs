//! Message formatting utilities for terminal display.

use std::fmt::Display;

use chatlink_shared::time::format_clock_time;
use chrono::{DateTime, Local, TimeZone, Utc};

use crate::{
    domain::{ChatId, ChatMessage, UserId},
    infrastructure::UploadedFile,
};

use super::domain::USAGE;

/// Message formatter for terminal display
pub struct MessageFormatter;

impl MessageFormatter {
    /// Format the banner shown once the room is resolved
    pub fn format_welcome(user_id: &UserId, chat_id: &ChatId) -> String {
        format!(
            "\nYou are '{}' in chat '{}'. Type messages and press Enter to send.\n{}\n\n",
            user_id, chat_id, USAGE
        )
    }

    /// Format a chat message in local time
    pub fn format_chat_message(message: &ChatMessage, me: &UserId) -> String {
        Self::format_chat_message_in(message, me, &Local)
    }

    /// Format a chat message as `[HH:MM] @sender: body` in the given zone
    ///
    /// Attachments are shown as `[image]` or `[file]` followed by the name and
    /// the stored URL.
    pub fn format_chat_message_in<Tz>(message: &ChatMessage, me: &UserId, zone: &Tz) -> String
    where
        Tz: TimeZone,
        Tz::Offset: Display,
    {
        let me_suffix = if message.sender_id == me.as_str() {
            " (me)"
        } else {
            ""
        };

        let body = match message.file_url.as_deref() {
            Some(file_url) => {
                let marker = if message.is_image() { "[image]" } else { "[file]" };
                let name = message.attachment_name().unwrap_or(file_url);
                format!("{} {} ({})", marker, name, file_url)
            }
            None => message.content.clone().unwrap_or_default(),
        };

        format!(
            "\n[{}] @{}{}: {}\n",
            format_clock_time(&message.created_at, zone),
            message.sender_id,
            me_suffix,
            body
        )
    }

    /// Format a confirmation after a message was queued
    pub fn format_sent_confirmation(sent_at: &DateTime<Utc>) -> String {
        Self::format_sent_confirmation_in(sent_at, &Local)
    }

    pub fn format_sent_confirmation_in<Tz>(sent_at: &DateTime<Utc>, zone: &Tz) -> String
    where
        Tz: TimeZone,
        Tz::Offset: Display,
    {
        format!("sent at {}\n", format_clock_time(sent_at, zone))
    }

    /// Format the notice for a message dropped while disconnected
    pub fn format_not_connected(chat_id: &ChatId) -> String {
        format!("Not connected to chat '{}'; message dropped\n", chat_id)
    }

    /// Format the list of uploaded attachments
    pub fn format_uploaded(files: &[UploadedFile]) -> String {
        if files.is_empty() {
            return "No files were uploaded\n".to_string();
        }

        files
            .iter()
            .map(|file| format!("uploaded {} -> {}\n", file.file_name, file.file_url))
            .collect()
    }

    /// Format the notice after an attachment was saved
    pub fn format_downloaded(byte_count: usize, dest: &str) -> String {
        format!("saved {} bytes to {}\n", byte_count, dest)
    }
}
