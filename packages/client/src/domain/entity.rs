//! Chat message entity and related types.
//!
//! `ChatMessage` is also the wire format: realtime frames are JSON objects
//! with camelCase keys, e.g.
//!
//! ```json
//! {"messageId":"m-1","chatId":"room-1","senderId":"alice","type":"text",
//!  "content":"hi","sequence":3,"createdAt":"2024-01-01T00:00:00.000Z"}
//! ```

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use super::{
    error::MessageError,
    value_object::{ChatId, UserId},
};

/// Attachment extensions rendered as images.
const IMAGE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "gif", "webp"];

/// Message type
///
/// Known values are matched exactly (`"text"`, `"file"`, `"heartbeat"`).
/// Anything else, including other spellings such as `"TEXT"`, is kept
/// verbatim so that it round-trips and takes part in deduplication as is.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MessageType {
    #[default]
    Text,
    File,
    Heartbeat,
    Other(String),
}

impl MessageType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Text => "text",
            Self::File => "file",
            Self::Heartbeat => "heartbeat",
            Self::Other(value) => value,
        }
    }

    pub fn is_heartbeat(&self) -> bool {
        matches!(self, Self::Heartbeat)
    }
}

impl From<String> for MessageType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "text" => Self::Text,
            "file" => Self::File,
            "heartbeat" => Self::Heartbeat,
            _ => Self::Other(value),
        }
    }
}

impl From<MessageType> for String {
    fn from(value: MessageType) -> Self {
        match value {
            MessageType::Other(value) => value,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One message event of a chat room
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    #[serde(default, deserialize_with = "string_or_null")]
    pub message_id: String,
    #[serde(default, deserialize_with = "string_or_null")]
    pub chat_id: String,
    #[serde(default, deserialize_with = "string_or_null")]
    pub sender_id: String,
    /// Absent on the wire means `text`
    #[serde(default)]
    pub r#type: MessageType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    /// Server-side ordering hint within a chat
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence: Option<i64>,
    #[serde(with = "chatlink_shared::time::iso8601")]
    pub created_at: DateTime<Utc>,
}

/// Result of decoding one inbound realtime frame
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    /// Keepalive with no display payload
    Heartbeat,
    Message(ChatMessage),
}

impl ChatMessage {
    /// Decode a realtime text frame.
    ///
    /// Heartbeats are recognized before full validation, so keepalive frames
    /// without message fields are not reported as malformed.
    pub fn decode(frame: &str) -> Result<InboundFrame, MessageError> {
        let value: serde_json::Value =
            serde_json::from_str(frame).map_err(MessageError::InvalidJson)?;

        let is_heartbeat = value
            .get("type")
            .and_then(serde_json::Value::as_str)
            .is_some_and(|kind| MessageType::from(kind.to_string()).is_heartbeat());
        if is_heartbeat {
            return Ok(InboundFrame::Heartbeat);
        }

        let message: ChatMessage =
            serde_json::from_value(value).map_err(MessageError::InvalidMessage)?;
        if message.message_id.is_empty() {
            return Err(MessageError::MissingMessageId);
        }

        Ok(InboundFrame::Message(message))
    }

    /// Key deciding whether two received messages are the same event
    pub fn dedup_key(&self) -> DedupKey {
        DedupKey {
            message_id: self.message_id.clone(),
            sequence: self.sequence,
            r#type: self.r#type.clone(),
            payload: self
                .file_url
                .as_ref()
                .or(self.content.as_ref())
                .cloned()
                .unwrap_or_default(),
        }
    }

    /// Display name of the attachment, falling back to the URL's last segment
    pub fn attachment_name(&self) -> Option<&str> {
        self.file_name.as_deref().or_else(|| {
            self.file_url
                .as_deref()
                .and_then(|url| url.rsplit('/').next())
                .filter(|name| !name.is_empty())
        })
    }

    /// Whether the attachment looks like an image
    pub fn is_image(&self) -> bool {
        self.attachment_name().is_some_and(is_image_name)
    }
}

/// Whether a file name has one of the image extensions
pub fn is_image_name(name: &str) -> bool {
    name.rsplit_once('.').is_some_and(|(_, extension)| {
        IMAGE_EXTENSIONS
            .iter()
            .any(|known| extension.eq_ignore_ascii_case(known))
    })
}

/// Dedup key: `(messageId, sequence, type, fileUrl else content else "")`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DedupKey {
    message_id: String,
    sequence: Option<i64>,
    r#type: MessageType,
    payload: String,
}

/// Partial message handed to `send`
///
/// The registry completes it with the room, the sender and the creation
/// time. A missing or empty `message_id` is replaced with a fresh UUID.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutgoingMessage {
    pub message_id: Option<String>,
    pub r#type: MessageType,
    pub content: Option<String>,
    pub file_url: Option<String>,
    pub file_name: Option<String>,
    pub sequence: Option<i64>,
}

impl OutgoingMessage {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            r#type: MessageType::Text,
            content: Some(content.into()),
            ..Self::default()
        }
    }

    pub fn file(file_url: impl Into<String>, file_name: impl Into<String>) -> Self {
        Self {
            r#type: MessageType::File,
            file_url: Some(file_url.into()),
            file_name: Some(file_name.into()),
            ..Self::default()
        }
    }

    pub fn with_message_id(mut self, message_id: impl Into<String>) -> Self {
        self.message_id = Some(message_id.into());
        self
    }

    pub fn into_message(
        self,
        chat_id: &ChatId,
        sender_id: &UserId,
        created_at: DateTime<Utc>,
    ) -> ChatMessage {
        let message_id = self
            .message_id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        ChatMessage {
            message_id,
            chat_id: chat_id.as_str().to_string(),
            sender_id: sender_id.as_str().to_string(),
            r#type: self.r#type,
            content: self.content,
            file_url: self.file_url,
            file_name: self.file_name,
            sequence: self.sequence,
            created_at,
        }
    }
}

fn string_or_null<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}
