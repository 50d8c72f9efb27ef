//! Domain layer for the chat client.
//!
//! This module contains the message model and the ordering/deduplication
//! rules, independent of any transport. The `transport` module defines the
//! capability the realtime layer needs; `infrastructure` implements it.

pub mod entity;
pub mod error;
pub mod message_log;
pub mod transport;
pub mod value_object;

pub use entity::{ChatMessage, DedupKey, InboundFrame, MessageType, OutgoingMessage};
pub use error::{MessageError, TransportError, ValueObjectError};
pub use message_log::{compare_messages, insert_ordered};
pub use transport::{Connector, Socket};
pub use value_object::{ChatId, UserId};
