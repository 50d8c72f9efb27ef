//! Ordering rules for a room's message log.
//!
//! Pure functions without side effects, shared by the realtime stream and
//! easy to test in isolation.
//!
//! Messages are totally ordered by `createdAt` (millisecond precision), then
//! `messageId` (byte-wise), then `sequence` (absent counts as 0).

use std::cmp::Ordering;

use super::entity::ChatMessage;

/// Compare two messages by the log order.
///
/// Timestamps within the same millisecond are equal here and fall through to
/// the `messageId` tie-break.
pub fn compare_messages(a: &ChatMessage, b: &ChatMessage) -> Ordering {
    a.created_at
        .timestamp_millis()
        .cmp(&b.created_at.timestamp_millis())
        // byte order, not locale collation: "B" sorts before "a"
        .then_with(|| a.message_id.cmp(&b.message_id))
        .then_with(|| a.sequence.unwrap_or(0).cmp(&b.sequence.unwrap_or(0)))
}

/// Insert a message into an already ordered log.
///
/// The message goes after every element that does not compare greater, so
/// the result equals a stable sort of the log with the message appended.
/// Returns the insertion index.
pub fn insert_ordered(log: &mut Vec<ChatMessage>, message: ChatMessage) -> usize {
    let index = log.partition_point(|existing| {
        compare_messages(existing, &message) != Ordering::Greater
    });
    log.insert(index, message);
    index
}
