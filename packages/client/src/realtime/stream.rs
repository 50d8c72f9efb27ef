//! Per-room message stream.
//!
//! Holds the accepted, ordered and deduplicated messages of one chat room and
//! publishes the full snapshot to subscribers on every accepted message.

use std::collections::HashSet;

use futures_util::Stream;
use tokio::sync::watch;

use crate::domain::{ChatMessage, DedupKey, insert_ordered};

/// Full ordered sequence of accepted messages at a point in time
pub type Snapshot = Vec<ChatMessage>;

/// Append-only message log of one room
pub struct MessageStream {
    sender: watch::Sender<Snapshot>,
    seen: HashSet<DedupKey>,
}

impl MessageStream {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(Vec::new());
        Self {
            sender,
            seen: HashSet::new(),
        }
    }

    /// Accept a message into the log.
    ///
    /// Heartbeats and duplicates leave the log untouched and notify nobody.
    /// Returns whether the message was added.
    pub fn accept(&mut self, message: ChatMessage) -> bool {
        if message.r#type.is_heartbeat() {
            return false;
        }

        let key = message.dedup_key();
        if self.seen.contains(&key) {
            tracing::debug!(
                "Duplicate message '{}' in chat '{}' ignored",
                message.message_id,
                message.chat_id
            );
            return false;
        }
        self.seen.insert(key);

        self.sender.send_modify(|snapshot| {
            insert_ordered(snapshot, message);
        });
        true
    }

    pub fn snapshot(&self) -> Snapshot {
        self.sender.borrow().clone()
    }

    pub fn len(&self) -> usize {
        self.sender.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn subscribe(&self) -> Subscription {
        Subscription::new(self.sender.subscribe())
    }
}

impl Default for MessageStream {
    fn default() -> Self {
        Self::new()
    }
}

/// Live view of a room's messages
///
/// The first [`next`](Subscription::next) yields the snapshot current at
/// subscription time; later calls wait for newer snapshots. Intermediate
/// snapshots may be skipped when several messages arrive between two reads,
/// but the latest one is never missed. Ends once the stream is dropped.
pub struct Subscription {
    receiver: watch::Receiver<Snapshot>,
    primed: bool,
}

impl Subscription {
    fn new(receiver: watch::Receiver<Snapshot>) -> Self {
        Self {
            receiver,
            primed: false,
        }
    }

    /// Wait for the next snapshot. `None` once the stream was dropped.
    pub async fn next(&mut self) -> Option<Snapshot> {
        if !self.primed {
            self.primed = true;
            // closed before the first read: nothing more will come
            self.receiver.has_changed().ok()?;
            return Some(self.receiver.borrow_and_update().clone());
        }

        self.receiver.changed().await.ok()?;
        Some(self.receiver.borrow_and_update().clone())
    }

    /// Latest snapshot without waiting
    pub fn snapshot(&self) -> Snapshot {
        self.receiver.borrow().clone()
    }

    pub fn into_stream(self) -> impl Stream<Item = Snapshot> {
        futures_util::stream::unfold(self, |mut subscription| async move {
            let snapshot = subscription.next().await?;
            Some((snapshot, subscription))
        })
    }
}
