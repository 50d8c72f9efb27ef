//! Realtime synchronization: per-room connections and message streams.

mod registry;
mod stream;

pub use registry::{ConnectionEvent, ConnectionRegistry, ConnectionState};
pub use stream::{MessageStream, Snapshot, Subscription};
