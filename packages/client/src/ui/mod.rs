//! Terminal chat client built on [`ChatClient`](crate::ChatClient).

mod domain;
mod error;
mod formatter;
mod prompt;
mod runner;
mod session;

pub use error::ClientError;
pub use runner::{ClientOptions, RoomTarget, run_client};
