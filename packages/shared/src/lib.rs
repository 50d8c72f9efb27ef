//! Shared utilities for the chatlink workspace.
//!
//! - `logger`: tracing subscriber setup for binaries
//! - `time`: clock abstraction and timestamp helpers for chat messages

pub mod logger;
pub mod time;
