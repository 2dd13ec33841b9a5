//! Progress Bot — tracks one long-running remote job and reports its
//! progress in a chat.

pub mod channels;
pub mod commands;
pub mod config;
pub mod error;
pub mod notifier;
pub mod server;
pub mod tracker;
pub mod trigger;
