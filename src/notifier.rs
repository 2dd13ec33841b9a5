//! Outward status message abstraction.
//!
//! The tracker owns exactly one status message per job. It posts it once on
//! admission and then edits it in place; the chat platform behind it is a
//! collaborator reached only through [`Notifier`].

use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ChannelError;

/// Opaque reference to a posted status message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageHandle {
    pub chat_id: String,
    pub message_id: i64,
}

impl std::fmt::Display for MessageHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.chat_id, self.message_id)
    }
}

/// Post-and-edit capability of a chat platform.
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Create a new destination message and return its handle.
    async fn post(&self, text: &str) -> Result<MessageHandle, ChannelError>;

    /// Replace the text of an existing message.
    async fn update(&self, handle: &MessageHandle, text: &str) -> Result<(), ChannelError>;
}

/// Notifier that only writes status changes to the log.
///
/// Used when no chat platform is configured.
#[derive(Debug, Default)]
pub struct LogNotifier {
    next_id: AtomicI64,
}

impl LogNotifier {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Notifier for LogNotifier {
    async fn post(&self, text: &str) -> Result<MessageHandle, ChannelError> {
        let message_id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        tracing::info!(message_id, "{text}");
        Ok(MessageHandle {
            chat_id: "log".to_string(),
            message_id,
        })
    }

    async fn update(&self, handle: &MessageHandle, text: &str) -> Result<(), ChannelError> {
        tracing::info!(message_id = handle.message_id, "{text}");
        Ok(())
    }
}
