//! Error types for the progress bot.

use std::time::Duration;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Job error: {0}")]
    Job(#[from] JobError),

    #[error("Trigger error: {0}")]
    Trigger(#[from] TriggerError),
}

/// Configuration-related errors. All of these are fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Chat channel errors (posting/editing messages, polling for commands).
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Channel {name} failed to start: {reason}")]
    StartupFailed { name: String, reason: String },

    #[error("Failed to send message on channel {name}: {reason}")]
    SendFailed { name: String, reason: String },

    #[error("Failed to edit message {message_id} on channel {name}: {reason}")]
    EditFailed {
        name: String,
        message_id: i64,
        reason: String,
    },

    #[error("Invalid response from channel {name}: {reason}")]
    InvalidResponse { name: String, reason: String },
}

/// Job admission errors surfaced to the command layer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum JobError {
    #[error("{job_name} is already running ({percent}%)")]
    AlreadyRunning { job_name: String, percent: u8 },

    #[error("No {job_name} job is running")]
    NotRunning { job_name: String },
}

/// Outbound trigger errors. Logged, never retried.
#[derive(Debug, thiserror::Error)]
pub enum TriggerError {
    #[error("Trigger request to {url} failed: {reason}")]
    RequestFailed { url: String, reason: String },

    #[error("Trigger endpoint {url} returned {status}")]
    Rejected { url: String, status: u16 },

    #[error("Trigger request to {url} timed out after {timeout:?}")]
    Timeout { url: String, timeout: Duration },
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
