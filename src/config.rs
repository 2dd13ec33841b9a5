//! Configuration types.
//!
//! Everything is read from the environment at startup. Required settings that
//! are missing or malformed are fatal; the tracker never starts half-configured.

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

pub const ENV_LISTEN_ADDR: &str = "PROGRESS_BOT_LISTEN_ADDR";
pub const ENV_TIMEOUT_SECS: &str = "PROGRESS_BOT_TIMEOUT_SECS";
pub const ENV_POLL_INTERVAL_SECS: &str = "PROGRESS_BOT_POLL_INTERVAL_SECS";
pub const ENV_TRIGGER_URL: &str = "PROGRESS_BOT_TRIGGER_URL";
pub const ENV_JOB_NAME: &str = "PROGRESS_BOT_JOB_NAME";
pub const ENV_BAR_WIDTH: &str = "PROGRESS_BOT_BAR_WIDTH";

const DEFAULT_JOB_NAME: &str = "Training";
const DEFAULT_BAR_WIDTH: usize = 20;
const MAX_BAR_WIDTH: usize = 50;

/// Settings the tracker core needs: watchdog timing and rendering.
#[derive(Debug, Clone)]
pub struct TrackerSettings {
    /// Display name of the single tracked job.
    pub job_name: String,
    /// Jobs with no callback for longer than this are declared dead.
    pub timeout: Duration,
    /// How often the watchdog checks for staleness.
    pub poll_interval: Duration,
    /// Number of glyphs in the rendered progress bar.
    pub bar_width: usize,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            job_name: DEFAULT_JOB_NAME.to_string(),
            timeout: Duration::from_secs(900), // 15 minutes
            poll_interval: Duration::from_secs(10),
            bar_width: DEFAULT_BAR_WIDTH,
        }
    }
}

/// Full service configuration.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Address the inbound callback server listens on.
    pub listen_addr: SocketAddr,
    /// Remote endpoint that starts the job.
    pub trigger_url: String,
    pub settings: TrackerSettings,
}

impl TrackerConfig {
    /// Load from process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let listen_addr: SocketAddr = parse_required(&lookup, ENV_LISTEN_ADDR)?;
        let timeout_secs: u64 = parse_required(&lookup, ENV_TIMEOUT_SECS)?;
        let poll_secs: u64 = parse_required(&lookup, ENV_POLL_INTERVAL_SECS)?;
        let trigger_url = required(&lookup, ENV_TRIGGER_URL)?;

        if timeout_secs == 0 {
            return Err(invalid(ENV_TIMEOUT_SECS, "must be greater than zero"));
        }
        if poll_secs == 0 {
            return Err(invalid(ENV_POLL_INTERVAL_SECS, "must be greater than zero"));
        }
        if poll_secs >= timeout_secs {
            return Err(invalid(
                ENV_POLL_INTERVAL_SECS,
                format!("must be shorter than the timeout ({timeout_secs}s)"),
            ));
        }
        if !(trigger_url.starts_with("http://") || trigger_url.starts_with("https://")) {
            return Err(invalid(ENV_TRIGGER_URL, "must be an http(s) URL"));
        }

        let job_name = lookup(ENV_JOB_NAME)
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_JOB_NAME.to_string());

        let bar_width = match lookup(ENV_BAR_WIDTH) {
            Some(raw) => {
                let width: usize = parse_value(ENV_BAR_WIDTH, &raw)?;
                if width == 0 || width > MAX_BAR_WIDTH {
                    return Err(invalid(
                        ENV_BAR_WIDTH,
                        format!("must be between 1 and {MAX_BAR_WIDTH}"),
                    ));
                }
                width
            }
            None => DEFAULT_BAR_WIDTH,
        };

        Ok(Self {
            listen_addr,
            trigger_url,
            settings: TrackerSettings {
                job_name,
                timeout: Duration::from_secs(timeout_secs),
                poll_interval: Duration::from_secs(poll_secs),
                bar_width,
            },
        })
    }
}

/// Telegram bot configuration. Optional as a whole: without a token the bot
/// runs with a log-only notifier and no command channel.
#[derive(Debug, Clone)]
pub struct TelegramConfig {
    pub bot_token: SecretString,
    /// Chat that owns the status message.
    pub chat_id: String,
    /// Usernames or numeric ids allowed to issue commands. `*` allows everyone.
    pub allowed_users: Vec<String>,
}

impl TelegramConfig {
    pub fn from_env() -> Result<Option<Self>, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Option<Self>, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let Some(token) = lookup("TELEGRAM_BOT_TOKEN").filter(|t| !t.trim().is_empty()) else {
            return Ok(None);
        };
        let chat_id = required(&lookup, "TELEGRAM_CHAT_ID")?;
        let allowed_users = lookup("TELEGRAM_ALLOWED_USERS")
            .unwrap_or_else(|| "*".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        Ok(Some(Self {
            bot_token: SecretString::from(token),
            chat_id,
            allowed_users,
        }))
    }
}

fn required<F>(lookup: &F, key: &str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
}

fn parse_required<F, T>(lookup: &F, key: &str) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw = required(lookup, key)?;
    parse_value(key, &raw)
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e: T::Err| invalid(key, e.to_string()))
}

fn invalid(key: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        key: key.to_string(),
        message: message.into(),
    }
}
