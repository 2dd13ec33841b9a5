//! Telegram channel — long-polls the Bot API for commands and owns the
//! status message in the configured chat.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;

use crate::commands::{Command, IncomingCommand};
use crate::config::TelegramConfig;
use crate::error::ChannelError;
use crate::notifier::{MessageHandle, Notifier};

/// Stream of commands from allowed users.
pub type CommandStream = Pin<Box<dyn Stream<Item = IncomingCommand> + Send>>;

const CHANNEL_NAME: &str = "telegram";

/// Telegram channel — connects to the Bot API via long-polling.
pub struct TelegramChannel {
    bot_token: SecretString,
    chat_id: String,
    allowed_users: Vec<String>,
    client: reqwest::Client,
}

impl TelegramChannel {
    pub fn new(config: TelegramConfig) -> Self {
        Self {
            bot_token: config.bot_token,
            chat_id: config.chat_id,
            allowed_users: config.allowed_users,
            client: reqwest::Client::new(),
        }
    }

    fn api_url(&self, method: &str) -> String {
        api_url(&self.bot_token, method)
    }

    /// Check if a username is in the allowed list.
    pub fn is_user_allowed(&self, username: &str) -> bool {
        check_user_allowed(&self.allowed_users, [username])
    }

    /// Send a plain text message and return its message id.
    pub async fn send_message(&self, chat_id: &str, text: &str) -> Result<i64, ChannelError> {
        let body = serde_json::json!({
            "chat_id": chat_id,
            "text": text,
        });
        let data = self.call("sendMessage", &body).await.map_err(|reason| {
            ChannelError::SendFailed {
                name: CHANNEL_NAME.into(),
                reason,
            }
        })?;

        parse_message_id(&data).ok_or_else(|| ChannelError::InvalidResponse {
            name: CHANNEL_NAME.into(),
            reason: "sendMessage result has no message_id".into(),
        })
    }

    /// Replace the text of a message previously sent by the bot.
    pub async fn edit_message(
        &self,
        chat_id: &str,
        message_id: i64,
        text: &str,
    ) -> Result<(), ChannelError> {
        let body = serde_json::json!({
            "chat_id": chat_id,
            "message_id": message_id,
            "text": text,
        });
        match self.call("editMessageText", &body).await {
            Ok(_) => Ok(()),
            Err(reason) if is_not_modified(&reason) => {
                tracing::debug!(message_id, "Telegram message already up to date");
                Ok(())
            }
            Err(reason) => Err(ChannelError::EditFailed {
                name: CHANNEL_NAME.into(),
                message_id,
                reason,
            }),
        }
    }

    /// POST a Bot API method and return its `result`, or the error description.
    async fn call(&self, method: &str, body: &Value) -> Result<Value, String> {
        let resp = self
            .client
            .post(self.api_url(method))
            .json(body)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        let status = resp.status();
        let data: Value = resp.json().await.map_err(|e| e.to_string())?;
        if data.get("ok").and_then(Value::as_bool) == Some(true) {
            return Ok(data.get("result").cloned().unwrap_or(Value::Null));
        }

        let description = data
            .get("description")
            .and_then(Value::as_str)
            .unwrap_or("no description");
        Err(format!("{method} failed ({status}): {description}"))
    }

    /// Start long-polling for commands.
    pub async fn start(&self) -> Result<CommandStream, ChannelError> {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        let url = self.api_url("getUpdates");
        let allowed_users = self.allowed_users.clone();
        let client = self.client.clone();

        tokio::spawn(async move {
            let mut offset: i64 = 0;

            tracing::info!("Telegram channel listening for commands...");

            loop {
                let body = serde_json::json!({
                    "offset": offset,
                    "timeout": 30,
                    "allowed_updates": ["message"]
                });

                let resp = match client.post(&url).json(&body).send().await {
                    Ok(r) => r,
                    Err(e) => {
                        tracing::warn!("Telegram poll error: {e}");
                        tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                        continue;
                    }
                };

                let data: Value = match resp.json().await {
                    Ok(d) => d,
                    Err(e) => {
                        tracing::warn!("Telegram parse error: {e}");
                        tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                        continue;
                    }
                };

                let Some(results) = data.get("result").and_then(Value::as_array) else {
                    continue;
                };

                for update in results {
                    // Advance offset past this update
                    if let Some(uid) = update.get("update_id").and_then(Value::as_i64) {
                        offset = uid + 1;
                    }

                    let Some(incoming) = parse_update(update, &allowed_users) else {
                        continue;
                    };

                    if tx.send(incoming).is_err() {
                        tracing::info!("Telegram listener channel closed");
                        return;
                    }
                }
            }
        });

        let stream = futures::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|msg| (msg, rx))
        });

        Ok(Box::pin(stream))
    }

    pub async fn health_check(&self) -> Result<(), ChannelError> {
        let resp = self
            .client
            .get(self.api_url("getMe"))
            .send()
            .await
            .map_err(|e| ChannelError::StartupFailed {
                name: CHANNEL_NAME.into(),
                reason: e.to_string(),
            })?;

        if resp.status().is_success() {
            Ok(())
        } else {
            Err(ChannelError::StartupFailed {
                name: CHANNEL_NAME.into(),
                reason: format!("getMe returned {}", resp.status()),
            })
        }
    }
}

#[async_trait]
impl Notifier for TelegramChannel {
    async fn post(&self, text: &str) -> Result<MessageHandle, ChannelError> {
        let message_id = self.send_message(&self.chat_id, text).await?;
        Ok(MessageHandle {
            chat_id: self.chat_id.clone(),
            message_id,
        })
    }

    async fn update(&self, handle: &MessageHandle, text: &str) -> Result<(), ChannelError> {
        self.edit_message(&handle.chat_id, handle.message_id, text)
            .await
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

fn api_url(bot_token: &SecretString, method: &str) -> String {
    format!(
        "https://api.telegram.org/bot{}/{method}",
        bot_token.expose_secret()
    )
}

/// Check if any identity in the iterator matches the allowed users list.
fn check_user_allowed<'a>(
    allowed_users: &[String],
    identities: impl IntoIterator<Item = &'a str>,
) -> bool {
    let ids: Vec<&str> = identities.into_iter().collect();
    allowed_users
        .iter()
        .any(|u| u == "*" || ids.contains(&u.as_str()))
}

/// Telegram rejects edits that would not change the text.
fn is_not_modified(reason: &str) -> bool {
    reason.contains("message is not modified")
}

fn parse_message_id(result: &Value) -> Option<i64> {
    result.get("message_id").and_then(Value::as_i64)
}

/// Turn one `getUpdates` entry into a command, if it is a known command from
/// an allowed user.
fn parse_update(update: &Value, allowed_users: &[String]) -> Option<IncomingCommand> {
    let message = update.get("message")?;
    let text = message.get("text").and_then(Value::as_str)?;
    let command = Command::parse(text)?;

    let from = message.get("from");
    let username = from
        .and_then(|f| f.get("username"))
        .and_then(Value::as_str)
        .unwrap_or("unknown");
    let user_id = from
        .and_then(|f| f.get("id"))
        .and_then(Value::as_i64)
        .map(|id| id.to_string());

    // Check allowlist against both username and numeric ID
    let mut identities = vec![username];
    if let Some(ref id) = user_id {
        identities.push(id.as_str());
    }
    if !check_user_allowed(allowed_users, identities) {
        tracing::warn!(
            "Telegram: ignoring command from unauthorized user: username={username}, user_id={}",
            user_id.as_deref().unwrap_or("unknown")
        );
        return None;
    }

    let chat_id = message
        .get("chat")
        .and_then(|c| c.get("id"))
        .and_then(Value::as_i64)?
        .to_string();

    let display = from
        .and_then(|f| f.get("username"))
        .and_then(Value::as_str)
        .map(|u| format!("@{u}"))
        .or_else(|| {
            from.and_then(|f| f.get("first_name"))
                .and_then(Value::as_str)
                .map(String::from)
        })
        .or(user_id)
        .unwrap_or_else(|| "unknown".to_string());

    Some(IncomingCommand {
        chat_id,
        user: display,
        command,
    })
}

// ── Tests ───────────────────────────────────────────────────────────
