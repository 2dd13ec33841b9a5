//! Chat command parsing and dispatch.

use futures::StreamExt;
use tracing::{info, warn};

use crate::channels::telegram::{CommandStream, TelegramChannel};
use crate::tracker::JobTracker;

/// Commands the bot understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Start the tracked job.
    Train,
    /// Report what's running.
    Status,
    /// Abort the running job.
    Cancel,
    Help,
}

impl Command {
    /// Parse `/command` or `/command@botname`, ignoring trailing arguments.
    pub fn parse(text: &str) -> Option<Self> {
        let word = text.split_whitespace().next()?;
        let word = word.strip_prefix('/')?;
        let name = word.split('@').next().unwrap_or(word);
        match name.to_ascii_lowercase().as_str() {
            "train" => Some(Self::Train),
            "status" => Some(Self::Status),
            "cancel" | "stop" => Some(Self::Cancel),
            "help" | "start" => Some(Self::Help),
            _ => None,
        }
    }
}

/// A command received from a chat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingCommand {
    pub chat_id: String,
    /// Display identity of the sender, passed on as the job requester.
    pub user: String,
    pub command: Command,
}

const HELP_TEXT: &str = "/train — start a run\n/status — show progress\n/cancel — abort the current run";

/// Execute a command and produce the reply text.
pub async fn handle_command(tracker: &JobTracker, user: &str, command: Command) -> String {
    match command {
        Command::Train => match tracker.start_job_requested(user).await {
            Ok(admission) => {
                info!(job_id = %admission.job_id, user, "Job started from chat");
                if admission.message.is_some() {
                    "Started. Progress will be shown in the status message.".to_string()
                } else {
                    "Started, but the status message could not be posted.".to_string()
                }
            }
            Err(e) => format!("⚠️ {e}"),
        },
        Command::Status => tracker.current_status_text().await,
        Command::Cancel => match tracker.abort(format!("cancelled by {user}")).await {
            Ok(()) => "Cancelled.".to_string(),
            Err(e) => format!("⚠️ {e}"),
        },
        Command::Help => HELP_TEXT.to_string(),
    }
}

/// Answer every command on `commands` until the stream ends.
pub async fn run(mut commands: CommandStream, channel: &TelegramChannel, tracker: JobTracker) {
    while let Some(incoming) = commands.next().await {
        let reply = handle_command(&tracker, &incoming.user, incoming.command).await;
        if let Err(e) = channel.send_message(&incoming.chat_id, &reply).await {
            warn!(chat_id = %incoming.chat_id, error = %e, "Failed to send command reply");
        }
    }
    info!("Command stream ended");
}
