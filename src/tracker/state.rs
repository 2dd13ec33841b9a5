//! The single in-flight job record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use uuid::Uuid;

use super::watchdog::WatchdogHandle;
use crate::notifier::MessageHandle;

/// How a job left the running state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome", content = "reason")]
pub enum JobOutcome {
    /// A callback reported 100%.
    Completed,
    /// The watchdog saw no callback within the timeout.
    Timeout,
    /// The job was aborted.
    Error(String),
}

impl std::fmt::Display for JobOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::Timeout => write!(f, "timeout"),
            Self::Error(reason) => write!(f, "error: {reason}"),
        }
    }
}

/// Mutable record of the tracked job. One per process, owned by
/// [`TrackerContext`](super::context::TrackerContext).
#[derive(Debug)]
pub struct JobState {
    /// True between admission and termination.
    pub active: bool,
    /// Generation of the current (or most recent) job.
    pub job_id: Option<Uuid>,
    pub requester: Option<String>,
    /// Last known progress, 0..=100.
    pub percent: u8,
    /// Last human-readable phase description.
    pub status_text: String,
    /// Advanced on admission and on every accepted callback.
    pub last_event: Instant,
    pub started_at: Option<DateTime<Utc>>,
    /// The status message owned by this job.
    pub message: Option<MessageHandle>,
    /// Text most recently written to `message`; identical edits are skipped.
    pub last_rendered: String,
    pub last_outcome: Option<JobOutcome>,
    pub(crate) watchdog: Option<WatchdogHandle>,
}

impl JobState {
    pub fn new() -> Self {
        Self {
            active: false,
            job_id: None,
            requester: None,
            percent: 0,
            status_text: String::new(),
            last_event: Instant::now(),
            started_at: None,
            message: None,
            last_rendered: String::new(),
            last_outcome: None,
            watchdog: None,
        }
    }

    /// Move `last_event` to now. Never moves it backwards.
    pub fn touch(&mut self) {
        let now = Instant::now();
        if now > self.last_event {
            self.last_event = now;
        }
    }

    /// Whether `job_id` names the job that is currently running.
    pub fn is_current(&self, job_id: Uuid) -> bool {
        self.active && self.job_id == Some(job_id)
    }

    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            active: self.active,
            job_id: self.job_id,
            requester: self.requester.clone(),
            percent: self.percent,
            status_text: self.status_text.clone(),
            started_at: self.started_at,
            seconds_since_last_event: self.last_event.elapsed().as_secs(),
            has_message: self.message.is_some(),
            last_outcome: self.last_outcome.clone(),
        }
    }
}

impl Default for JobState {
    fn default() -> Self {
        Self::new()
    }
}

/// Read-only view of [`JobState`] for status queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobSnapshot {
    pub active: bool,
    pub job_id: Option<Uuid>,
    pub requester: Option<String>,
    pub percent: u8,
    pub status_text: String,
    pub started_at: Option<DateTime<Utc>>,
    pub seconds_since_last_event: u64,
    pub has_message: bool,
    pub last_outcome: Option<JobOutcome>,
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn new_state_is_idle() {
        let state = JobState::new();
        assert!(!state.active);
        assert!(state.message.is_none());
        assert!(state.job_id.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn touch_moves_forward() {
        let mut state = JobState::new();
        let before = state.last_event;
        tokio::time::advance(Duration::from_secs(5)).await;
        state.touch();
        assert_eq!(state.last_event - before, Duration::from_secs(5));
    }

    #[test]
    fn is_current_requires_active() {
        let mut state = JobState::new();
        let id = Uuid::new_v4();
        state.job_id = Some(id);
        assert!(!state.is_current(id));
        state.active = true;
        assert!(state.is_current(id));
        assert!(!state.is_current(Uuid::new_v4()));
    }

    #[test]
    fn outcome_display() {
        assert_eq!(JobOutcome::Completed.to_string(), "completed");
        assert_eq!(JobOutcome::Timeout.to_string(), "timeout");
        assert_eq!(JobOutcome::Error("x".into()).to_string(), "error: x");
    }

    #[test]
    fn outcome_serializes_snake_case() {
        let json = serde_json::to_value(JobOutcome::Timeout).unwrap();
        assert_eq!(json, serde_json::json!({"outcome": "timeout"}));
    }
}
