//! Long-running job progress tracker.
//!
//! Core components:
//! - `state` — the single job record (`JobState`)
//! - `context` — the owned context every component is built from
//! - `gate` — admission control and terminal transitions
//! - `ingest` — progress callbacks from the remote worker
//! - `watchdog` — staleness detection
//! - `render` — progress bar and status message text

pub mod context;
pub mod gate;
pub mod ingest;
pub mod render;
pub mod state;
pub mod watchdog;

use std::sync::Arc;

use tracing::{info, warn};

pub use context::TrackerContext;
pub use gate::{Admission, AdmissionGate};
pub use ingest::{Ack, CallbackIngestor, ProgressReport, parse_callback};
pub use state::{JobOutcome, JobSnapshot, JobState};
pub use watchdog::{Tick, Watchdog};

use crate::error::JobError;
use crate::trigger::JobTrigger;

/// Entry point for the command layer and the callback server.
#[derive(Clone)]
pub struct JobTracker {
    gate: AdmissionGate,
    ingestor: CallbackIngestor,
    trigger: Arc<dyn JobTrigger>,
}

impl JobTracker {
    pub fn new(ctx: Arc<TrackerContext>, trigger: Arc<dyn JobTrigger>) -> Self {
        let gate = AdmissionGate::new(ctx);
        let ingestor = CallbackIngestor::new(gate.clone());
        Self {
            gate,
            ingestor,
            trigger,
        }
    }

    pub fn context(&self) -> &Arc<TrackerContext> {
        self.gate.context()
    }

    /// Admit a job for `requester` and fire the remote trigger without
    /// waiting for it.
    pub async fn start_job_requested(&self, requester: &str) -> Result<Admission, JobError> {
        let admission = self.gate.try_start(requester).await?;

        let trigger = Arc::clone(&self.trigger);
        let requester = requester.to_string();
        let job_id = admission.job_id;
        tokio::spawn(async move {
            match trigger.fire(&requester).await {
                Ok(()) => info!(job_id = %job_id, requester = %requester, "Trigger request sent"),
                Err(e) => warn!(job_id = %job_id, error = %e, "Trigger request failed"),
            }
        });

        Ok(admission)
    }

    /// Apply a progress callback.
    pub async fn on_progress(&self, percent: i64, message: String) -> Ack {
        self.ingestor.on_progress(percent, message).await
    }

    /// Abort the running job with an explicit failure message.
    pub async fn abort(&self, reason: impl Into<String>) -> Result<(), JobError> {
        if self.gate.terminate(JobOutcome::Error(reason.into())).await {
            Ok(())
        } else {
            Err(JobError::NotRunning {
                job_name: self.context().settings().job_name.clone(),
            })
        }
    }

    pub async fn snapshot(&self) -> JobSnapshot {
        self.context().snapshot().await
    }

    /// Human-readable answer to "what's running?".
    pub async fn current_status_text(&self) -> String {
        let snap = self.snapshot().await;
        let settings = self.context().settings();

        if snap.active {
            let mut text = render::render_running(
                &settings.job_name,
                snap.percent,
                &snap.status_text,
                settings.bar_width,
            );
            if let Some(requester) = &snap.requester {
                text.push_str(&format!("\nRequested by {requester}"));
            }
            text.push_str(&format!(
                "\nLast update {}s ago",
                snap.seconds_since_last_event
            ));
            return text;
        }

        match snap.last_outcome {
            Some(outcome) => format!(
                "No {} running. Last run: {outcome}",
                settings.job_name.to_lowercase()
            ),
            None => format!("No {} running.", settings.job_name.to_lowercase()),
        }
    }
}
