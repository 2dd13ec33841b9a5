//! Inbound progress callbacks from the remote worker.
//!
//! The sender is never told about failures: every callback is acknowledged,
//! and anything that goes wrong while applying it is logged here.

use serde_json::Value;
use tracing::{debug, warn};

use super::gate::AdmissionGate;
use super::render;
use super::state::JobOutcome;

/// What happened to an acknowledged callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ack {
    /// Progress recorded on the running job.
    Applied,
    /// Progress reached 100% and the job was completed.
    Completed,
    /// No job was running; the callback was ignored.
    Stale,
}

/// A decoded callback body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressReport {
    pub progress: i64,
    pub message: String,
}

/// Decode a callback body leniently. A missing or unusable `progress` becomes
/// 0 and a missing `message` becomes empty; the remote side cannot do anything
/// useful with a rejection.
pub fn parse_callback(body: &[u8]) -> ProgressReport {
    let value: Value = serde_json::from_slice(body).unwrap_or_else(|e| {
        warn!(error = %e, "Callback body is not valid JSON");
        Value::Null
    });

    let progress = match value.get("progress") {
        Some(Value::Number(n)) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok().map(|f| f as i64),
        _ => None,
    };
    let progress = progress.unwrap_or_else(|| {
        warn!(body = %value, "Callback without usable progress, assuming 0");
        0
    });

    let message = match value.get("message") {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    };

    ProgressReport { progress, message }
}

#[derive(Clone)]
pub struct CallbackIngestor {
    gate: AdmissionGate,
}

impl CallbackIngestor {
    pub fn new(gate: AdmissionGate) -> Self {
        Self { gate }
    }

    /// Apply a progress report to the running job, if there is one.
    pub async fn on_progress(&self, percent: i64, message: String) -> Ack {
        let ctx = self.gate.context();
        let settings = ctx.settings();

        let (edit, termination) = {
            let mut state = ctx.lock().await;
            if !state.active {
                debug!(percent, "Progress callback with no running job, ignoring");
                return Ack::Stale;
            }

            let clamped = percent.clamp(0, 100) as u8;
            if i64::from(clamped) != percent {
                debug!(percent, clamped, "Clamped out-of-range progress");
            }
            state.percent = clamped;
            state.status_text = message;
            state.touch();

            if clamped >= 100 {
                (None, self.gate.begin_terminate(&mut state, JobOutcome::Completed))
            } else {
                let text = render::render_running(
                    &settings.job_name,
                    clamped,
                    &state.status_text,
                    settings.bar_width,
                );
                let edit = match state.message.clone() {
                    Some(handle) if state.last_rendered != text => {
                        state.last_rendered = text.clone();
                        Some((handle, text))
                    }
                    _ => None,
                };
                (edit, None)
            }
        };

        if let Some(termination) = termination {
            self.gate.finish(termination).await;
            return Ack::Completed;
        }

        if let Some((handle, text)) = edit {
            if let Err(e) = ctx.notifier().update(&handle, &text).await {
                warn!(status_message = %handle, error = %e, "Failed to update status message");
            }
        }
        Ack::Applied
    }
}
