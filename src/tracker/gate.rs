//! Admission control: at most one running job, and the only place the job
//! moves between running and idle.

use std::sync::Arc;

use chrono::Utc;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::context::TrackerContext;
use super::render;
use super::state::{JobOutcome, JobState};
use super::watchdog::Watchdog;
use crate::error::JobError;
use crate::notifier::MessageHandle;

/// A granted start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admission {
    pub job_id: Uuid,
    /// The status message, if posting it succeeded.
    pub message: Option<MessageHandle>,
}

/// A terminal transition that has been applied to [`JobState`] but whose
/// final message has not been rendered yet.
#[derive(Debug)]
#[must_use = "a termination must be finished to render the final message"]
pub(crate) struct Termination {
    job_id: Option<Uuid>,
    outcome: JobOutcome,
    message: Option<MessageHandle>,
    text: String,
}

#[derive(Clone)]
pub struct AdmissionGate {
    ctx: Arc<TrackerContext>,
}

impl AdmissionGate {
    pub fn new(ctx: Arc<TrackerContext>) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &Arc<TrackerContext> {
        &self.ctx
    }

    /// Admit a new job, or reject with [`JobError::AlreadyRunning`] without
    /// touching the running one.
    pub async fn try_start(&self, requester: &str) -> Result<Admission, JobError> {
        let settings = self.ctx.settings();

        let job_id = {
            let mut state = self.ctx.lock().await;
            if state.active {
                debug!(job_id = ?state.job_id, requester, "Start rejected, job already running");
                return Err(JobError::AlreadyRunning {
                    job_name: settings.job_name.clone(),
                    percent: state.percent,
                });
            }

            let job_id = Uuid::new_v4();
            state.active = true;
            state.job_id = Some(job_id);
            state.requester = Some(requester.to_string());
            state.percent = 0;
            state.status_text.clear();
            state.last_event = Instant::now();
            state.started_at = Some(Utc::now());
            state.message = None;
            state.last_rendered.clear();
            state.last_outcome = None;
            state.watchdog = Some(Watchdog::spawn(self.clone(), job_id));
            job_id
        };

        info!(job_id = %job_id, requester, "Job admitted");

        let text = render::render_started(&settings.job_name, requester, settings.bar_width);
        let handle = match self.ctx.notifier().post(&text).await {
            Ok(handle) => handle,
            Err(e) => {
                warn!(job_id = %job_id, error = %e, "Failed to post status message; tracking continues without it");
                return Ok(Admission {
                    job_id,
                    message: None,
                });
            }
        };

        // The job may have progressed or ended while the post was in flight.
        let catch_up = {
            let mut state = self.ctx.lock().await;
            if state.is_current(job_id) {
                state.message = Some(handle.clone());
                if state.percent == 0 && state.status_text.is_empty() {
                    state.last_rendered = text.clone();
                    None
                } else {
                    let running = render::render_running(
                        &settings.job_name,
                        state.percent,
                        &state.status_text,
                        settings.bar_width,
                    );
                    state.last_rendered = running.clone();
                    Some(running)
                }
            } else if state.job_id == Some(job_id) {
                state.last_outcome.as_ref().map(|outcome| {
                    render::render_terminal(
                        &settings.job_name,
                        outcome,
                        &state.status_text,
                        settings.bar_width,
                        settings.timeout,
                    )
                })
            } else {
                None
            }
        };

        if let Some(current) = catch_up {
            debug!(job_id = %job_id, "Job moved on while its status message was being posted");
            if let Err(e) = self.ctx.notifier().update(&handle, &current).await {
                warn!(job_id = %job_id, status_message = %handle, error = %e, "Failed to bring status message up to date");
            }
        }

        Ok(Admission {
            job_id,
            message: Some(handle),
        })
    }

    /// End the running job, if any. Returns false when nothing was running.
    pub async fn terminate(&self, outcome: JobOutcome) -> bool {
        let termination = {
            let mut state = self.ctx.lock().await;
            self.begin_terminate(&mut state, outcome)
        };
        self.complete(termination).await
    }

    /// End `job_id` only if it is still the running job.
    pub async fn terminate_job(&self, job_id: Uuid, outcome: JobOutcome) -> bool {
        let termination = {
            let mut state = self.ctx.lock().await;
            if !state.is_current(job_id) {
                return false;
            }
            self.begin_terminate(&mut state, outcome)
        };
        self.complete(termination).await
    }

    async fn complete(&self, termination: Option<Termination>) -> bool {
        match termination {
            Some(t) => {
                self.finish(t).await;
                true
            }
            None => false,
        }
    }

    /// Apply the terminal transition. Must be called with the state lock held
    /// so the read of `active` and the write happen atomically.
    pub(crate) fn begin_terminate(
        &self,
        state: &mut JobState,
        outcome: JobOutcome,
    ) -> Option<Termination> {
        if !state.active {
            return None;
        }

        state.active = false;
        if outcome == JobOutcome::Completed {
            state.percent = 100;
        }
        if let Some(watchdog) = state.watchdog.take() {
            watchdog.stop();
        }

        let settings = self.ctx.settings();
        let text = render::render_terminal(
            &settings.job_name,
            &outcome,
            &state.status_text,
            settings.bar_width,
            settings.timeout,
        );
        state.last_outcome = Some(outcome.clone());
        state.last_rendered.clear();

        Some(Termination {
            job_id: state.job_id,
            outcome,
            message: state.message.take(),
            text,
        })
    }

    /// Render the final message of a terminated job. Failures are logged.
    pub(crate) async fn finish(&self, termination: Termination) {
        let Termination {
            job_id,
            outcome,
            message,
            text,
        } = termination;

        info!(job_id = ?job_id, %outcome, "Job terminated");

        let Some(handle) = message else {
            debug!(job_id = ?job_id, "No status message to finalize");
            return;
        };
        if let Err(e) = self.ctx.notifier().update(&handle, &text).await {
            warn!(job_id = ?job_id, status_message = %handle, error = %e, "Failed to render final status");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;
    use crate::config::TrackerSettings;
    use crate::error::ChannelError;
    use crate::notifier::Notifier;
    use crate::notifier::testing::{Event, RecordingNotifier};
    use crate::tracker::ingest::{Ack, CallbackIngestor};

    fn gate() -> (AdmissionGate, Arc<RecordingNotifier>) {
        let notifier = Arc::new(RecordingNotifier::default());
        let ctx = TrackerContext::new(notifier.clone(), TrackerSettings::default());
        (AdmissionGate::new(ctx), notifier)
    }

    #[tokio::test]
    async fn start_initializes_state() {
        let (gate, notifier) = gate();
        let admission = gate.try_start("alice").await.unwrap();
        assert!(admission.message.is_some());

        let snap = gate.context().snapshot().await;
        assert!(snap.active);
        assert_eq!(snap.percent, 0);
        assert_eq!(snap.status_text, "");
        assert_eq!(snap.job_id, Some(admission.job_id));
        assert_eq!(snap.requester.as_deref(), Some("alice"));
        assert!(snap.has_message);
        assert_eq!(notifier.posts(), 1);
        assert_eq!(gate.context().live_watchdogs(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn second_start_rejected_without_side_effects() {
        let (gate, notifier) = gate();
        let first = gate.try_start("alice").await.unwrap();
        CallbackIngestor::new(gate.clone())
            .on_progress(40, "loading".into())
            .await;
        let before = gate.context().snapshot().await;
        let events_before = notifier.events();

        let err = gate.try_start("bob").await.unwrap_err();
        assert_eq!(
            err,
            JobError::AlreadyRunning {
                job_name: "Training".into(),
                percent: 40,
            }
        );

        let after = gate.context().snapshot().await;
        assert_eq!(before, after);
        assert_eq!(after.job_id, Some(first.job_id));
        assert_eq!(after.requester.as_deref(), Some("alice"));
        assert_eq!(after.status_text, "loading");
        assert_eq!(notifier.events(), events_before);
        assert_eq!(gate.context().live_watchdogs(), 1);
    }

    /// Delays every post so callbacks can land while it is in flight.
    struct SlowPostNotifier {
        inner: RecordingNotifier,
        delay: Duration,
    }

    #[async_trait]
    impl Notifier for SlowPostNotifier {
        async fn post(&self, text: &str) -> Result<MessageHandle, ChannelError> {
            tokio::time::sleep(self.delay).await;
            self.inner.post(text).await
        }

        async fn update(&self, handle: &MessageHandle, text: &str) -> Result<(), ChannelError> {
            self.inner.update(handle, text).await
        }
    }

    fn slow_gate() -> (AdmissionGate, Arc<SlowPostNotifier>) {
        let notifier = Arc::new(SlowPostNotifier {
            inner: RecordingNotifier::default(),
            delay: Duration::from_millis(200),
        });
        let ctx = TrackerContext::new(notifier.clone(), TrackerSettings::default());
        (AdmissionGate::new(ctx), notifier)
    }

    #[tokio::test(start_paused = true)]
    async fn progress_during_post_is_shown_once_posted() {
        let (gate, notifier) = slow_gate();
        let starting = tokio::spawn({
            let gate = gate.clone();
            async move { gate.try_start("alice").await }
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        let ack = CallbackIngestor::new(gate.clone())
            .on_progress(40, "loading".into())
            .await;
        assert_eq!(ack, Ack::Applied);

        let admission = starting.await.unwrap().unwrap();
        let handle = admission.message.unwrap();

        let events = notifier.inner.events();
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], Event::Posted(id, _) if *id == handle.message_id));
        let Event::Updated(id, text) = &events[1] else {
            panic!("expected the posted message to be edited, got {events:?}");
        };
        assert_eq!(*id, handle.message_id);
        assert!(text.contains("40%"));
        assert!(text.contains("loading"));

        // The caught-up text is remembered, so a repeat of the same report is
        // not sent again.
        CallbackIngestor::new(gate.clone())
            .on_progress(40, "loading".into())
            .await;
        assert_eq!(notifier.inner.events().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn completion_during_post_is_rendered_on_new_message() {
        let (gate, notifier) = slow_gate();
        let starting = tokio::spawn({
            let gate = gate.clone();
            async move { gate.try_start("alice").await }
        });

        tokio::time::sleep(Duration::from_millis(50)).await;
        let ack = CallbackIngestor::new(gate.clone())
            .on_progress(100, "done".into())
            .await;
        assert_eq!(ack, Ack::Completed);

        let admission = starting.await.unwrap().unwrap();
        let handle = admission.message.unwrap();

        let events = notifier.inner.events();
        assert_eq!(events.len(), 2);
        let Event::Updated(id, text) = &events[1] else {
            panic!("expected the posted message to be finalized, got {events:?}");
        };
        assert_eq!(*id, handle.message_id);
        assert!(text.starts_with('✅'));
        assert!(text.contains("100%"));

        let snap = gate.context().snapshot().await;
        assert!(!snap.active);
        assert_eq!(snap.last_outcome, Some(JobOutcome::Completed));
    }

    #[tokio::test(start_paused = true)]
    async fn post_without_progress_needs_no_edit() {
        let (gate, notifier) = slow_gate();
        gate.try_start("alice").await.unwrap();
        let events = notifier.inner.events();
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], Event::Posted(..)));
    }

    #[tokio::test]
    async fn terminate_is_idempotent() {
        let (gate, notifier) = gate();
        gate.try_start("alice").await.unwrap();

        assert!(gate.terminate(JobOutcome::Completed).await);
        assert!(!gate.terminate(JobOutcome::Completed).await);
        assert!(!gate.terminate(JobOutcome::Timeout).await);

        let terminal_renders = notifier
            .events()
            .iter()
            .filter(|e| matches!(e, Event::Updated(..)))
            .count();
        assert_eq!(terminal_renders, 1);

        let snap = gate.context().snapshot().await;
        assert!(!snap.active);
        assert!(!snap.has_message);
        assert_eq!(snap.percent, 100);
        assert_eq!(snap.last_outcome, Some(JobOutcome::Completed));
    }

    #[tokio::test]
    async fn terminate_when_idle_is_noop() {
        let (gate, notifier) = gate();
        assert!(!gate.terminate(JobOutcome::Error("nothing".into())).await);
        assert!(notifier.events().is_empty());
    }

    #[tokio::test]
    async fn terminate_stops_watchdog() {
        let (gate, _notifier) = gate();
        gate.try_start("alice").await.unwrap();
        gate.terminate(JobOutcome::Error("cancelled".into())).await;
        tokio::task::yield_now().await;
        tokio::time::timeout(std::time::Duration::from_secs(1), async {
            while gate.context().live_watchdogs() > 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("watchdog did not stop");
    }

    #[tokio::test]
    async fn terminate_job_ignores_stale_generation() {
        let (gate, _notifier) = gate();
        let first = gate.try_start("alice").await.unwrap();
        gate.terminate(JobOutcome::Completed).await;
        let second = gate.try_start("bob").await.unwrap();

        assert!(!gate.terminate_job(first.job_id, JobOutcome::Timeout).await);
        assert!(gate.context().snapshot().await.active);
        assert!(gate.terminate_job(second.job_id, JobOutcome::Timeout).await);
    }

    #[tokio::test]
    async fn restart_after_completion_gets_fresh_message() {
        let (gate, notifier) = gate();
        let first = gate.try_start("alice").await.unwrap();
        gate.terminate(JobOutcome::Completed).await;
        let second = gate.try_start("alice").await.unwrap();

        assert_ne!(first.job_id, second.job_id);
        assert_ne!(first.message, second.message);
        assert_eq!(notifier.posts(), 2);
    }

    #[tokio::test]
    async fn post_failure_still_admits() {
        let (gate, notifier) = gate();
        notifier.fail_posts();
        let admission = gate.try_start("alice").await.unwrap();
        assert!(admission.message.is_none());

        let snap = gate.context().snapshot().await;
        assert!(snap.active);
        assert!(!snap.has_message);
        assert!(gate.terminate(JobOutcome::Completed).await);
    }

    #[tokio::test]
    async fn final_message_is_explicit_failure_for_timeout() {
        let (gate, notifier) = gate();
        gate.try_start("alice").await.unwrap();
        gate.terminate(JobOutcome::Timeout).await;
        let last = notifier.last_text().unwrap();
        assert!(last.starts_with('❌'));
        assert!(last.contains("timed out"));
    }
}
