//! Staleness watchdog.
//!
//! One watchdog task runs per admitted job. It wakes every `poll_interval`,
//! compares the time since the last accepted callback against `timeout`, and
//! terminates the job with [`JobOutcome::Timeout`] when it has gone silent.
//! The task exits on any terminal transition, whichever component caused it.

use std::sync::Arc;

use tokio::sync::oneshot;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, warn};
use uuid::Uuid;

use super::context::TrackerContext;
use super::gate::AdmissionGate;
use super::state::JobOutcome;

/// Stop signal for a running watchdog. Dropping it also stops the task.
#[derive(Debug)]
pub(crate) struct WatchdogHandle {
    stop: oneshot::Sender<()>,
}

impl WatchdogHandle {
    pub(crate) fn stop(self) {
        let _ = self.stop.send(());
    }
}

/// Result of a single watchdog check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// Job still healthy; keep checking.
    Continue,
    /// Job is gone or was just timed out; stop recurring.
    Stop,
}

pub struct Watchdog;

impl Watchdog {
    /// Spawn the recurring check for `job_id`.
    pub(crate) fn spawn(gate: AdmissionGate, job_id: Uuid) -> WatchdogHandle {
        let (stop_tx, mut stop_rx) = oneshot::channel();
        let ctx = Arc::clone(gate.context());
        let interval = ctx.settings().poll_interval;
        ctx.watchdog_started();

        tokio::spawn(async move {
            let _live = LiveGuard(Arc::clone(&ctx));
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // Skip immediate first tick
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = &mut stop_rx => {
                        debug!(job_id = %job_id, "Watchdog stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        if Self::check(&gate, job_id).await == Tick::Stop {
                            break;
                        }
                    }
                }
            }
        });

        WatchdogHandle { stop: stop_tx }
    }

    /// One tick: time out the job if it has been silent for too long.
    pub async fn check(gate: &AdmissionGate, job_id: Uuid) -> Tick {
        let timeout = gate.context().settings().timeout;

        let termination = {
            let mut state = gate.context().lock().await;
            if !state.is_current(job_id) {
                return Tick::Stop;
            }
            let silent_for = Instant::now().saturating_duration_since(state.last_event);
            if silent_for <= timeout {
                return Tick::Continue;
            }
            warn!(
                job_id = %job_id,
                silent_secs = silent_for.as_secs(),
                percent = state.percent,
                "No progress callback within timeout, terminating job"
            );
            gate.begin_terminate(&mut state, JobOutcome::Timeout)
        };

        if let Some(termination) = termination {
            gate.finish(termination).await;
        }
        Tick::Stop
    }
}

struct LiveGuard(Arc<TrackerContext>);

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.0.watchdog_exited();
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::config::TrackerSettings;
    use crate::notifier::testing::{Event, RecordingNotifier};

    fn gate() -> (AdmissionGate, Arc<RecordingNotifier>) {
        let notifier = Arc::new(RecordingNotifier::default());
        let settings = TrackerSettings {
            timeout: Duration::from_secs(60),
            poll_interval: Duration::from_secs(5),
            ..TrackerSettings::default()
        };
        let ctx = TrackerContext::new(notifier.clone(), settings);
        (AdmissionGate::new(ctx), notifier)
    }

    #[tokio::test(start_paused = true)]
    async fn check_continues_within_timeout() {
        let (gate, _n) = gate();
        let admission = gate.try_start("alice").await.unwrap();
        tokio::time::advance(Duration::from_secs(59)).await;
        assert_eq!(Watchdog::check(&gate, admission.job_id).await, Tick::Continue);
        assert!(gate.context().snapshot().await.active);
    }

    #[tokio::test(start_paused = true)]
    async fn check_stops_for_unknown_job() {
        let (gate, _n) = gate();
        gate.try_start("alice").await.unwrap();
        assert_eq!(Watchdog::check(&gate, Uuid::new_v4()).await, Tick::Stop);
        assert!(gate.context().snapshot().await.active);
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_silent_job_exactly_once() {
        let (gate, notifier) = gate();
        gate.try_start("alice").await.unwrap();

        tokio::time::sleep(Duration::from_secs(300)).await;

        let snap = gate.context().snapshot().await;
        assert!(!snap.active);
        assert_eq!(snap.last_outcome, Some(JobOutcome::Timeout));
        assert_eq!(gate.context().live_watchdogs(), 0);

        let timeouts: Vec<_> = notifier
            .events()
            .into_iter()
            .filter(|e| matches!(e, Event::Updated(_, t) if t.contains("timed out")))
            .collect();
        assert_eq!(timeouts.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_fires_after_threshold_not_before() {
        let (gate, _n) = gate();
        gate.try_start("alice").await.unwrap();

        tokio::time::sleep(Duration::from_secs(58)).await;
        assert!(gate.context().snapshot().await.active);

        // Next tick past the 60s threshold lands at 65s.
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert!(!gate.context().snapshot().await.active);
    }

    #[tokio::test(start_paused = true)]
    async fn activity_postpones_timeout() {
        let (gate, _n) = gate();
        gate.try_start("alice").await.unwrap();

        for _ in 0..5 {
            tokio::time::sleep(Duration::from_secs(40)).await;
            gate.context().lock().await.touch();
        }
        assert!(gate.context().snapshot().await.active);
        assert_eq!(gate.context().live_watchdogs(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_handle_stops_task() {
        let (gate, _n) = gate();
        let handle = Watchdog::spawn(gate.clone(), Uuid::new_v4());
        assert_eq!(gate.context().live_watchdogs(), 1);
        drop(handle);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(gate.context().live_watchdogs(), 0);
    }
}
