//! Shared tracker context.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use tokio::sync::{Mutex, MutexGuard};

use super::state::{JobSnapshot, JobState};
use crate::config::TrackerSettings;
use crate::notifier::Notifier;

/// The one job-state instance of the process plus what every component needs
/// to act on it. Built once and handed to the gate, ingestor and watchdog.
///
/// Each state-changing operation reads and writes [`JobState`] within a single
/// lock acquisition and calls the notifier only after releasing it.
pub struct TrackerContext {
    state: Mutex<JobState>,
    notifier: Arc<dyn Notifier>,
    settings: TrackerSettings,
    live_watchdogs: AtomicUsize,
}

impl TrackerContext {
    pub fn new(notifier: Arc<dyn Notifier>, settings: TrackerSettings) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(JobState::new()),
            notifier,
            settings,
            live_watchdogs: AtomicUsize::new(0),
        })
    }

    pub(crate) async fn lock(&self) -> MutexGuard<'_, JobState> {
        self.state.lock().await
    }

    pub fn notifier(&self) -> &Arc<dyn Notifier> {
        &self.notifier
    }

    pub fn settings(&self) -> &TrackerSettings {
        &self.settings
    }

    pub async fn snapshot(&self) -> JobSnapshot {
        self.state.lock().await.snapshot()
    }

    /// Number of watchdog tasks still running.
    pub fn live_watchdogs(&self) -> usize {
        self.live_watchdogs.load(Ordering::SeqCst)
    }

    pub(crate) fn watchdog_started(&self) {
        self.live_watchdogs.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn watchdog_exited(&self) {
        self.live_watchdogs.fetch_sub(1, Ordering::SeqCst);
    }
}
