//! Per-document session registry.
//!
//! Ephemeral bookkeeping keyed by document id: the in-flight bootstrap
//! future, the last version tag successfully loaded or saved, oversize
//! report throttle state, the bootstrap baseline, and error-log throttles.
//! Nothing here is persisted; losing it on restart is safe.
//!
//! Entries are created lazily on first touch and removed only by
//! [`SessionRegistry::remove`] once the owning document's final flush has
//! completed. Each id's state is independent; there is no cross-document
//! ordering.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use futures_util::future::{BoxFuture, Shared};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::coordinator::BootstrapError;

/// Shared handle to an in-flight bootstrap. Concurrent bootstrap calls for
/// the same id all await this one future; only its creator runs the work.
pub type InFlightBootstrap = Shared<BoxFuture<'static, Result<(), BootstrapError>>>;

/// Coordinator phase, used to key error-log throttling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Store record load
    Load,
    /// CRDT snapshot fetch
    SnapshotFetch,
    /// Markdown → document conversion
    Convert,
    /// Store save
    Save,
    /// Oversize notification
    Notify,
}

/// Last oversize notice sent for a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OversizeReport {
    /// Sanitized markdown byte length at notification time
    pub byte_size: usize,
    /// When the notice went out
    pub reported_at: Instant,
}

/// Per-document state slice.
#[derive(Default)]
struct SessionState {
    in_flight_bootstrap: Option<InFlightBootstrap>,
    loaded_version: Option<String>,
    last_oversize_report: Option<OversizeReport>,
    bootstrap_baseline: Option<String>,
    last_error_log: HashMap<Phase, Instant>,
}

/// Registry of per-document session state.
///
/// One flat map behind a single async mutex: every operation is a short
/// critical section with no suspension inside, so contention stays low
/// even with many documents.
#[derive(Default)]
pub struct SessionRegistry {
    sessions: Mutex<HashMap<Uuid, SessionState>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join an in-flight bootstrap for `doc_id`, or register a fresh one
    /// built by `make`. Returns the future to await and whether the caller
    /// owns it (the owner clears it afterwards via [`clear_in_flight`]).
    ///
    /// [`clear_in_flight`]: SessionRegistry::clear_in_flight
    pub async fn join_or_register_bootstrap<F>(
        &self,
        doc_id: Uuid,
        make: F,
    ) -> (InFlightBootstrap, bool)
    where
        F: FnOnce() -> InFlightBootstrap,
    {
        let mut sessions = self.sessions.lock().await;
        let state = sessions.entry(doc_id).or_default();
        if let Some(existing) = &state.in_flight_bootstrap {
            return (existing.clone(), false);
        }
        let fut = make();
        state.in_flight_bootstrap = Some(fut.clone());
        (fut, true)
    }

    /// Drop the in-flight bootstrap handle (owner only, success or failure).
    pub async fn clear_in_flight(&self, doc_id: Uuid) {
        let mut sessions = self.sessions.lock().await;
        if let Some(state) = sessions.get_mut(&doc_id) {
            state.in_flight_bootstrap = None;
        }
    }

    pub async fn loaded_version(&self, doc_id: Uuid) -> Option<String> {
        let sessions = self.sessions.lock().await;
        sessions.get(&doc_id)?.loaded_version.clone()
    }

    /// Advance the loaded version. Only called after a successful bootstrap
    /// or a save that returned a new tag.
    pub async fn set_loaded_version(&self, doc_id: Uuid, version: impl Into<String>) {
        let mut sessions = self.sessions.lock().await;
        sessions.entry(doc_id).or_default().loaded_version = Some(version.into());
    }

    pub async fn bootstrap_baseline(&self, doc_id: Uuid) -> Option<String> {
        let sessions = self.sessions.lock().await;
        sessions.get(&doc_id)?.bootstrap_baseline.clone()
    }

    pub async fn set_bootstrap_baseline(&self, doc_id: Uuid, baseline: impl Into<String>) {
        let mut sessions = self.sessions.lock().await;
        sessions.entry(doc_id).or_default().bootstrap_baseline = Some(baseline.into());
    }

    pub async fn clear_bootstrap_baseline(&self, doc_id: Uuid) {
        let mut sessions = self.sessions.lock().await;
        if let Some(state) = sessions.get_mut(&doc_id) {
            state.bootstrap_baseline = None;
        }
    }

    /// Whether an oversize notice should go out now: no prior report, the
    /// size moved by at least `delta` bytes, or `interval` elapsed.
    pub async fn should_report_oversize(
        &self,
        doc_id: Uuid,
        byte_size: usize,
        delta: usize,
        interval: Duration,
    ) -> bool {
        let sessions = self.sessions.lock().await;
        match sessions.get(&doc_id).and_then(|s| s.last_oversize_report) {
            None => true,
            Some(report) => {
                report.byte_size.abs_diff(byte_size) >= delta
                    || report.reported_at.elapsed() >= interval
            }
        }
    }

    /// Record a sent oversize notice.
    pub async fn record_oversize_report(&self, doc_id: Uuid, byte_size: usize) {
        let mut sessions = self.sessions.lock().await;
        sessions.entry(doc_id).or_default().last_oversize_report = Some(OversizeReport {
            byte_size,
            reported_at: Instant::now(),
        });
    }

    /// Clear oversize throttle state after a successful non-oversize save.
    pub async fn clear_oversize_report(&self, doc_id: Uuid) {
        let mut sessions = self.sessions.lock().await;
        if let Some(state) = sessions.get_mut(&doc_id) {
            state.last_oversize_report = None;
        }
    }

    /// Error-log throttle: true at most once per `interval` per
    /// (document, phase) key. Updates the window on a true return.
    pub async fn should_log_error(&self, doc_id: Uuid, phase: Phase, interval: Duration) -> bool {
        let mut sessions = self.sessions.lock().await;
        let state = sessions.entry(doc_id).or_default();
        let now = Instant::now();
        match state.last_error_log.get(&phase) {
            Some(last) if now.duration_since(*last) < interval => false,
            _ => {
                state.last_error_log.insert(phase, now);
                true
            }
        }
    }

    /// Remove a document's state after its final flush has completed.
    pub async fn remove(&self, doc_id: Uuid) {
        let mut sessions = self.sessions.lock().await;
        sessions.remove(&doc_id);
    }

    pub async fn contains(&self, doc_id: Uuid) -> bool {
        let sessions = self.sessions.lock().await;
        sessions.contains_key(&doc_id)
    }

    pub async fn len(&self) -> usize {
        let sessions = self.sessions.lock().await;
        sessions.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
