//! Run state — one in-flight record per operation kind.
//!
//! ```text
//! Idle ──start──▶ Starting ──▶ Running ──cancel──▶ Stopping
//!                                 │                   │
//!                                 └──────finish───────┴──▶ Completed ──reset──▶ Idle
//! ```
//!
//! `Starting` holds the slot while `total` and the start time are written;
//! `Running` is published only after both are visible.
//!
//! Counters are atomics so concurrent items of a window can record their
//! outcome without a lock. `RunRegistry::start` hands out a `RunHandle`; only
//! one handle per kind can exist, and dropping it resets the state.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use herald_core::types::OperationKind;
use herald_core::{HeraldError, Result};
use serde::Serialize;
use tokio::time::Instant;

use crate::retry::ErrorKind;

/// Run lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[repr(u8)]
pub enum RunStatus {
    Idle = 0,
    Running = 1,
    Stopping = 2,
    Completed = 3,
    /// Slot claimed, counters not yet published.
    Starting = 4,
}

impl RunStatus {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => RunStatus::Running,
            2 => RunStatus::Stopping,
            3 => RunStatus::Completed,
            4 => RunStatus::Starting,
            _ => RunStatus::Idle,
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Idle => write!(f, "idle"),
            RunStatus::Running => write!(f, "running"),
            RunStatus::Stopping => write!(f, "stopping"),
            RunStatus::Completed => write!(f, "completed"),
            RunStatus::Starting => write!(f, "starting"),
        }
    }
}

/// Error counts by kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ErrorTally {
    counts: [u64; 4],
}

impl ErrorTally {
    pub fn get(&self, kind: ErrorKind) -> u64 {
        self.counts[kind.index()]
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }
}

#[derive(Debug, Clone, Copy)]
struct Started {
    instant: Instant,
    at: DateTime<Utc>,
}

/// The live record of one operation kind.
pub struct RunState {
    kind: OperationKind,
    status: AtomicU8,
    stop_requested: AtomicBool,
    stopped_early: AtomicBool,
    total: AtomicU64,
    done: AtomicU64,
    errors: AtomicU64,
    tally: [AtomicU64; 4],
    failed_targets: Mutex<BTreeSet<String>>,
    started: Mutex<Option<Started>>,
}

impl RunState {
    fn new(kind: OperationKind) -> Self {
        Self {
            kind,
            status: AtomicU8::new(RunStatus::Idle as u8),
            stop_requested: AtomicBool::new(false),
            stopped_early: AtomicBool::new(false),
            total: AtomicU64::new(0),
            done: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            tally: Default::default(),
            failed_targets: Mutex::new(BTreeSet::new()),
            started: Mutex::new(None),
        }
    }

    pub fn kind(&self) -> OperationKind {
        self.kind
    }

    pub fn status(&self) -> RunStatus {
        RunStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    /// Whether a stop has been requested; checked at window boundaries.
    pub fn is_stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::Acquire)
    }

    /// Record one target's successful terminal outcome.
    pub fn record_success(&self) {
        self.done.fetch_add(1, Ordering::AcqRel);
        self.debug_check_bounds();
    }

    /// Record one target's failed terminal outcome.
    pub fn record_failure(&self, target_id: &str, kind: ErrorKind) {
        if let Ok(mut failed) = self.failed_targets.lock() {
            failed.insert(target_id.to_string());
        }
        self.tally[kind.index()].fetch_add(1, Ordering::AcqRel);
        self.errors.fetch_add(1, Ordering::AcqRel);
        self.debug_check_bounds();
    }

    /// Status is read first, so a `Running` snapshot always carries its total and start time.
    pub fn snapshot(&self) -> RunSnapshot {
        let status = self.status();
        let started = self.started.lock().ok().and_then(|s| *s);
        let mut tally = ErrorTally::default();
        for kind in ErrorKind::ALL {
            tally.counts[kind.index()] = self.tally[kind.index()].load(Ordering::Acquire);
        }
        RunSnapshot {
            kind: self.kind,
            status,
            stopped: self.stopped_early.load(Ordering::Acquire),
            total: self.total.load(Ordering::Acquire),
            done: self.done.load(Ordering::Acquire),
            errors: self.errors.load(Ordering::Acquire),
            tally,
            failed_targets: self
                .failed_targets
                .lock()
                .map(|f| f.iter().cloned().collect())
                .unwrap_or_default(),
            started_at: started.map(|s| s.at),
            elapsed: started.map(|s| s.instant.elapsed()).unwrap_or_default(),
        }
    }

    fn try_begin(&self, total: u64) -> bool {
        if self
            .status
            .compare_exchange(
                RunStatus::Idle as u8,
                RunStatus::Starting as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return false;
        }
        self.total.store(total, Ordering::Release);
        if let Ok(mut started) = self.started.lock() {
            *started = Some(Started {
                instant: Instant::now(),
                at: Utc::now(),
            });
        }
        self.status.store(RunStatus::Running as u8, Ordering::Release);
        true
    }

    fn request_stop(&self) -> bool {
        let stopped = self
            .status
            .compare_exchange(
                RunStatus::Running as u8,
                RunStatus::Stopping as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        if stopped {
            self.stop_requested.store(true, Ordering::Release);
        }
        stopped
    }

    fn complete(&self, stopped_early: bool) {
        self.stopped_early.store(stopped_early, Ordering::Release);
        self.status.store(RunStatus::Completed as u8, Ordering::Release);
    }

    /// Zero everything and return to `Idle`.
    fn reset(&self) {
        self.total.store(0, Ordering::Release);
        self.done.store(0, Ordering::Release);
        self.errors.store(0, Ordering::Release);
        for counter in &self.tally {
            counter.store(0, Ordering::Release);
        }
        if let Ok(mut failed) = self.failed_targets.lock() {
            failed.clear();
        }
        if let Ok(mut started) = self.started.lock() {
            *started = None;
        }
        self.stop_requested.store(false, Ordering::Release);
        self.stopped_early.store(false, Ordering::Release);
        self.status.store(RunStatus::Idle as u8, Ordering::Release);
    }

    fn debug_check_bounds(&self) {
        debug_assert!(
            self.done.load(Ordering::Acquire) + self.errors.load(Ordering::Acquire)
                <= self.total.load(Ordering::Acquire),
            "done + errors exceeded total"
        );
    }
}

/// A frozen copy of a run's counters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSnapshot {
    pub kind: OperationKind,
    pub status: RunStatus,
    /// The run ended on a cancellation before all targets were attempted.
    pub stopped: bool,
    pub total: u64,
    pub done: u64,
    pub errors: u64,
    pub tally: ErrorTally,
    pub failed_targets: Vec<String>,
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    pub elapsed: Duration,
}

impl RunSnapshot {
    pub fn attempted(&self) -> u64 {
        self.done + self.errors
    }

    /// `done / total * 100`; 0 for an empty run.
    pub fn success_rate(&self) -> f64 {
        percent(self.done, self.total)
    }

    /// `floor((done + errors) / total * 100)`; 0 for an empty run.
    pub fn progress_percent(&self) -> u64 {
        if self.total == 0 {
            return 0;
        }
        (self.attempted() * 100 / self.total).min(100)
    }

    /// `elapsed / max(done, 1) * (total - done)`.
    pub fn estimated_remaining(&self) -> Duration {
        let per_item = self.elapsed.as_secs_f64() / self.done.max(1) as f64;
        Duration::from_secs_f64(per_item * self.total.saturating_sub(self.done) as f64)
    }
}

/// Share of `part` in `whole` as a percentage; 0 when `whole` is 0.
pub fn percent(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}

/// Outcome of a cancellation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The run will stop at the next window boundary.
    Requested,
    NothingToCancel,
}

/// Owns one `RunState` per operation kind.
pub struct RunRegistry {
    states: HashMap<OperationKind, Arc<RunState>>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self {
            states: OperationKind::ALL
                .iter()
                .map(|kind| (*kind, Arc::new(RunState::new(*kind))))
                .collect(),
        }
    }

    pub fn state(&self, kind: OperationKind) -> Arc<RunState> {
        self.states
            .get(&kind)
            .cloned()
            .unwrap_or_else(|| Arc::new(RunState::new(kind)))
    }

    /// Claim the run slot for `kind`. Fails fast if it is not idle.
    pub fn start(&self, kind: OperationKind, total: usize) -> Result<RunHandle> {
        let state = self.state(kind);
        if !state.try_begin(total as u64) {
            tracing::warn!("⛔ Rejected {kind} start: status is {}", state.status());
            return Err(HeraldError::AlreadyRunning(kind));
        }
        tracing::info!("🚀 {kind} started ({total} targets)");
        Ok(RunHandle {
            state,
            released: false,
        })
    }

    /// Ask the active run of `kind` to stop after its current window.
    pub fn cancel(&self, kind: OperationKind) -> CancelOutcome {
        if self.state(kind).request_stop() {
            tracing::info!("🛑 {kind} stop requested");
            CancelOutcome::Requested
        } else {
            CancelOutcome::NothingToCancel
        }
    }
}

impl Default for RunRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Exclusive ownership of a kind's run slot.
pub struct RunHandle {
    state: Arc<RunState>,
    released: bool,
}

impl RunHandle {
    pub fn state(&self) -> &Arc<RunState> {
        &self.state
    }

    /// Mark the run `Completed` and freeze its counters.
    pub fn finish(&self, stopped_early: bool) -> RunSnapshot {
        self.state.complete(stopped_early);
        let snapshot = self.state.snapshot();
        tracing::info!(
            "🏁 {} {}: {}/{} done, {} errors",
            snapshot.kind,
            if snapshot.stopped { "stopped" } else { "completed" },
            snapshot.done,
            snapshot.total,
            snapshot.errors
        );
        snapshot
    }

    /// Return the slot to `Idle` with zeroed counters.
    pub fn reset(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if !self.released {
            self.state.reset();
            self.released = true;
        }
    }
}

impl Drop for RunHandle {
    fn drop(&mut self) {
        self.release();
    }
}
