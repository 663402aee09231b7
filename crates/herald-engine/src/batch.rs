//! Batch executor — fixed-size windows, all members of a window in flight at once.
//!
//! Window N settles completely before window N+1 starts, so progress reported
//! after each window is monotonic. A stop request is honoured at the next
//! window boundary; the in-flight window always finishes.
//!
//! Items of a window run as concurrent futures on the calling task
//! (`join_all`), not as spawned tasks: concurrency is bounded by the window
//! size and one item's failure never cancels its siblings.

use std::time::Duration;

use futures::future::join_all;
use herald_core::{HeraldError, Result};

/// Reported to the caller after each settled window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchReport {
    /// Zero-based window index.
    pub index: usize,
    pub windows: usize,
    /// Items settled so far, this window included.
    pub settled: usize,
    pub is_last: bool,
}

/// What a run through the executor produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome<O> {
    /// One outcome per attempted target, in target order.
    pub outcomes: Vec<O>,
    pub windows_run: usize,
    /// Stopped on request before every window ran.
    pub stopped: bool,
}

pub struct BatchExecutor {
    batch_size: usize,
    inter_batch_delay: Duration,
}

impl BatchExecutor {
    /// A zero batch size is a configuration error.
    pub fn new(batch_size: usize, inter_batch_delay: Duration) -> Result<Self> {
        if batch_size == 0 {
            return Err(HeraldError::Config("batch size must be at least 1".into()));
        }
        Ok(Self {
            batch_size,
            inter_batch_delay,
        })
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Drive `action` over `targets`, window by window.
    ///
    /// `action` receives the target's index in `targets`. `on_batch` runs after
    /// every settled window. `should_stop` is consulted before each window.
    pub async fn run<'a, T, O, A, AFut, B, BFut, S>(
        &self,
        targets: &'a [T],
        action: A,
        mut on_batch: B,
        should_stop: S,
    ) -> RunOutcome<O>
    where
        A: Fn(usize, &'a T) -> AFut,
        AFut: Future<Output = O>,
        B: FnMut(BatchReport) -> BFut,
        BFut: Future<Output = ()>,
        S: Fn() -> bool,
    {
        let windows = targets.len().div_ceil(self.batch_size);
        let mut outcomes = Vec::with_capacity(targets.len());
        let mut windows_run = 0;
        let mut stopped = false;

        for (index, window) in targets.chunks(self.batch_size).enumerate() {
            if should_stop() {
                stopped = true;
                break;
            }

            let offset = index * self.batch_size;
            let settled = join_all(
                window
                    .iter()
                    .enumerate()
                    .map(|(i, target)| action(offset + i, target)),
            )
            .await;
            outcomes.extend(settled);
            windows_run += 1;

            let is_last = index + 1 == windows;
            tracing::debug!(
                "📦 Window {}/{} settled ({} items)",
                index + 1,
                windows,
                outcomes.len()
            );
            on_batch(BatchReport {
                index,
                windows,
                settled: outcomes.len(),
                is_last,
            })
            .await;

            if is_last {
                break;
            }
            if should_stop() {
                stopped = true;
                break;
            }
            tokio::time::sleep(self.inter_batch_delay).await;
        }

        if stopped {
            tracing::info!(
                "🛑 Stopped after {windows_run}/{windows} windows ({} of {} targets)",
                outcomes.len(),
                targets.len()
            );
        }

        RunOutcome {
            outcomes,
            windows_run,
            stopped,
        }
    }
}
