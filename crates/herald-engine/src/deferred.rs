//! Deferred actions — follow-up work (deleting a delivered copy) that runs after a delay.
//!
//! Each action is its own tokio task, independent of the run that created it:
//! a run can report `Completed` while deletions are still pending. Every
//! attempt takes a slot from the shared [`RateGate`], so deletions and live
//! sends stay under one rate limit. A 429 waits out its `retry_after` without
//! spending an attempt; other failures are retried after a fixed backoff until
//! the attempt budget is spent, then logged and dropped. Pending actions live
//! in memory only and are lost on restart.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use herald_core::traits::Transport;
use herald_core::types::MessageHandle;
use serde::Serialize;
use tokio::task::JoinHandle;

use crate::rate_gate::RateGate;
use crate::retry::call_gated;

/// A scheduled follow-up deletion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeferredAction {
    pub target_id: String,
    pub handle: MessageHandle,
    pub not_before: DateTime<Utc>,
    pub retries_remaining: u32,
}

/// How a deferred action ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeferredOutcome {
    Completed { attempts: u32 },
    Exhausted { attempts: u32 },
}

/// Runs deferred actions with a bounded retry budget.
pub struct DeferredScheduler {
    transport: Arc<dyn Transport>,
    gate: Arc<RateGate>,
    max_attempts: u32,
    backoff: Duration,
    max_throttle_retries: u32,
    tasks: Mutex<Vec<JoinHandle<DeferredOutcome>>>,
}

impl DeferredScheduler {
    pub fn new(
        transport: Arc<dyn Transport>,
        gate: Arc<RateGate>,
        max_attempts: u32,
        backoff: Duration,
        max_throttle_retries: u32,
    ) -> Self {
        Self {
            transport,
            gate,
            max_attempts: max_attempts.max(1),
            backoff,
            max_throttle_retries,
            tasks: Mutex::new(Vec::new()),
        }
    }

    /// Delete `handle` after `delay`. Must be called inside a tokio runtime.
    pub fn schedule_deletion(&self, handle: MessageHandle, delay: Duration) -> DeferredAction {
        let action = DeferredAction {
            target_id: handle.chat_id.clone(),
            handle,
            not_before: Utc::now()
                + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero()),
            retries_remaining: self.max_attempts,
        };

        let task = tokio::spawn(execute(
            self.transport.clone(),
            self.gate.clone(),
            action.clone(),
            delay,
            self.backoff,
            self.max_throttle_retries,
        ));

        if let Ok(mut tasks) = self.tasks.lock() {
            tasks.retain(|t| !t.is_finished());
            tasks.push(task);
        }
        action
    }

    /// Actions not yet finished.
    pub fn pending(&self) -> usize {
        self.tasks
            .lock()
            .map(|tasks| tasks.iter().filter(|t| !t.is_finished()).count())
            .unwrap_or(0)
    }

    /// Wait for every scheduled action to finish.
    pub async fn drain(&self) -> Vec<DeferredOutcome> {
        self.drain_until(std::future::pending()).await.0
    }

    /// Wait for scheduled actions until `stop` resolves; whatever is still
    /// pending then is aborted. Returns the outcomes gathered and the number
    /// of actions abandoned.
    pub async fn drain_until(&self, stop: impl Future<Output = ()>) -> (Vec<DeferredOutcome>, usize) {
        let tasks = self
            .tasks
            .lock()
            .map(|mut tasks| std::mem::take(&mut *tasks))
            .unwrap_or_default();
        tokio::pin!(stop);

        let mut outcomes = Vec::with_capacity(tasks.len());
        let mut remaining = tasks.into_iter();
        while let Some(mut task) = remaining.next() {
            tokio::select! {
                joined = &mut task => match joined {
                    Ok(outcome) => outcomes.push(outcome),
                    Err(e) => tracing::error!("Deferred action task failed: {e}"),
                },
                () = &mut stop => {
                    let abandoned = std::iter::once(task)
                        .chain(remaining.by_ref())
                        .filter(|t| !t.is_finished())
                        .inspect(|t| t.abort())
                        .count();
                    tracing::warn!("⚠️ Abandoned {abandoned} scheduled deletion(s)");
                    return (outcomes, abandoned);
                }
            }
        }
        (outcomes, 0)
    }
}

async fn execute(
    transport: Arc<dyn Transport>,
    gate: Arc<RateGate>,
    mut action: DeferredAction,
    delay: Duration,
    backoff: Duration,
    max_throttle_retries: u32,
) -> DeferredOutcome {
    tokio::time::sleep(delay).await;

    let label = format!("delete {} in {}", action.handle.message_id, action.target_id);
    let mut attempts = 0;
    loop {
        attempts += 1;
        action.retries_remaining = action.retries_remaining.saturating_sub(1);
        let result = call_gated(&gate, max_throttle_retries, &label, || {
            transport.delete_message(&action.handle)
        })
        .await;
        match result {
            Ok(()) => {
                tracing::debug!(
                    "🗑️ Deleted message {} in {} (attempt {attempts})",
                    action.handle.message_id,
                    action.target_id
                );
                return DeferredOutcome::Completed { attempts };
            }
            Err(failure) if !failure.permanent && action.retries_remaining > 0 => {
                tracing::debug!(
                    "Delete of message {} in {} failed, retrying: {}",
                    action.handle.message_id,
                    action.target_id,
                    failure.error
                );
                tokio::time::sleep(backoff).await;
            }
            Err(failure) => {
                tracing::error!(
                    "❌ Failed to delete message {} in {} after {attempts} attempts: {}",
                    action.handle.message_id,
                    action.target_id,
                    failure.error
                );
                return DeferredOutcome::Exhausted { attempts };
            }
        }
    }
}
