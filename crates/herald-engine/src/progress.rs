//! Progress reporting — renders run counters and edits the operator's status message.
//!
//! Edits compete with deliveries for the same rate limit, so every edit
//! acquires the shared `RateGate`. An edit is skipped when the previous one
//! was less than `min_interval` ago or the text did not change; a forced edit
//! (the last window) only skips on unchanged text. Edit failures are logged
//! and swallowed.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use herald_core::traits::OperatorUi;
use herald_core::types::{MessageHandle, OperationKind};
use tokio::time::Instant;

use crate::rate_gate::RateGate;
use crate::run_state::RunSnapshot;

const BAR_SEGMENTS: u64 = 10;

/// Ten-segment bar for a 0–100 percentage.
pub fn progress_bar(percent: u64) -> String {
    let filled = (percent * BAR_SEGMENTS / 100).min(BAR_SEGMENTS) as usize;
    let empty = BAR_SEGMENTS as usize - filled;
    format!("{}{}", "■".repeat(filled), "□".repeat(empty))
}

fn title(kind: OperationKind) -> &'static str {
    match kind {
        OperationKind::UserBroadcast => "Broadcast",
        OperationKind::ChannelBroadcast => "Channel Broadcast",
        OperationKind::ChannelModeration => "Channel Action",
    }
}

fn noun(kind: OperationKind) -> &'static str {
    match kind {
        OperationKind::UserBroadcast => "Users",
        OperationKind::ChannelBroadcast | OperationKind::ChannelModeration => "Channels",
    }
}

fn verb(kind: OperationKind) -> &'static str {
    match kind {
        OperationKind::UserBroadcast | OperationKind::ChannelBroadcast => "Broadcasted",
        OperationKind::ChannelModeration => "Processed",
    }
}

/// The first status message of a run.
pub fn render_start(kind: OperationKind, total: u64) -> String {
    format!(
        "<b>⏳ Starting {} to {total} {}.</b>\n\nPlease wait...",
        title(kind).to_lowercase(),
        kind.target_noun()
    )
}

/// Render a live progress view.
pub fn render(snapshot: &RunSnapshot) -> String {
    let percent = snapshot.progress_percent();
    format!(
        "<b>⏸️ {title} In Progress :-</b>\n\n\
         Total {noun} : {total}\n\
         {noun} {verb} : {done}\n\
         Errors Encountered : {errors}\n\
         Elapsed Time : {elapsed:.2} seconds\n\
         Estimated Time Left : {eta:.2} secs\n\n\
         Progress : ( <b>{percent}%</b> ) {bar}",
        title = title(snapshot.kind),
        noun = noun(snapshot.kind),
        verb = verb(snapshot.kind),
        total = snapshot.total,
        done = snapshot.done,
        errors = snapshot.errors,
        elapsed = snapshot.elapsed.as_secs_f64(),
        eta = snapshot.estimated_remaining().as_secs_f64(),
        bar = progress_bar(percent),
    )
}

struct LastEdit {
    at: Instant,
    text: String,
}

/// Edits one status message in place.
pub struct ProgressReporter {
    ui: Arc<dyn OperatorUi>,
    gate: Arc<RateGate>,
    handle: MessageHandle,
    min_interval: Duration,
    last: Mutex<Option<LastEdit>>,
}

impl ProgressReporter {
    pub fn new(
        ui: Arc<dyn OperatorUi>,
        gate: Arc<RateGate>,
        handle: MessageHandle,
        min_interval: Duration,
    ) -> Self {
        Self {
            ui,
            gate,
            handle,
            min_interval,
            last: Mutex::new(None),
        }
    }

    pub fn handle(&self) -> &MessageHandle {
        &self.handle
    }

    /// Render `snapshot` and edit it in. Returns whether an edit was sent.
    pub async fn report(&self, snapshot: &RunSnapshot, force: bool) -> bool {
        self.update(render(snapshot), force).await
    }

    /// Edit arbitrary text in, under the same throttling rules.
    pub async fn update(&self, text: String, force: bool) -> bool {
        if !self.should_edit(&text, force) {
            tracing::debug!("⏭️ Progress edit coalesced");
            return false;
        }

        self.gate.acquire().await;
        match self.ui.edit(&self.handle, &text).await {
            Ok(()) => {}
            Err(e) if e.is_benign_edit_failure() => {
                tracing::debug!("Progress edit ignored: {e}");
            }
            Err(e) => {
                tracing::warn!("⚠️ Progress edit failed: {e}");
            }
        }

        if let Ok(mut last) = self.last.lock() {
            *last = Some(LastEdit {
                at: Instant::now(),
                text,
            });
        }
        true
    }

    fn should_edit(&self, text: &str, force: bool) -> bool {
        let Ok(last) = self.last.lock() else {
            return true;
        };
        match last.as_ref() {
            None => true,
            Some(prev) if prev.text == text => false,
            Some(_) if force => true,
            Some(prev) => prev.at.elapsed() >= self.min_interval,
        }
    }
}
