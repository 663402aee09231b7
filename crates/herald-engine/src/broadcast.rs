//! Message broadcast — deliver one payload to every user or every channel.
//!
//! A run goes: validate → claim the kind's run slot → initial status message
//! → windows of gated sends (progress edit after each) → summary → reset.
//! Successful deliveries of a timed broadcast hand their message to the
//! deferred scheduler for deletion.

use std::sync::Arc;
use std::time::Duration;

use herald_core::config::HeraldConfig;
use herald_core::traits::{OperatorUi, TargetRepository, Transport};
use herald_core::types::{OperationKind, Payload, Target};
use herald_core::{HeraldError, Result};

use crate::batch::{BatchExecutor, BatchReport};
use crate::deferred::DeferredScheduler;
use crate::progress::{self, ProgressReporter};
use crate::rate_gate::RateGate;
use crate::retry::call_gated;
use crate::run_state::{RunRegistry, RunSnapshot};
use crate::summary;

/// Tuning for broadcast runs.
#[derive(Debug, Clone)]
pub struct BroadcastSettings {
    pub user_batch_size: usize,
    pub channel_batch_size: usize,
    pub user_batch_delay: Duration,
    pub channel_batch_delay: Duration,
    pub progress_min_interval: Duration,
    pub max_throttle_retries: u32,
    /// Receives the audit summary.
    pub owner_chat: Option<i64>,
}

impl BroadcastSettings {
    pub fn from_config(config: &HeraldConfig) -> Self {
        Self {
            user_batch_size: config.broadcast.batch_size,
            channel_batch_size: config.channels.broadcast_batch_size,
            user_batch_delay: config.broadcast.inter_batch_delay(),
            channel_batch_delay: config.channels.batch_delay(),
            progress_min_interval: config.broadcast.progress_min_interval(),
            max_throttle_retries: config.broadcast.max_throttle_retries,
            owner_chat: config.telegram.owner_chat_id,
        }
    }
}

/// One broadcast, as confirmed by the operator.
#[derive(Debug, Clone)]
pub struct BroadcastRequest {
    /// `UserBroadcast` or `ChannelBroadcast`.
    pub kind: OperationKind,
    pub operator_chat: i64,
    pub payload: Payload,
    /// Delete each delivered copy after this long; `None` keeps it.
    pub delete_after: Option<Duration>,
}

pub struct Broadcaster {
    transport: Arc<dyn Transport>,
    ui: Arc<dyn OperatorUi>,
    repository: Arc<dyn TargetRepository>,
    registry: Arc<RunRegistry>,
    gate: Arc<RateGate>,
    deferred: Arc<DeferredScheduler>,
    settings: BroadcastSettings,
}

impl Broadcaster {
    pub fn new(
        transport: Arc<dyn Transport>,
        ui: Arc<dyn OperatorUi>,
        repository: Arc<dyn TargetRepository>,
        registry: Arc<RunRegistry>,
        gate: Arc<RateGate>,
        deferred: Arc<DeferredScheduler>,
        settings: BroadcastSettings,
    ) -> Self {
        Self {
            transport,
            ui,
            repository,
            registry,
            gate,
            deferred,
            settings,
        }
    }

    /// Run a broadcast to completion or cancellation.
    ///
    /// Configuration problems (empty payload, no targets, bad batch size) and
    /// a busy run slot are returned before anything is sent.
    pub async fn run(&self, request: BroadcastRequest) -> Result<RunSnapshot> {
        let kind = request.kind;
        let (batch_size, batch_delay) = match kind {
            OperationKind::UserBroadcast => {
                (self.settings.user_batch_size, self.settings.user_batch_delay)
            }
            OperationKind::ChannelBroadcast => (
                self.settings.channel_batch_size,
                self.settings.channel_batch_delay,
            ),
            OperationKind::ChannelModeration => {
                return Err(HeraldError::Config(
                    "channel moderation is not a broadcast".into(),
                ));
            }
        };
        let executor = BatchExecutor::new(batch_size, batch_delay)?;

        if request.payload.is_empty() {
            return Err(HeraldError::Config("nothing to broadcast".into()));
        }

        let targets = self.load_targets(kind).await?;
        if targets.is_empty() {
            return Err(HeraldError::Config(format!(
                "no {} to broadcast to",
                kind.target_noun()
            )));
        }

        let handle = self.registry.start(kind, targets.len())?;

        self.gate.acquire().await;
        let status_message = self
            .ui
            .send(
                request.operator_chat,
                &progress::render_start(kind, targets.len() as u64),
            )
            .await?;
        let reporter = ProgressReporter::new(
            self.ui.clone(),
            self.gate.clone(),
            status_message,
            self.settings.progress_min_interval,
        );

        let state = handle.state().as_ref();
        let gate = self.gate.as_ref();
        let transport = self.transport.as_ref();
        let deferred = self.deferred.as_ref();
        let payload = &request.payload;
        let delete_after = request.delete_after;
        let max_throttle_retries = self.settings.max_throttle_retries;
        let reporter = &reporter;

        let outcome = executor
            .run(
                &targets,
                move |_, target| async move {
                    let label = format!("{} {}", kind.target_noun(), target.id);
                    let sent = call_gated(gate, max_throttle_retries, &label, move || {
                        transport.send_or_forward(target, payload)
                    })
                    .await;
                    match sent {
                        Ok(message) => {
                            state.record_success();
                            if let Some(delay) = delete_after {
                                deferred.schedule_deletion(message, delay);
                            }
                            true
                        }
                        Err(failure) => {
                            state.record_failure(&target.id, failure.kind);
                            false
                        }
                    }
                },
                move |report: BatchReport| async move {
                    reporter.report(&state.snapshot(), report.is_last).await;
                },
                || state.is_stop_requested(),
            )
            .await;

        let snapshot = handle.finish(outcome.stopped);
        let summary = summary::build(&snapshot);
        summary::deliver(
            self.ui.as_ref(),
            request.operator_chat,
            self.settings.owner_chat,
            &summary,
        )
        .await;
        handle.reset();

        Ok(snapshot)
    }

    async fn load_targets(&self, kind: OperationKind) -> Result<Vec<Target>> {
        let targets = match kind {
            OperationKind::UserBroadcast => self.repository.list_users().await?,
            _ => self.repository.list_channels().await?,
        };
        Ok(targets.into_iter().filter(|t| !t.id.is_empty()).collect())
    }
}
