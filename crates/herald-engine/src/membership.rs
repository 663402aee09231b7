//! Join/leave counters for tracked channels.
//!
//! A channel's join count goes up the first time a known user shows up as a
//! member, and its leave count the first time they leave. Per-user flags make
//! both counts idempotent. Unknown users and untracked channels are ignored;
//! store failures are logged and dropped.
//!
//! The flag read, counter bump and flag write run under one lock, so two
//! updates for the same user cannot both see the "never joined" flags.

use std::sync::Arc;

use herald_core::Result;
use herald_core::traits::TargetRepository;
use herald_core::types::{ChannelFlags, MemberStatus};
use tokio::sync::Mutex;

use crate::cache::TargetCache;

/// What a membership update did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MembershipEvent {
    FirstJoin,
    FirstLeave,
    Ignored,
}

pub struct MembershipTracker {
    repository: Arc<dyn TargetRepository>,
    tracked: Arc<TargetCache>,
    update_lock: Mutex<()>,
}

impl MembershipTracker {
    pub fn new(repository: Arc<dyn TargetRepository>, tracked: Arc<TargetCache>) -> Self {
        Self {
            repository,
            tracked,
            update_lock: Mutex::new(()),
        }
    }

    /// Apply a member status change seen in `channel_id`.
    pub async fn on_member_update(
        &self,
        channel_id: &str,
        user_id: i64,
        status: &MemberStatus,
    ) -> MembershipEvent {
        match self.apply(channel_id, user_id, status).await {
            Ok(event) => event,
            Err(e) => {
                tracing::warn!("⚠️ Membership update for {user_id} in {channel_id} dropped: {e}");
                MembershipEvent::Ignored
            }
        }
    }

    async fn apply(
        &self,
        channel_id: &str,
        user_id: i64,
        status: &MemberStatus,
    ) -> Result<MembershipEvent> {
        let tracked = self.tracked.get().await;
        if !tracked.iter().any(|c| c.id == channel_id) {
            tracing::debug!("Channel not tracked: {channel_id}");
            return Ok(MembershipEvent::Ignored);
        }

        let _guard = self.update_lock.lock().await;
        let Some(flags) = self.repository.channel_flags(user_id, channel_id).await? else {
            return Ok(MembershipEvent::Ignored);
        };

        match status {
            MemberStatus::Member if !flags.has_ever_joined => {
                self.repository.increment_channel_join_count(channel_id).await?;
                self.repository
                    .set_channel_flags(
                        user_id,
                        channel_id,
                        ChannelFlags {
                            has_ever_joined: true,
                            currently_joined: true,
                            ..flags
                        },
                    )
                    .await?;
                tracing::info!("➕ {user_id} joined {channel_id}");
                Ok(MembershipEvent::FirstJoin)
            }
            MemberStatus::Left if !flags.has_ever_left => {
                self.repository.increment_channel_leave_count(channel_id).await?;
                self.repository
                    .set_channel_flags(
                        user_id,
                        channel_id,
                        ChannelFlags {
                            has_ever_left: true,
                            currently_joined: false,
                            ..flags
                        },
                    )
                    .await?;
                tracing::info!("➖ {user_id} left {channel_id}");
                Ok(MembershipEvent::FirstLeave)
            }
            _ => Ok(MembershipEvent::Ignored),
        }
    }
}
