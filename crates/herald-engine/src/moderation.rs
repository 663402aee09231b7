//! Channel moderation — check, ban or unban one user across the operator's channels.
//!
//! Channels come from the `TargetCache` and are processed in small windows.
//! Each channel resolves to one row of a status table; the table is edited
//! into the operator's status message after every window.
//!
//! | Action | Row outcomes |
//! |--------|--------------|
//! | `StatusCheck` | member status, or "Bot not admin" |
//! | `BanAll` | "Banned", "Bot not admin", "User is admin" |
//! | `BanLeft` | as `BanAll`, plus "Skipped ban" for users still present |
//! | `Unban` | "Unbanned", "Not banned", "User not found", "Bot not admin" |
//!
//! A 403 on the ban/unban call gives "No permissions"; any other failure "Failed".

use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use herald_core::config::HeraldConfig;
use herald_core::traits::{OperatorUi, Transport};
use herald_core::types::{ChatInfo, MemberStatus, OperationKind, Target};
use herald_core::{HeraldError, Result, TransportError};
use tokio::sync::OnceCell;

use crate::batch::{BatchExecutor, BatchReport};
use crate::cache::TargetCache;
use crate::progress::{self, ProgressReporter};
use crate::rate_gate::RateGate;
use crate::retry::{ErrorKind, ItemFailure, call_gated};
use crate::run_state::{RunRegistry, RunSnapshot};
use crate::summary;

const BOT_ID_ATTEMPTS: u32 = 3;
const BOT_ID_BACKOFF: Duration = Duration::from_secs(1);
const TITLE_MAX_CHARS: usize = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModerationAction {
    StatusCheck,
    /// Ban from every channel.
    BanAll,
    /// Ban only from channels the user already left or was removed from.
    BanLeft,
    Unban,
}

impl fmt::Display for ModerationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModerationAction::StatusCheck => write!(f, "status check"),
            ModerationAction::BanAll => write!(f, "ban (all channels)"),
            ModerationAction::BanLeft => write!(f, "ban (left channels)"),
            ModerationAction::Unban => write!(f, "unban"),
        }
    }
}

/// Outcome shown in one row of the status table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowStatus {
    Member(MemberStatus),
    BotNotAdmin,
    UserIsAdmin,
    Banned,
    SkippedBan,
    UserNotFound,
    Unbanned,
    NotBanned,
    NoPermissions,
    Failed,
}

impl fmt::Display for RowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowStatus::Member(status) => write!(f, "{status}"),
            RowStatus::BotNotAdmin => write!(f, "Bot not admin"),
            RowStatus::UserIsAdmin => write!(f, "User is admin"),
            RowStatus::Banned => write!(f, "Banned"),
            RowStatus::SkippedBan => write!(f, "Skipped ban"),
            RowStatus::UserNotFound => write!(f, "User not found"),
            RowStatus::Unbanned => write!(f, "Unbanned"),
            RowStatus::NotBanned => write!(f, "Not banned"),
            RowStatus::NoPermissions => write!(f, "No permissions"),
            RowStatus::Failed => write!(f, "Failed"),
        }
    }
}

/// One channel's line in the status table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusRow {
    pub channel_id: String,
    /// HTML display name: a linked title, or the channel id in `<code>`.
    pub name: String,
    /// `None` until the channel's window has run.
    pub status: Option<RowStatus>,
}

impl StatusRow {
    fn pending(channel: &Target) -> Self {
        Self {
            channel_id: channel.id.clone(),
            name: code(&channel.id),
            status: None,
        }
    }
}

/// Result of a moderation run.
#[derive(Debug, Clone)]
pub struct ModerationReport {
    pub snapshot: RunSnapshot,
    pub rows: Vec<StatusRow>,
}

/// Title cut down to word characters, at most 15 of them plus "...".
pub fn clean_title(title: &str) -> String {
    let cleaned: String = title
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_' || c.is_whitespace())
        .collect();
    let cleaned = cleaned.trim();
    if cleaned.chars().count() > TITLE_MAX_CHARS {
        let head: String = cleaned.chars().take(TITLE_MAX_CHARS).collect();
        format!("{head}...")
    } else {
        cleaned.to_string()
    }
}

fn code(text: &str) -> String {
    format!("<code>{text}</code>")
}

fn display_name(channel_id: &str, info: Option<&ChatInfo>) -> String {
    let Some(info) = info else {
        return code(channel_id);
    };
    match info.link() {
        Some(link) => {
            let title = info
                .title
                .as_deref()
                .map(clean_title)
                .unwrap_or_else(|| format!("Channel {channel_id}"));
            format!("<a href=\"{link}\">{title}</a>")
        }
        None => code(channel_id),
    }
}

/// Render the status table for `user_id`.
pub fn render_table(user_id: i64, rows: &[StatusRow]) -> String {
    let lines: Vec<String> = rows
        .iter()
        .enumerate()
        .map(|(idx, row)| {
            let status = row
                .status
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_else(|| "Pending".into());
            format!("#CH_{idx} {} ~ {status}", row.name)
        })
        .collect();
    format!(
        "<b>ℹ️ User {user_id} Channel Status :-</b>\n\n{}",
        lines.join("\n")
    )
}

/// Tuning for moderation runs.
#[derive(Debug, Clone)]
pub struct ModerationSettings {
    pub batch_size: usize,
    pub batch_delay: Duration,
    pub progress_min_interval: Duration,
    pub max_throttle_retries: u32,
}

impl ModerationSettings {
    pub fn from_config(config: &HeraldConfig) -> Self {
        Self {
            batch_size: config.channels.moderation_batch_size,
            batch_delay: config.channels.batch_delay(),
            progress_min_interval: config.broadcast.progress_min_interval(),
            max_throttle_retries: config.broadcast.max_throttle_retries,
        }
    }
}

struct Processed {
    name: Option<String>,
    status: RowStatus,
    failure: Option<ErrorKind>,
}

impl Processed {
    fn ok(status: RowStatus) -> Self {
        Self {
            name: None,
            status,
            failure: None,
        }
    }

    fn failed(status: RowStatus, failure: &ItemFailure) -> Self {
        Self {
            name: None,
            status,
            failure: Some(failure.kind),
        }
    }

    /// Map a failed ban/unban call to its row.
    fn from_action_failure(failure: &ItemFailure) -> Self {
        let status = if failure.error.status() == Some(403) {
            RowStatus::NoPermissions
        } else {
            RowStatus::Failed
        };
        Self::failed(status, failure)
    }
}

pub struct ChannelModerator {
    transport: Arc<dyn Transport>,
    ui: Arc<dyn OperatorUi>,
    channels: Arc<TargetCache>,
    registry: Arc<RunRegistry>,
    gate: Arc<RateGate>,
    settings: ModerationSettings,
    bot_id: OnceCell<i64>,
}

impl ChannelModerator {
    pub fn new(
        transport: Arc<dyn Transport>,
        ui: Arc<dyn OperatorUi>,
        channels: Arc<TargetCache>,
        registry: Arc<RunRegistry>,
        gate: Arc<RateGate>,
        settings: ModerationSettings,
    ) -> Self {
        Self {
            transport,
            ui,
            channels,
            registry,
            gate,
            settings,
            bot_id: OnceCell::new(),
        }
    }

    /// Apply `action` for `user_id` on every operator channel.
    pub async fn run(
        &self,
        action: ModerationAction,
        user_id: i64,
        operator_chat: i64,
    ) -> Result<ModerationReport> {
        let executor = BatchExecutor::new(self.settings.batch_size, self.settings.batch_delay)?;
        let channels = self.channels.get().await;
        if channels.is_empty() {
            return Err(HeraldError::Config("no channels configured".into()));
        }

        let kind = OperationKind::ChannelModeration;
        let handle = self.registry.start(kind, channels.len())?;
        tracing::info!("🛡️ {action} for user {user_id} on {} channels", channels.len());

        self.gate.acquire().await;
        let status_message = self
            .ui
            .send(
                operator_chat,
                &progress::render_start(kind, channels.len() as u64),
            )
            .await?;
        let reporter = ProgressReporter::new(
            self.ui.clone(),
            self.gate.clone(),
            status_message,
            self.settings.progress_min_interval,
        );

        let rows = Mutex::new(channels.iter().map(StatusRow::pending).collect::<Vec<_>>());
        let rows_ref = &rows;
        let state = handle.state().as_ref();
        let reporter = &reporter;
        let this = self;

        let outcome = executor
            .run(
                &channels,
                move |idx, channel| async move {
                    let processed = this.process(action, channel, user_id).await;
                    match processed.failure {
                        Some(kind) => state.record_failure(&channel.id, kind),
                        None => state.record_success(),
                    }
                    if let Ok(mut rows) = rows_ref.lock() {
                        if let Some(name) = processed.name {
                            rows[idx].name = name;
                        }
                        rows[idx].status = Some(processed.status);
                    }
                },
                move |report: BatchReport| async move {
                    let table = rows_ref
                        .lock()
                        .map(|rows| render_table(user_id, &rows))
                        .unwrap_or_default();
                    reporter.update(table, report.is_last).await;
                },
                || state.is_stop_requested(),
            )
            .await;

        let snapshot = handle.finish(outcome.stopped);
        let summary = summary::build(&snapshot);
        summary::deliver(self.ui.as_ref(), operator_chat, None, &summary).await;
        handle.reset();

        let rows = rows
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Ok(ModerationReport { snapshot, rows })
    }

    async fn process(&self, action: ModerationAction, channel: &Target, user_id: i64) -> Processed {
        match action {
            ModerationAction::StatusCheck => self.check_status(channel, user_id).await,
            ModerationAction::BanAll => self.ban(channel, user_id, false).await,
            ModerationAction::BanLeft => self.ban(channel, user_id, true).await,
            ModerationAction::Unban => self.unban(channel, user_id).await,
        }
    }

    async fn check_status(&self, channel: &Target, user_id: i64) -> Processed {
        let (bot_admin, info, member) = tokio::join!(
            self.bot_is_admin(&channel.id),
            self.gated(&channel.id, || self.transport.get_chat_info(&channel.id)),
            self.gated(&channel.id, || self.transport.get_membership(&channel.id, user_id)),
        );
        let status = if bot_admin {
            RowStatus::Member(member.unwrap_or_else(|_| MemberStatus::Unknown("unknown".into())))
        } else {
            RowStatus::BotNotAdmin
        };
        Processed {
            name: Some(display_name(&channel.id, info.ok().as_ref())),
            ..Processed::ok(status)
        }
    }

    async fn ban(&self, channel: &Target, user_id: i64, left_only: bool) -> Processed {
        let (bot_admin, member) = tokio::join!(
            self.bot_is_admin(&channel.id),
            self.gated(&channel.id, || self.transport.get_membership(&channel.id, user_id)),
        );
        if !bot_admin {
            return Processed::ok(RowStatus::BotNotAdmin);
        }
        if member.as_ref().is_ok_and(MemberStatus::is_admin) {
            return Processed::ok(RowStatus::UserIsAdmin);
        }
        if left_only && !member.as_ref().is_ok_and(MemberStatus::is_gone) {
            return Processed::ok(RowStatus::SkippedBan);
        }

        match self
            .gated(&channel.id, || self.transport.ban(&channel.id, user_id))
            .await
        {
            Ok(()) => {
                tracing::info!("🔨 Banned {user_id} in {}", channel.id);
                Processed::ok(RowStatus::Banned)
            }
            Err(failure) => Processed::from_action_failure(&failure),
        }
    }

    async fn unban(&self, channel: &Target, user_id: i64) -> Processed {
        if !self.bot_is_admin(&channel.id).await {
            return Processed::ok(RowStatus::BotNotAdmin);
        }
        let member = match self
            .gated(&channel.id, || self.transport.get_membership(&channel.id, user_id))
            .await
        {
            Ok(member) => member,
            Err(failure) => return Processed::failed(RowStatus::UserNotFound, &failure),
        };
        if member != MemberStatus::Kicked {
            return Processed::ok(RowStatus::NotBanned);
        }

        match self
            .gated(&channel.id, || self.transport.unban(&channel.id, user_id))
            .await
        {
            Ok(()) => {
                tracing::info!("🟢 Unbanned {user_id} in {}", channel.id);
                Processed::ok(RowStatus::Unbanned)
            }
            Err(failure) => Processed::from_action_failure(&failure),
        }
    }

    /// Whether the bot administers `channel_id`. Any failure counts as no.
    async fn bot_is_admin(&self, channel_id: &str) -> bool {
        let Some(bot_id) = self.bot_id().await else {
            return false;
        };
        match self
            .gated(channel_id, || self.transport.get_membership(channel_id, bot_id))
            .await
        {
            Ok(status) => status.is_admin(),
            Err(failure) => {
                tracing::debug!("Bot admin check failed in {channel_id}: {}", failure.error);
                false
            }
        }
    }

    /// The bot's own user id, resolved once. A failed resolution is retried
    /// on the next call.
    async fn bot_id(&self) -> Option<i64> {
        self.bot_id
            .get_or_try_init(|| self.resolve_bot_id())
            .await
            .ok()
            .copied()
    }

    async fn resolve_bot_id(&self) -> std::result::Result<i64, TransportError> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            self.gate.acquire().await;
            match self.transport.bot_user_id().await {
                Ok(id) => return Ok(id),
                Err(e) if attempt < BOT_ID_ATTEMPTS => {
                    tracing::warn!("⚠️ Bot id lookup attempt {attempt} failed: {e}");
                    tokio::time::sleep(BOT_ID_BACKOFF * attempt).await;
                }
                Err(e) => {
                    tracing::error!("❌ Bot id unavailable after {attempt} attempts: {e}");
                    return Err(e);
                }
            }
        }
    }

    async fn gated<T, F, Fut>(&self, channel_id: &str, call: F) -> std::result::Result<T, ItemFailure>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = std::result::Result<T, TransportError>>,
    {
        let label = format!("channel {channel_id}");
        call_gated(&self.gate, self.settings.max_throttle_retries, &label, call).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{BOT_ID, MemoryRepository, RecordingUi, ScriptedTransport};

    const USER: i64 = 42;
    const OPERATOR: i64 = 1;

    struct Harness {
        transport: Arc<ScriptedTransport>,
        ui: Arc<RecordingUi>,
        moderator: ChannelModerator,
    }

    fn harness(channels: &[&str]) -> Harness {
        let config = HeraldConfig::default();
        let transport = Arc::new(ScriptedTransport::default());
        let ui = Arc::new(RecordingUi::default());
        let repo = Arc::new(MemoryRepository::with_channels(channels));
        let moderator = ChannelModerator::new(
            transport.clone(),
            ui.clone(),
            Arc::new(TargetCache::new(repo, config.channels.cache_ttl())),
            Arc::new(RunRegistry::new()),
            Arc::new(RateGate::new(Duration::from_millis(50))),
            ModerationSettings::from_config(&config),
        );
        Harness {
            transport,
            ui,
            moderator,
        }
    }

    fn statuses(report: &ModerationReport) -> Vec<String> {
        report
            .rows
            .iter()
            .map(|r| r.status.as_ref().map(ToString::to_string).unwrap_or_default())
            .collect()
    }

    #[test]
    fn test_clean_title() {
        assert_eq!(clean_title("My Channel!! News Updates"), "My Channel News...");
        assert_eq!(clean_title("  Crypto 🚀 Club  "), "Crypto  Club");
        assert_eq!(clean_title("short_name"), "short_name");
    }

    #[test]
    fn test_render_table_marks_pending_rows() {
        let rows = vec![
            StatusRow {
                channel_id: "-1001".into(),
                name: code("-1001"),
                status: Some(RowStatus::Banned),
            },
            StatusRow::pending(&Target::channel("-1002")),
        ];
        let table = render_table(USER, &rows);
        assert!(table.starts_with("<b>ℹ️ User 42 Channel Status :-</b>"));
        assert!(table.contains("#CH_0 <code>-1001</code> ~ Banned"));
        assert!(table.contains("#CH_1 <code>-1002</code> ~ Pending"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_check() {
        let h = harness(&["-1001", "-1002", "-1003"]);
        h.transport.set_chat(
            "-1001",
            ChatInfo {
                title: Some("My Channel!! News Updates".into()),
                invite_link: Some("https://t.me/+abc".into()),
                username: None,
            },
        );
        h.transport.set_member("-1001", USER, Ok(MemberStatus::Left));
        h.transport.set_member("-1003", BOT_ID, Ok(MemberStatus::Member));

        let report = h
            .moderator
            .run(ModerationAction::StatusCheck, USER, OPERATOR)
            .await
            .unwrap();

        assert_eq!(
            report.rows[0].name,
            "<a href=\"https://t.me/+abc\">My Channel News...</a>"
        );
        assert_eq!(report.rows[1].name, "<code>-1002</code>");
        assert_eq!(statuses(&report), vec!["left", "member", "Bot not admin"]);
        assert_eq!((report.snapshot.done, report.snapshot.errors), (3, 0));

        let edits = h.ui.edits();
        assert_eq!(edits.len(), 1);
        assert!(edits[0].1.contains("#CH_2 <code>-1003</code> ~ Bot not admin"));
        assert_eq!(h.ui.photos().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ban_all() {
        let h = harness(&["-1001", "-1002", "-1003"]);
        h.transport.set_member("-1001", USER, Ok(MemberStatus::Administrator));
        h.transport.fail_ban(
            "-1003",
            TransportError::api(403, "Forbidden: not enough rights to restrict/unrestrict chat member"),
        );

        let report = h
            .moderator
            .run(ModerationAction::BanAll, USER, OPERATOR)
            .await
            .unwrap();

        assert_eq!(statuses(&report), vec!["User is admin", "Banned", "No permissions"]);
        assert_eq!(h.transport.bans(), vec![("-1002".to_string(), USER)]);
        assert_eq!(report.snapshot.errors, 1);
        assert_eq!(report.snapshot.tally.get(ErrorKind::BotBlocked), 1);
        assert_eq!(report.snapshot.failed_targets, vec!["-1003".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ban_left_only() {
        let h = harness(&["-1001", "-1002", "-1003"]);
        h.transport.set_member("-1001", USER, Ok(MemberStatus::Left));
        h.transport.set_member("-1003", USER, Ok(MemberStatus::Kicked));
        h.transport.fail_ban("-1003", TransportError::api(400, "Bad Request"));

        let report = h
            .moderator
            .run(ModerationAction::BanLeft, USER, OPERATOR)
            .await
            .unwrap();

        assert_eq!(statuses(&report), vec!["Banned", "Skipped ban", "Failed"]);
        assert_eq!(h.transport.bans(), vec![("-1001".to_string(), USER)]);
        assert_eq!(report.snapshot.tally.get(ErrorKind::Unknown), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unban() {
        let h = harness(&["-1001", "-1002", "-1003", "-1004"]);
        h.transport.set_member("-1001", USER, Ok(MemberStatus::Kicked));
        h.transport.set_member(
            "-1003",
            USER,
            Err(TransportError::api(400, "Bad Request: user not found")),
        );
        h.transport.set_member("-1004", BOT_ID, Ok(MemberStatus::Left));

        let report = h
            .moderator
            .run(ModerationAction::Unban, USER, OPERATOR)
            .await
            .unwrap();

        assert_eq!(
            statuses(&report),
            vec!["Unbanned", "Not banned", "User not found", "Bot not admin"]
        );
        assert_eq!(h.transport.unbans(), vec![("-1001".to_string(), USER)]);
        assert_eq!((report.snapshot.done, report.snapshot.errors), (3, 1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_bot_id_resolved_once_with_retries() {
        let h = harness(&["-1001"]);
        h.transport.fail_bot_id(2);

        let report = h
            .moderator
            .run(ModerationAction::StatusCheck, USER, OPERATOR)
            .await
            .unwrap();
        assert_eq!(statuses(&report), vec!["member"]);
        assert_eq!(h.transport.bot_id_calls(), 3);

        h.moderator
            .run(ModerationAction::StatusCheck, USER, OPERATOR)
            .await
            .unwrap();
        assert_eq!(h.transport.bot_id_calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unresolvable_bot_id_means_not_admin() {
        let h = harness(&["-1001", "-1002"]);
        h.transport.fail_bot_id(10);

        let report = h
            .moderator
            .run(ModerationAction::BanAll, USER, OPERATOR)
            .await
            .unwrap();
        assert_eq!(statuses(&report), vec!["Bot not admin", "Bot not admin"]);
        assert!(h.transport.bans().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_table_edited_after_each_window() {
        let ids: Vec<String> = (1..=7).map(|i| format!("-100{i}")).collect();
        let refs: Vec<&str> = ids.iter().map(String::as_str).collect();
        let h = harness(&refs);

        let report = h
            .moderator
            .run(ModerationAction::StatusCheck, USER, OPERATOR)
            .await
            .unwrap();
        assert_eq!(report.rows.len(), 7);

        let edits = h.ui.edits();
        assert_eq!(edits.len(), 2);
        assert!(edits[0].1.contains("#CH_4 <code>-1005</code> ~ member"));
        assert!(edits[0].1.contains("#CH_6 <code>-1007</code> ~ Pending"));
        assert!(edits[1].1.contains("#CH_6 <code>-1007</code> ~ member"));
    }

    #[tokio::test]
    async fn test_no_channels_is_a_configuration_error() {
        let h = harness(&[]);
        assert!(matches!(
            h.moderator
                .run(ModerationAction::StatusCheck, USER, OPERATOR)
                .await,
            Err(HeraldError::Config(_))
        ));
        assert!(h.ui.sent().is_empty());
    }
}
