//! # Herald — bulk broadcasts and channel moderation for a Telegram admin bot
//!
//! Usage:
//!   herald broadcast --chat 111 --message 42            # copy message 42 to every user
//!   herald broadcast --chat 111 --message 42 --permanent
//!   herald channel-broadcast --chat 111 --message 42 --forward
//!   herald channel-status --chat 111 --user 555
//!   herald ban --chat 111 --user 555 [--left-only]
//!   herald unban --chat 111 --user 555
//!   herald watch                                        # count channel joins/leaves
//!
//! Ctrl-C stops the active run after its current window. With no run
//! active it stops waiting on scheduled deletions and exits normally.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use futures::StreamExt;
use herald_core::HeraldConfig;
use herald_core::types::{OperationKind, Payload, Target};
use herald_engine::{
    BroadcastRequest, BroadcastSettings, Broadcaster, CancelOutcome, ChannelModerator,
    DeferredScheduler, JsonRepository, MembershipTracker, ModerationAction, ModerationSettings,
    RateGate, RunRegistry, TargetCache, TrackedChannel,
};
use herald_telegram::TelegramClient;
use tokio::sync::Notify;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "herald",
    version,
    about = "📣 Herald — bulk broadcasts and channel moderation for Telegram bots"
)]
struct Cli {
    /// Config file (default: ~/.herald/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bot token, overrides the config file
    #[arg(long, env = "HERALD_BOT_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Data directory, overrides the config file
    #[arg(long)]
    data_dir: Option<String>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Deliver a message to every bot user
    Broadcast(BroadcastArgs),
    /// Deliver a message to every broadcast channel
    ChannelBroadcast(BroadcastArgs),
    /// Show a user's status in every moderated channel
    ChannelStatus(UserArgs),
    /// Ban a user from the moderated channels
    Ban {
        #[command(flatten)]
        target: UserArgs,
        /// Only ban where the user already left or was removed
        #[arg(long)]
        left_only: bool,
    },
    /// Lift a user's ban in the moderated channels
    Unban(UserArgs),
    /// Register a bot user
    AddUser { user_id: i64 },
    /// Register a channel
    AddChannel {
        channel_id: String,
        /// Moderate and count joins/leaves instead of broadcasting to it
        #[arg(long)]
        tracked: bool,
    },
    /// Join/leave counts of tracked channels
    Stats,
    /// Follow membership changes and update join/leave counts
    Watch,
}

#[derive(Args)]
struct BroadcastArgs {
    /// Operator chat that receives progress and the summary
    #[arg(long)]
    chat: i64,
    /// Id of the message to deliver
    #[arg(long)]
    message: i64,
    /// Chat holding the message (default: the operator chat)
    #[arg(long)]
    from: Option<i64>,
    /// Forward instead of copy
    #[arg(long)]
    forward: bool,
    /// Keep delivered copies instead of deleting them later
    #[arg(long, conflicts_with = "delete_after")]
    permanent: bool,
    /// Delete delivered copies after this many seconds
    #[arg(long)]
    delete_after: Option<u64>,
}

#[derive(Args)]
struct UserArgs {
    /// Operator chat that receives the status table
    #[arg(long)]
    chat: i64,
    /// User to check, ban or unban
    #[arg(long)]
    user: i64,
}

fn expand_path(p: &str) -> String {
    shellexpand::tilde(p).to_string()
}

/// Everything a command needs, wired once.
struct App {
    config: HeraldConfig,
    client: Arc<TelegramClient>,
    repository: Arc<JsonRepository>,
    registry: Arc<RunRegistry>,
    gate: Arc<RateGate>,
    deferred: Arc<DeferredScheduler>,
    channels: Arc<TargetCache>,
    /// Signalled by Ctrl-C when there is no run left to cancel.
    shutdown: Arc<Notify>,
}

impl App {
    fn new(config: HeraldConfig, data_dir: &str) -> Result<Self> {
        let client = Arc::new(
            TelegramClient::from_config(&config.telegram).context("creating Telegram client")?,
        );
        let repository = Arc::new(
            JsonRepository::new(std::path::Path::new(data_dir))
                .with_context(|| format!("opening data dir {data_dir}"))?,
        );
        let gate = Arc::new(RateGate::new(config.broadcast.min_interval()));
        let deferred = Arc::new(DeferredScheduler::new(
            client.clone(),
            gate.clone(),
            config.deferred.max_attempts,
            config.deferred.backoff(),
            config.broadcast.max_throttle_retries,
        ));
        let channels = Arc::new(TargetCache::new(
            repository.clone(),
            config.channels.cache_ttl(),
        ));
        Ok(Self {
            registry: Arc::new(RunRegistry::new()),
            config,
            client,
            repository,
            gate,
            deferred,
            channels,
            shutdown: Arc::new(Notify::new()),
        })
    }

    fn broadcaster(&self) -> Broadcaster {
        Broadcaster::new(
            self.client.clone(),
            self.client.clone(),
            self.repository.clone(),
            self.registry.clone(),
            self.gate.clone(),
            self.deferred.clone(),
            BroadcastSettings::from_config(&self.config),
        )
    }

    fn moderator(&self) -> ChannelModerator {
        ChannelModerator::new(
            self.client.clone(),
            self.client.clone(),
            self.channels.clone(),
            self.registry.clone(),
            self.gate.clone(),
            ModerationSettings::from_config(&self.config),
        )
    }

    fn require_token(&self) -> Result<()> {
        if self.config.telegram.bot_token.is_empty() {
            anyhow::bail!("no bot token: set telegram.bot_token or HERALD_BOT_TOKEN");
        }
        Ok(())
    }

    /// Ctrl-C asks the active run of `kind` to stop at its next window, or
    /// signals shutdown when nothing is running.
    fn cancel_on_ctrl_c(&self, kind: OperationKind) {
        let registry = self.registry.clone();
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            loop {
                if tokio::signal::ctrl_c().await.is_err() {
                    return;
                }
                match registry.cancel(kind) {
                    CancelOutcome::Requested => {
                        println!("\n🛑 Stopping after the current window...");
                    }
                    CancelOutcome::NothingToCancel => {
                        println!("\nNothing to cancel, shutting down.");
                        shutdown.notify_one();
                    }
                }
            }
        });
    }

    async fn broadcast(&self, kind: OperationKind, args: BroadcastArgs) -> Result<()> {
        let delete_after = if args.permanent {
            None
        } else {
            match args.delete_after {
                Some(secs) => Some(Duration::from_secs(secs)).filter(|d| !d.is_zero()),
                None => self.config.broadcast.delete_delay(),
            }
        };
        let request = BroadcastRequest {
            kind,
            operator_chat: args.chat,
            payload: Payload {
                source_chat_id: args.from.unwrap_or(args.chat),
                message_id: args.message,
                forwarded: args.forward,
            },
            delete_after,
        };

        self.cancel_on_ctrl_c(kind);
        let snapshot = self.broadcaster().run(request).await?;
        println!(
            "{} {}: {}/{} delivered, {} errors ({:.2}% success)",
            if snapshot.stopped { "🛑" } else { "✅" },
            kind,
            snapshot.done,
            snapshot.total,
            snapshot.errors,
            snapshot.success_rate()
        );
        if !snapshot.failed_targets.is_empty() {
            println!("   Failed: {}", snapshot.failed_targets.join(", "));
        }

        let pending = self.deferred.pending();
        if pending > 0 {
            println!("⏳ Waiting for {pending} scheduled deletion(s) (Ctrl-C to abandon)...");
            let (_, abandoned) = self.deferred.drain_until(self.shutdown.notified()).await;
            if abandoned > 0 {
                println!("⚠️ {abandoned} delivered message(s) were left undeleted");
            }
        }
        Ok(())
    }

    async fn moderate(&self, action: ModerationAction, args: UserArgs) -> Result<()> {
        self.cancel_on_ctrl_c(OperationKind::ChannelModeration);
        let report = self.moderator().run(action, args.user, args.chat).await?;
        for (idx, row) in report.rows.iter().enumerate() {
            let status = row
                .status
                .as_ref()
                .map(ToString::to_string)
                .unwrap_or_else(|| "Not processed".into());
            println!("#CH_{idx} {} ~ {status}", row.channel_id);
        }
        Ok(())
    }

    async fn stats(&self) -> Result<()> {
        let tracked = self.repository.tracked_channels().await?;
        if tracked.is_empty() {
            println!("No tracked channels in {}", self.repository.dir().display());
        }
        for channel in tracked {
            println!(
                "{} {}\n   ✅ Joined : {}  ❌ Left : {}",
                channel.id,
                channel.title.as_deref().unwrap_or(""),
                channel.joined,
                channel.left
            );
        }
        Ok(())
    }

    async fn watch(&self) -> Result<()> {
        let tracker = MembershipTracker::new(self.repository.clone(), self.channels.clone());
        let mut updates = herald_telegram::start_member_polling(self.client.clone());
        println!("📡 Watching membership changes (Ctrl-C to stop)");

        loop {
            tokio::select! {
                update = updates.next() => {
                    let Some(update) = update else { break };
                    let event = tracker
                        .on_member_update(&update.channel_id, update.user_id, &update.status)
                        .await;
                    tracing::debug!("{} {} -> {:?}", update.channel_id, update.user_id, event);
                }
                _ = tokio::signal::ctrl_c() => break,
            }
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        "herald=debug,herald_engine=debug,herald_telegram=debug"
    } else {
        "herald=info,herald_engine=info,herald_telegram=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();

    let mut config = match &cli.config {
        Some(path) => HeraldConfig::load_from(path)?,
        None => HeraldConfig::load()?,
    };
    if let Some(token) = cli.token {
        config.telegram.bot_token = token;
    }
    let data_dir = expand_path(cli.data_dir.as_deref().unwrap_or(&config.store.data_dir));

    let app = App::new(config, &data_dir)?;

    match cli.command {
        Command::AddUser { user_id } => {
            app.repository.add_user(user_id).await?;
            println!("✅ User {user_id} added");
            Ok(())
        }
        Command::AddChannel {
            channel_id,
            tracked,
        } => {
            if tracked {
                app.repository
                    .track_channel(TrackedChannel::new(&channel_id))
                    .await?;
            } else {
                app.repository
                    .add_broadcast_channel(Target::channel(&channel_id))
                    .await?;
            }
            println!("✅ Channel {channel_id} added");
            Ok(())
        }
        Command::Stats => app.stats().await,
        Command::Broadcast(args) => {
            app.require_token()?;
            app.broadcast(OperationKind::UserBroadcast, args).await
        }
        Command::ChannelBroadcast(args) => {
            app.require_token()?;
            app.broadcast(OperationKind::ChannelBroadcast, args).await
        }
        Command::ChannelStatus(args) => {
            app.require_token()?;
            app.moderate(ModerationAction::StatusCheck, args).await
        }
        Command::Ban { target, left_only } => {
            app.require_token()?;
            let action = if left_only {
                ModerationAction::BanLeft
            } else {
                ModerationAction::BanAll
            };
            app.moderate(action, target).await
        }
        Command::Unban(args) => {
            app.require_token()?;
            app.moderate(ModerationAction::Unban, args).await
        }
        Command::Watch => {
            app.require_token()?;
            app.watch().await
        }
    }
}
