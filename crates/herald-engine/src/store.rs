//! File-based target store — users, channels and membership flags as JSON.
//!
//! | File | Content |
//! |------|---------|
//! | `users.json` | user ids known to the bot |
//! | `channels.json` | broadcast channels and tracked (moderated) channels with counters |
//! | `flags.json` | per-user, per-channel membership flags |
//!
//! Missing files read as empty. Every read-modify-write holds one lock so
//! counter increments never race.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use herald_core::traits::TargetRepository;
use herald_core::types::{ChannelFlags, Target};
use herald_core::{HeraldError, Result};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

const USERS_FILE: &str = "users.json";
const CHANNELS_FILE: &str = "channels.json";
const FLAGS_FILE: &str = "flags.json";

/// A channel the operator moderates, with its membership counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedChannel {
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub invite_link: Option<String>,
    #[serde(default)]
    pub joined: u64,
    #[serde(default)]
    pub left: u64,
}

impl TrackedChannel {
    pub fn new(id: impl ToString) -> Self {
        Self {
            id: id.to_string(),
            title: None,
            invite_link: None,
            joined: 0,
            left: 0,
        }
    }

    fn to_target(&self) -> Target {
        Target {
            title: self.title.clone(),
            invite_link: self.invite_link.clone(),
            ..Target::channel(&self.id)
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct ChannelsDocument {
    #[serde(default)]
    broadcast: Vec<Target>,
    #[serde(default)]
    tracked: Vec<TrackedChannel>,
}

type FlagsDocument = BTreeMap<String, BTreeMap<String, ChannelFlags>>;

/// JSON-file implementation of `TargetRepository`.
pub struct JsonRepository {
    dir: PathBuf,
    lock: Mutex<()>,
}

impl JsonRepository {
    /// Open (creating if needed) a store in `dir`.
    pub fn new(dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            lock: Mutex::new(()),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Remember a user; known users get membership tracking.
    pub async fn add_user(&self, user_id: i64) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut users: Vec<i64> = self.read(USERS_FILE).await?;
        if !users.contains(&user_id) {
            users.push(user_id);
            self.write(USERS_FILE, &users).await?;
        }
        Ok(())
    }

    pub async fn add_broadcast_channel(&self, channel: Target) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut doc: ChannelsDocument = self.read(CHANNELS_FILE).await?;
        if !doc.broadcast.iter().any(|c| c.id == channel.id) {
            doc.broadcast.push(channel);
            self.write(CHANNELS_FILE, &doc).await?;
        }
        Ok(())
    }

    pub async fn track_channel(&self, channel: TrackedChannel) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut doc: ChannelsDocument = self.read(CHANNELS_FILE).await?;
        if !doc.tracked.iter().any(|c| c.id == channel.id) {
            doc.tracked.push(channel);
            self.write(CHANNELS_FILE, &doc).await?;
        }
        Ok(())
    }

    /// Tracked channels with their join/leave counters.
    pub async fn tracked_channels(&self) -> Result<Vec<TrackedChannel>> {
        let doc: ChannelsDocument = self.read(CHANNELS_FILE).await?;
        Ok(doc.tracked)
    }

    async fn bump_counter(&self, channel_id: &str, field: fn(&mut TrackedChannel) -> &mut u64) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut doc: ChannelsDocument = self.read(CHANNELS_FILE).await?;
        let channel = doc
            .tracked
            .iter_mut()
            .find(|c| c.id == channel_id)
            .ok_or_else(|| HeraldError::Store(format!("channel {channel_id} is not tracked")))?;
        *field(channel) += 1;
        self.write(CHANNELS_FILE, &doc).await
    }

    async fn read<T: DeserializeOwned + Default>(&self, name: &str) -> Result<T> {
        let file = self.dir.join(name);
        match tokio::fs::read_to_string(&file).await {
            Ok(json) => Ok(serde_json::from_str(&json)?),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(T::default()),
            Err(e) => Err(e.into()),
        }
    }

    async fn write<T: Serialize>(&self, name: &str, value: &T) -> Result<()> {
        let file = self.dir.join(name);
        let tmp = self.dir.join(format!("{name}.tmp"));
        let json = serde_json::to_string_pretty(value)?;
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &file).await?;
        tracing::debug!("💾 Saved {}", file.display());
        Ok(())
    }
}

#[async_trait]
impl TargetRepository for JsonRepository {
    async fn list_users(&self) -> Result<Vec<Target>> {
        let users: Vec<i64> = self.read(USERS_FILE).await?;
        Ok(users.into_iter().map(Target::user).collect())
    }

    async fn list_channels(&self) -> Result<Vec<Target>> {
        let doc: ChannelsDocument = self.read(CHANNELS_FILE).await?;
        Ok(doc.broadcast)
    }

    async fn operator_channels(&self) -> Result<Vec<Target>> {
        let doc: ChannelsDocument = self.read(CHANNELS_FILE).await?;
        Ok(doc.tracked.iter().map(TrackedChannel::to_target).collect())
    }

    async fn increment_channel_join_count(&self, channel_id: &str) -> Result<()> {
        self.bump_counter(channel_id, |c| &mut c.joined).await
    }

    async fn increment_channel_leave_count(&self, channel_id: &str) -> Result<()> {
        self.bump_counter(channel_id, |c| &mut c.left).await
    }

    async fn channel_flags(&self, user_id: i64, channel_id: &str) -> Result<Option<ChannelFlags>> {
        let users: Vec<i64> = self.read(USERS_FILE).await?;
        if !users.contains(&user_id) {
            return Ok(None);
        }
        let flags: FlagsDocument = self.read(FLAGS_FILE).await?;
        Ok(Some(
            flags
                .get(&user_id.to_string())
                .and_then(|channels| channels.get(channel_id))
                .copied()
                .unwrap_or_default(),
        ))
    }

    async fn set_channel_flags(&self, user_id: i64, channel_id: &str, flags: ChannelFlags) -> Result<()> {
        let _guard = self.lock.lock().await;
        let mut doc: FlagsDocument = self.read(FLAGS_FILE).await?;
        doc.entry(user_id.to_string())
            .or_default()
            .insert(channel_id.to_string(), flags);
        self.write(FLAGS_FILE, &doc).await
    }
}
