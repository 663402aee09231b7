//! Herald configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{HeraldError, Result};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HeraldConfig {
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub broadcast: BroadcastConfig,
    #[serde(default)]
    pub channels: ChannelsConfig,
    #[serde(default)]
    pub deferred: DeferredConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

impl HeraldConfig {
    /// Load config from the default path (~/.herald/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| HeraldError::Config(format!("Failed to read config: {e}")))?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| HeraldError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Save config to the default path.
    pub fn save(&self) -> Result<()> {
        let path = Self::default_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| HeraldError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(&path, content)?;
        Ok(())
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        let sizes = [
            ("broadcast.batch_size", self.broadcast.batch_size),
            ("channels.broadcast_batch_size", self.channels.broadcast_batch_size),
            ("channels.moderation_batch_size", self.channels.moderation_batch_size),
        ];
        for (name, value) in sizes {
            if value == 0 {
                return Err(HeraldError::Config(format!("{name} must be at least 1")));
            }
        }
        if self.deferred.max_attempts == 0 {
            return Err(HeraldError::Config("deferred.max_attempts must be at least 1".into()));
        }
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the Herald home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".herald")
    }
}

/// Bot credentials and the audit recipient.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    #[serde(default)]
    pub bot_token: String,
    /// Receives the audit-facing summary of every run.
    #[serde(default)]
    pub owner_chat_id: Option<i64>,
    #[serde(default = "default_api_base")]
    pub api_base: String,
}

fn default_api_base() -> String { "https://api.telegram.org".into() }

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            owner_chat_id: None,
            api_base: default_api_base(),
        }
    }
}

/// User broadcast tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_delay_ms")]
    pub inter_batch_delay_ms: u64,
    /// Minimum gap between any two outbound calls.
    #[serde(default = "default_delay_ms")]
    pub min_interval_ms: u64,
    /// Delete delivered copies after this many seconds; 0 = permanent.
    #[serde(default = "default_delete_delay")]
    pub delete_delay_secs: Option<u64>,
    #[serde(default = "default_delay_ms")]
    pub progress_min_interval_ms: u64,
    #[serde(default = "default_max_throttle_retries")]
    pub max_throttle_retries: u32,
}

fn default_batch_size() -> usize { 20 }
fn default_delay_ms() -> u64 { 1000 }
fn default_delete_delay() -> Option<u64> { Some(10) }
fn default_max_throttle_retries() -> u32 { 1000 }

impl BroadcastConfig {
    pub fn inter_batch_delay(&self) -> Duration {
        Duration::from_millis(self.inter_batch_delay_ms)
    }

    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }

    pub fn progress_min_interval(&self) -> Duration {
        Duration::from_millis(self.progress_min_interval_ms)
    }

    pub fn delete_delay(&self) -> Option<Duration> {
        self.delete_delay_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            inter_batch_delay_ms: default_delay_ms(),
            min_interval_ms: default_delay_ms(),
            delete_delay_secs: default_delete_delay(),
            progress_min_interval_ms: default_delay_ms(),
            max_throttle_retries: default_max_throttle_retries(),
        }
    }
}

/// Channel broadcast and moderation tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelsConfig {
    #[serde(default = "default_channel_broadcast_batch")]
    pub broadcast_batch_size: usize,
    #[serde(default = "default_moderation_batch")]
    pub moderation_batch_size: usize,
    #[serde(default = "default_delay_ms")]
    pub batch_delay_ms: u64,
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,
}

fn default_channel_broadcast_batch() -> usize { 10 }
fn default_moderation_batch() -> usize { 5 }
fn default_cache_ttl() -> u64 { 60 }

impl ChannelsConfig {
    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }
}

impl Default for ChannelsConfig {
    fn default() -> Self {
        Self {
            broadcast_batch_size: default_channel_broadcast_batch(),
            moderation_batch_size: default_moderation_batch(),
            batch_delay_ms: default_delay_ms(),
            cache_ttl_secs: default_cache_ttl(),
        }
    }
}

/// Deferred deletion retry budget.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeferredConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_delay_ms")]
    pub backoff_ms: u64,
}

fn default_max_attempts() -> u32 { 3 }

impl DeferredConfig {
    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_ms)
    }
}

impl Default for DeferredConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_ms: default_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

fn default_data_dir() -> String { "~/.herald/data".into() }

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}
