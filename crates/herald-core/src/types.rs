//! Domain types shared between the engine, the transport and the store.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The kinds of bulk operation. Each kind owns one run slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    /// Push one message to every bot user.
    UserBroadcast,
    /// Push one message to every broadcast channel.
    ChannelBroadcast,
    /// Ban, unban or status-check one user across operator channels.
    ChannelModeration,
}

impl OperationKind {
    pub const ALL: [OperationKind; 3] = [
        OperationKind::UserBroadcast,
        OperationKind::ChannelBroadcast,
        OperationKind::ChannelModeration,
    ];

    /// Plural noun for the targets of this kind, used in operator texts.
    pub fn target_noun(&self) -> &'static str {
        match self {
            OperationKind::UserBroadcast => "users",
            OperationKind::ChannelBroadcast | OperationKind::ChannelModeration => "channels",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::UserBroadcast => write!(f, "user broadcast"),
            OperationKind::ChannelBroadcast => write!(f, "channel broadcast"),
            OperationKind::ChannelModeration => write!(f, "channel moderation"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    User,
    Channel,
}

/// A single remote recipient.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Target {
    /// Chat id as the remote API expects it (`"12345"`, `"-100…"`, `"@name"`).
    pub id: String,
    pub kind: TargetKind,
    /// Cached display name, channels only.
    #[serde(default)]
    pub title: Option<String>,
    /// Cached invite link, channels only.
    #[serde(default)]
    pub invite_link: Option<String>,
}

impl Target {
    pub fn user(id: impl ToString) -> Self {
        Self {
            id: id.to_string(),
            kind: TargetKind::User,
            title: None,
            invite_link: None,
        }
    }

    pub fn channel(id: impl ToString) -> Self {
        Self {
            id: id.to_string(),
            kind: TargetKind::Channel,
            title: None,
            invite_link: None,
        }
    }
}

/// The message an operator wants delivered: a reference to an existing message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    /// Chat the original message lives in (usually the operator's chat).
    pub source_chat_id: i64,
    pub message_id: i64,
    /// The operator forwarded it to the bot: forward instead of copy.
    #[serde(default)]
    pub forwarded: bool,
}

impl Payload {
    pub fn is_empty(&self) -> bool {
        self.message_id <= 0
    }
}

/// A message sent by the bot that can later be edited or deleted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageHandle {
    pub chat_id: String,
    pub message_id: i64,
}

impl MessageHandle {
    pub fn new(chat_id: impl ToString, message_id: i64) -> Self {
        Self {
            chat_id: chat_id.to_string(),
            message_id,
        }
    }
}

/// A user's membership status in a chat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemberStatus {
    Creator,
    Administrator,
    Member,
    Restricted,
    Left,
    Kicked,
    Unknown(String),
}

impl MemberStatus {
    pub fn parse(status: &str) -> Self {
        match status {
            "creator" => Self::Creator,
            "administrator" => Self::Administrator,
            "member" => Self::Member,
            "restricted" => Self::Restricted,
            "left" => Self::Left,
            "kicked" | "banned" => Self::Kicked,
            other => Self::Unknown(other.to_string()),
        }
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Self::Creator | Self::Administrator)
    }

    /// Not currently in the chat: left on their own or removed.
    pub fn is_gone(&self) -> bool {
        matches!(self, Self::Left | Self::Kicked)
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Creator => "creator",
            Self::Administrator => "administrator",
            Self::Member => "member",
            Self::Restricted => "restricted",
            Self::Left => "left",
            Self::Kicked => "kicked",
            Self::Unknown(s) => s,
        }
    }
}

impl fmt::Display for MemberStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Chat metadata from the remote.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatInfo {
    pub title: Option<String>,
    pub invite_link: Option<String>,
    pub username: Option<String>,
}

impl ChatInfo {
    /// Invite link, falling back to the public `t.me` link.
    pub fn link(&self) -> Option<String> {
        self.invite_link
            .clone()
            .or_else(|| self.username.as_ref().map(|u| format!("https://t.me/{u}")))
    }
}

/// Per-user, per-channel membership history.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelFlags {
    pub has_ever_joined: bool,
    pub has_ever_left: bool,
    pub currently_joined: bool,
}
