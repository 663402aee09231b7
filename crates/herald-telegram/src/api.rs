//! Telegram Bot API wire types.

use herald_core::TransportError;
use herald_core::types::{ChatInfo, MemberStatus};
use serde::{Deserialize, Serialize};

/// Envelope of every Bot API answer.
#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    pub ok: bool,
    pub result: Option<T>,
    pub description: Option<String>,
    pub error_code: Option<u16>,
    pub parameters: Option<ResponseParameters>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResponseParameters {
    pub retry_after: Option<u64>,
    pub migrate_to_chat_id: Option<i64>,
}

impl<T> ApiResponse<T> {
    /// Unwrap the envelope. `http_status` stands in when the body has no `error_code`.
    pub fn into_result(self, http_status: u16) -> Result<T, TransportError> {
        if self.ok {
            return self
                .result
                .ok_or_else(|| TransportError::Network("response without result".into()));
        }
        Err(TransportError::Api {
            status: self.error_code.unwrap_or(http_status),
            description: self.description.unwrap_or_default(),
            retry_after: self.parameters.and_then(|p| p.retry_after),
        })
    }
}

/// `copyMessage` answers with only an id; `forwardMessage` with a full
/// message. Both carry `message_id`.
#[derive(Debug, Clone, Deserialize)]
pub struct MessageId {
    pub message_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramUser {
    pub id: i64,
    #[serde(default)]
    pub is_bot: bool,
    pub first_name: String,
    pub username: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramChat {
    pub id: i64,
    #[serde(rename = "type")]
    pub chat_type: String,
    pub title: Option<String>,
    pub username: Option<String>,
    pub invite_link: Option<String>,
}

impl From<TelegramChat> for ChatInfo {
    fn from(chat: TelegramChat) -> Self {
        ChatInfo {
            title: chat.title,
            invite_link: chat.invite_link,
            username: chat.username,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramChatMember {
    pub status: String,
    pub user: TelegramUser,
}

impl TelegramChatMember {
    pub fn member_status(&self) -> MemberStatus {
        MemberStatus::parse(&self.status)
    }
}

/// `chat_member` update: someone's status changed in a chat the bot administers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMemberUpdated {
    pub chat: TelegramChat,
    pub from: TelegramUser,
    pub old_chat_member: TelegramChatMember,
    pub new_chat_member: TelegramChatMember,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramUpdate {
    pub update_id: i64,
    pub chat_member: Option<ChatMemberUpdated>,
}

/// A membership change, reduced to what the tracker needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberUpdate {
    pub channel_id: String,
    pub user_id: i64,
    pub status: MemberStatus,
}

impl TelegramUpdate {
    pub fn to_member_update(&self) -> Option<MemberUpdate> {
        let update = self.chat_member.as_ref()?;
        if update.new_chat_member.user.is_bot {
            return None;
        }
        Some(MemberUpdate {
            channel_id: update.chat.id.to_string(),
            user_id: update.new_chat_member.user.id,
            status: update.new_chat_member.member_status(),
        })
    }
}
