//! Telegram Bot API client — the `Transport` and `OperatorUi` behind the engine.

use std::time::Duration;

use async_trait::async_trait;
use herald_core::TransportError;
use herald_core::config::TelegramConfig;
use herald_core::traits::{OperatorUi, Transport};
use herald_core::types::{ChatInfo, MemberStatus, MessageHandle, Payload, Target};
use serde::de::DeserializeOwned;
use serde_json::json;

use crate::api::{
    ApiResponse, MessageId, TelegramChat, TelegramChatMember, TelegramUpdate, TelegramUser,
};

type CallResult<T> = std::result::Result<T, TransportError>;

/// Longest a single API call may take; long polls ask for 30s.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

pub struct TelegramClient {
    client: reqwest::Client,
    api_base: String,
    bot_token: String,
}

impl TelegramClient {
    pub fn new(bot_token: impl Into<String>, api_base: impl Into<String>) -> CallResult<Self> {
        let api_base: String = api_base.into();
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| TransportError::Network(format!("building HTTP client: {e}")))?;
        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            bot_token: bot_token.into(),
        })
    }

    pub fn from_config(config: &TelegramConfig) -> CallResult<Self> {
        Self::new(&config.bot_token, &config.api_base)
    }

    fn api_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.bot_token, method)
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, body: serde_json::Value) -> CallResult<T> {
        let response = self
            .client
            .post(self.api_url(method))
            .json(&body)
            .send()
            .await
            .map_err(|e| TransportError::Network(format!("{method} failed: {e}")))?;
        Self::decode(method, response).await
    }

    async fn decode<T: DeserializeOwned>(method: &str, response: reqwest::Response) -> CallResult<T> {
        let status = response.status().as_u16();
        let body: ApiResponse<T> = response
            .json()
            .await
            .map_err(|e| TransportError::Network(format!("invalid {method} response ({status}): {e}")))?;
        body.into_result(status)
    }

    /// Long-poll for `chat_member` updates after `offset`.
    pub async fn get_updates(&self, offset: i64, timeout_secs: u64) -> CallResult<Vec<TelegramUpdate>> {
        self.call(
            "getUpdates",
            json!({
                "offset": offset,
                "timeout": timeout_secs,
                "allowed_updates": ["chat_member"],
            }),
        )
        .await
    }

    pub async fn get_me(&self) -> CallResult<TelegramUser> {
        self.call("getMe", json!({})).await
    }

    /// Multipart upload of one file under `field`, with an HTML caption.
    async fn upload(
        &self,
        method: &str,
        field: &'static str,
        chat_id: i64,
        file_name: &str,
        bytes: Vec<u8>,
        caption: &str,
    ) -> CallResult<MessageHandle> {
        let file = reqwest::multipart::Part::bytes(bytes)
            .file_name(file_name.to_string())
            .mime_str(mime_for(file_name))
            .map_err(|e| TransportError::Network(format!("{method} part: {e}")))?;
        let form = reqwest::multipart::Form::new()
            .text("chat_id", chat_id.to_string())
            .text("caption", caption.to_string())
            .text("parse_mode", "HTML")
            .part(field, file);

        let response = self
            .client
            .post(self.api_url(method))
            .multipart(form)
            .send()
            .await
            .map_err(|e| TransportError::Network(format!("{method} failed: {e}")))?;
        let sent: MessageId = Self::decode(method, response).await?;
        Ok(MessageHandle::new(chat_id, sent.message_id))
    }
}

#[async_trait]
impl Transport for TelegramClient {
    async fn send_or_forward(&self, target: &Target, payload: &Payload) -> CallResult<MessageHandle> {
        let method = if payload.forwarded {
            "forwardMessage"
        } else {
            "copyMessage"
        };
        let sent: MessageId = self
            .call(
                method,
                json!({
                    "chat_id": target.id,
                    "from_chat_id": payload.source_chat_id,
                    "message_id": payload.message_id,
                }),
            )
            .await?;
        Ok(MessageHandle::new(&target.id, sent.message_id))
    }

    async fn delete_message(&self, handle: &MessageHandle) -> CallResult<()> {
        let _: bool = self
            .call(
                "deleteMessage",
                json!({ "chat_id": handle.chat_id, "message_id": handle.message_id }),
            )
            .await?;
        Ok(())
    }

    async fn get_membership(&self, chat_id: &str, user_id: i64) -> CallResult<MemberStatus> {
        let member: TelegramChatMember = self
            .call("getChatMember", json!({ "chat_id": chat_id, "user_id": user_id }))
            .await?;
        Ok(member.member_status())
    }

    async fn ban(&self, chat_id: &str, user_id: i64) -> CallResult<()> {
        let _: bool = self
            .call(
                "banChatMember",
                json!({ "chat_id": chat_id, "user_id": user_id, "revoke_messages": true }),
            )
            .await?;
        Ok(())
    }

    async fn unban(&self, chat_id: &str, user_id: i64) -> CallResult<()> {
        let _: bool = self
            .call(
                "unbanChatMember",
                json!({ "chat_id": chat_id, "user_id": user_id, "only_if_banned": true }),
            )
            .await?;
        Ok(())
    }

    async fn get_chat_info(&self, chat_id: &str) -> CallResult<ChatInfo> {
        let chat: TelegramChat = self.call("getChat", json!({ "chat_id": chat_id })).await?;
        Ok(chat.into())
    }

    async fn bot_user_id(&self) -> CallResult<i64> {
        Ok(self.get_me().await?.id)
    }
}

#[async_trait]
impl OperatorUi for TelegramClient {
    async fn send(&self, chat_id: i64, text: &str) -> CallResult<MessageHandle> {
        let sent: MessageId = self
            .call(
                "sendMessage",
                json!({
                    "chat_id": chat_id,
                    "text": text,
                    "parse_mode": "HTML",
                    "disable_web_page_preview": true,
                }),
            )
            .await?;
        Ok(MessageHandle::new(chat_id, sent.message_id))
    }

    async fn edit(&self, handle: &MessageHandle, text: &str) -> CallResult<()> {
        let _: serde_json::Value = self
            .call(
                "editMessageText",
                json!({
                    "chat_id": handle.chat_id,
                    "message_id": handle.message_id,
                    "text": text,
                    "parse_mode": "HTML",
                    "disable_web_page_preview": true,
                }),
            )
            .await?;
        Ok(())
    }

    async fn send_photo(
        &self,
        chat_id: i64,
        file_name: &str,
        bytes: Vec<u8>,
        caption: &str,
    ) -> CallResult<MessageHandle> {
        self.upload("sendPhoto", "photo", chat_id, file_name, bytes, caption)
            .await
    }
}

fn mime_for(file_name: &str) -> &'static str {
    match file_name.rsplit('.').next() {
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        _ => "application/octet-stream",
    }
}
