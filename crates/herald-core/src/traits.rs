//! Collaborator traits — the narrow seams the engine depends on.

use async_trait::async_trait;

use crate::error::{Result, TransportError};
use crate::types::{ChannelFlags, ChatInfo, MemberStatus, MessageHandle, Payload, Target};

/// The remote messaging API, as seen by per-target actions.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Deliver the payload to the target, forwarding or copying as the payload says.
    async fn send_or_forward(
        &self,
        target: &Target,
        payload: &Payload,
    ) -> std::result::Result<MessageHandle, TransportError>;

    async fn delete_message(&self, handle: &MessageHandle) -> std::result::Result<(), TransportError>;

    async fn get_membership(
        &self,
        chat_id: &str,
        user_id: i64,
    ) -> std::result::Result<MemberStatus, TransportError>;

    /// Ban and revoke the user's messages.
    async fn ban(&self, chat_id: &str, user_id: i64) -> std::result::Result<(), TransportError>;

    async fn unban(&self, chat_id: &str, user_id: i64) -> std::result::Result<(), TransportError>;

    async fn get_chat_info(&self, chat_id: &str) -> std::result::Result<ChatInfo, TransportError>;

    /// The bot's own user id.
    async fn bot_user_id(&self) -> std::result::Result<i64, TransportError>;
}

/// The operator's chat: send a status message, then keep editing it.
#[async_trait]
pub trait OperatorUi: Send + Sync {
    async fn send(&self, chat_id: i64, text: &str) -> std::result::Result<MessageHandle, TransportError>;

    async fn edit(&self, handle: &MessageHandle, text: &str) -> std::result::Result<(), TransportError>;

    /// Send an image with a caption (used for summary charts).
    async fn send_photo(
        &self,
        chat_id: i64,
        file_name: &str,
        bytes: Vec<u8>,
        caption: &str,
    ) -> std::result::Result<MessageHandle, TransportError>;
}

/// The document store holding users and channels.
#[async_trait]
pub trait TargetRepository: Send + Sync {
    async fn list_users(&self) -> Result<Vec<Target>>;

    /// Channels that receive channel broadcasts.
    async fn list_channels(&self) -> Result<Vec<Target>>;

    /// Channels the operator moderates (ban/unban/status checks).
    async fn operator_channels(&self) -> Result<Vec<Target>>;

    async fn increment_channel_join_count(&self, channel_id: &str) -> Result<()>;

    async fn increment_channel_leave_count(&self, channel_id: &str) -> Result<()>;

    /// Membership history; `None` when the user is unknown to the bot.
    async fn channel_flags(&self, user_id: i64, channel_id: &str) -> Result<Option<ChannelFlags>>;

    async fn set_channel_flags(&self, user_id: i64, channel_id: &str, flags: ChannelFlags) -> Result<()>;
}
