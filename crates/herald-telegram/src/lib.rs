//! # Herald Telegram
//! Telegram Bot API transport: deliveries, moderation calls, the operator's
//! status messages, and long polling for membership changes.

pub mod api;
pub mod client;
pub mod polling;

pub use api::MemberUpdate;
pub use client::TelegramClient;
pub use polling::{MemberUpdateStream, start_member_polling};
