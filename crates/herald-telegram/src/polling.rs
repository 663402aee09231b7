//! Long polling for membership changes.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::stream::Stream;

use crate::api::MemberUpdate;
use crate::client::TelegramClient;

const LONG_POLL_SECS: u64 = 30;
const ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// Poll `chat_member` updates in a background task; returns them as a stream.
///
/// The task stops once the stream is dropped.
pub fn start_member_polling(client: Arc<TelegramClient>) -> MemberUpdateStream {
    let (tx, rx) = tokio::sync::mpsc::unbounded_channel();

    tokio::spawn(async move {
        let mut offset = 0;
        tracing::info!("📡 Membership polling started");

        loop {
            match client.get_updates(offset, LONG_POLL_SECS).await {
                Ok(updates) => {
                    for update in updates {
                        offset = offset.max(update.update_id + 1);
                        if let Some(change) = update.to_member_update()
                            && tx.send(change).is_err()
                        {
                            tracing::info!("Membership polling stopped (receiver dropped)");
                            return;
                        }
                    }
                }
                Err(e) => {
                    tracing::error!("Membership polling error: {e}");
                    tokio::time::sleep(ERROR_BACKOFF).await;
                }
            }
            if tx.is_closed() {
                return;
            }
        }
    });

    MemberUpdateStream { rx }
}

/// Stream of membership changes from polling.
pub struct MemberUpdateStream {
    rx: tokio::sync::mpsc::UnboundedReceiver<MemberUpdate>,
}

impl Stream for MemberUpdateStream {
    type Item = MemberUpdate;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}
