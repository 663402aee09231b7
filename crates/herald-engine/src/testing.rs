//! In-memory collaborators for tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};

use async_trait::async_trait;
use herald_core::traits::{OperatorUi, TargetRepository, Transport};
use herald_core::types::{ChannelFlags, ChatInfo, MemberStatus, MessageHandle, Payload, Target};
use herald_core::{HeraldError, Result, TransportError};
use tokio::time::Instant;

type CallResult<T> = std::result::Result<T, TransportError>;

/// Scripted remote API. Unscripted calls succeed.
#[derive(Default)]
pub struct ScriptedTransport {
    sends: Mutex<HashMap<String, VecDeque<CallResult<()>>>>,
    send_log: Mutex<Vec<(String, Instant)>>,
    deletes: Mutex<VecDeque<CallResult<()>>>,
    delete_failures: AtomicU32,
    delete_log: Mutex<Vec<(MessageHandle, Instant)>>,
    members: Mutex<HashMap<(String, i64), CallResult<MemberStatus>>>,
    chats: Mutex<HashMap<String, ChatInfo>>,
    bans: Mutex<Vec<(String, i64)>>,
    unbans: Mutex<Vec<(String, i64)>>,
    ban_errors: Mutex<HashMap<String, TransportError>>,
    bot_id_failures: AtomicU32,
    bot_id_calls: AtomicU32,
    next_message_id: AtomicI64,
}

pub const BOT_ID: i64 = 999;

impl ScriptedTransport {
    /// Queue responses for sends to `target`, consumed in order.
    pub fn script_send(&self, target: &str, results: Vec<CallResult<()>>) {
        self.sends
            .lock()
            .unwrap()
            .insert(target.to_string(), results.into());
    }

    /// Queue responses for deletions, consumed in order before `fail_deletes`.
    pub fn script_deletes(&self, results: Vec<CallResult<()>>) {
        *self.deletes.lock().unwrap() = results.into();
    }

    pub fn fail_deletes(&self, times: u32) {
        self.delete_failures.store(times, Ordering::SeqCst);
    }

    pub fn set_member(&self, chat: &str, user: i64, status: CallResult<MemberStatus>) {
        self.members
            .lock()
            .unwrap()
            .insert((chat.to_string(), user), status);
    }

    pub fn set_chat(&self, chat: &str, info: ChatInfo) {
        self.chats.lock().unwrap().insert(chat.to_string(), info);
    }

    pub fn fail_ban(&self, chat: &str, error: TransportError) {
        self.ban_errors
            .lock()
            .unwrap()
            .insert(chat.to_string(), error);
    }

    pub fn fail_bot_id(&self, times: u32) {
        self.bot_id_failures.store(times, Ordering::SeqCst);
    }

    pub fn send_attempts(&self, target: &str) -> Vec<Instant> {
        self.send_log
            .lock()
            .unwrap()
            .iter()
            .filter(|(t, _)| t == target)
            .map(|(_, at)| *at)
            .collect()
    }

    pub fn total_sends(&self) -> usize {
        self.send_log.lock().unwrap().len()
    }

    pub fn delete_attempts(&self) -> Vec<(MessageHandle, Instant)> {
        self.delete_log.lock().unwrap().clone()
    }

    pub fn bans(&self) -> Vec<(String, i64)> {
        self.bans.lock().unwrap().clone()
    }

    pub fn unbans(&self) -> Vec<(String, i64)> {
        self.unbans.lock().unwrap().clone()
    }

    pub fn bot_id_calls(&self) -> u32 {
        self.bot_id_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send_or_forward(&self, target: &Target, _payload: &Payload) -> CallResult<MessageHandle> {
        self.send_log
            .lock()
            .unwrap()
            .push((target.id.clone(), Instant::now()));
        let scripted = self
            .sends
            .lock()
            .unwrap()
            .get_mut(&target.id)
            .and_then(|queue| queue.pop_front());
        scripted.unwrap_or(Ok(()))?;
        let id = self.next_message_id.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(MessageHandle::new(&target.id, id))
    }

    async fn delete_message(&self, handle: &MessageHandle) -> CallResult<()> {
        self.delete_log
            .lock()
            .unwrap()
            .push((handle.clone(), Instant::now()));
        if let Some(scripted) = self.deletes.lock().unwrap().pop_front() {
            return scripted;
        }
        let remaining = self.delete_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.delete_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(TransportError::api(400, "Bad Request: message can't be deleted"));
        }
        Ok(())
    }

    async fn get_membership(&self, chat_id: &str, user_id: i64) -> CallResult<MemberStatus> {
        let members = self.members.lock().unwrap();
        match members.get(&(chat_id.to_string(), user_id)) {
            Some(result) => result.clone(),
            None if user_id == BOT_ID => Ok(MemberStatus::Administrator),
            None => Ok(MemberStatus::Member),
        }
    }

    async fn ban(&self, chat_id: &str, user_id: i64) -> CallResult<()> {
        if let Some(e) = self.ban_errors.lock().unwrap().get(chat_id) {
            return Err(e.clone());
        }
        self.bans.lock().unwrap().push((chat_id.to_string(), user_id));
        Ok(())
    }

    async fn unban(&self, chat_id: &str, user_id: i64) -> CallResult<()> {
        self.unbans
            .lock()
            .unwrap()
            .push((chat_id.to_string(), user_id));
        Ok(())
    }

    async fn get_chat_info(&self, chat_id: &str) -> CallResult<ChatInfo> {
        self.chats
            .lock()
            .unwrap()
            .get(chat_id)
            .cloned()
            .ok_or_else(|| TransportError::api(400, "Bad Request: chat not found"))
    }

    async fn bot_user_id(&self) -> CallResult<i64> {
        self.bot_id_calls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.bot_id_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.bot_id_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(TransportError::Network("connection reset".into()));
        }
        Ok(BOT_ID)
    }
}

/// Records everything the engine shows the operator.
#[derive(Default)]
pub struct RecordingUi {
    sent: Mutex<Vec<(i64, String)>>,
    edits: Mutex<Vec<(MessageHandle, String)>>,
    edit_attempts: AtomicU32,
    edit_error: Mutex<Option<TransportError>>,
    photos: Mutex<Vec<(i64, String, Vec<u8>, String)>>,
    fail_photos: AtomicBool,
    next_message_id: AtomicI64,
}

impl RecordingUi {
    pub fn fail_edits_with(&self, error: TransportError) {
        *self.edit_error.lock().unwrap() = Some(error);
    }

    pub fn fail_photos(&self) {
        self.fail_photos.store(true, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<(i64, String)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn edits(&self) -> Vec<(MessageHandle, String)> {
        self.edits.lock().unwrap().clone()
    }

    pub fn edit_attempts(&self) -> u32 {
        self.edit_attempts.load(Ordering::SeqCst)
    }

    pub fn photos(&self) -> Vec<(i64, String, Vec<u8>, String)> {
        self.photos.lock().unwrap().clone()
    }

    fn next_id(&self) -> i64 {
        self.next_message_id.fetch_add(1, Ordering::SeqCst) + 1
    }
}

#[async_trait]
impl OperatorUi for RecordingUi {
    async fn send(&self, chat_id: i64, text: &str) -> CallResult<MessageHandle> {
        self.sent.lock().unwrap().push((chat_id, text.to_string()));
        Ok(MessageHandle::new(chat_id, self.next_id()))
    }

    async fn edit(&self, handle: &MessageHandle, text: &str) -> CallResult<()> {
        self.edit_attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(e) = self.edit_error.lock().unwrap().clone() {
            return Err(e);
        }
        self.edits
            .lock()
            .unwrap()
            .push((handle.clone(), text.to_string()));
        Ok(())
    }

    async fn send_photo(
        &self,
        chat_id: i64,
        file_name: &str,
        bytes: Vec<u8>,
        caption: &str,
    ) -> CallResult<MessageHandle> {
        if self.fail_photos.load(Ordering::SeqCst) {
            return Err(TransportError::api(400, "Bad Request: PHOTO_INVALID_DIMENSIONS"));
        }
        self.photos.lock().unwrap().push((
            chat_id,
            file_name.to_string(),
            bytes,
            caption.to_string(),
        ));
        Ok(MessageHandle::new(chat_id, self.next_id()))
    }
}

/// In-memory document store.
#[derive(Default)]
pub struct MemoryRepository {
    pub users: Mutex<Vec<Target>>,
    pub channels: Mutex<Vec<Target>>,
    fail_reads: AtomicBool,
    channel_reads: AtomicU32,
    joins: Mutex<HashMap<String, u64>>,
    leaves: Mutex<HashMap<String, u64>>,
    flags: Mutex<HashMap<(i64, String), ChannelFlags>>,
}

impl MemoryRepository {
    pub fn with_users(ids: impl IntoIterator<Item = i64>) -> Self {
        let repo = Self::default();
        *repo.users.lock().unwrap() = ids.into_iter().map(Target::user).collect();
        repo
    }

    pub fn with_channels(ids: &[&str]) -> Self {
        let repo = Self::default();
        *repo.channels.lock().unwrap() = ids.iter().map(|id| Target::channel(*id)).collect();
        repo
    }

    pub fn set_failing(&self, failing: bool) {
        self.fail_reads.store(failing, Ordering::SeqCst);
    }

    pub fn channel_reads(&self) -> u32 {
        self.channel_reads.load(Ordering::SeqCst)
    }

    pub fn known_user(&self, user_id: i64, channel_id: &str) {
        self.flags
            .lock()
            .unwrap()
            .insert((user_id, channel_id.to_string()), ChannelFlags::default());
    }

    pub fn flags_of(&self, user_id: i64, channel_id: &str) -> Option<ChannelFlags> {
        self.flags
            .lock()
            .unwrap()
            .get(&(user_id, channel_id.to_string()))
            .copied()
    }

    pub fn joins(&self, channel_id: &str) -> u64 {
        self.joins.lock().unwrap().get(channel_id).copied().unwrap_or(0)
    }

    pub fn leaves(&self, channel_id: &str) -> u64 {
        self.leaves.lock().unwrap().get(channel_id).copied().unwrap_or(0)
    }

    fn check(&self) -> Result<()> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(HeraldError::Store("store unreachable".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl TargetRepository for MemoryRepository {
    async fn list_users(&self) -> Result<Vec<Target>> {
        self.check()?;
        Ok(self.users.lock().unwrap().clone())
    }

    async fn list_channels(&self) -> Result<Vec<Target>> {
        self.check()?;
        Ok(self.channels.lock().unwrap().clone())
    }

    async fn operator_channels(&self) -> Result<Vec<Target>> {
        self.channel_reads.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        Ok(self.channels.lock().unwrap().clone())
    }

    async fn increment_channel_join_count(&self, channel_id: &str) -> Result<()> {
        *self
            .joins
            .lock()
            .unwrap()
            .entry(channel_id.to_string())
            .or_default() += 1;
        Ok(())
    }

    async fn increment_channel_leave_count(&self, channel_id: &str) -> Result<()> {
        *self
            .leaves
            .lock()
            .unwrap()
            .entry(channel_id.to_string())
            .or_default() += 1;
        Ok(())
    }

    async fn channel_flags(&self, user_id: i64, channel_id: &str) -> Result<Option<ChannelFlags>> {
        self.check()?;
        // Real stores suspend here; let other updates interleave.
        tokio::task::yield_now().await;
        Ok(self.flags_of(user_id, channel_id))
    }

    async fn set_channel_flags(&self, user_id: i64, channel_id: &str, flags: ChannelFlags) -> Result<()> {
        self.flags
            .lock()
            .unwrap()
            .insert((user_id, channel_id.to_string()), flags);
        Ok(())
    }
}
