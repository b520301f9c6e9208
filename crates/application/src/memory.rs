//! 内存版持久化实现
//!
//! 用于本地运行和测试。支持注入延迟与写失败，以便验证超时和降级路径。

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use domain::{
    ChatStore, Conversation, ConversationId, Membership, Message, MessageId, MessageStatus,
    Presence, RepositoryError, RepositoryResult, Timestamp, UserId,
};
use tokio::sync::RwLock;

#[derive(Default)]
struct State {
    conversations: HashMap<ConversationId, Conversation>,
    messages: HashMap<MessageId, Message>,
    /// 每个会话按写入顺序保存的消息 id
    timelines: HashMap<ConversationId, Vec<MessageId>>,
    presence: HashMap<UserId, Presence>,
}

#[derive(Default)]
pub struct InMemoryChatStore {
    state: RwLock<State>,
    latency: RwLock<Option<Duration>>,
    fail_writes: AtomicBool,
}

impl InMemoryChatStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert_conversation(&self, conversation: Conversation) {
        self.state
            .write()
            .await
            .conversations
            .insert(conversation.id, conversation);
    }

    /// 把用户移出会话（模拟外部服务修改成员关系）
    pub async fn remove_participant(&self, conversation_id: ConversationId, user_id: UserId) {
        if let Some(conversation) = self.state.write().await.conversations.get_mut(&conversation_id) {
            conversation.participants.retain(|p| p.user_id != user_id);
        }
    }

    /// 之后每次调用前先等待 `latency`
    pub async fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.write().await = latency;
    }

    /// 开启后所有写操作返回存储错误
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub async fn conversation(&self, conversation_id: ConversationId) -> Option<Conversation> {
        self.state
            .read()
            .await
            .conversations
            .get(&conversation_id)
            .cloned()
    }

    /// 按写入顺序返回会话内的消息
    pub async fn messages_in(&self, conversation_id: ConversationId) -> Vec<Message> {
        let state = self.state.read().await;
        state
            .timelines
            .get(&conversation_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| state.messages.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub async fn presence_of(&self, user_id: UserId) -> Option<Presence> {
        self.state.read().await.presence.get(&user_id).cloned()
    }

    async fn simulate_latency(&self) {
        let latency = *self.latency.read().await;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn check_writable(&self) -> RepositoryResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(RepositoryError::storage("injected write failure"));
        }
        Ok(())
    }
}

#[async_trait]
impl ChatStore for InMemoryChatStore {
    async fn find_conversation_membership(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
    ) -> RepositoryResult<Option<Membership>> {
        self.simulate_latency().await;
        let state = self.state.read().await;
        Ok(state.conversations.get(&conversation_id).and_then(|conversation| {
            conversation.participant(user_id).map(|participant| Membership {
                participant: participant.clone(),
                conversation: conversation.clone(),
            })
        }))
    }

    async fn find_message(&self, id: MessageId) -> RepositoryResult<Option<Message>> {
        self.simulate_latency().await;
        Ok(self.state.read().await.messages.get(&id).cloned())
    }

    async fn create_message(&self, message: &Message) -> RepositoryResult<Message> {
        self.simulate_latency().await;
        self.check_writable()?;
        let mut guard = self.state.write().await;
        let state = &mut *guard;
        if state.messages.contains_key(&message.id) {
            return Err(RepositoryError::Conflict);
        }
        state
            .conversations
            .get_mut(&message.conversation_id)
            .ok_or(RepositoryError::NotFound)?
            .record_message(message.id, message.created_at);

        state.messages.insert(message.id, message.clone());
        state
            .timelines
            .entry(message.conversation_id)
            .or_default()
            .push(message.id);
        Ok(message.clone())
    }

    async fn update_message_status(
        &self,
        id: MessageId,
        status: MessageStatus,
    ) -> RepositoryResult<Message> {
        self.simulate_latency().await;
        self.check_writable()?;
        let mut state = self.state.write().await;
        let message = state.messages.get_mut(&id).ok_or(RepositoryError::NotFound)?;
        message.status = status;
        Ok(message.clone())
    }

    async fn update_participant_read_cursor(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
        read_at: Timestamp,
    ) -> RepositoryResult<()> {
        self.simulate_latency().await;
        self.check_writable()?;
        let mut state = self.state.write().await;
        let participant = state
            .conversations
            .get_mut(&conversation_id)
            .and_then(|c| c.participants.iter_mut().find(|p| p.user_id == user_id))
            .ok_or(RepositoryError::NotFound)?;
        participant.last_read_at = Some(match participant.last_read_at {
            Some(current) if current > read_at => current,
            _ => read_at,
        });
        Ok(())
    }

    async fn upsert_presence(&self, presence: &Presence) -> RepositoryResult<()> {
        self.simulate_latency().await;
        self.check_writable()?;
        self.state
            .write()
            .await
            .presence
            .insert(presence.user_id, presence.clone());
        Ok(())
    }
}
