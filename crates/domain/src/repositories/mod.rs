//! 持久化协作方接口
//!
//! 内层定义接口，外层（PostgreSQL / 内存实现）实现接口。
//! 持久化是 Presence / Message / Participant 的唯一可信来源。

use async_trait::async_trait;

use crate::entities::{Membership, Message, MessageStatus, Presence};
use crate::errors::RepositoryResult;
use crate::value_objects::{ConversationId, MessageId, Timestamp, UserId};

#[async_trait]
pub trait ChatStore: Send + Sync {
    /// 权威成员关系检查：用户不是参与者时返回 `None`。
    async fn find_conversation_membership(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
    ) -> RepositoryResult<Option<Membership>>;

    async fn find_message(&self, id: MessageId) -> RepositoryResult<Option<Message>>;

    /// 写入新消息，并在同一事务内推进会话的 `last_message_id` / `last_activity_at`。
    async fn create_message(&self, message: &Message) -> RepositoryResult<Message>;

    async fn update_message_status(
        &self,
        id: MessageId,
        status: MessageStatus,
    ) -> RepositoryResult<Message>;

    async fn update_participant_read_cursor(
        &self,
        conversation_id: ConversationId,
        user_id: UserId,
        read_at: Timestamp,
    ) -> RepositoryResult<()>;

    /// 在线状态审计记录，每次状态变化写一次。
    async fn upsert_presence(&self, presence: &Presence) -> RepositoryResult<()>;
}
