//! 消息管道
//!
//! 发送：校验 → 持久化 → 房间广播 → 个人频道通知 → 领域事件。
//! 广播严格发生在持久化成功之后；同一会话的提交与广播在同一把
//! 会话锁内完成，因此订阅者看到的顺序就是提交顺序。

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use domain::{
    ChatStore, ConnectionId, ConversationId, DomainEvent, Identity, Message, MessageContent,
    MessageId, MessageStatus, MessageType, ServerEvent,
};
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::{
    clock::Clock, error::ApplicationError, hub::ConnectionHub, publisher::DomainEventPublisher,
    rooms::RoomRouter, timeout::within,
};

/// 通知预览的最大字符数
const PREVIEW_CHARS: usize = 100;

/// 消息管道依赖项
pub struct MessagePipelineDependencies {
    pub store: Arc<dyn ChatStore>,
    pub router: Arc<RoomRouter>,
    pub hub: Arc<ConnectionHub>,
    pub clock: Arc<dyn Clock>,
    pub publisher: Arc<dyn DomainEventPublisher>,
    pub store_timeout: Duration,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SendMessageRequest {
    pub conversation_id: ConversationId,
    pub content: String,
    pub message_type: Option<MessageType>,
    pub reply_to_message_id: Option<MessageId>,
}

/// 已读回执：`changed` 为 false 表示消息早已是已读
#[derive(Debug, Clone, PartialEq)]
pub struct ReadReceipt {
    pub message: Message,
    pub changed: bool,
}

pub struct MessagePipeline {
    deps: MessagePipelineDependencies,
    conversation_locks: DashMap<ConversationId, Arc<Mutex<()>>>,
}

impl MessagePipeline {
    pub fn new(deps: MessagePipelineDependencies) -> Self {
        Self {
            deps,
            conversation_locks: DashMap::new(),
        }
    }

    /// 取得会话锁。守卫释放后若没有其他任务持有或等待，锁条目随之删除。
    async fn lock_conversation(&self, conversation_id: ConversationId) -> ConversationGuard<'_> {
        let lock = self
            .conversation_locks
            .entry(conversation_id)
            .or_default()
            .value()
            .clone();
        ConversationGuard {
            locks: &self.conversation_locks,
            conversation_id,
            guard: Some(lock.lock_owned().await),
        }
    }

    /// 当前保留的会话锁数量
    pub fn tracked_conversations(&self) -> usize {
        self.conversation_locks.len()
    }

    pub async fn send(
        &self,
        sender: &Identity,
        connection_id: ConnectionId,
        request: SendMessageRequest,
    ) -> Result<Message, ApplicationError> {
        let conversation_id = request.conversation_id;
        let content = MessageContent::parse(request.content)?;

        // 每次发送都重新校验，加入房间之后成员关系可能已经变化
        let membership = self
            .deps
            .router
            .verify_membership(sender, conversation_id)
            .await?;
        if !membership.can_send() {
            return Err(ApplicationError::not_found("conversation", conversation_id));
        }

        if let Some(reply_to) = request.reply_to_message_id {
            let target = self.find_message(reply_to).await?;
            if target.map(|m| m.conversation_id) != Some(conversation_id) {
                return Err(ApplicationError::validation(format!(
                    "reply target {reply_to} is not in conversation {conversation_id}"
                )));
            }
        }

        let _guard = self.lock_conversation(conversation_id).await;

        let draft = Message::new(
            MessageId::generate(),
            conversation_id,
            sender.user_id,
            content,
            request.message_type.unwrap_or_default(),
            request.reply_to_message_id,
            self.deps.clock.now(),
        );
        let message = within(
            self.deps.store_timeout,
            "create_message",
            self.deps.store.create_message(&draft),
        )
        .await?;

        // 消息已落库，发送者游标写失败只记录日志
        if let Err(err) = within(
            self.deps.store_timeout,
            "update_participant_read_cursor",
            self.deps.store.update_participant_read_cursor(
                conversation_id,
                sender.user_id,
                message.created_at,
            ),
        )
        .await
        {
            tracing::warn!(
                message_id = %message.id,
                user_id = %sender.user_id,
                error = %err,
                "发送者已读游标更新失败"
            );
        }

        let now = self.deps.clock.now();
        let delivered = self.deps.router.broadcast(
            conversation_id,
            &ServerEvent::NewMessage {
                message: message.clone(),
                conversation_id,
                timestamp: now,
            },
            None,
        );

        let notification = ServerEvent::NewMessageNotification {
            conversation_id,
            sender_id: sender.user_id,
            sender_name: sender.display_name.clone(),
            message_preview: message.content.preview(PREVIEW_CHARS),
            timestamp: now,
        };
        for participant in membership.conversation.other_participants(sender.user_id) {
            self.deps.hub.send_to_user(participant.user_id, &notification);
        }

        tracing::info!(
            message_id = %message.id,
            conversation_id = %conversation_id,
            sender_id = %sender.user_id,
            connection_id = %connection_id,
            delivered,
            "消息已发送"
        );

        self.deps.publisher.publish(DomainEvent::MessageSent {
            message_id: message.id,
            conversation_id,
            sender_id: sender.user_id,
            created_at: message.created_at,
        });

        Ok(message)
    }

    pub async fn mark_read(
        &self,
        reader: &Identity,
        connection_id: ConnectionId,
        message_id: MessageId,
    ) -> Result<ReadReceipt, ApplicationError> {
        let not_found = || ApplicationError::not_found("message", message_id);

        let message = self.find_message(message_id).await?.ok_or_else(not_found)?;
        let conversation_id = message.conversation_id;
        let membership = within(
            self.deps.store_timeout,
            "find_conversation_membership",
            self.deps
                .store
                .find_conversation_membership(conversation_id, reader.user_id),
        )
        .await?;
        if membership.is_none() {
            return Err(not_found());
        }

        let now = self.deps.clock.now();
        if message.sender_id == reader.user_id {
            self.update_cursor(reader, conversation_id, now).await?;
            return Ok(ReadReceipt {
                message,
                changed: false,
            });
        }

        let _guard = self.lock_conversation(conversation_id).await;

        let mut message = self.find_message(message_id).await?.ok_or_else(not_found)?;
        let changed = message.advance_status(MessageStatus::Read)?;
        // 游标先于状态写入，游标失败时状态不变，重试仍会广播回执
        self.update_cursor(reader, conversation_id, now).await?;
        if changed {
            message = within(
                self.deps.store_timeout,
                "update_message_status",
                self.deps
                    .store
                    .update_message_status(message_id, MessageStatus::Read),
            )
            .await?;

            self.deps.router.broadcast(
                conversation_id,
                &ServerEvent::MessageDelivered {
                    message_id,
                    conversation_id,
                    reader_id: reader.user_id,
                    timestamp: now,
                },
                None,
            );
            self.deps.publisher.publish(DomainEvent::MessageRead {
                message_id,
                conversation_id,
                reader_id: reader.user_id,
                read_at: now,
            });
            tracing::debug!(
                message_id = %message_id,
                reader_id = %reader.user_id,
                connection_id = %connection_id,
                "消息已读"
            );
        }

        Ok(ReadReceipt { message, changed })
    }

    async fn find_message(&self, id: MessageId) -> Result<Option<Message>, ApplicationError> {
        within(
            self.deps.store_timeout,
            "find_message",
            self.deps.store.find_message(id),
        )
        .await
    }

    async fn update_cursor(
        &self,
        reader: &Identity,
        conversation_id: ConversationId,
        read_at: domain::Timestamp,
    ) -> Result<(), ApplicationError> {
        within(
            self.deps.store_timeout,
            "update_participant_read_cursor",
            self.deps
                .store
                .update_participant_read_cursor(conversation_id, reader.user_id, read_at),
        )
        .await
    }
}

struct ConversationGuard<'a> {
    locks: &'a DashMap<ConversationId, Arc<Mutex<()>>>,
    conversation_id: ConversationId,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for ConversationGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        // 只剩表里这一份引用时，没有任务持有或等待这把锁
        self.locks
            .remove_if(&self.conversation_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}
