//! 对外发布的领域事件
//!
//! 单向、即发即弃：其他服务（分析、通知）自行订阅，核心不等待结果。

use serde::{Deserialize, Serialize};

use crate::value_objects::{ConversationId, MessageId, Timestamp, UserId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum DomainEvent {
    MessageSent {
        message_id: MessageId,
        conversation_id: ConversationId,
        sender_id: UserId,
        created_at: Timestamp,
    },
    MessageRead {
        message_id: MessageId,
        conversation_id: ConversationId,
        reader_id: UserId,
        read_at: Timestamp,
    },
}

impl DomainEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::MessageSent { .. } => "message_sent",
            Self::MessageRead { .. } => "message_read",
        }
    }

    pub fn conversation_id(&self) -> ConversationId {
        match self {
            Self::MessageSent {
                conversation_id, ..
            }
            | Self::MessageRead {
                conversation_id, ..
            } => *conversation_id,
        }
    }
}
