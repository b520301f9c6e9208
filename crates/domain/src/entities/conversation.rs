//! 会话与参与者
//!
//! 会话由外部 REST 服务创建，本核心只读取成员关系，
//! 并维护 `last_message_id` / `last_activity_at` 与参与者的已读游标。

use serde::{Deserialize, Serialize};

use crate::errors::{DomainError, DomainResult};
use crate::value_objects::{ConversationId, MessageId, Timestamp, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConversationType {
    Direct,
    Group,
}

impl ConversationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Direct => "Direct",
            Self::Group => "Group",
        }
    }

    pub fn parse(value: &str) -> DomainResult<Self> {
        match value {
            "Direct" => Ok(Self::Direct),
            "Group" => Ok(Self::Group),
            other => Err(DomainError::invalid_argument(
                "conversation_type",
                format!("unknown type {other}"),
            )),
        }
    }
}

/// 成员关系 + 已读游标
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Participant {
    pub conversation_id: ConversationId,
    pub user_id: UserId,
    pub can_send_messages: bool,
    pub last_read_at: Option<Timestamp>,
}

impl Participant {
    pub fn new(conversation_id: ConversationId, user_id: UserId) -> Self {
        Self {
            conversation_id,
            user_id,
            can_send_messages: true,
            last_read_at: None,
        }
    }

    pub fn read_only(mut self) -> Self {
        self.can_send_messages = false;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    pub id: ConversationId,
    pub conversation_type: ConversationType,
    pub participants: Vec<Participant>,
    pub last_message_id: Option<MessageId>,
    pub last_activity_at: Option<Timestamp>,
}

impl Conversation {
    pub fn new(
        id: ConversationId,
        conversation_type: ConversationType,
        participants: Vec<Participant>,
    ) -> DomainResult<Self> {
        if conversation_type == ConversationType::Direct && participants.len() != 2 {
            return Err(DomainError::DirectConversationSize(participants.len()));
        }
        Ok(Self {
            id,
            conversation_type,
            participants,
            last_message_id: None,
            last_activity_at: None,
        })
    }

    pub fn participant(&self, user_id: UserId) -> Option<&Participant> {
        self.participants.iter().find(|p| p.user_id == user_id)
    }

    /// 除 `user_id` 之外的参与者
    pub fn other_participants(&self, user_id: UserId) -> impl Iterator<Item = &Participant> {
        self.participants.iter().filter(move |p| p.user_id != user_id)
    }

    pub fn record_message(&mut self, message_id: MessageId, at: Timestamp) {
        self.last_message_id = Some(message_id);
        self.last_activity_at = Some(at);
    }
}

/// 权威成员关系检查的结果：会话本身 + 调用者的参与者记录
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Membership {
    pub conversation: Conversation,
    pub participant: Participant,
}

impl Membership {
    pub fn can_send(&self) -> bool {
        self.participant.can_send_messages
    }
}
