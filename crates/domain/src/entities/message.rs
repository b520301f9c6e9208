//! 消息实体定义
//!
//! 消息在会话内只追加不删除，状态严格单向推进 `Sent → Delivered → Read`。

use serde::{Deserialize, Serialize};

use crate::errors::{DomainError, DomainResult};
use crate::value_objects::{ConversationId, MessageContent, MessageId, Timestamp, UserId};

/// 消息类型枚举
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MessageType {
    /// 文本消息
    #[default]
    Text,
    /// 图片消息
    Image,
    /// 文件消息
    File,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "Text",
            Self::Image => "Image",
            Self::File => "File",
        }
    }

    pub fn parse(value: &str) -> DomainResult<Self> {
        match value {
            "Text" => Ok(Self::Text),
            "Image" => Ok(Self::Image),
            "File" => Ok(Self::File),
            other => Err(DomainError::invalid_argument(
                "message_type",
                format!("unknown type {other}"),
            )),
        }
    }
}

/// 消息状态枚举，顺序即推进方向
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum MessageStatus {
    /// 已发送
    #[default]
    Sent,
    /// 已送达
    Delivered,
    /// 已读
    Read,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sent => "Sent",
            Self::Delivered => "Delivered",
            Self::Read => "Read",
        }
    }

    pub fn parse(value: &str) -> DomainResult<Self> {
        match value {
            "Sent" => Ok(Self::Sent),
            "Delivered" => Ok(Self::Delivered),
            "Read" => Ok(Self::Read),
            other => Err(DomainError::invalid_argument(
                "status",
                format!("unknown status {other}"),
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub sender_id: UserId,
    pub content: MessageContent,
    pub message_type: MessageType,
    pub status: MessageStatus,
    pub created_at: Timestamp,
    pub reply_to_message_id: Option<MessageId>,
}

impl Message {
    /// 新消息总是以 `Sent` 状态创建。
    pub fn new(
        id: MessageId,
        conversation_id: ConversationId,
        sender_id: UserId,
        content: MessageContent,
        message_type: MessageType,
        reply_to_message_id: Option<MessageId>,
        created_at: Timestamp,
    ) -> Self {
        Self {
            id,
            conversation_id,
            sender_id,
            content,
            message_type,
            status: MessageStatus::Sent,
            created_at,
            reply_to_message_id,
        }
    }

    /// 推进消息状态。
    ///
    /// 返回 `Ok(true)` 表示状态发生了变化；目标与当前相同返回 `Ok(false)`；
    /// 试图回退则报错。
    pub fn advance_status(&mut self, to: MessageStatus) -> DomainResult<bool> {
        if to == self.status {
            return Ok(false);
        }
        if to < self.status {
            return Err(DomainError::StatusRegression {
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(true)
    }

    pub fn is_read(&self) -> bool {
        self.status == MessageStatus::Read
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn sample() -> Message {
        Message::new(
            MessageId::generate(),
            ConversationId::generate(),
            UserId::generate(),
            MessageContent::parse("two scoops please").unwrap(),
            MessageType::Text,
            None,
            Utc::now(),
        )
    }

    #[test]
    fn status_moves_forward_only() {
        let mut message = sample();
        assert_eq!(message.status, MessageStatus::Sent);

        assert_eq!(message.advance_status(MessageStatus::Delivered), Ok(true));
        assert_eq!(message.advance_status(MessageStatus::Read), Ok(true));
        assert!(message.is_read());

        assert_eq!(message.advance_status(MessageStatus::Read), Ok(false));
        assert!(matches!(
            message.advance_status(MessageStatus::Sent),
            Err(DomainError::StatusRegression { .. })
        ));
        assert_eq!(message.status, MessageStatus::Read);
    }

    #[test]
    fn sent_can_jump_straight_to_read() {
        let mut message = sample();
        assert_eq!(message.advance_status(MessageStatus::Read), Ok(true));
    }

    #[test]
    fn wire_format_is_camel_case() {
        let value = serde_json::to_value(sample()).unwrap();
        assert!(value.get("conversationId").is_some());
        assert!(value.get("replyToMessageId").is_some());
        assert_eq!(value["status"], "Sent");
        assert_eq!(value["messageType"], "Text");
    }
}
