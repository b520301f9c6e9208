//! 连接协议
//!
//! 持久连接上的双向 JSON 帧，统一为 `{"event": "...", "data": {...}}`。
//! 事件名使用大写下划线，载荷字段使用 camelCase。

use serde::{Deserialize, Serialize};

use crate::entities::{Message, MessageType, PresenceStatus};
use crate::value_objects::{ConversationId, MessageId, Timestamp, UserId};

/// 客户端 → 服务端
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum ClientEvent {
    JoinConversation {
        conversation_id: ConversationId,
    },
    LeaveConversation {
        conversation_id: ConversationId,
    },
    TypingStart {
        conversation_id: ConversationId,
    },
    TypingStop {
        conversation_id: ConversationId,
    },
    NewMessage {
        conversation_id: ConversationId,
        content: String,
        message_type: Option<MessageType>,
        reply_to_message_id: Option<MessageId>,
    },
    MessageRead {
        message_id: MessageId,
    },
    UpdateStatus {
        status: PresenceStatus,
    },
    /// 客户端主动断开前的提示
    UserOffline,
    Ping,
}

impl ClientEvent {
    /// 解析一帧文本。
    ///
    /// 无载荷事件允许携带空的 `data`（`{}` 或 `null`）。
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        let mut value: serde_json::Value = serde_json::from_str(text)?;
        if let Some(frame) = value.as_object_mut() {
            let empty = match frame.get("data") {
                Some(serde_json::Value::Null) => true,
                Some(serde_json::Value::Object(map)) => map.is_empty(),
                _ => false,
            };
            let payloadless = matches!(
                frame.get("event").and_then(|e| e.as_str()),
                Some("USER_OFFLINE") | Some("PING")
            );
            if empty && payloadless {
                frame.remove("data");
            }
        }
        serde_json::from_value(value)
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::JoinConversation { .. } => "JOIN_CONVERSATION",
            Self::LeaveConversation { .. } => "LEAVE_CONVERSATION",
            Self::TypingStart { .. } => "TYPING_START",
            Self::TypingStop { .. } => "TYPING_STOP",
            Self::NewMessage { .. } => "NEW_MESSAGE",
            Self::MessageRead { .. } => "MESSAGE_READ",
            Self::UpdateStatus { .. } => "UPDATE_STATUS",
            Self::UserOffline => "USER_OFFLINE",
            Self::Ping => "PING",
        }
    }
}

/// 服务端 → 客户端
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum ServerEvent {
    UserStatusChange {
        user_id: UserId,
        user_name: String,
        user_role: String,
        status: PresenceStatus,
        timestamp: Timestamp,
    },
    UserJoinedConversation {
        user_id: UserId,
        user_name: String,
        conversation_id: ConversationId,
        timestamp: Timestamp,
    },
    UserLeftConversation {
        user_id: UserId,
        user_name: String,
        conversation_id: ConversationId,
        timestamp: Timestamp,
    },
    /// 加入成功后只发给加入者本身，附带当前仍有效的输入状态
    ConversationJoined {
        conversation_id: ConversationId,
        typing_user_ids: Vec<UserId>,
        timestamp: Timestamp,
    },
    TypingStart {
        user_id: UserId,
        user_name: String,
        conversation_id: ConversationId,
        timestamp: Timestamp,
    },
    TypingStop {
        user_id: UserId,
        user_name: String,
        conversation_id: ConversationId,
        timestamp: Timestamp,
    },
    NewMessage {
        message: Message,
        conversation_id: ConversationId,
        timestamp: Timestamp,
    },
    NewMessageNotification {
        conversation_id: ConversationId,
        sender_id: UserId,
        sender_name: String,
        message_preview: String,
        timestamp: Timestamp,
    },
    MessageDelivered {
        message_id: MessageId,
        conversation_id: ConversationId,
        reader_id: UserId,
        timestamp: Timestamp,
    },
    MessageError {
        conversation_id: ConversationId,
        error: String,
    },
    Error {
        code: String,
        message: String,
    },
    Pong {
        timestamp: Timestamp,
    },
}

impl ServerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::UserStatusChange { .. } => "USER_STATUS_CHANGE",
            Self::UserJoinedConversation { .. } => "USER_JOINED_CONVERSATION",
            Self::UserLeftConversation { .. } => "USER_LEFT_CONVERSATION",
            Self::ConversationJoined { .. } => "CONVERSATION_JOINED",
            Self::TypingStart { .. } => "TYPING_START",
            Self::TypingStop { .. } => "TYPING_STOP",
            Self::NewMessage { .. } => "NEW_MESSAGE",
            Self::NewMessageNotification { .. } => "NEW_MESSAGE_NOTIFICATION",
            Self::MessageDelivered { .. } => "MESSAGE_DELIVERED",
            Self::MessageError { .. } => "MESSAGE_ERROR",
            Self::Error { .. } => "ERROR",
            Self::Pong { .. } => "PONG",
        }
    }

    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
