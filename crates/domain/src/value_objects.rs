use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::DomainError;

/// 统一的时间戳类型。
pub type Timestamp = DateTime<Utc>;

/// 消息内容最大字符数。
pub const MAX_MESSAGE_CHARS: usize = 4000;

macro_rules! uuid_identifier {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new(id: Uuid) -> Self {
                Self(id)
            }

            pub fn generate() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }

        impl From<$name> for Uuid {
            fn from(value: $name) -> Self {
                value.0
            }
        }
    };
}

uuid_identifier!(
    /// 用户唯一标识。
    UserId
);

uuid_identifier!(
    /// 会话（单聊/群聊）唯一标识。
    ConversationId
);

uuid_identifier!(
    /// 消息唯一标识。
    MessageId
);

uuid_identifier!(
    /// 单条传输层连接的句柄，由网关在接入时分配。
    ConnectionId
);

/// 经过校验的消息正文。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageContent(String);

impl MessageContent {
    pub fn parse(value: impl Into<String>) -> Result<Self, DomainError> {
        let value = value.into().trim().to_owned();
        if value.is_empty() {
            return Err(DomainError::invalid_argument("content", "cannot be empty"));
        }
        if value.chars().count() > MAX_MESSAGE_CHARS {
            return Err(DomainError::invalid_argument("content", "too long"));
        }
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// 通知用的摘要，超过 `max_chars` 时截断并追加省略号。
    pub fn preview(&self, max_chars: usize) -> String {
        if self.0.chars().count() <= max_chars {
            return self.0.clone();
        }
        let mut preview: String = self.0.chars().take(max_chars).collect();
        preview.push('…');
        preview
    }
}

impl fmt::Display for MessageContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_is_trimmed() {
        let content = MessageContent::parse("  hi there \n").unwrap();
        assert_eq!(content.as_str(), "hi there");
    }

    #[test]
    fn blank_content_is_rejected() {
        assert!(matches!(
            MessageContent::parse("   "),
            Err(DomainError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn oversized_content_is_rejected() {
        let long = "x".repeat(MAX_MESSAGE_CHARS + 1);
        assert!(MessageContent::parse(long).is_err());
        let exact = "x".repeat(MAX_MESSAGE_CHARS);
        assert!(MessageContent::parse(exact).is_ok());
    }

    #[test]
    fn preview_truncates_on_char_boundary() {
        let content = MessageContent::parse("香草冰淇淋很好吃").unwrap();
        assert_eq!(content.preview(4), "香草冰淇…");
        assert_eq!(content.preview(50), "香草冰淇淋很好吃");
    }

    #[test]
    fn identifiers_serialize_as_plain_uuid() {
        let id = Uuid::new_v4();
        let json = serde_json::to_string(&UserId::from(id)).unwrap();
        assert_eq!(json, format!("\"{}\"", id));
    }
}
