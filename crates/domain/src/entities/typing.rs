//! 输入状态指示
//!
//! 以 `(conversation_id, user_id)` 为唯一槽位；`expires_at` 已过的记录
//! 即使尚未被清扫，逻辑上也视为不存在。

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::value_objects::{ConversationId, Timestamp, UserId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingIndicator {
    pub conversation_id: ConversationId,
    pub user_id: UserId,
    pub is_typing: bool,
    pub expires_at: Timestamp,
}

impl TypingIndicator {
    pub fn started(
        conversation_id: ConversationId,
        user_id: UserId,
        now: Timestamp,
        ttl: Duration,
    ) -> Self {
        Self {
            conversation_id,
            user_id,
            is_typing: true,
            expires_at: now + ttl,
        }
    }

    /// 刷新过期时间（用户持续输入）
    pub fn refresh(&mut self, now: Timestamp, ttl: Duration) {
        self.is_typing = true;
        self.expires_at = now + ttl;
    }

    pub fn is_expired(&self, now: Timestamp) -> bool {
        self.expires_at < now
    }

    pub fn is_active(&self, now: Timestamp) -> bool {
        self.is_typing && !self.is_expired(now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn expires_after_ttl() {
        let now = Utc::now();
        let ttl = Duration::seconds(10);
        let mut indicator =
            TypingIndicator::started(ConversationId::generate(), UserId::generate(), now, ttl);

        assert!(indicator.is_active(now + Duration::seconds(10)));
        assert!(!indicator.is_active(now + Duration::seconds(11)));

        indicator.refresh(now + Duration::seconds(8), ttl);
        assert!(indicator.is_active(now + Duration::seconds(15)));
    }
}
