//! 输入状态存储
//!
//! `(conversation_id, user_id)` 是唯一槽位，重复的 start 只刷新过期时间。
//! 过期的记录逻辑上视为不存在；清扫只回收内存，不补发 `TYPING_STOP`，
//! 客户端在 TTL 内没收到刷新即视为停止。

use std::sync::Arc;

use chrono::Duration as ChronoDuration;
use dashmap::DashMap;
use domain::{
    ConnectionId, ConversationId, Identity, ServerEvent, Timestamp, TypingIndicator, UserId,
};

use crate::{clock::Clock, error::ApplicationError, rooms::RoomRouter};

type TypingKey = (ConversationId, UserId);

pub struct TypingStore {
    indicators: DashMap<TypingKey, TypingIndicator>,
    router: Arc<RoomRouter>,
    clock: Arc<dyn Clock>,
    ttl: ChronoDuration,
}

impl TypingStore {
    pub fn new(router: Arc<RoomRouter>, clock: Arc<dyn Clock>, ttl: std::time::Duration) -> Self {
        Self {
            indicators: DashMap::new(),
            router,
            clock,
            ttl: ChronoDuration::from_std(ttl).unwrap_or_else(|_| ChronoDuration::seconds(10)),
        }
    }

    /// 开始（或刷新）输入，广播给房间内除发起连接以外的连接
    pub async fn start(
        &self,
        identity: &Identity,
        connection_id: ConnectionId,
        conversation_id: ConversationId,
    ) -> Result<TypingIndicator, ApplicationError> {
        self.router
            .verify_membership(identity, conversation_id)
            .await?;

        let now = self.clock.now();
        let indicator = self
            .indicators
            .entry((conversation_id, identity.user_id))
            .and_modify(|indicator| indicator.refresh(now, self.ttl))
            .or_insert_with(|| {
                TypingIndicator::started(conversation_id, identity.user_id, now, self.ttl)
            })
            .value()
            .clone();

        let event = ServerEvent::TypingStart {
            user_id: identity.user_id,
            user_name: identity.display_name.clone(),
            conversation_id,
            timestamp: now,
        };
        self.router
            .broadcast(conversation_id, &event, Some(connection_id));
        Ok(indicator)
    }

    /// 停止输入。没有记录时是空操作，返回 `false`。
    pub fn stop(
        &self,
        identity: &Identity,
        connection_id: ConnectionId,
        conversation_id: ConversationId,
    ) -> bool {
        if self
            .indicators
            .remove(&(conversation_id, identity.user_id))
            .is_none()
        {
            return false;
        }
        self.announce_stop(identity, conversation_id, Some(connection_id));
        true
    }

    /// 清除该用户在所有会话中的输入状态（断开连接时调用）
    pub fn stop_all_for_user(&self, identity: &Identity, origin: Option<ConnectionId>) -> usize {
        let now = self.clock.now();
        let keys: Vec<TypingKey> = self
            .indicators
            .iter()
            .filter(|entry| entry.key().1 == identity.user_id)
            .map(|entry| *entry.key())
            .collect();

        let mut stopped = 0;
        for key in keys {
            if let Some((_, indicator)) = self.indicators.remove(&key) {
                if indicator.is_active(now) {
                    self.announce_stop(identity, key.0, origin);
                }
                stopped += 1;
            }
        }
        stopped
    }

    /// 删除所有 `expires_at < now` 的记录，返回删除数量
    pub fn sweep(&self, now: Timestamp) -> usize {
        let before = self.indicators.len();
        self.indicators
            .retain(|_, indicator| !indicator.is_expired(now));
        let removed = before.saturating_sub(self.indicators.len());
        if removed > 0 {
            tracing::debug!(removed, "清扫过期输入状态");
        }
        removed
    }

    /// 当前仍有效的输入者
    pub fn typing_users(&self, conversation_id: ConversationId, now: Timestamp) -> Vec<UserId> {
        self.indicators
            .iter()
            .filter(|entry| entry.key().0 == conversation_id && entry.value().is_active(now))
            .map(|entry| entry.key().1)
            .collect()
    }

    pub fn is_typing(&self, conversation_id: ConversationId, user_id: UserId, now: Timestamp) -> bool {
        self.indicators
            .get(&(conversation_id, user_id))
            .is_some_and(|indicator| indicator.is_active(now))
    }

    pub fn len(&self) -> usize {
        self.indicators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.indicators.is_empty()
    }

    fn announce_stop(
        &self,
        identity: &Identity,
        conversation_id: ConversationId,
        exclude: Option<ConnectionId>,
    ) {
        let event = ServerEvent::TypingStop {
            user_id: identity.user_id,
            user_name: identity.display_name.clone(),
            conversation_id,
            timestamp: self.clock.now(),
        };
        self.router.broadcast(conversation_id, &event, exclude);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{clock::ManualClock, hub::ConnectionHub, memory::InMemoryChatStore};
    use domain::{Conversation, ConversationType, Participant};
    use std::time::Duration;

    struct Fixture {
        typing: TypingStore,
        router: Arc<RoomRouter>,
        hub: Arc<ConnectionHub>,
        clock: Arc<ManualClock>,
        alice: Identity,
        bob: Identity,
        conversation_id: ConversationId,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(InMemoryChatStore::new());
        let hub = Arc::new(ConnectionHub::new(16));
        let clock = Arc::new(ManualClock::default());
        let alice = Identity::new(UserId::generate(), "alice", "Staff");
        let bob = Identity::new(UserId::generate(), "bob", "Staff");
        let conversation_id = ConversationId::generate();
        store
            .insert_conversation(
                Conversation::new(
                    conversation_id,
                    ConversationType::Group,
                    vec![
                        Participant::new(conversation_id, alice.user_id),
                        Participant::new(conversation_id, bob.user_id),
                    ],
                )
                .unwrap(),
            )
            .await;
        let router = Arc::new(RoomRouter::new(
            store,
            hub.clone(),
            clock.clone(),
            Duration::from_secs(1),
        ));
        let typing = TypingStore::new(router.clone(), clock.clone(), Duration::from_secs(10));
        Fixture {
            typing,
            router,
            hub,
            clock,
            alice,
            bob,
            conversation_id,
        }
    }

    #[tokio::test]
    async fn repeated_start_refreshes_single_slot() {
        let f = fixture().await;
        let conn = ConnectionId::generate();

        let first = f
            .typing
            .start(&f.alice, conn, f.conversation_id)
            .await
            .unwrap();
        f.clock.advance(ChronoDuration::seconds(4));
        let second = f
            .typing
            .start(&f.alice, conn, f.conversation_id)
            .await
            .unwrap();

        assert_eq!(f.typing.len(), 1);
        assert_eq!(
            second.expires_at - first.expires_at,
            ChronoDuration::seconds(4)
        );
    }

    #[tokio::test]
    async fn outsider_cannot_start_typing() {
        let f = fixture().await;
        let eve = Identity::new(UserId::generate(), "eve", "Customer");
        let result = f
            .typing
            .start(&eve, ConnectionId::generate(), f.conversation_id)
            .await;
        assert!(matches!(result, Err(ApplicationError::NotFound { .. })));
        assert!(f.typing.is_empty());
    }

    #[tokio::test]
    async fn expired_indicator_is_absent_before_sweep() {
        let f = fixture().await;
        f.typing
            .start(&f.alice, ConnectionId::generate(), f.conversation_id)
            .await
            .unwrap();

        f.clock.advance(ChronoDuration::seconds(11));
        let now = f.clock.now();
        assert!(!f.typing.is_typing(f.conversation_id, f.alice.user_id, now));
        assert!(f.typing.typing_users(f.conversation_id, now).is_empty());
        assert_eq!(f.typing.len(), 1);

        assert_eq!(f.typing.sweep(now), 1);
        assert!(f.typing.is_empty());
    }

    #[tokio::test]
    async fn sweep_keeps_live_indicators_and_does_not_broadcast() {
        let f = fixture().await;
        let b = ConnectionId::generate();
        let mut b_rx = f.hub.open(b, f.bob.user_id);
        f.router.join(&f.bob, b, f.conversation_id).await.unwrap();

        f.typing
            .start(&f.alice, ConnectionId::generate(), f.conversation_id)
            .await
            .unwrap();
        assert!(matches!(
            b_rx.events.try_recv().unwrap(),
            ServerEvent::TypingStart { .. }
        ));

        f.clock.advance(ChronoDuration::seconds(5));
        assert_eq!(f.typing.sweep(f.clock.now()), 0);
        f.clock.advance(ChronoDuration::seconds(6));
        assert_eq!(f.typing.sweep(f.clock.now()), 1);
        assert!(b_rx.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn stop_broadcasts_only_when_indicator_existed() {
        let f = fixture().await;
        let a = ConnectionId::generate();
        let b = ConnectionId::generate();
        let _a_rx = f.hub.open(a, f.alice.user_id);
        let mut b_rx = f.hub.open(b, f.bob.user_id);
        f.router.join(&f.alice, a, f.conversation_id).await.unwrap();
        f.router.join(&f.bob, b, f.conversation_id).await.unwrap();

        assert!(!f.typing.stop(&f.alice, a, f.conversation_id));
        assert!(b_rx.events.try_recv().is_err());

        f.typing.start(&f.alice, a, f.conversation_id).await.unwrap();
        assert!(f.typing.stop(&f.alice, a, f.conversation_id));

        let names: Vec<_> = std::iter::from_fn(|| b_rx.events.try_recv().ok())
            .map(|event| event.name())
            .collect();
        assert_eq!(names, vec!["TYPING_START", "TYPING_STOP"]);
    }

    #[tokio::test]
    async fn disconnect_clears_all_user_indicators() {
        let f = fixture().await;
        let conn = ConnectionId::generate();
        f.typing.start(&f.alice, conn, f.conversation_id).await.unwrap();
        f.typing.start(&f.bob, conn, f.conversation_id).await.unwrap();

        assert_eq!(f.typing.stop_all_for_user(&f.alice, Some(conn)), 1);
        let now = f.clock.now();
        assert_eq!(f.typing.typing_users(f.conversation_id, now), vec![f.bob.user_id]);
    }
}
