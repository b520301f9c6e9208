//! 会话房间路由
//!
//! 纯内存的扇出表：会话 → 订阅它的连接集合。订阅只在会话生命周期内有效，
//! 断线重连后需要客户端重新 join。加入前必须经过持久化层的成员关系校验。

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use domain::{ChatStore, ConnectionId, ConversationId, Identity, Membership, ServerEvent};

use crate::{clock::Clock, error::ApplicationError, hub::ConnectionHub, timeout::within};

pub struct RoomRouter {
    rooms: DashMap<ConversationId, HashSet<ConnectionId>>,
    subscriptions: DashMap<ConnectionId, HashSet<ConversationId>>,
    store: Arc<dyn ChatStore>,
    hub: Arc<ConnectionHub>,
    clock: Arc<dyn Clock>,
    store_timeout: Duration,
}

impl RoomRouter {
    pub fn new(
        store: Arc<dyn ChatStore>,
        hub: Arc<ConnectionHub>,
        clock: Arc<dyn Clock>,
        store_timeout: Duration,
    ) -> Self {
        Self {
            rooms: DashMap::new(),
            subscriptions: DashMap::new(),
            store,
            hub,
            clock,
            store_timeout,
        }
    }

    /// 权威成员关系检查，不是参与者时返回 `NotFound`
    pub async fn verify_membership(
        &self,
        identity: &Identity,
        conversation_id: ConversationId,
    ) -> Result<Membership, ApplicationError> {
        within(
            self.store_timeout,
            "find_conversation_membership",
            self.store
                .find_conversation_membership(conversation_id, identity.user_id),
        )
        .await?
        .ok_or_else(|| ApplicationError::not_found("conversation", conversation_id))
    }

    /// 校验成员关系后订阅房间，并通知房间内其他连接
    pub async fn join(
        &self,
        identity: &Identity,
        connection_id: ConnectionId,
        conversation_id: ConversationId,
    ) -> Result<Membership, ApplicationError> {
        let membership = self.verify_membership(identity, conversation_id).await?;

        if self.subscribe(connection_id, conversation_id) {
            tracing::info!(
                user_id = %identity.user_id,
                connection_id = %connection_id,
                conversation_id = %conversation_id,
                "加入会话房间"
            );
            let event = ServerEvent::UserJoinedConversation {
                user_id: identity.user_id,
                user_name: identity.display_name.clone(),
                conversation_id,
                timestamp: self.clock.now(),
            };
            self.broadcast(conversation_id, &event, Some(connection_id));
        }

        Ok(membership)
    }

    /// 退订房间。未订阅时是空操作。
    pub fn leave(
        &self,
        identity: &Identity,
        connection_id: ConnectionId,
        conversation_id: ConversationId,
    ) -> bool {
        if !self.unsubscribe(connection_id, conversation_id) {
            return false;
        }

        let event = ServerEvent::UserLeftConversation {
            user_id: identity.user_id,
            user_name: identity.display_name.clone(),
            conversation_id,
            timestamp: self.clock.now(),
        };
        self.broadcast(conversation_id, &event, Some(connection_id));
        true
    }

    /// 投递给房间内的所有连接（可排除一条），返回投递成功数
    pub fn broadcast(
        &self,
        conversation_id: ConversationId,
        event: &ServerEvent,
        exclude: Option<ConnectionId>,
    ) -> usize {
        let targets: Vec<ConnectionId> = self
            .subscribers(conversation_id)
            .into_iter()
            .filter(|id| Some(*id) != exclude)
            .collect();
        self.hub.deliver_many(targets, event)
    }

    /// 连接断开时移除它的全部订阅，返回它曾在的会话
    pub fn drop_connection(&self, connection_id: ConnectionId) -> Vec<ConversationId> {
        let Some((_, conversations)) = self.subscriptions.remove(&connection_id) else {
            return Vec::new();
        };
        for conversation_id in &conversations {
            self.rooms.remove_if_mut(conversation_id, |_, members| {
                members.remove(&connection_id);
                members.is_empty()
            });
        }
        conversations.into_iter().collect()
    }

    pub fn subscribers(&self, conversation_id: ConversationId) -> Vec<ConnectionId> {
        self.rooms
            .get(&conversation_id)
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn is_subscribed(&self, connection_id: ConnectionId, conversation_id: ConversationId) -> bool {
        self.subscriptions
            .get(&connection_id)
            .is_some_and(|rooms| rooms.contains(&conversation_id))
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    fn subscribe(&self, connection_id: ConnectionId, conversation_id: ConversationId) -> bool {
        let added = self
            .subscriptions
            .entry(connection_id)
            .or_default()
            .insert(conversation_id);
        if added {
            self.rooms
                .entry(conversation_id)
                .or_default()
                .insert(connection_id);
        }
        added
    }

    fn unsubscribe(&self, connection_id: ConnectionId, conversation_id: ConversationId) -> bool {
        let mut removed = false;
        self.subscriptions.remove_if_mut(&connection_id, |_, rooms| {
            removed = rooms.remove(&conversation_id);
            rooms.is_empty()
        });
        if removed {
            self.rooms.remove_if_mut(&conversation_id, |_, members| {
                members.remove(&connection_id);
                members.is_empty()
            });
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{clock::SystemClock, memory::InMemoryChatStore};
    use domain::{Conversation, ConversationType, Participant, UserId};

    async fn setup() -> (RoomRouter, Arc<ConnectionHub>, Identity, Identity, ConversationId) {
        let store = Arc::new(InMemoryChatStore::new());
        let hub = Arc::new(ConnectionHub::new(16));
        let alice = Identity::new(UserId::generate(), "alice", "Staff");
        let bob = Identity::new(UserId::generate(), "bob", "Customer");
        let conversation_id = ConversationId::generate();
        store
            .insert_conversation(
                Conversation::new(
                    conversation_id,
                    ConversationType::Direct,
                    vec![
                        Participant::new(conversation_id, alice.user_id),
                        Participant::new(conversation_id, bob.user_id),
                    ],
                )
                .unwrap(),
            )
            .await;
        let router = RoomRouter::new(
            store,
            hub.clone(),
            Arc::new(SystemClock),
            Duration::from_secs(1),
        );
        (router, hub, alice, bob, conversation_id)
    }

    #[tokio::test]
    async fn non_participant_cannot_join_by_id() {
        let (router, _hub, _alice, _bob, conversation_id) = setup().await;
        let stranger = Identity::new(UserId::generate(), "eve", "Customer");

        let result = router
            .join(&stranger, ConnectionId::generate(), conversation_id)
            .await;
        assert!(matches!(result, Err(ApplicationError::NotFound { .. })));
        assert!(router.subscribers(conversation_id).is_empty());
    }

    #[tokio::test]
    async fn join_notifies_others_but_not_joiner() {
        let (router, hub, alice, bob, conversation_id) = setup().await;
        let a = ConnectionId::generate();
        let b = ConnectionId::generate();
        let mut a_rx = hub.open(a, alice.user_id);
        let mut b_rx = hub.open(b, bob.user_id);

        router.join(&alice, a, conversation_id).await.unwrap();
        router.join(&bob, b, conversation_id).await.unwrap();

        match a_rx.events.try_recv().unwrap() {
            ServerEvent::UserJoinedConversation { user_id, .. } => assert_eq!(user_id, bob.user_id),
            other => panic!("unexpected {other:?}"),
        }
        assert!(b_rx.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn leave_twice_is_noop_and_drop_clears_everything() {
        let (router, hub, alice, _bob, conversation_id) = setup().await;
        let a = ConnectionId::generate();
        let _rx = hub.open(a, alice.user_id);

        router.join(&alice, a, conversation_id).await.unwrap();
        assert!(router.is_subscribed(a, conversation_id));
        assert!(router.leave(&alice, a, conversation_id));
        assert!(!router.leave(&alice, a, conversation_id));

        router.join(&alice, a, conversation_id).await.unwrap();
        assert_eq!(router.drop_connection(a), vec![conversation_id]);
        assert!(router.drop_connection(a).is_empty());
        assert!(!router.is_subscribed(a, conversation_id));
        assert_eq!(router.room_count(), 0);
    }

    #[tokio::test]
    async fn broadcast_respects_exclusion() {
        let (router, hub, alice, bob, conversation_id) = setup().await;
        let a = ConnectionId::generate();
        let b = ConnectionId::generate();
        let _a_rx = hub.open(a, alice.user_id);
        let _b_rx = hub.open(b, bob.user_id);
        router.join(&alice, a, conversation_id).await.unwrap();
        router.join(&bob, b, conversation_id).await.unwrap();

        let event = ServerEvent::error("TEST", "ping");
        assert_eq!(router.broadcast(conversation_id, &event, None), 2);
        assert_eq!(router.broadcast(conversation_id, &event, Some(a)), 1);
    }
}
