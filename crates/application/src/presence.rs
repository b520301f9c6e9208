//! 在线状态注册表
//!
//! 进程级的 用户 → 在线状态 映射。每个用户一把异步锁，
//! 同一用户的注册/注销严格串行（包括持久化与状态广播），
//! 不同用户之间互不阻塞。内存中的状态是权威数据，
//! 持久化只作为审计与崩溃恢复记录；重启后所有用户视为离线。

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use domain::{
    ChatStore, ConnectionId, Identity, Presence, PresenceStatus, ServerEvent, Timestamp, UserId,
};
use serde::Serialize;
use tokio::sync::Mutex;

use crate::{clock::Clock, error::ApplicationError, hub::ConnectionHub, timeout::within};

/// 对外暴露的在线状态快照
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceSnapshot {
    pub user_id: UserId,
    pub display_name: String,
    pub role: String,
    pub status: PresenceStatus,
    pub connection_count: usize,
    pub last_seen_at: Timestamp,
}

struct PresenceEntry {
    identity: Identity,
    presence: Presence,
}

impl PresenceEntry {
    fn snapshot(&self) -> PresenceSnapshot {
        PresenceSnapshot {
            user_id: self.presence.user_id,
            display_name: self.identity.display_name.clone(),
            role: self.identity.role.clone(),
            status: self.presence.status,
            connection_count: self.presence.connection_count(),
            last_seen_at: self.presence.last_seen_at,
        }
    }

    fn status_event(&self) -> ServerEvent {
        ServerEvent::UserStatusChange {
            user_id: self.presence.user_id,
            user_name: self.identity.display_name.clone(),
            user_role: self.identity.role.clone(),
            status: self.presence.status,
            timestamp: self.presence.last_seen_at,
        }
    }
}

pub struct PresenceRegistry {
    entries: DashMap<UserId, Arc<Mutex<PresenceEntry>>>,
    store: Arc<dyn ChatStore>,
    hub: Arc<ConnectionHub>,
    clock: Arc<dyn Clock>,
    store_timeout: Duration,
}

impl PresenceRegistry {
    pub fn new(
        store: Arc<dyn ChatStore>,
        hub: Arc<ConnectionHub>,
        clock: Arc<dyn Clock>,
        store_timeout: Duration,
    ) -> Self {
        Self {
            entries: DashMap::new(),
            store,
            hub,
            clock,
            store_timeout,
        }
    }

    fn slot(&self, identity: &Identity) -> Arc<Mutex<PresenceEntry>> {
        let now = self.clock.now();
        self.entries
            .entry(identity.user_id)
            .or_insert_with(|| {
                Arc::new(Mutex::new(PresenceEntry {
                    identity: identity.clone(),
                    presence: Presence::offline(identity.user_id, now),
                }))
            })
            .value()
            .clone()
    }

    /// 登记一条连接。集合由空变为非空时状态转为 Online 并广播。
    pub async fn register(
        &self,
        identity: &Identity,
        connection_id: ConnectionId,
    ) -> PresenceSnapshot {
        let slot = self.slot(identity);
        let mut entry = slot.lock().await;
        entry.identity = identity.clone();

        let before = entry.presence.connection_count();
        let went_online = entry.presence.attach(connection_id, self.clock.now());
        if entry.presence.connection_count() != before {
            self.persist(&entry.presence).await;
        }

        if went_online {
            tracing::info!(user_id = %identity.user_id, connection_id = %connection_id, "用户上线");
            self.hub
                .broadcast_all(&entry.status_event(), Some(connection_id));
        } else {
            tracing::debug!(
                user_id = %identity.user_id,
                connections = entry.presence.connection_count(),
                "新增连接"
            );
        }

        entry.snapshot()
    }

    /// 注销一条连接。集合变空时状态转为 Offline 并广播，
    /// 随后移出注册表（持久化记录保留）。
    /// 用户没有登记时是空操作，返回 `None`。
    pub async fn deregister(
        &self,
        user_id: UserId,
        connection_id: ConnectionId,
    ) -> Option<PresenceSnapshot> {
        let slot = self.entries.get(&user_id).map(|e| e.value().clone())?;
        let snapshot = {
            let mut entry = slot.lock().await;

            let before = entry.presence.connection_count();
            let went_offline = entry.presence.detach(connection_id, self.clock.now());
            if entry.presence.connection_count() != before {
                self.persist(&entry.presence).await;
            }

            if went_offline {
                tracing::info!(user_id = %user_id, connection_id = %connection_id, "用户离线");
                self.hub
                    .broadcast_all(&entry.status_event(), Some(connection_id));
            }
            entry.snapshot()
        };
        drop(slot);

        if snapshot.status == PresenceStatus::Offline {
            self.evict_if_idle(user_id);
        }
        Some(snapshot)
    }

    /// 没有任务持有且仍然离线的条目才会被删除
    fn evict_if_idle(&self, user_id: UserId) {
        self.entries.remove_if(&user_id, |_, slot| {
            Arc::strong_count(slot) == 1
                && slot
                    .try_lock()
                    .map(|entry| !entry.presence.is_online())
                    .unwrap_or(false)
        });
    }

    /// 注册表中的用户数（只含有连接的用户）
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// 在线用户切换 Online / Away / Busy
    pub async fn set_status(
        &self,
        user_id: UserId,
        status: PresenceStatus,
        origin: ConnectionId,
    ) -> Result<PresenceSnapshot, ApplicationError> {
        let slot = self
            .entries
            .get(&user_id)
            .map(|e| e.value().clone())
            .ok_or_else(|| ApplicationError::not_found("presence", user_id))?;
        let mut entry = slot.lock().await;

        if entry.presence.set_status(status, self.clock.now())? {
            self.persist(&entry.presence).await;
            self.hub.broadcast_all(&entry.status_event(), Some(origin));
        }
        Ok(entry.snapshot())
    }

    pub async fn get(&self, user_id: UserId) -> Option<PresenceSnapshot> {
        let slot = self.entries.get(&user_id).map(|e| e.value().clone())?;
        let entry = slot.lock().await;
        Some(entry.snapshot())
    }

    /// 只读快照，最近活跃的在前
    pub async fn list(&self, limit: usize) -> Vec<PresenceSnapshot> {
        let slots: Vec<_> = self.entries.iter().map(|e| e.value().clone()).collect();
        let mut snapshots = Vec::with_capacity(slots.len());
        for slot in slots {
            snapshots.push(slot.lock().await.snapshot());
        }
        snapshots.sort_by(|a, b| b.last_seen_at.cmp(&a.last_seen_at));
        snapshots.truncate(limit);
        snapshots
    }

    async fn persist(&self, presence: &Presence) {
        if let Err(err) = within(
            self.store_timeout,
            "upsert_presence",
            self.store.upsert_presence(presence),
        )
        .await
        {
            tracing::warn!(
                user_id = %presence.user_id,
                error = %err,
                "在线状态审计记录写入失败"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{clock::ManualClock, memory::InMemoryChatStore};
    use chrono::Duration as ChronoDuration;

    struct Fixture {
        registry: Arc<PresenceRegistry>,
        hub: Arc<ConnectionHub>,
        store: Arc<InMemoryChatStore>,
        clock: Arc<ManualClock>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryChatStore::new());
        let hub = Arc::new(ConnectionHub::new(32));
        let clock = Arc::new(ManualClock::default());
        let registry = Arc::new(PresenceRegistry::new(
            store.clone(),
            hub.clone(),
            clock.clone(),
            Duration::from_secs(1),
        ));
        Fixture {
            registry,
            hub,
            store,
            clock,
        }
    }

    fn identity(name: &str) -> Identity {
        Identity::new(UserId::generate(), name, "Staff")
    }

    #[tokio::test]
    async fn register_twice_is_idempotent() {
        let f = fixture();
        let alice = identity("alice");
        let conn = ConnectionId::generate();

        let first = f.registry.register(&alice, conn).await;
        let second = f.registry.register(&alice, conn).await;
        assert_eq!(first.connection_count, 1);
        assert_eq!(second.connection_count, 1);

        let after = f.registry.deregister(alice.user_id, conn).await.unwrap();
        assert_eq!(after.status, PresenceStatus::Offline);
    }

    #[tokio::test]
    async fn deregister_unknown_user_is_noop() {
        let f = fixture();
        assert!(f
            .registry
            .deregister(UserId::generate(), ConnectionId::generate())
            .await
            .is_none());
    }

    #[tokio::test]
    async fn transitions_are_persisted_and_broadcast_once() {
        let f = fixture();
        let observer = ConnectionId::generate();
        let mut observed = f.hub.open(observer, UserId::generate());

        let alice = identity("alice");
        let phone = ConnectionId::generate();
        let laptop = ConnectionId::generate();

        f.registry.register(&alice, phone).await;
        f.registry.register(&alice, laptop).await;
        f.registry.deregister(alice.user_id, phone).await;
        f.registry.deregister(alice.user_id, laptop).await;

        let mut statuses = Vec::new();
        while let Ok(event) = observed.events.try_recv() {
            if let ServerEvent::UserStatusChange { status, .. } = event {
                statuses.push(status);
            }
        }
        assert_eq!(
            statuses,
            vec![PresenceStatus::Online, PresenceStatus::Offline]
        );

        let persisted = f.store.presence_of(alice.user_id).await.unwrap();
        assert_eq!(persisted.status, PresenceStatus::Offline);
        assert!(persisted.connected_connection_ids.is_empty());
    }

    #[tokio::test]
    async fn concurrent_churn_keeps_set_consistent() {
        let f = fixture();
        let alice = identity("alice");
        let ids: Vec<_> = (0..32).map(|_| ConnectionId::generate()).collect();

        let tasks: Vec<_> = ids
            .iter()
            .map(|id| {
                let registry = f.registry.clone();
                let alice = alice.clone();
                let id = *id;
                tokio::spawn(async move {
                    registry.register(&alice, id).await;
                    registry.register(&alice, id).await;
                })
            })
            .collect();
        futures::future::join_all(tasks).await;
        assert_eq!(
            f.registry.get(alice.user_id).await.unwrap().connection_count,
            32
        );

        let tasks: Vec<_> = ids
            .iter()
            .map(|id| {
                let registry = f.registry.clone();
                let user = alice.user_id;
                let id = *id;
                tokio::spawn(async move { registry.deregister(user, id).await })
            })
            .collect();
        for snapshot in futures::future::join_all(tasks).await {
            let snapshot = snapshot.unwrap().unwrap();
            assert_eq!(
                snapshot.status == PresenceStatus::Offline,
                snapshot.connection_count == 0
            );
        }
        assert!(f.registry.get(alice.user_id).await.is_none());
        assert!(f.registry.is_empty());
    }

    #[tokio::test]
    async fn offline_users_leave_the_registry() {
        let f = fixture();
        let alice = identity("alice");
        let bob = identity("bob");
        let alice_conn = ConnectionId::generate();

        f.registry.register(&alice, alice_conn).await;
        f.registry.register(&bob, ConnectionId::generate()).await;
        assert_eq!(f.registry.len(), 2);

        let snapshot = f
            .registry
            .deregister(alice.user_id, alice_conn)
            .await
            .unwrap();
        assert_eq!(snapshot.status, PresenceStatus::Offline);
        assert_eq!(f.registry.len(), 1);
        assert!(f.registry.get(alice.user_id).await.is_none());
        let listed = f.registry.list(10).await;
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].display_name, "bob");

        // 审计记录保留最后的离线状态
        let persisted = f.store.presence_of(alice.user_id).await.unwrap();
        assert_eq!(persisted.status, PresenceStatus::Offline);

        let back = f.registry.register(&alice, ConnectionId::generate()).await;
        assert_eq!(back.status, PresenceStatus::Online);
        assert_eq!(f.registry.len(), 2);
    }

    #[tokio::test]
    async fn list_orders_by_last_seen() {
        let f = fixture();
        let alice = identity("alice");
        let bob = identity("bob");

        f.registry.register(&alice, ConnectionId::generate()).await;
        f.clock.advance(ChronoDuration::seconds(5));
        f.registry.register(&bob, ConnectionId::generate()).await;

        let listed = f.registry.list(10).await;
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].display_name, "bob");
        assert_eq!(f.registry.list(1).await.len(), 1);
    }

    #[tokio::test]
    async fn status_change_requires_online_user() {
        let f = fixture();
        let alice = identity("alice");
        let conn = ConnectionId::generate();

        assert!(matches!(
            f.registry
                .set_status(alice.user_id, PresenceStatus::Busy, conn)
                .await,
            Err(ApplicationError::NotFound { .. })
        ));

        f.registry.register(&alice, conn).await;
        let busy = f
            .registry
            .set_status(alice.user_id, PresenceStatus::Busy, conn)
            .await
            .unwrap();
        assert_eq!(busy.status, PresenceStatus::Busy);
        assert!(matches!(
            f.registry
                .set_status(alice.user_id, PresenceStatus::Offline, conn)
                .await,
            Err(ApplicationError::Validation(_))
        ));
    }
}
