//! 出站连接中心
//!
//! 每条连接一个有界出站队列。扇出时使用 `try_send`，队列满或已关闭的
//! 连接会被强制关闭（取消其令牌，由连接自身的任务走断开流程），
//! 广播方永远不会因为某个慢连接而阻塞。

use std::collections::HashSet;

use dashmap::DashMap;
use domain::{ConnectionId, ServerEvent, UserId};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;

struct Outbound {
    user_id: UserId,
    sender: mpsc::Sender<ServerEvent>,
    closer: CancellationToken,
}

/// 一条新打开连接的接收端
pub struct OutboundChannel {
    pub events: mpsc::Receiver<ServerEvent>,
    pub closed: CancellationToken,
}

pub struct ConnectionHub {
    connections: DashMap<ConnectionId, Outbound>,
    by_user: DashMap<UserId, HashSet<ConnectionId>>,
    capacity: usize,
}

impl ConnectionHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            connections: DashMap::new(),
            by_user: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// 登记一条连接，返回其出站队列与关闭令牌
    pub fn open(&self, connection_id: ConnectionId, user_id: UserId) -> OutboundChannel {
        let (sender, events) = mpsc::channel(self.capacity);
        let closed = CancellationToken::new();
        self.connections.insert(
            connection_id,
            Outbound {
                user_id,
                sender,
                closer: closed.clone(),
            },
        );
        self.by_user.entry(user_id).or_default().insert(connection_id);
        OutboundChannel { events, closed }
    }

    /// 注销连接并取消其令牌。重复调用是空操作。
    pub fn close(&self, connection_id: ConnectionId) -> bool {
        let Some((_, outbound)) = self.connections.remove(&connection_id) else {
            return false;
        };
        outbound.closer.cancel();
        self.by_user.remove_if_mut(&outbound.user_id, |_, ids| {
            ids.remove(&connection_id);
            ids.is_empty()
        });
        true
    }

    /// 投递到单条连接，返回是否入队成功
    pub fn deliver(&self, connection_id: ConnectionId, event: ServerEvent) -> bool {
        let sender = match self.connections.get(&connection_id) {
            Some(outbound) => outbound.sender.clone(),
            None => return false,
        };

        match sender.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => {
                tracing::warn!(
                    connection_id = %connection_id,
                    event = event.name(),
                    capacity = self.capacity,
                    "出站队列已满，强制关闭连接"
                );
                self.close(connection_id);
                false
            }
            Err(TrySendError::Closed(_)) => {
                tracing::debug!(connection_id = %connection_id, "出站队列已关闭");
                self.close(connection_id);
                false
            }
        }
    }

    /// 按顺序投递到多条连接，返回成功条数
    pub fn deliver_many<I>(&self, connection_ids: I, event: &ServerEvent) -> usize
    where
        I: IntoIterator<Item = ConnectionId>,
    {
        connection_ids
            .into_iter()
            .filter(|id| self.deliver(*id, event.clone()))
            .count()
    }

    /// 个人频道：投递到该用户的所有连接
    pub fn send_to_user(&self, user_id: UserId, event: &ServerEvent) -> usize {
        let targets = self.connections_of(user_id);
        self.deliver_many(targets, event)
    }

    /// 投递到所有连接（可排除一条）
    pub fn broadcast_all(&self, event: &ServerEvent, exclude: Option<ConnectionId>) -> usize {
        let targets: Vec<ConnectionId> = self
            .connections
            .iter()
            .map(|entry| *entry.key())
            .filter(|id| Some(*id) != exclude)
            .collect();
        self.deliver_many(targets, event)
    }

    pub fn connections_of(&self, user_id: UserId) -> Vec<ConnectionId> {
        self.by_user
            .get(&user_id)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn is_open(&self, connection_id: ConnectionId) -> bool {
        self.connections.contains_key(&connection_id)
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// 服务器关闭时取消所有连接
    pub fn close_all(&self) -> usize {
        let ids: Vec<ConnectionId> = self.connections.iter().map(|e| *e.key()).collect();
        ids.into_iter().filter(|id| self.close(*id)).count()
    }
}
