//! 在线状态实体
//!
//! 一个用户一行，被该用户的所有连接共享。
//! 不变量：`status == Offline` 当且仅当连接集合为空。

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::errors::{DomainError, DomainResult};
use crate::value_objects::{ConnectionId, Timestamp, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PresenceStatus {
    Online,
    Away,
    Busy,
    Offline,
}

impl PresenceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Online => "Online",
            Self::Away => "Away",
            Self::Busy => "Busy",
            Self::Offline => "Offline",
        }
    }

    pub fn parse(value: &str) -> DomainResult<Self> {
        match value {
            "Online" => Ok(Self::Online),
            "Away" => Ok(Self::Away),
            "Busy" => Ok(Self::Busy),
            "Offline" => Ok(Self::Offline),
            other => Err(DomainError::invalid_argument(
                "status",
                format!("unknown presence status {other}"),
            )),
        }
    }
}

impl std::fmt::Display for PresenceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Presence {
    pub user_id: UserId,
    pub status: PresenceStatus,
    pub connected_connection_ids: BTreeSet<ConnectionId>,
    pub last_seen_at: Timestamp,
}

impl Presence {
    /// 冷启动时每个用户都视为离线。
    pub fn offline(user_id: UserId, now: Timestamp) -> Self {
        Self {
            user_id,
            status: PresenceStatus::Offline,
            connected_connection_ids: BTreeSet::new(),
            last_seen_at: now,
        }
    }

    /// 加入一个连接。重复加入同一连接是空操作。
    ///
    /// 返回是否跨越了 离线→在线 的边界。
    pub fn attach(&mut self, connection_id: ConnectionId, now: Timestamp) -> bool {
        let was_empty = self.connected_connection_ids.is_empty();
        if !self.connected_connection_ids.insert(connection_id) {
            return false;
        }
        if was_empty {
            self.status = PresenceStatus::Online;
            self.last_seen_at = now;
            return true;
        }
        false
    }

    /// 移除一个连接。移除不存在的连接是空操作。
    ///
    /// 返回是否跨越了 在线→离线 的边界。
    pub fn detach(&mut self, connection_id: ConnectionId, now: Timestamp) -> bool {
        if !self.connected_connection_ids.remove(&connection_id) {
            return false;
        }
        if self.connected_connection_ids.is_empty() {
            self.status = PresenceStatus::Offline;
            self.last_seen_at = now;
            return true;
        }
        false
    }

    /// 在线用户在 Online / Away / Busy 之间切换。
    ///
    /// 返回状态是否真的改变。离线用户调用是空操作。
    pub fn set_status(&mut self, status: PresenceStatus, now: Timestamp) -> DomainResult<bool> {
        if status == PresenceStatus::Offline {
            return Err(DomainError::StatusNotSettable(status.to_string()));
        }
        if !self.is_online() || self.status == status {
            return Ok(false);
        }
        self.status = status;
        self.last_seen_at = now;
        Ok(true)
    }

    pub fn is_online(&self) -> bool {
        !self.connected_connection_ids.is_empty()
    }

    pub fn connection_count(&self) -> usize {
        self.connected_connection_ids.len()
    }

    pub fn is_consistent(&self) -> bool {
        (self.status == PresenceStatus::Offline) == self.connected_connection_ids.is_empty()
    }
}
