//! 在线连接注册表
//!
//! conn_id → 连接记录，外加 user_id / store_id 两个反向索引。
//!
//! 每个连接持有一个有界 mpsc 发送端；TCP 会话持有接收端并负责写出。
//! 推送通过 [`PushSink::push`] 非阻塞投递，缓冲满即丢弃 (持久化队列兜底)。
//!
//! # 加锁顺序
//!
//! `add_connection` 在持有该用户的 `by_user` 条目锁期间完成上限检查和插入，
//! 因此同一用户的并发连接不会超过上限。`remove_connection` 逐个获取锁、
//! 不嵌套持有，不会与添加路径形成环。

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use shared::ErrorCode;
use shared::PushEnvelope;
use shared::message::ConnectionRole;
use std::collections::HashSet;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// 单用户最大并发连接数
pub const MAX_CONNECTIONS_PER_USER: usize = 5;

/// 每个连接的待发送缓冲
pub const DEFAULT_CONNECTION_BUFFER: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("user {user_id} already has {max} connections")]
    ConnectionLimit { user_id: i64, max: usize },

    #[error("connection {0} already registered")]
    DuplicateConnection(String),
}

impl RegistryError {
    pub fn code(&self) -> ErrorCode {
        match self {
            RegistryError::ConnectionLimit { .. } => ErrorCode::ConnectionLimit,
            RegistryError::DuplicateConnection(_) => ErrorCode::ConnectionExists,
        }
    }
}

/// Delivery failure for one connection
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PushError {
    #[error("connection {0} not found")]
    NotFound(String),

    #[error("connection {0} outbound buffer full")]
    BufferFull(String),

    #[error("connection {0} closed")]
    Closed(String),
}

/// Non-blocking delivery to a live connection
pub trait PushSink: Send + Sync {
    fn push(&self, conn_id: &str, envelope: PushEnvelope) -> Result<(), PushError>;
}

/// Connection record
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    pub conn_id: String,
    pub user_id: i64,
    pub role: ConnectionRole,
    pub store_id: Option<i64>,
}

struct ConnectionEntry {
    info: ConnectionInfo,
    tx: mpsc::Sender<PushEnvelope>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    pub distinct_users: usize,
    pub distinct_stores: usize,
    pub total_connections: usize,
}

pub struct ConnectionRegistry {
    connections: DashMap<String, ConnectionEntry>,
    by_user: DashMap<i64, HashSet<String>>,
    by_store: DashMap<i64, HashSet<String>>,
    max_per_user: usize,
    buffer: usize,
}

impl std::fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRegistry")
            .field("connections", &self.connections.len())
            .field("max_per_user", &self.max_per_user)
            .finish()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new(MAX_CONNECTIONS_PER_USER, DEFAULT_CONNECTION_BUFFER)
    }
}

impl ConnectionRegistry {
    pub fn new(max_per_user: usize, buffer: usize) -> Self {
        Self {
            connections: DashMap::new(),
            by_user: DashMap::new(),
            by_store: DashMap::new(),
            max_per_user,
            buffer: buffer.max(1),
        }
    }

    /// Register a connection and return the receiving half of its outbound channel
    pub fn add_connection(
        &self,
        user_id: i64,
        conn_id: &str,
        role: ConnectionRole,
        store_id: Option<i64>,
    ) -> Result<mpsc::Receiver<PushEnvelope>, RegistryError> {
        let mut user_conns = self.by_user.entry(user_id).or_default();
        if user_conns.len() >= self.max_per_user {
            let empty = user_conns.is_empty();
            drop(user_conns);
            if empty {
                self.by_user.remove_if(&user_id, |_, set| set.is_empty());
            }
            tracing::warn!(user_id, max = self.max_per_user, "Connection limit reached");
            return Err(RegistryError::ConnectionLimit {
                user_id,
                max: self.max_per_user,
            });
        }

        let (tx, rx) = mpsc::channel(self.buffer);
        let inserted = match self.connections.entry(conn_id.to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(ConnectionEntry {
                    info: ConnectionInfo {
                        conn_id: conn_id.to_string(),
                        user_id,
                        role,
                        store_id,
                    },
                    tx,
                });
                true
            }
        };
        if !inserted {
            let empty = user_conns.is_empty();
            drop(user_conns);
            if empty {
                self.by_user.remove_if(&user_id, |_, set| set.is_empty());
            }
            return Err(RegistryError::DuplicateConnection(conn_id.to_string()));
        }
        if let Some(store_id) = store_id {
            self.by_store
                .entry(store_id)
                .or_default()
                .insert(conn_id.to_string());
        }
        user_conns.insert(conn_id.to_string());
        let count = user_conns.len();
        drop(user_conns);

        tracing::debug!(conn_id = %conn_id, user_id, ?role, ?store_id, user_connections = count, "Connection registered");
        Ok(rx)
    }

    /// Remove a connection from the primary map and both reverse indexes
    pub fn remove_connection(&self, conn_id: &str) -> Option<ConnectionInfo> {
        let (_, entry) = self.connections.remove(conn_id)?;
        let info = entry.info;

        if let Some(mut set) = self.by_user.get_mut(&info.user_id) {
            set.remove(conn_id);
        }
        self.by_user.remove_if(&info.user_id, |_, set| set.is_empty());

        if let Some(store_id) = info.store_id {
            if let Some(mut set) = self.by_store.get_mut(&store_id) {
                set.remove(conn_id);
            }
            self.by_store.remove_if(&store_id, |_, set| set.is_empty());
        }

        tracing::debug!(conn_id = %conn_id, user_id = info.user_id, "Connection removed");
        Some(info)
    }

    pub fn connections_for_user(&self, user_id: i64) -> HashSet<String> {
        self.by_user
            .get(&user_id)
            .map(|set| set.clone())
            .unwrap_or_default()
    }

    pub fn connections_for_store(&self, store_id: i64) -> HashSet<String> {
        self.by_store
            .get(&store_id)
            .map(|set| set.clone())
            .unwrap_or_default()
    }

    pub fn all_connections(&self) -> Vec<String> {
        self.connections.iter().map(|e| e.key().clone()).collect()
    }

    pub fn get(&self, conn_id: &str) -> Option<ConnectionInfo> {
        self.connections.get(conn_id).map(|e| e.info.clone())
    }

    pub fn is_user_online(&self, user_id: i64) -> bool {
        self.by_user.get(&user_id).is_some_and(|set| !set.is_empty())
    }

    pub fn stats(&self) -> RegistryStats {
        RegistryStats {
            distinct_users: self.by_user.len(),
            distinct_stores: self.by_store.len(),
            total_connections: self.connections.len(),
        }
    }
}

impl PushSink for ConnectionRegistry {
    fn push(&self, conn_id: &str, envelope: PushEnvelope) -> Result<(), PushError> {
        // 先克隆发送端再投递，不在持有分片锁时发送
        let tx = self
            .connections
            .get(conn_id)
            .map(|e| e.tx.clone())
            .ok_or_else(|| PushError::NotFound(conn_id.to_string()))?;
        tx.try_send(envelope).map_err(|e| match e {
            TrySendError::Full(_) => PushError::BufferFull(conn_id.to_string()),
            TrySendError::Closed(_) => PushError::Closed(conn_id.to_string()),
        })
    }
}
