//! 在线连接注册表

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use protocol::{Connection, ProtocolError};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tracing::{debug, warn};

/// 一次广播的结果
#[derive(Debug, Default)]
pub struct BroadcastOutcome {
    /// 成功写入的连接数
    pub delivered: usize,
    /// 写入失败的连接：(连接标识, 错误)
    pub failures: Vec<(String, ProtocolError)>,
}

/// 服务端在线连接集合
///
/// 成员变更（注册、注销、计数）互斥执行；广播先在锁内拍快照，
/// 再在锁外逐个写入，慢连接不会阻塞成员变更。
/// 并发广播经由独立的广播锁串行化，所有客户端看到相同的广播顺序。
pub struct ClientRegistry<R = OwnedReadHalf, W = OwnedWriteHalf> {
    /// serial -> Connection
    members: Mutex<HashMap<u64, Arc<Connection<R, W>>>>,
    broadcast_lock: tokio::sync::Mutex<()>,
}

impl<R, W> ClientRegistry<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    pub fn new() -> Self {
        Self {
            members: Mutex::new(HashMap::new()),
            broadcast_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// 注册连接，不检查标识是否重复
    pub fn register(&self, conn: Arc<Connection<R, W>>) {
        let mut members = self.members();
        members.insert(conn.serial(), conn);
        debug!("Registered client, total: {}", members.len());
    }

    /// 注销连接，连接不在表中时什么也不做
    pub fn unregister(&self, conn: &Connection<R, W>) -> bool {
        let mut members = self.members();
        let removed = members.remove(&conn.serial()).is_some();
        if removed {
            debug!("Unregistered {}, total: {}", conn.id(), members.len());
        }
        removed
    }

    /// 当前在线连接数
    pub fn count(&self) -> usize {
        self.members().len()
    }

    /// 当前在线连接标识
    pub fn ids(&self) -> Vec<String> {
        self.members()
            .values()
            .map(|conn| conn.id().to_string())
            .collect()
    }

    /// 当前成员的快照
    pub fn snapshot(&self) -> Vec<Arc<Connection<R, W>>> {
        self.members().values().cloned().collect()
    }

    /// 向快照中的每个连接写入一行
    ///
    /// 单个连接失败只记录在结果中，不影响其他连接。
    pub async fn broadcast_all(&self, text: &str) -> BroadcastOutcome {
        let _order = self.broadcast_lock.lock().await;
        let targets = self.snapshot();

        let mut outcome = BroadcastOutcome::default();
        for conn in targets {
            match conn.send(text).await {
                Ok(()) => outcome.delivered += 1,
                Err(e) => {
                    warn!("Broadcast to {} failed: {}", conn.id(), e);
                    outcome.failures.push((conn.id().to_string(), e));
                }
            }
        }

        debug!(
            "Broadcast delivered to {}, failed for {}",
            outcome.delivered,
            outcome.failures.len()
        );
        outcome
    }

    /// 关闭所有连接（成员由各自的读任务注销）
    pub async fn close_all(&self) -> usize {
        let targets = self.snapshot();
        for conn in &targets {
            conn.close().await;
        }
        targets.len()
    }

    fn members(&self) -> MutexGuard<'_, HashMap<u64, Arc<Connection<R, W>>>> {
        self.members.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<R, W> Default for ClientRegistry<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    fn default() -> Self {
        Self::new()
    }
}
