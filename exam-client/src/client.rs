//! 消息客户端核心实现

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use protocol::{
    Connection, ProtocolError, Result, TcpConnection, TcpTransport, Transport, TransportConfig,
};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::listener::ClientListener;

/// 一次连接的生命周期
struct Session {
    conn: Arc<TcpConnection>,
    /// 断开流程只执行一次
    finished: AtomicBool,
    reader_task: StdMutex<Option<JoinHandle<()>>>,
}

impl Session {
    fn new(conn: Arc<TcpConnection>) -> Self {
        Self {
            conn,
            finished: AtomicBool::new(false),
            reader_task: StdMutex::new(None),
        }
    }

    /// 抢占断开流程，只有第一个调用者返回 true
    fn begin_finish(&self) -> bool {
        !self.finished.swap(true, Ordering::AcqRel)
    }

    fn is_finished(&self) -> bool {
        self.finished.load(Ordering::Acquire)
    }

    fn set_reader(&self, handle: JoinHandle<()>) {
        *self
            .reader_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handle);
    }

    fn take_reader(&self) -> Option<JoinHandle<()>> {
        self.reader_task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

type SessionSlot = Arc<Mutex<Option<Arc<Session>>>>;

/// 消息客户端
///
/// 状态: Disconnected → `connect` → Connected → `disconnect` → Disconnected。
/// 不自动重连，断开后需要宿主重新调用 `connect`。
pub struct MessageClient<L: ClientListener> {
    events: Arc<L>,
    config: TransportConfig,
    session: SessionSlot,
    /// 串行化 connect
    connecting: Mutex<()>,
}

impl<L: ClientListener> MessageClient<L> {
    pub fn new(listener: L) -> Self {
        Self::with_config(listener, TransportConfig::default())
    }

    pub fn with_config(listener: L, config: TransportConfig) -> Self {
        Self {
            events: Arc::new(listener),
            config,
            session: Arc::new(Mutex::new(None)),
            connecting: Mutex::new(()),
        }
    }

    /// 连接服务器并启动读任务
    ///
    /// 已连接时返回 [`ProtocolError::AlreadyConnected`]。
    /// TCP 建连期间不持有会话锁，`send` / `disconnect` 不会被阻塞。
    pub async fn connect(&self, host: &str, port: u16) -> Result<()> {
        let _connecting = self.connecting.lock().await;

        let stale = {
            let mut slot = self.session.lock().await;
            let live = slot
                .as_ref()
                .filter(|s| !s.is_finished())
                .map(|s| s.conn.id().to_string());
            if let Some(addr) = live {
                return Err(ProtocolError::AlreadyConnected(addr));
            }
            slot.take()
        };
        // 上一次连接的读任务发出 on_disconnected 之后才开始新连接
        if let Some(handle) = stale.and_then(|s| s.take_reader()) {
            if let Err(e) = handle.await {
                warn!("Reader task ended abnormally: {}", e);
            }
        }

        let transport = match TcpTransport::connect(host, port, &self.config).await {
            Ok(transport) => transport,
            Err(e) => {
                warn!("{}", e);
                return Err(e);
            }
        };

        let conn = Arc::new(Connection::new(transport));
        info!("Connected to {}", conn.id());
        let session = Arc::new(Session::new(conn));

        self.events.on_connected();
        let handle = tokio::spawn(read_loop(Arc::clone(&session), Arc::clone(&self.events)));
        session.set_reader(handle);
        *self.session.lock().await = Some(session);
        Ok(())
    }

    /// 发送一行
    ///
    /// 未连接时返回 [`ProtocolError::NotConnected`]；IO 失败会经 `on_error`
    /// 上报并关闭连接。
    pub async fn send(&self, text: &str) -> Result<()> {
        let session = self.current().await.ok_or(ProtocolError::NotConnected)?;

        match session.conn.send(text).await {
            Ok(()) => Ok(()),
            Err(e) => {
                if matches!(e, ProtocolError::Io(_)) {
                    warn!("Failed to send to {}: {}", session.conn.id(), e);
                    self.events
                        .on_error(&format!("Failed to send to {}: {}", session.conn.id(), e));
                }
                Err(e)
            }
        }
    }

    /// 断开连接，可重复调用
    ///
    /// 返回时 `on_disconnected` 已经触发（不论由谁触发）。
    pub async fn disconnect(&self) {
        let session = self.session.lock().await.take();
        let Some(session) = session else {
            return;
        };

        let owner = session.begin_finish();
        if owner {
            session.conn.close().await;
        }
        if let Some(handle) = session.take_reader() {
            if let Err(e) = handle.await {
                warn!("Reader task ended abnormally: {}", e);
            }
        }
        if owner {
            info!("Disconnected from {}", session.conn.id());
            self.events.on_disconnected();
        }
    }

    pub async fn is_connected(&self) -> bool {
        self.current().await.is_some()
    }

    /// 已连接时返回服务器地址 "ip:port"
    pub async fn peer_addr(&self) -> Option<String> {
        self.current()
            .await
            .map(|session| session.conn.id().to_string())
    }

    async fn current(&self) -> Option<Arc<Session>> {
        self.session
            .lock()
            .await
            .as_ref()
            .filter(|s| !s.is_finished())
            .cloned()
    }
}

impl<L: ClientListener> Drop for MessageClient<L> {
    fn drop(&mut self) {
        // 关闭连接让读任务自行走完断开流程
        let session = match self.session.try_lock() {
            Ok(mut slot) => slot.take(),
            Err(_) => None,
        };
        if let (Some(session), Ok(runtime)) = (session, tokio::runtime::Handle::try_current()) {
            runtime.spawn(async move { session.conn.close().await });
        }
    }
}

/// 读任务：逐行分发，结束时执行断开流程
///
/// 结束后会话留在槽中，由下一次 `connect` 或 `disconnect` 回收。
async fn read_loop<L: ClientListener>(session: Arc<Session>, events: Arc<L>) {
    let conn = &session.conn;
    loop {
        match conn.recv_line().await {
            Ok(line) => {
                debug!("Received from {}: {}", conn.id(), line);
                events.on_message_received(&line);
            }
            Err(ProtocolError::ConnectionClosed) => break,
            Err(e) => {
                if !session.is_finished() {
                    warn!("Error receiving from {}: {}", conn.id(), e);
                    events.on_error(&format!("Error receiving from {}: {}", conn.id(), e));
                }
                break;
            }
        }
    }

    // 显式 disconnect 已接管时由它负责通知
    if !session.begin_finish() {
        return;
    }
    conn.close().await;
    info!("Disconnected from {}", conn.id());
    events.on_disconnected();
}
