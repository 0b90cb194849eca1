//! 消息广播服务器核心实现

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use protocol::{
    Connection, ProtocolError, Result, TcpConnection, TcpListener, TransportConfig,
    TransportListener, BIND_HOST, MAX_LINE_LEN,
};
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

use crate::listener::ServerListener;
use crate::registry::ClientRegistry;

/// 运行中的服务器状态
struct Running {
    local_addr: SocketAddr,
    /// 关闭信号发送端
    shutdown_tx: watch::Sender<bool>,
    accept_task: JoinHandle<()>,
}

/// 消息广播服务器
///
/// 状态: Stopped → `start` → Listening → `stop` → Stopped。
/// 可以在停止后再次启动。
pub struct MessageServer<L: ServerListener> {
    events: Arc<L>,
    registry: Arc<ClientRegistry>,
    config: TransportConfig,
    running: Mutex<Option<Running>>,
    /// 串行化 start / stop
    lifecycle: tokio::sync::Mutex<()>,
}

impl<L: ServerListener> MessageServer<L> {
    pub fn new(listener: L) -> Self {
        Self::with_config(listener, TransportConfig::default())
    }

    pub fn with_config(listener: L, config: TransportConfig) -> Self {
        Self {
            events: Arc::new(listener),
            registry: Arc::new(ClientRegistry::new()),
            config,
            running: Mutex::new(None),
            lifecycle: tokio::sync::Mutex::new(()),
        }
    }

    /// 在所有网卡上监听 `port` 并启动接受循环
    ///
    /// `port` 为 0 时使用临时端口，返回实际绑定的地址。
    /// 已在运行时返回 [`ProtocolError::AlreadyRunning`]，原有状态不受影响。
    pub async fn start(&self, port: u16) -> Result<SocketAddr> {
        let _lifecycle = self.lifecycle.lock().await;
        if let Some(addr) = self.local_addr() {
            return Err(ProtocolError::AlreadyRunning(addr));
        }

        let bind_addr = format!("{}:{}", BIND_HOST, port);
        let listener = TcpListener::bind(&bind_addr, &self.config).await?;
        let local_addr = listener.local_addr()?;
        info!("Server listening on {}", local_addr);

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let accept_task = tokio::spawn(accept_loop(
            listener,
            Arc::clone(&self.registry),
            Arc::clone(&self.events),
            shutdown_rx,
        ));

        *self.state() = Some(Running {
            local_addr,
            shutdown_tx,
            accept_task,
        });
        Ok(local_addr)
    }

    /// 停止服务器
    ///
    /// 关闭监听 socket 和所有连接，等待每个读任务完成清理后返回。
    /// 重复调用无效果。
    pub async fn stop(&self) {
        let _lifecycle = self.lifecycle.lock().await;
        let Some(running) = self.state().take() else {
            return;
        };

        info!("Stopping server on {}", running.local_addr);
        running.shutdown_tx.send_replace(true);
        if let Err(e) = running.accept_task.await {
            warn!("Accept loop ended abnormally: {}", e);
        }
        info!("Server stopped");
    }

    /// 向所有在线客户端广播一行
    ///
    /// 返回成功送达的客户端数，单个客户端的写失败通过 `on_error` 上报。
    pub async fn broadcast(&self, text: &str) -> Result<usize> {
        if text.len() > MAX_LINE_LEN {
            return Err(ProtocolError::LineTooLong {
                len: text.len(),
                max: MAX_LINE_LEN,
            });
        }

        let outcome = self.registry.broadcast_all(text).await;
        for (client_id, e) in &outcome.failures {
            if !e.is_closed() {
                self.events
                    .on_error(&format!("Failed to send to {}: {}", client_id, e));
            }
        }
        Ok(outcome.delivered)
    }

    pub fn is_running(&self) -> bool {
        self.state().is_some()
    }

    /// 运行中时返回实际监听地址
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.state().as_ref().map(|running| running.local_addr)
    }

    /// 当前在线客户端数
    pub fn client_count(&self) -> usize {
        self.registry.count()
    }

    pub fn client_ids(&self) -> Vec<String> {
        self.registry.ids()
    }

    fn state(&self) -> MutexGuard<'_, Option<Running>> {
        self.running.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<L: ServerListener> Drop for MessageServer<L> {
    fn drop(&mut self) {
        // 接受循环收到信号后会自行关闭所有连接
        if let Some(running) = self.state().take() {
            running.shutdown_tx.send_replace(true);
        }
    }
}

/// 接受循环：每个新连接注册后交给独立的读任务
async fn accept_loop<L: ServerListener>(
    listener: TcpListener,
    registry: Arc<ClientRegistry>,
    events: Arc<L>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut readers = JoinSet::new();

    loop {
        tokio::select! {
            biased;

            _ = async {
                let _ = shutdown_rx.wait_for(|stop| *stop).await;
            } => break,

            // 回收已结束的读任务
            Some(_) = readers.join_next(), if !readers.is_empty() => {}

            result = listener.accept() => {
                match result {
                    Ok(transport) => {
                        let conn = Arc::new(Connection::new(transport));
                        registry.register(Arc::clone(&conn));
                        info!("Client {} connected, online: {}", conn.id(), registry.count());
                        events.on_client_connected(conn.id());

                        readers.spawn(serve_connection(
                            conn,
                            Arc::clone(&registry),
                            Arc::clone(&events),
                        ));
                    }
                    Err(e) => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                        warn!("Failed to accept connection: {}", e);
                        events.on_error(&format!("Failed to accept connection: {}", e));
                    }
                }
            }
        }
    }

    // 先关闭监听 socket，再关闭所有连接
    drop(listener);
    let closed = registry.close_all().await;
    debug!("Closed {} connections, waiting for readers", closed);
    while readers.join_next().await.is_some() {}
}

/// 单个连接的读任务，结束时恰好执行一次注销
async fn serve_connection<L: ServerListener>(
    conn: Arc<TcpConnection>,
    registry: Arc<ClientRegistry>,
    events: Arc<L>,
) {
    loop {
        match conn.recv_line().await {
            Ok(line) => {
                debug!("Received from {}: {}", conn.id(), line);
                events.on_message_received(&line, conn.id());
            }
            Err(ProtocolError::ConnectionClosed) => break,
            Err(e) => {
                warn!("Error receiving from {}: {}", conn.id(), e);
                events.on_error(&format!("Error receiving from {}: {}", conn.id(), e));
                break;
            }
        }
    }

    conn.close().await;
    registry.unregister(&conn);
    info!("Client {} disconnected, online: {}", conn.id(), registry.count());
    events.on_client_disconnected(conn.id());
}
