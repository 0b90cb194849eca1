//! 连接封装
//!
//! 一条基于 socket 的双向行协议通道。关闭通过 watch 信号广播，
//! 任何阻塞在读/写上的任务都会立即返回。

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{watch, Mutex};
use tracing::debug;

use crate::codec::{LineReader, LineWriter};
use crate::error::{ProtocolError, Result};
use crate::transport::Transport;

/// 进程内唯一的连接序号
static NEXT_SERIAL: AtomicU64 = AtomicU64::new(1);

/// TCP 连接
pub type TcpConnection = Connection<OwnedReadHalf, OwnedWriteHalf>;

/// 连接封装
///
/// 标识为对端地址字符串；同一地址重连会得到新的实例，
/// 以 [`Connection::serial`] 区分。关闭后不可复用。
///
/// # Type Parameters
/// * `R` - 读取端类型
/// * `W` - 写入端类型
pub struct Connection<R, W> {
    id: String,
    serial: u64,
    alive: AtomicBool,
    /// 只由读任务使用
    reader: Mutex<Option<LineReader<R>>>,
    writer: Mutex<Option<LineWriter<W>>>,
    closed: watch::Sender<bool>,
}

impl<R, W> Connection<R, W>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    /// 从传输层创建连接
    pub fn new<T: Transport<Reader = R, Writer = W>>(transport: T) -> Self {
        let id = transport.peer_id();
        let (reader, writer) = transport.split();
        Self::from_parts(id, reader, writer)
    }

    /// 从读写端直接创建连接
    pub fn from_parts(id: impl Into<String>, reader: R, writer: W) -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            id: id.into(),
            serial: NEXT_SERIAL.fetch_add(1, Ordering::Relaxed),
            alive: AtomicBool::new(true),
            reader: Mutex::new(Some(LineReader::new(reader))),
            writer: Mutex::new(Some(LineWriter::new(writer))),
            closed,
        }
    }

    /// 连接标识 "ip:port"
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn serial(&self) -> u64 {
        self.serial
    }

    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    /// 发送一行
    ///
    /// 写失败会关闭连接；超长消息只拒绝本次发送。
    pub async fn send(&self, line: &str) -> Result<()> {
        if !self.is_alive() {
            return Err(ProtocolError::NotConnected);
        }

        let result = {
            let mut guard = self.writer.lock().await;
            let Some(writer) = guard.as_mut() else {
                return Err(ProtocolError::NotConnected);
            };
            tokio::select! {
                biased;
                _ = self.closed_signal() => Err(ProtocolError::ConnectionClosed),
                result = writer.write_line(line) => result,
            }
        };

        match &result {
            Ok(()) => debug!("Sent to {}: {}", self.id, line),
            Err(ProtocolError::LineTooLong { .. }) => {}
            Err(e) => {
                debug!("Send to {} failed: {}", self.id, e);
                self.close().await;
            }
        }
        result
    }

    /// 阻塞读取下一行
    ///
    /// EOF、对端重置或本地 [`close`](Self::close) 都返回
    /// [`ProtocolError::ConnectionClosed`]。
    pub async fn recv_line(&self) -> Result<String> {
        let mut guard = self.reader.lock().await;
        let Some(reader) = guard.as_mut() else {
            return Err(ProtocolError::ConnectionClosed);
        };

        let result = tokio::select! {
            biased;
            _ = self.closed_signal() => Err(ProtocolError::ConnectionClosed),
            result = reader.read_line() => result,
        };

        if result.is_err() {
            // 释放读取端
            guard.take();
        }
        result
    }

    /// 关闭连接，只有第一次调用生效
    pub async fn close(&self) {
        if !self.alive.swap(false, Ordering::AcqRel) {
            return;
        }
        self.closed.send_replace(true);

        let writer = self.writer.lock().await.take();
        if let Some(mut writer) = writer {
            if let Err(e) = writer.shutdown().await {
                debug!("Shutdown of {} failed: {}", self.id, e);
            }
        }
        // 读任务正持有锁时由它自己释放
        if let Ok(mut reader) = self.reader.try_lock() {
            reader.take();
        }

        debug!("Connection {} closed", self.id);
    }

    async fn closed_signal(&self) {
        let mut rx = self.closed.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }
}

impl<R, W> std::fmt::Debug for Connection<R, W> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("serial", &self.serial)
            .field("alive", &self.alive.load(Ordering::Relaxed))
            .finish()
    }
}
