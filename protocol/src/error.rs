//! 错误类型定义

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

/// 协议错误类型
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// 监听端口绑定失败（端口被占用、权限不足）
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// 连接服务器失败
    #[error("Failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// 服务器已在运行
    #[error("Server already running on {0}")]
    AlreadyRunning(SocketAddr),

    /// 客户端已连接
    #[error("Already connected to {0}")]
    AlreadyConnected(String),

    /// 未连接
    #[error("Not connected")]
    NotConnected,

    /// 连接已关闭（EOF、对端重置或本地关闭）
    #[error("Connection closed")]
    ConnectionClosed,

    /// IO 错误
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// 行超长
    #[error("Line too long: {len} bytes (max: {max})")]
    LineTooLong { len: usize, max: usize },
}

impl ProtocolError {
    /// 将 IO 错误归类：EOF / 重置 / 断管视为连接正常结束
    pub fn from_io(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe => ProtocolError::ConnectionClosed,
            _ => ProtocolError::Io(e),
        }
    }

    /// 是否属于连接生命周期事件，而非需要上报的错误
    pub fn is_closed(&self) -> bool {
        matches!(self, ProtocolError::ConnectionClosed | ProtocolError::NotConnected)
    }
}

/// 协议操作结果类型
pub type Result<T> = std::result::Result<T, ProtocolError>;
