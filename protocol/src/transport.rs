//! 传输层抽象
//!
//! 提供 Transport trait 使连接管理与具体传输实现解耦。

use std::net::SocketAddr;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

use crate::error::{ProtocolError, Result};

/// 传输层配置
#[derive(Clone, Debug)]
pub struct TransportConfig {
    /// 是否禁用 Nagle 算法（TCP nodelay）
    pub nodelay: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            nodelay: true, // 逐行即时推送，减少延迟
        }
    }
}

/// 传输层抽象 trait
pub trait Transport: Send + Sync + Sized {
    /// 读取端类型
    type Reader: AsyncRead + Unpin + Send + 'static;
    /// 写入端类型
    type Writer: AsyncWrite + Unpin + Send + 'static;

    /// 建立连接（客户端使用）
    fn connect(
        host: &str,
        port: u16,
        config: &TransportConfig,
    ) -> impl std::future::Future<Output = Result<Self>> + Send;

    /// 对端标识，格式为 "ip:port"
    fn peer_id(&self) -> String;

    /// 分离读写端
    fn split(self) -> (Self::Reader, Self::Writer);
}

/// 传输层监听器抽象 trait（服务端使用）
pub trait TransportListener: Send + Sync + Sized {
    /// 对应的传输类型
    type Transport: Transport;

    /// 绑定地址并开始监听
    fn bind(
        addr: &str,
        config: &TransportConfig,
    ) -> impl std::future::Future<Output = Result<Self>> + Send;

    /// 接受新连接
    fn accept(&self) -> impl std::future::Future<Output = Result<Self::Transport>> + Send;

    /// 本地绑定地址
    fn local_addr(&self) -> Result<SocketAddr>;
}

// ============================================================================
// TCP 实现
// ============================================================================

/// TCP 传输实现
#[derive(Debug)]
pub struct TcpTransport {
    stream: TcpStream,
    peer: SocketAddr,
}

impl Transport for TcpTransport {
    type Reader = OwnedReadHalf;
    type Writer = OwnedWriteHalf;

    async fn connect(host: &str, port: u16, config: &TransportConfig) -> Result<Self> {
        let stream = TcpStream::connect((host, port))
            .await
            .map_err(|source| ProtocolError::Connect {
                addr: format!("{}:{}", host, port),
                source,
            })?;
        Self::from_stream(stream, config)
    }

    fn peer_id(&self) -> String {
        self.peer.to_string()
    }

    fn split(self) -> (Self::Reader, Self::Writer) {
        self.stream.into_split()
    }
}

impl TcpTransport {
    /// 从已有的 TcpStream 创建（服务端 accept 后使用）
    pub fn from_stream(stream: TcpStream, config: &TransportConfig) -> Result<Self> {
        stream.set_nodelay(config.nodelay)?;
        let peer = stream.peer_addr()?;
        Ok(Self { stream, peer })
    }
}

/// TCP 监听器实现
pub struct TcpListener {
    listener: tokio::net::TcpListener,
    config: TransportConfig,
}

impl TransportListener for TcpListener {
    type Transport = TcpTransport;

    async fn bind(addr: &str, config: &TransportConfig) -> Result<Self> {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|source| ProtocolError::Bind {
                addr: addr.to_string(),
                source,
            })?;
        Ok(Self {
            listener,
            config: config.clone(),
        })
    }

    async fn accept(&self) -> Result<TcpTransport> {
        let (stream, _addr) = self.listener.accept().await.map_err(ProtocolError::Io)?;
        TcpTransport::from_stream(stream, &self.config)
    }

    fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_tcp_listener_bind() {
        let listener = TcpListener::bind("127.0.0.1:0", &TransportConfig::default())
            .await
            .unwrap();
        let addr = listener.local_addr().unwrap();
        assert!(addr.port() > 0);
    }

    #[tokio::test]
    async fn test_bind_in_use_port_fails() {
        let config = TransportConfig::default();
        let first = TcpListener::bind("127.0.0.1:0", &config).await.unwrap();
        let addr = first.local_addr().unwrap();

        let second = TcpListener::bind(&addr.to_string(), &config).await;
        assert!(matches!(second, Err(ProtocolError::Bind { .. })));
    }

    #[tokio::test]
    async fn test_peer_ids_match_both_ends() {
        let config = TransportConfig::default();
        let listener = TcpListener::bind("127.0.0.1:0", &config).await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let client_handle =
            tokio::spawn(async move { TcpTransport::connect("127.0.0.1", port, &config).await });

        let server_transport = listener.accept().await.unwrap();
        let client_transport = client_handle.await.unwrap().unwrap();

        assert_eq!(client_transport.peer_id(), format!("127.0.0.1:{}", port));
        assert!(server_transport.peer_id().starts_with("127.0.0.1:"));
        assert_ne!(server_transport.peer_id(), client_transport.peer_id());
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let config = TransportConfig::default();
        let listener = TcpListener::bind("127.0.0.1:0", &config).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let result = TcpTransport::connect("127.0.0.1", port, &config).await;
        assert!(matches!(result, Err(ProtocolError::Connect { .. })));
    }
}
