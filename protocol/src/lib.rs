//! 考试消息广播共享协议库
//!
//! 包含:
//! - 行编解码 (LineReader, LineWriter)
//! - 传输层抽象 (Transport trait)
//! - 连接封装 (Connection)
//! - 错误分类 (ProtocolError)

mod codec;
mod connection;
mod constants;
mod error;
mod transport;

pub use codec::{LineReader, LineWriter};
pub use connection::{Connection, TcpConnection};
pub use constants::*;
pub use error::{ProtocolError, Result};
pub use transport::{TcpListener, TcpTransport, Transport, TransportConfig, TransportListener};
