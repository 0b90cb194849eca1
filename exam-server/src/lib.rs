//! 考试消息广播服务端
//!
//! 基于 Tokio 的 TCP 服务器：每个连接一个读任务，
//! 通过 [`ServerListener`] 向宿主程序上报事件。

mod listener;
mod registry;
mod server;

pub use listener::{ServerEvent, ServerListener};
pub use registry::{BroadcastOutcome, ClientRegistry};
pub use server::MessageServer;
