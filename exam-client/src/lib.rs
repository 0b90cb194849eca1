//! 考试消息广播客户端
//!
//! 与单个服务器保持一条连接，读任务通过 [`ClientListener`] 上报事件。

mod client;
mod listener;

pub use client::MessageClient;
pub use listener::{ClientEvent, ClientListener};
