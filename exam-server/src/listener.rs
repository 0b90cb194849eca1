//! 服务端事件接口

use tokio::sync::mpsc;

/// 服务端向宿主程序上报事件的接口
///
/// 回调在读任务或接受循环中同步执行，不应阻塞。
pub trait ServerListener: Send + Sync + 'static {
    /// 收到某个客户端的一行消息
    fn on_message_received(&self, text: &str, client_id: &str);

    /// 新客户端已注册
    fn on_client_connected(&self, client_id: &str);

    /// 客户端已断开并从注册表移除
    fn on_client_disconnected(&self, client_id: &str);

    /// 可恢复的错误（单个连接读写失败、accept 失败）
    fn on_error(&self, message: &str);
}

/// 服务端事件，用于以单一事件流代替回调
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    MessageReceived { text: String, client_id: String },
    ClientConnected { client_id: String },
    ClientDisconnected { client_id: String },
    Error { message: String },
}

/// 接收端已关闭时事件被直接丢弃
impl ServerListener for mpsc::UnboundedSender<ServerEvent> {
    fn on_message_received(&self, text: &str, client_id: &str) {
        let _ = self.send(ServerEvent::MessageReceived {
            text: text.to_string(),
            client_id: client_id.to_string(),
        });
    }

    fn on_client_connected(&self, client_id: &str) {
        let _ = self.send(ServerEvent::ClientConnected {
            client_id: client_id.to_string(),
        });
    }

    fn on_client_disconnected(&self, client_id: &str) {
        let _ = self.send(ServerEvent::ClientDisconnected {
            client_id: client_id.to_string(),
        });
    }

    fn on_error(&self, message: &str) {
        let _ = self.send(ServerEvent::Error {
            message: message.to_string(),
        });
    }
}
