//! 客户端事件接口

use tokio::sync::mpsc;

/// 客户端向宿主程序上报事件的接口
pub trait ClientListener: Send + Sync + 'static {
    fn on_message_received(&self, text: &str);

    fn on_connected(&self);

    /// 每次连接恰好触发一次
    fn on_disconnected(&self);

    fn on_error(&self, message: &str);
}

/// 客户端事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    MessageReceived { text: String },
    Connected,
    Disconnected,
    Error { message: String },
}

impl ClientListener for mpsc::UnboundedSender<ClientEvent> {
    fn on_message_received(&self, text: &str) {
        let _ = self.send(ClientEvent::MessageReceived {
            text: text.to_string(),
        });
    }

    fn on_connected(&self) {
        let _ = self.send(ClientEvent::Connected);
    }

    fn on_disconnected(&self) {
        let _ = self.send(ClientEvent::Disconnected);
    }

    fn on_error(&self, message: &str) {
        let _ = self.send(ClientEvent::Error {
            message: message.to_string(),
        });
    }
}
