//! 考试消息广播客户端（控制台）
//!
//! 标准输入的每一行发送给服务器；`/quit`、输入结束或 Ctrl+C 断开。

use anyhow::Result;
use chrono::Local;
use clap::Parser;
use exam_client::{ClientListener, MessageClient};
use protocol::{DEFAULT_HOST, DEFAULT_PORT};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::Notify;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Exam broadcast client", long_about = None)]
struct Args {
    /// 服务器主机
    #[arg(long, default_value = DEFAULT_HOST)]
    host: String,

    /// 服务器端口
    #[arg(long, short, default_value_t = DEFAULT_PORT)]
    port: u16,
}

/// 打印到控制台，断开时唤醒主循环
struct ConsoleListener {
    closed: std::sync::Arc<Notify>,
}

impl ClientListener for ConsoleListener {
    fn on_message_received(&self, text: &str) {
        println!("[{}] {}", timestamp(), text);
    }

    fn on_connected(&self) {
        println!("[{}] *** connected", timestamp());
    }

    fn on_disconnected(&self) {
        println!("[{}] *** disconnected", timestamp());
        self.closed.notify_one();
    }

    fn on_error(&self, message: &str) {
        eprintln!("[{}] !!! {}", timestamp(), message);
    }
}

fn timestamp() -> String {
    Local::now().format("%H:%M:%S").to_string()
}

#[tokio::main]
async fn main() -> Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                EnvFilter::new("exam_client=info,protocol=info")
            }),
        )
        .init();

    let args = Args::parse();

    let closed = std::sync::Arc::new(Notify::new());
    let client = MessageClient::new(ConsoleListener {
        closed: std::sync::Arc::clone(&closed),
    });
    client.connect(&args.host, args.port).await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if line.trim() == "/quit" {
                    break;
                }
                if let Err(e) = client.send(&line).await {
                    warn!("Send failed: {}", e);
                }
            }

            _ = closed.notified() => {
                info!("Server closed the connection");
                break;
            }

            _ = tokio::signal::ctrl_c() => break,
        }
    }

    client.disconnect().await;
    Ok(())
}
