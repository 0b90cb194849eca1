//! 考试消息广播服务端（控制台）
//!
//! 标准输入的每一行都会广播给所有考生；`/count` 显示在线人数，`/quit` 退出。

use anyhow::Result;
use chrono::Local;
use clap::Parser;
use exam_server::{MessageServer, ServerListener};
use protocol::DEFAULT_PORT;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Exam broadcast server", long_about = None)]
struct Args {
    /// 监听端口，0 表示临时端口
    #[arg(long, short, default_value_t = DEFAULT_PORT)]
    port: u16,
}

/// 把事件打印到控制台
struct ConsoleListener;

impl ServerListener for ConsoleListener {
    fn on_message_received(&self, text: &str, client_id: &str) {
        println!("[{}] <{}> {}", timestamp(), client_id, text);
    }

    fn on_client_connected(&self, client_id: &str) {
        println!("[{}] *** {} connected", timestamp(), client_id);
    }

    fn on_client_disconnected(&self, client_id: &str) {
        println!("[{}] *** {} disconnected", timestamp(), client_id);
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
                EnvFilter::new("exam_server=info,protocol=info")
            }),
        )
        .init();

    let args = Args::parse();

    let server = MessageServer::new(ConsoleListener);
    let addr = server.start(args.port).await?;
    println!("listening on {}", addr);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    // 标准输入关闭后继续服务，直到 Ctrl+C
                    tokio::signal::ctrl_c().await?;
                    break;
                };
                match line.trim() {
                    "" => {}
                    "/quit" => break,
                    "/count" => println!("{} client(s) online", server.client_count()),
                    _ => match server.broadcast(&line).await {
                        Ok(n) => info!("Broadcast to {} client(s)", n),
                        Err(e) => warn!("Broadcast rejected: {}", e),
                    },
                }
            }

            _ = tokio::signal::ctrl_c() => {
                info!("Received shutdown signal");
                break;
            }
        }
    }

    server.stop().await;
    Ok(())
}
