use std::net::SocketAddr;
use std::time::Duration;

use exam_client::{ClientEvent, MessageClient};
use exam_server::{MessageServer, ServerEvent};
use protocol::ProtocolError;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(2);

type Server = MessageServer<mpsc::UnboundedSender<ServerEvent>>;
type Client = MessageClient<mpsc::UnboundedSender<ClientEvent>>;

async fn start_server() -> (Server, SocketAddr, mpsc::UnboundedReceiver<ServerEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let server = MessageServer::new(tx);
    let addr = server.start(0).await.unwrap();
    (server, addr, rx)
}

async fn connect_client(addr: SocketAddr) -> (Client, mpsc::UnboundedReceiver<ClientEvent>) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let client = MessageClient::new(tx);
    client.connect("127.0.0.1", addr.port()).await.unwrap();
    assert_eq!(next_event(&mut rx).await, ClientEvent::Connected);
    (client, rx)
}

async fn next_event<E>(rx: &mut mpsc::UnboundedReceiver<E>) -> E {
    timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("event channel closed")
}

async fn next_message(rx: &mut mpsc::UnboundedReceiver<ClientEvent>) -> String {
    match next_event(rx).await {
        ClientEvent::MessageReceived { text } => text,
        other => panic!("expected message, got {:?}", other),
    }
}

async fn wait_for_count(server: &Server, expected: usize) {
    timeout(WAIT, async {
        while server.client_count() != expected {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("client count never reached {}", expected));
}

#[tokio::test]
async fn exam_broadcast_scenario() {
    let (server, addr, _server_rx) = start_server().await;

    let (a, mut a_rx) = connect_client(addr).await;
    wait_for_count(&server, 1).await;
    let (b, mut b_rx) = connect_client(addr).await;
    wait_for_count(&server, 2).await;

    assert_eq!(server.broadcast("exam starting").await.unwrap(), 2);
    assert_eq!(next_message(&mut a_rx).await, "exam starting");
    assert_eq!(next_message(&mut b_rx).await, "exam starting");

    a.disconnect().await;
    assert_eq!(next_event(&mut a_rx).await, ClientEvent::Disconnected);
    wait_for_count(&server, 1).await;

    assert_eq!(server.broadcast("good luck").await.unwrap(), 1);
    assert_eq!(next_message(&mut b_rx).await, "good luck");
    assert!(a_rx.try_recv().is_err());

    b.disconnect().await;
    server.stop().await;
}

#[tokio::test]
async fn utf8_lines_round_trip_byte_identical() {
    let (server, addr, mut server_rx) = start_server().await;
    let (client, mut client_rx) = connect_client(addr).await;

    let client_id = match next_event(&mut server_rx).await {
        ServerEvent::ClientConnected { client_id } => client_id,
        other => panic!("unexpected {:?}", other),
    };

    let samples = ["第1题：选择 C", "  leading and trailing  ", "emoji 🎓", "tab\tseparated", ""];
    for text in samples {
        client.send(text).await.unwrap();
        assert_eq!(
            next_event(&mut server_rx).await,
            ServerEvent::MessageReceived {
                text: text.to_string(),
                client_id: client_id.clone()
            }
        );

        server.broadcast(text).await.unwrap();
        assert_eq!(next_message(&mut client_rx).await, text);
    }

    client.disconnect().await;
    server.stop().await;
}

#[tokio::test]
async fn embedded_newline_arrives_as_two_messages() {
    let (server, addr, mut server_rx) = start_server().await;
    let (client, _client_rx) = connect_client(addr).await;
    assert!(matches!(
        next_event(&mut server_rx).await,
        ServerEvent::ClientConnected { .. }
    ));

    client.send("first\nsecond").await.unwrap();
    for expected in ["first", "second"] {
        match next_event(&mut server_rx).await {
            ServerEvent::MessageReceived { text, .. } => assert_eq!(text, expected),
            other => panic!("unexpected {:?}", other),
        }
    }

    client.disconnect().await;
    server.stop().await;
}

#[tokio::test]
async fn second_connect_is_rejected() {
    let (server, addr, _server_rx) = start_server().await;
    let (client, _rx) = connect_client(addr).await;

    let result = client.connect("127.0.0.1", addr.port()).await;
    assert!(matches!(result, Err(ProtocolError::AlreadyConnected(_))));
    assert!(client.is_connected().await);
    assert_eq!(
        client.peer_addr().await,
        Some(format!("127.0.0.1:{}", addr.port()))
    );
    wait_for_count(&server, 1).await;

    client.disconnect().await;
    server.stop().await;
}

#[tokio::test]
async fn send_while_disconnected_fails() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let client = MessageClient::new(tx);

    assert!(matches!(
        client.send("hello").await,
        Err(ProtocolError::NotConnected)
    ));
    client.disconnect().await;
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn connect_failure_is_returned() {
    let (server, addr, _rx) = start_server().await;
    server.stop().await;

    let (tx, mut rx) = mpsc::unbounded_channel();
    let client = MessageClient::new(tx);
    let result = client.connect("127.0.0.1", addr.port()).await;
    assert!(matches!(result, Err(ProtocolError::Connect { .. })));
    assert!(!client.is_connected().await);
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn disconnect_is_notified_once_when_racing_server_stop() {
    for _ in 0..10 {
        let (server, addr, _server_rx) = start_server().await;
        let (client, mut rx) = connect_client(addr).await;
        wait_for_count(&server, 1).await;

        // 服务器关闭与显式断开同时发生
        tokio::join!(server.stop(), client.disconnect());
        client.disconnect().await;

        assert_eq!(next_event(&mut rx).await, ClientEvent::Disconnected);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(rx.try_recv().is_err());
        assert!(!client.is_connected().await);
    }
}

#[tokio::test]
async fn server_stop_disconnects_client() {
    let (server, addr, _server_rx) = start_server().await;
    let (client, mut rx) = connect_client(addr).await;
    wait_for_count(&server, 1).await;

    server.stop().await;
    assert_eq!(next_event(&mut rx).await, ClientEvent::Disconnected);
    assert!(!client.is_connected().await);
    assert!(matches!(
        client.send("anyone?").await,
        Err(ProtocolError::NotConnected)
    ));

    // 断开后可以重新连接
    let addr = server.start(0).await.unwrap();
    client.connect("127.0.0.1", addr.port()).await.unwrap();
    assert_eq!(next_event(&mut rx).await, ClientEvent::Connected);
    wait_for_count(&server, 1).await;

    client.disconnect().await;
    assert_eq!(next_event(&mut rx).await, ClientEvent::Disconnected);
    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn reconnect_after_server_close_keeps_event_order() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let client = MessageClient::new(tx);
    let (server, _server_rx) = {
        let (server_tx, server_rx) = mpsc::unbounded_channel();
        (MessageServer::new(server_tx), server_rx)
    };

    for _ in 0..50 {
        let addr = server.start(0).await.unwrap();
        client.connect("127.0.0.1", addr.port()).await.unwrap();
        wait_for_count(&server, 1).await;

        server.stop().await;
        timeout(WAIT, async {
            while client.is_connected().await {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("client never noticed the server closing");

        // 立即重连，上一次的断开通知必须先于新的连接通知
        let addr = server.start(0).await.unwrap();
        client.connect("127.0.0.1", addr.port()).await.unwrap();

        assert_eq!(next_event(&mut rx).await, ClientEvent::Connected);
        assert_eq!(next_event(&mut rx).await, ClientEvent::Disconnected);
        assert_eq!(next_event(&mut rx).await, ClientEvent::Connected);

        client.disconnect().await;
        assert_eq!(next_event(&mut rx).await, ClientEvent::Disconnected);
        server.stop().await;
    }
}

#[tokio::test]
async fn read_failure_reports_error_then_disconnect() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    let peer = tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        let mut line = "x".repeat(protocol::MAX_LINE_LEN + 16);
        line.push('\n');
        let _ = stream.write_all(line.as_bytes()).await;
        // 保持连接直到客户端自行关闭
        let mut sink = Vec::new();
        let _ = stream.read_to_end(&mut sink).await;
    });

    let (tx, mut rx) = mpsc::unbounded_channel();
    let client = MessageClient::new(tx);
    client.connect("127.0.0.1", port).await.unwrap();

    assert_eq!(next_event(&mut rx).await, ClientEvent::Connected);
    match next_event(&mut rx).await {
        ClientEvent::Error { message } => assert!(message.contains("too long")),
        other => panic!("expected error, got {:?}", other),
    }
    assert_eq!(next_event(&mut rx).await, ClientEvent::Disconnected);
    assert!(!client.is_connected().await);

    timeout(WAIT, peer).await.unwrap().unwrap();
    client.disconnect().await;
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn oversized_send_is_rejected_without_disconnecting() {
    let (server, addr, mut server_rx) = start_server().await;
    let (client, mut rx) = connect_client(addr).await;
    assert!(matches!(
        next_event(&mut server_rx).await,
        ServerEvent::ClientConnected { .. }
    ));

    let result = client.send(&"x".repeat(protocol::MAX_LINE_LEN + 1)).await;
    assert!(matches!(result, Err(ProtocolError::LineTooLong { .. })));
    assert!(client.is_connected().await);
    assert!(rx.try_recv().is_err());

    client.send("after").await.unwrap();
    match next_event(&mut server_rx).await {
        ServerEvent::MessageReceived { text, .. } => assert_eq!(text, "after"),
        other => panic!("unexpected {:?}", other),
    }

    client.disconnect().await;
    server.stop().await;
}
