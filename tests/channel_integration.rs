mod common;

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

use common::{FakeServer, eventually, task, wire_task};
use novel_tasks::realtime::frame::encode_server_event;
use novel_tasks::realtime::{ChannelClient, ChannelError, Connector, WsConnector};
use novel_tasks::tasks::{TaskRepository, TaskStatus, TaskUpdate};

fn client_for(server: &Arc<FakeServer>) -> ChannelClient {
    let connector: Arc<dyn Connector> = server.clone();
    ChannelClient::new(connector, Duration::from_secs(2))
}

#[tokio::test]
async fn test_handshake_success() {
    let server = FakeServer::new("good");
    let channel = client_for(&server);

    assert_eq!(channel.connect(Some("good")).await, Ok(true));
    assert!(channel.is_connected());
    assert_eq!(
        server.received(),
        vec![
            "40".to_string(),
            r#"42["authenticate",{"token":"good"}]"#.to_string(),
        ]
    );
    assert_eq!(server.authenticated_clients(), 1);
}

#[tokio::test]
async fn test_handshake_rejected_with_server_message() {
    let server = FakeServer::new("good");
    let channel = client_for(&server);

    let result = channel.connect(Some("bad")).await;
    assert_eq!(result, Err(ChannelError::AuthRejected("bad token".to_string())));
    assert!(!result.unwrap_err().is_retryable());
    assert!(!channel.is_connected());
    assert_eq!(server.authenticated_clients(), 0);
}

#[tokio::test]
async fn test_connect_without_token_does_not_open() {
    let server = FakeServer::new("good");
    let channel = client_for(&server);

    assert_eq!(channel.connect(None).await, Err(ChannelError::MissingToken));
    assert_eq!(channel.connect(Some("")).await, Err(ChannelError::MissingToken));
    assert_eq!(server.opens(), 0);
}

#[tokio::test]
async fn test_connect_waits_for_auth_response() {
    let server = FakeServer::new("good");
    server.silent_auth.store(true, Ordering::SeqCst);
    let connector: Arc<dyn Connector> = server.clone();
    let channel = ChannelClient::new(connector, Duration::from_millis(200));

    // authenticate 已发出但没有回应，连接不能算建立
    assert_eq!(
        channel.connect(Some("good")).await,
        Err(ChannelError::HandshakeTimeout)
    );
    assert!(!channel.is_connected());
    assert!(server.received().iter().any(|f| f.contains("authenticate")));
}

#[tokio::test]
async fn test_connect_is_reentrant() {
    let server = FakeServer::new("good");
    let channel = Arc::new(client_for(&server));

    let (a, b) = tokio::join!(channel.connect(Some("good")), channel.connect(Some("good")));
    assert_eq!(a, Ok(true));
    assert_eq!(b, Ok(true));
    assert_eq!(channel.connect(Some("good")).await, Ok(true));
    assert_eq!(server.opens(), 1);
}

#[tokio::test]
async fn test_transport_failure_is_retryable() {
    let server = FakeServer::new("good");
    server.fail_opens.store(1, Ordering::SeqCst);
    let channel = client_for(&server);

    let err = channel.connect(Some("good")).await.unwrap_err();
    assert!(matches!(err, ChannelError::Transport(_)));
    assert!(err.is_retryable());

    assert_eq!(channel.connect(Some("good")).await, Ok(true));
    assert_eq!(server.opens(), 2);
}

#[tokio::test]
async fn test_updates_reach_every_subscriber_in_order() {
    let server = FakeServer::new("good");
    let channel = client_for(&server);

    let first: Arc<Mutex<Vec<i64>>> = Arc::default();
    let second: Arc<Mutex<Vec<i64>>> = Arc::default();
    {
        let first = Arc::clone(&first);
        channel.on_task_update(move |update| first.lock().unwrap().push(update.id()));
    }
    let handle = {
        let second = Arc::clone(&second);
        channel.on_task_update(move |update| second.lock().unwrap().push(update.id()))
    };
    assert_eq!(channel.subscriber_count(), 2);

    channel.connect(Some("good")).await.unwrap();
    for id in [3, 1, 2] {
        server.push(
            "task_update",
            wire_task(id, "DOWNLOADING", json!(10), "2025-05-01T10:00:01"),
        );
    }
    eventually(|| first.lock().unwrap().len() == 3).await;
    eventually(|| second.lock().unwrap().len() == 3).await;
    assert_eq!(*first.lock().unwrap(), vec![3, 1, 2]);
    assert_eq!(*second.lock().unwrap(), vec![3, 1, 2]);

    // 取消订阅后不再收到
    assert!(channel.unsubscribe(handle));
    server.push("task_update", json!({"id": 3, "deleted": true}));
    eventually(|| first.lock().unwrap().len() == 4).await;
    assert_eq!(second.lock().unwrap().len(), 3);
}

#[tokio::test]
async fn test_malformed_and_unknown_frames_are_ignored() {
    let server = FakeServer::new("good");
    let channel = client_for(&server);
    let seen: Arc<Mutex<Vec<TaskUpdate>>> = Arc::default();
    {
        let seen = Arc::clone(&seen);
        channel.on_task_update(move |update| seen.lock().unwrap().push(update.clone()));
    }
    channel.connect(Some("good")).await.unwrap();

    server.push_raw("42[\"task_update\",");
    server.push("task_update", json!({"status": "DOWNLOADING"}));
    server.push("some_other_event", json!({"id": 1}));
    server.push_raw("2");
    server.push(
        "task_update",
        wire_task(5, "COMPLETED", json!(100), "2025-05-01T10:00:09"),
    );

    eventually(|| seen.lock().unwrap().len() == 1).await;
    assert_eq!(seen.lock().unwrap()[0].id(), 5);
    assert!(channel.is_connected());
    // ping 得到 pong
    eventually(|| server.received().contains(&"3".to_string())).await;
}

#[tokio::test]
async fn test_disconnect_clears_subscribers() {
    let server = FakeServer::new("good");
    let channel = client_for(&server);
    channel.on_task_update(|_| {});
    channel.connect(Some("good")).await.unwrap();

    channel.disconnect().await;
    assert!(!channel.is_connected());
    assert_eq!(channel.subscriber_count(), 0);
    eventually(|| server.received().contains(&"41".to_string())).await;

    // 重复断开没有副作用
    channel.disconnect().await;
}

#[tokio::test]
async fn test_server_close_marks_disconnected() {
    let server = FakeServer::new("good");
    let channel = client_for(&server);
    channel.connect(Some("good")).await.unwrap();

    server.drop_connections();
    eventually(|| !channel.is_connected()).await;

    // 之后可以重新连接
    assert_eq!(channel.connect(Some("good")).await, Ok(true));
    assert_eq!(server.opens(), 2);
}

#[tokio::test]
async fn test_silent_server_marks_disconnected() {
    let server = FakeServer::new("good");
    *server.ping_settings.lock().unwrap() = (50, 50);
    let channel = client_for(&server);
    channel.connect(Some("good")).await.unwrap();
    assert!(channel.is_connected());

    // 服务端按时 ping 时连接保持
    for _ in 0..8 {
        tokio::time::sleep(Duration::from_millis(30)).await;
        server.push_raw("2");
    }
    assert!(channel.is_connected());

    // 超过 pingInterval + pingTimeout 没有任何帧
    eventually(|| !channel.is_connected()).await;

    assert_eq!(channel.connect(Some("good")).await, Ok(true));
    assert_eq!(server.opens(), 2);
}

#[tokio::test]
async fn test_end_to_end_snapshot_then_push() {
    let repository = Arc::new(TaskRepository::new());
    repository.replace_all(vec![
        task(1, TaskStatus::Pending, 0.0),
        task(2, TaskStatus::Downloading, 0.4),
    ]);

    let server = FakeServer::new("good");
    let channel = client_for(&server);
    {
        let repository = Arc::clone(&repository);
        channel.on_task_update(move |update| {
            repository.apply(update.clone());
        });
    }
    channel.connect(Some("good")).await.unwrap();

    server.push(
        "task_update",
        wire_task(1, "DOWNLOADING", json!(0.1), "2025-05-01T10:00:05"),
    );
    eventually(|| repository.get(1).map(|t| t.status) == Some(TaskStatus::Downloading)).await;

    let stored = repository.all();
    assert_eq!(stored.iter().map(|t| t.id).collect::<Vec<_>>(), vec![1, 2]);
    assert!((stored[0].progress - 0.1).abs() < 1e-9);
    assert_eq!(stored[1].status, TaskStatus::Downloading);
}

// 真实 WebSocket 服务端，只实现握手和一次推送
async fn serve_once(listener: TcpListener, valid_token: &'static str) {
    let (stream, _) = listener.accept().await.unwrap();
    let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

    ws.send(Message::text(
        r#"0{"sid":"ws1","upgrades":[],"pingInterval":25000,"pingTimeout":20000}"#,
    ))
    .await
    .unwrap();

    while let Some(Ok(message)) = ws.next().await {
        let Message::Text(text) = message else {
            continue;
        };
        let text = text.as_str().to_string();
        if text == "40" {
            ws.send(Message::text(r#"40{"sid":"n1"}"#)).await.unwrap();
            ws.send(Message::text(encode_server_event(
                "request_auth",
                &json!({"message": "Please authenticate with your JWT token."}),
            )))
            .await
            .unwrap();
        } else if text.contains("authenticate") {
            let ok = text.contains(valid_token);
            let message = if ok {
                "Authentication successful."
            } else {
                "bad token"
            };
            ws.send(Message::text(encode_server_event(
                "auth_response",
                &json!({"success": ok, "message": message}),
            )))
            .await
            .unwrap();
            if ok {
                ws.send(Message::text("2")).await.unwrap();
                ws.send(Message::text(encode_server_event(
                    "task_update",
                    &wire_task(8, "PROCESSING", json!(95), "2025-05-01T10:10:00"),
                )))
                .await
                .unwrap();
            }
        } else if text == "41" {
            break;
        }
    }
}

#[tokio::test]
async fn test_websocket_transport_against_local_server() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(serve_once(listener, "secret"));

    let url = Url::parse(&format!("ws://{}/socket.io/?EIO=4&transport=websocket", addr)).unwrap();
    let connector: Arc<dyn Connector> = Arc::new(WsConnector::new(url));
    let channel = ChannelClient::new(connector, Duration::from_secs(5));

    let repository = Arc::new(TaskRepository::new());
    {
        let repository = Arc::clone(&repository);
        channel.on_task_update(move |update| {
            repository.apply(update.clone());
        });
    }

    assert_eq!(channel.connect(Some("secret")).await, Ok(true));
    eventually(|| repository.get(8).is_some()).await;
    assert_eq!(repository.get(8).unwrap().status, TaskStatus::Processing);

    channel.disconnect().await;
    tokio::time::timeout(Duration::from_secs(2), server)
        .await
        .unwrap()
        .unwrap();
}
