//! End-to-end WebSocket tests against a real listener and the in-memory store.

use std::{sync::Arc, time::Duration};

use futures_util::{SinkExt, StreamExt};
use metrics_exporter_prometheus::PrometheusBuilder;
use serde_json::{Value, json};
use server::{
    app_state::AppState,
    server::create_app_router,
    store::{NewUser, Stores},
};
use shared::config::server::Config;
use tokio::{net::TcpListener, time::timeout};
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{Error as WsError, Message as WsMessage, http::StatusCode},
};
use uuid::Uuid;

type Socket = WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>;

struct TestServer {
    addr: std::net::SocketAddr,
    state: Arc<AppState>,
}

impl TestServer {
    async fn start() -> Self {
        let mut config = Config::for_tests();
        config.websocket.pong_wait_secs = 5;
        let (state, worker) = AppState::new(Arc::new(config), Stores::in_memory(), None)
            .expect("test state");
        tokio::spawn(worker.run());

        let handle = PrometheusBuilder::new().build_recorder().handle();
        let app = create_app_router(state.clone(), handle);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self { addr, state }
    }

    async fn user(&self, name: &str) -> (Uuid, String) {
        let user = self
            .state
            .stores
            .users
            .create_user(NewUser {
                username: name.into(),
                email: format!("{name}@example.com"),
                password_hash: "unused".into(),
            })
            .await
            .unwrap();
        let token = self.state.tokens.issue(user.id).unwrap();
        (user.id, token)
    }

    async fn connect(&self, user_id: Uuid, token: &str) -> Socket {
        let (socket, _) = connect_async(format!("ws://{}/ws?token={token}", self.addr))
            .await
            .expect("websocket upgrade");
        for _ in 0..100 {
            if self.state.hub.registry().is_online(user_id).await {
                return socket;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("connection for {user_id} never registered");
    }
}

async fn send(socket: &mut Socket, value: Value) {
    socket
        .send(WsMessage::Text(value.to_string().into()))
        .await
        .unwrap();
}

/// Next JSON envelope, skipping keepalive frames.
async fn recv(socket: &mut Socket) -> Value {
    loop {
        let frame = timeout(Duration::from_secs(3), socket.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("socket closed")
            .expect("socket error");
        match frame {
            WsMessage::Text(text) => return serde_json::from_str(text.as_str()).unwrap(),
            WsMessage::Ping(_) | WsMessage::Pong(_) => {}
            other => panic!("unexpected frame {other:?}"),
        }
    }
}

#[tokio::test]
async fn upgrade_without_valid_token_is_refused() {
    let server = TestServer::start().await;

    for url in [
        format!("ws://{}/ws", server.addr),
        format!("ws://{}/ws?token=garbage", server.addr),
    ] {
        match connect_async(url).await {
            Err(WsError::Http(response)) => {
                assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
            }
            other => panic!("expected 401, got {:?}", other.map(|_| ())),
        }
    }
}

#[tokio::test]
async fn first_direct_message_announces_the_chat() {
    let server = TestServer::start().await;
    let (alice, alice_token) = server.user("alice").await;
    let (bob, bob_token) = server.user("bob").await;
    let mut alice_ws = server.connect(alice, &alice_token).await;
    let mut bob_ws = server.connect(bob, &bob_token).await;

    send(
        &mut alice_ws,
        json!({
            "type": "new_message",
            "payload": { "receiverId": bob, "content": "hi\nbob", "clientTempId": "t-1" }
        }),
    )
    .await;

    let ack = recv(&mut alice_ws).await;
    assert_eq!(ack["type"], "message_sent_ack");
    assert_eq!(ack["payload"]["clientTempId"], "t-1");

    let announced = recv(&mut bob_ws).await;
    assert_eq!(announced["type"], "new_chat");
    let others = announced["payload"]["chat"]["otherParticipants"]
        .as_array()
        .unwrap();
    assert_eq!(others.len(), 1);
    assert_eq!(others[0]["id"], alice.to_string());

    let delivered = recv(&mut bob_ws).await;
    assert_eq!(delivered["type"], "new_message");
    assert_eq!(delivered["payload"]["content"], "hi bob");
    assert_eq!(delivered["payload"]["chatId"], ack["payload"]["chatId"]);

    send(
        &mut alice_ws,
        json!({
            "type": "new_message",
            "payload": { "receiverId": bob, "content": "again" }
        }),
    )
    .await;
    let second_ack = recv(&mut alice_ws).await;
    assert_eq!(second_ack["payload"]["chatId"], ack["payload"]["chatId"]);
    let second = recv(&mut bob_ws).await;
    assert_eq!(second["type"], "new_message");
}

#[tokio::test]
async fn read_receipts_reach_the_author() {
    let server = TestServer::start().await;
    let (alice, alice_token) = server.user("alice").await;
    let (bob, bob_token) = server.user("bob").await;
    let mut alice_ws = server.connect(alice, &alice_token).await;
    let mut bob_ws = server.connect(bob, &bob_token).await;

    send(
        &mut alice_ws,
        json!({ "type": "new_message", "payload": { "receiverId": bob, "content": "ping" } }),
    )
    .await;
    let ack = recv(&mut alice_ws).await;
    recv(&mut bob_ws).await;
    let message = recv(&mut bob_ws).await;
    assert_eq!(message["type"], "new_message");

    send(
        &mut bob_ws,
        json!({
            "type": "message_status_update",
            "payload": {
                "messageId": ack["payload"]["serverMsgId"],
                "chatId": ack["payload"]["chatId"],
                "status": "read"
            }
        }),
    )
    .await;

    let receipt = recv(&mut alice_ws).await;
    assert_eq!(receipt["type"], "message_status_update");
    assert_eq!(receipt["payload"]["status"], "read");
    assert_eq!(receipt["payload"]["userId"], bob.to_string());

    let echo = recv(&mut bob_ws).await;
    assert_eq!(echo["type"], "message_status_update");
}

#[tokio::test]
async fn typing_reaches_other_members_and_bad_frames_get_errors() {
    let server = TestServer::start().await;
    let (alice, alice_token) = server.user("alice").await;
    let (bob, bob_token) = server.user("bob").await;
    let mut alice_ws = server.connect(alice, &alice_token).await;
    let mut bob_ws = server.connect(bob, &bob_token).await;

    send(
        &mut alice_ws,
        json!({ "type": "new_message", "payload": { "receiverId": bob, "content": "yo" } }),
    )
    .await;
    let ack = recv(&mut alice_ws).await;
    recv(&mut bob_ws).await;
    recv(&mut bob_ws).await;

    send(
        &mut bob_ws,
        json!({
            "type": "typing_indicator",
            "payload": { "chatId": ack["payload"]["chatId"], "userId": bob, "isTyping": true }
        }),
    )
    .await;
    let typing = recv(&mut alice_ws).await;
    assert_eq!(typing["type"], "typing_indicator");
    assert_eq!(typing["payload"]["isTyping"], true);

    bob_ws
        .send(WsMessage::Text("{not json".into()))
        .await
        .unwrap();
    let error = recv(&mut bob_ws).await;
    assert_eq!(error["type"], "error");
    assert_eq!(error["payload"]["message"], "Invalid message format");

    send(&mut bob_ws, json!({ "type": "shout", "payload": {} })).await;
    let unknown = recv(&mut bob_ws).await;
    assert_eq!(unknown["payload"]["message"], "Unknown message type");
}

#[tokio::test]
async fn closing_the_socket_deregisters_the_user() {
    let server = TestServer::start().await;
    let (alice, token) = server.user("alice").await;
    let mut socket = server.connect(alice, &token).await;

    socket.close(None).await.unwrap();

    for _ in 0..100 {
        if !server.state.hub.registry().is_online(alice).await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("user still registered after close");
}
