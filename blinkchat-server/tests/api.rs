//! REST API tests through the full router, including auth and problem details.

use std::sync::Arc;

use axum::http::StatusCode;
use axum_test::TestServer;
use metrics_exporter_prometheus::PrometheusBuilder;
use serde_json::{Value, json};
use server::{app_state::AppState, server::create_app_router, store::Stores};
use shared::{
    config::server::Config,
    models::{AuthResponse, Chat, MarkChatReadResponse, Message, PublicUser},
};

fn test_app() -> TestServer {
    let (state, worker) = AppState::new(Arc::new(Config::for_tests()), Stores::in_memory(), None)
        .expect("test state");
    tokio::spawn(worker.run());
    let handle = PrometheusBuilder::new().build_recorder().handle();
    TestServer::new(create_app_router(state, handle)).expect("test server")
}

async fn register(server: &TestServer, name: &str) -> AuthResponse {
    let response = server
        .post("/api/v1/auth/register")
        .json(&json!({
            "username": name,
            "email": format!("{name}@example.com"),
            "password": "secret-pass",
        }))
        .await;
    response.assert_status(StatusCode::CREATED);
    response.json::<AuthResponse>()
}

#[tokio::test]
async fn health_is_public() {
    let server = test_app();
    let response = server.get("/health").await;
    response.assert_status_ok();
    response.assert_json(&json!({ "status": "UP" }));
}

#[tokio::test]
async fn registration_and_login() {
    let server = test_app();
    let alice = register(&server, "alice").await;
    assert_eq!(alice.message, "User registered successfully");

    let duplicate = server
        .post("/api/v1/auth/register")
        .json(&json!({
            "username": "alice2",
            "email": "ALICE@example.com",
            "password": "secret-pass",
        }))
        .await;
    duplicate.assert_status(StatusCode::CONFLICT);
    assert_eq!(duplicate.json::<Value>()["code"], "email_exists");

    let wrong = server
        .post("/api/v1/auth/login")
        .json(&json!({ "email": "alice@example.com", "password": "nope-nope" }))
        .await;
    wrong.assert_status(StatusCode::UNAUTHORIZED);
    assert_eq!(
        wrong.header("content-type").to_str().unwrap(),
        "application/problem+json"
    );

    let login = server
        .post("/api/v1/auth/login")
        .json(&json!({ "email": "alice@example.com", "password": "secret-pass" }))
        .await;
    login.assert_status_ok();
    let session = login.json::<AuthResponse>();

    let me = server
        .get("/api/v1/auth/me")
        .authorization_bearer(&session.token)
        .await;
    me.assert_status_ok();
    assert_eq!(me.json::<PublicUser>().id, alice.user.id);
}

#[tokio::test]
async fn protected_routes_need_a_bearer_token() {
    let server = test_app();

    let missing = server.get("/api/v1/chats").await;
    missing.assert_status(StatusCode::UNAUTHORIZED);
    assert_eq!(
        missing.json::<Value>()["message"],
        "Authorization header is not provided"
    );

    let basic = server
        .get("/api/v1/chats")
        .add_header("authorization", "Basic abc")
        .await;
    basic.assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn messaging_over_rest() {
    let server = test_app();
    let alice = register(&server, "alice").await;
    let bob = register(&server, "bob").await;

    let posted = server
        .post("/api/v1/messages")
        .authorization_bearer(&alice.token)
        .json(&json!({ "receiverId": bob.user.id, "content": "  lunch? " }))
        .await;
    posted.assert_status(StatusCode::CREATED);
    let message = posted.json::<Message>();
    assert_eq!(message.content, "lunch?");

    let chats = server
        .get("/api/v1/chats")
        .authorization_bearer(&bob.token)
        .await
        .json::<Vec<Chat>>();
    assert_eq!(chats.len(), 1);
    assert_eq!(chats[0].id, message.chat_id);
    assert_eq!(chats[0].unread_count, 1);

    let history = server
        .get("/api/v1/messages")
        .add_query_param("chatId", message.chat_id)
        .authorization_bearer(&bob.token)
        .await
        .json::<Vec<Message>>();
    assert_eq!(history.len(), 1);

    let read = server
        .post(&format!("/api/v1/chats/{}/read", message.chat_id))
        .authorization_bearer(&bob.token)
        .json(&json!({}))
        .await;
    read.assert_status_ok();
    assert_eq!(read.json::<MarkChatReadResponse>().unread_count, 0);

    let edited = server
        .patch(&format!("/api/v1/messages/{}", message.id))
        .authorization_bearer(&alice.token)
        .json(&json!({ "content": "dinner?" }))
        .await;
    edited.assert_status_ok();
    assert!(edited.json::<Message>().is_edited);

    let not_author = server
        .delete(&format!("/api/v1/messages/{}", message.id))
        .authorization_bearer(&bob.token)
        .await;
    not_author.assert_status(StatusCode::NOT_FOUND);

    let deleted = server
        .delete(&format!("/api/v1/messages/{}", message.id))
        .authorization_bearer(&alice.token)
        .await;
    deleted.assert_status_ok();
    assert!(deleted.json::<Message>().is_deleted);
}

#[tokio::test]
async fn group_chat_lifecycle() {
    let server = test_app();
    let alice = register(&server, "alice").await;
    let bob = register(&server, "bob").await;
    let carol = register(&server, "carol").await;

    let created = server
        .post("/api/v1/chats")
        .authorization_bearer(&alice.token)
        .json(&json!({ "participantIds": [bob.user.id], "name": " Team " }))
        .await;
    created.assert_status(StatusCode::CREATED);
    let chat = created.json::<Chat>();
    assert!(chat.is_group);
    assert_eq!(chat.name, "Team");

    let renamed = server
        .patch(&format!("/api/v1/chats/{}", chat.id))
        .authorization_bearer(&bob.token)
        .json(&json!({ "name": "Crew" }))
        .await;
    renamed.assert_status_ok();
    assert_eq!(renamed.json::<Chat>().name, "Crew");

    let outsider = server
        .patch(&format!("/api/v1/chats/{}", chat.id))
        .authorization_bearer(&carol.token)
        .json(&json!({ "name": "Mine" }))
        .await;
    outsider.assert_status(StatusCode::FORBIDDEN);

    let added = server
        .post(&format!("/api/v1/chats/{}/participants", chat.id))
        .authorization_bearer(&alice.token)
        .json(&json!({ "userIds": [carol.user.id] }))
        .await;
    added.assert_status_ok();
    assert_eq!(added.json::<Chat>().other_participants.len(), 2);

    server
        .delete(&format!(
            "/api/v1/chats/{}/participants/{}",
            chat.id, carol.user.id
        ))
        .authorization_bearer(&alice.token)
        .await
        .assert_status(StatusCode::NO_CONTENT);

    let search = server
        .get("/api/v1/users")
        .add_query_param("search", "carol@example.com")
        .authorization_bearer(&alice.token)
        .await
        .json::<Vec<PublicUser>>();
    assert_eq!(search.len(), 1);
    assert_eq!(search[0].id, carol.user.id);
}
