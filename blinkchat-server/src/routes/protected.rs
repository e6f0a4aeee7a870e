use std::sync::Arc;

use crate::{
    app_state::AppState,
    handlers::{chats, messages, users},
    middleware::auth::require_auth,
};
use axum::{
    Router, middleware,
    routing::{delete, get, patch, post},
};
use tracing::info;

/// Everything under `/api/v1` that needs a bearer token
pub fn create_router_protected(state: Arc<AppState>) -> Router<Arc<AppState>> {
    info!("Creating protected router");
    Router::new()
        .route("/users", get(users::search_users))
        .route("/users/{id}", get(users::get_user))
        .route(
            "/messages",
            get(messages::list_messages).post(messages::post_message),
        )
        .route(
            "/messages/{id}",
            patch(messages::update_message).delete(messages::delete_message),
        )
        .route("/chats", get(chats::list_chats).post(chats::create_chat))
        .route("/chats/{id}", patch(chats::update_chat))
        .route("/chats/{id}/participants", post(chats::add_participants))
        .route(
            "/chats/{id}/participants/{user_id}",
            delete(chats::remove_participant),
        )
        .route("/chats/{id}/read", post(chats::mark_chat_read))
        .route_layer(middleware::from_fn_with_state(state, require_auth))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
    };
    use tower::ServiceExt;

    #[tokio::test]
    async fn every_route_requires_a_token() {
        let state = AppState::for_tests();
        let router = create_router_protected(state.clone()).with_state(state);

        for uri in ["/users?search=a", "/chats", "/messages?chatId=x"] {
            let response = router
                .clone()
                .oneshot(Request::get(uri).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{uri}");
        }
    }
}
