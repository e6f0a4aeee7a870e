use std::sync::Arc;

use crate::{
    app_state::AppState,
    handlers::auth::{login, me, register},
    middleware::auth::require_auth,
};
use axum::{
    Router, middleware,
    routing::{get, post},
};
use tracing::info;

/// Register, login, and the token owner's profile
pub fn create_router_auth(state: Arc<AppState>) -> Router<Arc<AppState>> {
    info!("Creating auth router");
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route(
            "/auth/me",
            get(me).route_layer(middleware::from_fn_with_state(state, require_auth)),
        )
}
