use std::sync::Arc;

use axum::{
    extract::{
        Query, State,
        ws::{WebSocket, WebSocketUpgrade, rejection::WebSocketUpgradeRejection},
    },
    response::{IntoResponse, Response},
};
use futures_util::StreamExt;
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::{
    client::{read_pump, write_pump},
    hub::Hub,
};
use crate::{
    app_state::AppState,
    http::error::{ApiError, AppResult},
};

#[derive(Debug, Default, Deserialize)]
pub struct WsAuthQuery {
    token: Option<String>,
}

/// `GET /ws?token=<bearer>`. The token is checked before the upgrade so a bad
/// credential gets a plain 401 instead of a socket.
#[instrument(skip_all)]
pub async fn ws_upgrade(
    State(state): State<Arc<AppState>>,
    Query(query): Query<WsAuthQuery>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> AppResult<Response> {
    let token = query
        .token
        .as_deref()
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or_else(|| ApiError::unauthorized("Missing token"))?;

    let claims = state.tokens.verify(token).map_err(|err| {
        debug!(error = %err, "rejected websocket token");
        ApiError::unauthorized("Invalid or expired token")
    })?;

    let ws = ws.map_err(|rejection| {
        warn!(error = %rejection, "websocket upgrade rejected");
        ApiError::bad_request(rejection.body_text())
    })?;

    let hub = state.hub.clone();
    let user_id = claims.user_id;
    Ok(ws
        .max_message_size(hub.settings().max_message_size)
        .on_upgrade(move |socket| serve_connection(socket, hub, user_id))
        .into_response())
}

/// Drive one upgraded socket until its read side ends.
async fn serve_connection(socket: WebSocket, hub: Hub, user_id: Uuid) {
    let (sink, stream) = socket.split();
    let (client, outbound) = hub.connect(user_id);
    info!(conn_id = %client.id(), %user_id, "websocket connected");

    hub.register(client.clone()).await;

    let writer = tokio::spawn(write_pump(
        sink,
        outbound,
        client.clone(),
        hub.settings().clone(),
    ));
    read_pump(stream, client.clone(), hub).await;

    if let Err(err) = writer.await {
        warn!(conn_id = %client.id(), error = %err, "write pump task failed");
    }
    info!(conn_id = %client.id(), %user_id, "websocket disconnected");
}
