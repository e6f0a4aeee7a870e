use std::sync::Arc;

use axum::{
    Json,
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use tracing::{info, instrument};
use uuid::Uuid;

use super::{page_param, require_member};
use crate::{
    app_state::AppState,
    http::error::{ApiError, AppResult},
    middleware::request_context::RequestContext,
    services::chat_service::ChatService,
};
use shared::models::{CreateMessageRequest, Message, UpdateMessageRequest, is_empty_body};

const HISTORY_LIMIT_DEFAULT: i64 = 20;
const HISTORY_LIMIT_MAX: i64 = 100;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryQuery {
    chat_id: Option<String>,
    limit: Option<String>,
    offset: Option<String>,
}

/// `POST /api/v1/messages`
///
/// Same addressing rules as `new_message` over the socket. Recipients hear
/// about the message through the hub; the sender gets it in the response.
#[instrument(skip_all)]
pub async fn post_message(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<RequestContext>,
    Json(payload): Json<CreateMessageRequest>,
) -> AppResult<impl IntoResponse> {
    let sender_id = context.require_user()?;
    ChatService::validate_body(&payload.content, payload.attachment.as_deref())?;

    let target = state
        .chats
        .resolve_target(sender_id, payload.chat_id, payload.receiver_id)
        .await?;
    let message = state
        .chats
        .post_message(sender_id, &target, &payload.content, payload.attachment)
        .await?;

    state
        .hub
        .broadcast_chat_message(&message, target.created.as_ref())
        .await;
    info!(message_id = %message.id, chat_id = %message.chat_id, "message posted");

    Ok((StatusCode::CREATED, Json(message)))
}

/// `GET /api/v1/messages?chatId=&limit=&offset=`, newest first.
#[instrument(skip(state, context))]
pub async fn list_messages(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<RequestContext>,
    Query(query): Query<HistoryQuery>,
) -> AppResult<Json<Vec<Message>>> {
    let caller = context.require_user()?;
    let chat_id = query
        .chat_id
        .as_deref()
        .map(str::trim)
        .filter(|raw| !raw.is_empty())
        .ok_or_else(|| ApiError::bad_request("chatId query parameter is required"))?;
    let chat_id =
        Uuid::parse_str(chat_id).map_err(|_| ApiError::bad_request("Invalid chatId format"))?;

    require_member(&state, chat_id, caller).await?;

    let limit = page_param(
        query.limit.as_deref(),
        HISTORY_LIMIT_DEFAULT,
        1,
        HISTORY_LIMIT_MAX,
    );
    let offset = page_param(query.offset.as_deref(), 0, 0, i64::MAX);

    let messages = state
        .stores
        .messages
        .get_messages_by_chat_id(chat_id, limit, offset)
        .await?;
    Ok(Json(messages))
}

/// `PATCH /api/v1/messages/{id}`. Author only.
#[instrument(skip(state, context, payload))]
pub async fn update_message(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<RequestContext>,
    Path(message_id): Path<Uuid>,
    Json(payload): Json<UpdateMessageRequest>,
) -> AppResult<Json<Message>> {
    let caller = context.require_user()?;
    let content = payload.content.as_deref().map(str::trim).unwrap_or_default();
    if is_empty_body(content, payload.attachment.as_deref()) {
        return Err(ApiError::bad_request("Message content or attachment required"));
    }

    let updated = state
        .stores
        .messages
        .update_message_content(message_id, caller, content, payload.attachment.as_deref())
        .await?;

    state.hub.broadcast_message_update(&updated).await;
    Ok(Json(updated))
}

/// `DELETE /api/v1/messages/{id}`. Author only; the record is kept with its
/// content cleared.
#[instrument(skip(state, context))]
pub async fn delete_message(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<RequestContext>,
    Path(message_id): Path<Uuid>,
) -> AppResult<Json<Message>> {
    let caller = context.require_user()?;
    let deleted = state
        .stores
        .messages
        .soft_delete_message(message_id, caller)
        .await?;

    state.hub.broadcast_message_deletion(&deleted).await;
    Ok(Json(deleted))
}
