use std::sync::Arc;

use axum::{
    Json,
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::{page_param, require_member};
use crate::{
    app_state::AppState,
    http::error::{ApiError, AppResult},
    middleware::request_context::RequestContext,
    store::dedupe_participants,
};
use shared::models::{
    Chat, CreateChatRequest, MarkChatReadRequest, MarkChatReadResponse,
    ModifyChatParticipantsRequest, PublicUser, Timestamp, UpdateChatRequest,
    filter_participants_for_viewer,
};

const CHATS_LIMIT_DEFAULT: i64 = 20;
const CHATS_LIMIT_MAX: i64 = 50;

#[derive(Debug, Default, Deserialize)]
pub struct ChatListQuery {
    limit: Option<String>,
    offset: Option<String>,
}

/// `GET /api/v1/chats`, most recently active first.
#[instrument(skip(state, context))]
pub async fn list_chats(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<RequestContext>,
    Query(query): Query<ChatListQuery>,
) -> AppResult<Json<Vec<Chat>>> {
    let caller = context.require_user()?;
    let limit = page_param(query.limit.as_deref(), CHATS_LIMIT_DEFAULT, 1, CHATS_LIMIT_MAX);
    let offset = page_param(query.offset.as_deref(), 0, 0, i64::MAX);

    let chats = state
        .stores
        .chats
        .get_user_chats(caller, limit, offset)
        .await?;
    Ok(Json(chats))
}

/// `POST /api/v1/chats`
#[instrument(skip_all)]
pub async fn create_chat(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<RequestContext>,
    Json(payload): Json<CreateChatRequest>,
) -> AppResult<impl IntoResponse> {
    let caller = context.require_user()?;

    let mut members = vec![caller];
    members.extend(payload.participant_ids.iter().copied());
    let members = dedupe_participants(&members);
    if members.len() <= 1 {
        return Err(ApiError::bad_request(
            "At least one other participant is required",
        ));
    }

    let name = payload.name.as_deref().map(str::trim).unwrap_or_default();
    let is_group = !name.is_empty() || members.len() > 2;

    let mut chat = state
        .stores
        .chats
        .create_chat(name, is_group, &members)
        .await?;

    let participants = participants_or_empty(&state, chat.id).await;
    let now = Timestamp::now();
    chat.other_participants = filter_participants_for_viewer(&participants, caller);
    chat.unread_count = 0;
    chat.last_read_at = Some(now);
    chat.last_message = None;

    if let Err(err) = state
        .stores
        .chats
        .update_participant_read_through(chat.id, caller, now)
        .await
    {
        warn!(chat_id = %chat.id, error = %err, "failed to seed creator read state");
    }

    state
        .hub
        .broadcast_new_chat(&chat, Some(&participants), caller, &[])
        .await;
    info!(chat_id = %chat.id, members = members.len(), is_group, "chat created");

    Ok((StatusCode::CREATED, Json(chat)))
}

/// `PATCH /api/v1/chats/{id}`. Only the name can change.
#[instrument(skip(state, context, payload))]
pub async fn update_chat(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<RequestContext>,
    Path(chat_id): Path<Uuid>,
    Json(payload): Json<UpdateChatRequest>,
) -> AppResult<Json<Chat>> {
    let caller = context.require_user()?;
    let name = payload
        .name
        .as_deref()
        .map(str::trim)
        .ok_or_else(|| ApiError::bad_request("No chat updates specified"))?;

    require_member(&state, chat_id, caller).await?;

    let chat = state.stores.chats.update_chat_name(chat_id, name).await?;
    let participants = participants_or_empty(&state, chat_id).await;
    let chat = as_seen_by(&state, &chat, &participants, caller).await;

    state
        .hub
        .broadcast_chat_updated(chat_id, &chat.name, Some(&participants))
        .await;
    Ok(Json(chat))
}

/// `POST /api/v1/chats/{id}/participants`
#[instrument(skip(state, context, payload))]
pub async fn add_participants(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<RequestContext>,
    Path(chat_id): Path<Uuid>,
    Json(payload): Json<ModifyChatParticipantsRequest>,
) -> AppResult<Json<Chat>> {
    let caller = context.require_user()?;
    if payload.user_ids.is_empty() {
        return Err(ApiError::bad_request("User IDs are required"));
    }

    require_member(&state, chat_id, caller).await?;

    let added = dedupe_participants(&payload.user_ids);
    for user_id in &added {
        state.stores.chats.add_user_to_chat(chat_id, *user_id).await?;
    }

    let chat = state.stores.chats.get_chat_by_id(chat_id).await?;
    let participants = participants_or_empty(&state, chat_id).await;
    let chat = as_seen_by(&state, &chat, &participants, caller).await;

    state
        .hub
        .broadcast_new_chat(&chat, Some(&participants), caller, &added)
        .await;
    state
        .hub
        .broadcast_chat_updated(chat_id, &chat.name, Some(&participants))
        .await;
    info!(%chat_id, added = added.len(), "participants added");

    Ok(Json(chat))
}

/// `DELETE /api/v1/chats/{id}/participants/{userId}`
#[instrument(skip(state, context))]
pub async fn remove_participant(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<RequestContext>,
    Path((chat_id, user_id)): Path<(Uuid, Uuid)>,
) -> AppResult<StatusCode> {
    let caller = context.require_user()?;
    require_member(&state, chat_id, caller).await?;

    state
        .stores
        .chats
        .remove_user_from_chat(chat_id, user_id)
        .await?;

    match state.stores.chats.get_chat_by_id(chat_id).await {
        Ok(chat) => {
            let participants = participants_or_empty(&state, chat_id).await;
            state
                .hub
                .broadcast_chat_updated(chat_id, &chat.name, Some(&participants))
                .await;
        }
        Err(err) => debug!(%chat_id, error = %err, "skipping update broadcast"),
    }

    Ok(StatusCode::NO_CONTENT)
}

/// `POST /api/v1/chats/{id}/read`
#[instrument(skip(state, context, payload))]
pub async fn mark_chat_read(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<RequestContext>,
    Path(chat_id): Path<Uuid>,
    payload: Option<Json<MarkChatReadRequest>>,
) -> AppResult<Json<MarkChatReadResponse>> {
    let caller = context.require_user()?;
    let read_through = payload
        .and_then(|Json(request)| request.read_through)
        .unwrap_or_else(Timestamp::now);

    state
        .stores
        .chats
        .update_participant_read_through(chat_id, caller, read_through)
        .await?;

    let unread_count = state
        .stores
        .messages
        .get_unread_message_count_for_user_in_chat(chat_id, caller)
        .await?;

    Ok(Json(MarkChatReadResponse {
        chat_id,
        unread_count,
        read_through,
    }))
}

async fn participants_or_empty(state: &AppState, chat_id: Uuid) -> Vec<PublicUser> {
    state
        .stores
        .chats
        .get_all_participants_in_chat(chat_id)
        .await
        .unwrap_or_else(|err| {
            warn!(%chat_id, error = %err, "failed to load participants");
            Vec::new()
        })
}

/// `chat` with the caller's view of members and unread count.
async fn as_seen_by(
    state: &AppState,
    chat: &Chat,
    participants: &[PublicUser],
    caller: Uuid,
) -> Chat {
    let mut chat = chat.for_viewer(participants, caller);
    match state
        .stores
        .messages
        .get_unread_message_count_for_user_in_chat(chat.id, caller)
        .await
    {
        Ok(unread) => chat.unread_count = unread,
        Err(err) => debug!(chat_id = %chat.id, error = %err, "unread count unavailable"),
    }
    chat
}
