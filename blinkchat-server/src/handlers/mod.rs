//! REST handlers for the `/api/v1` surface.

use uuid::Uuid;

use crate::{
    app_state::AppState,
    http::error::{ApiError, AppResult},
};
use shared::models::PublicUser;

pub mod auth;
pub mod chats;
pub mod messages;
pub mod users;

/// Parse a paging query value. Anything missing, malformed or outside
/// `min..=max` falls back to `default`.
pub(crate) fn page_param(raw: Option<&str>, default: i64, min: i64, max: i64) -> i64 {
    raw.and_then(|value| value.trim().parse::<i64>().ok())
        .filter(|value| (min..=max).contains(value))
        .unwrap_or(default)
}

/// Members of `chat_id`, provided `caller` is one of them.
///
/// # Errors
/// 404 for an unknown chat, 403 when the caller is not a member.
pub(crate) async fn require_member(
    state: &AppState,
    chat_id: Uuid,
    caller: Uuid,
) -> AppResult<Vec<PublicUser>> {
    let participants = state
        .stores
        .chats
        .get_all_participants_in_chat(chat_id)
        .await?;
    if participants.is_empty() {
        return Err(ApiError::not_found("Chat not found"));
    }
    if !participants.iter().any(|p| p.id == caller) {
        return Err(ApiError::forbidden("You are not a participant of this chat"));
    }
    Ok(participants)
}
