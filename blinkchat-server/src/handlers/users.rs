use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State},
};
use serde::Deserialize;
use tracing::{debug, instrument};
use uuid::Uuid;

use super::page_param;
use crate::{
    app_state::AppState,
    http::error::{ApiError, AppResult},
    store::StoreError,
};
use shared::models::PublicUser;

const SEARCH_LIMIT_DEFAULT: i64 = 20;
const SEARCH_LIMIT_MAX: i64 = 50;

#[derive(Debug, Default, Deserialize)]
pub struct SearchQuery {
    search: Option<String>,
    limit: Option<String>,
}

/// `GET /api/v1/users?search=&limit=`
///
/// Anything that contains `@` is tried as an exact email first and falls back
/// to the substring search when nobody has that address.
#[instrument(skip(state))]
pub async fn search_users(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SearchQuery>,
) -> AppResult<Json<Vec<PublicUser>>> {
    let search = query
        .search
        .as_deref()
        .map(str::trim)
        .filter(|search| !search.is_empty())
        .ok_or_else(|| ApiError::bad_request("Search query parameter is required"))?;
    let limit = page_param(query.limit.as_deref(), SEARCH_LIMIT_DEFAULT, 1, SEARCH_LIMIT_MAX);

    if search.contains('@') {
        match state
            .stores
            .users
            .get_user_by_email(&search.to_lowercase())
            .await
        {
            Ok(user) => return Ok(Json(vec![user.to_public()])),
            Err(StoreError::UserNotFound) => debug!("no exact email match"),
            Err(err) => return Err(err.into()),
        }
    }

    let users = state.stores.users.search_users(search, limit).await?;
    Ok(Json(users))
}

/// `GET /api/v1/users/{id}`
#[instrument(skip(state))]
pub async fn get_user(
    State(state): State<Arc<AppState>>,
    Path(user_id): Path<Uuid>,
) -> AppResult<Json<PublicUser>> {
    let user = state.stores.users.get_user_by_id(user_id).await?;
    Ok(Json(user.to_public()))
}
