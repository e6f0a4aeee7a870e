use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Request, State},
    http::{HeaderMap, header},
    middleware::Next,
    response::Response,
};
use tracing::{debug, instrument};

use crate::{
    app_state::AppState,
    http::error::{ApiError, AppResult},
    middleware::request_context::RequestContext,
};

/// Guard for the protected API: requires `Authorization: Bearer <token>` and
/// records the token's user on the [`RequestContext`].
#[instrument(skip_all, fields(path = %req.uri().path()))]
pub async fn require_auth(
    State(state): State<Arc<AppState>>,
    mut req: Request<Body>,
    next: Next,
) -> AppResult<Response> {
    let claims = {
        let token = bearer_token(req.headers())?;
        state.tokens.verify(token).map_err(|err| {
            debug!(error = %err, "rejected bearer token");
            ApiError::unauthorized("Invalid or expired token")
        })?
    };

    if let Some(context) = req.extensions_mut().get_mut::<RequestContext>() {
        context.user_id = Some(claims.user_id);
    } else {
        req.extensions_mut().insert(RequestContext {
            request_id: String::new(),
            user_id: Some(claims.user_id),
        });
    }

    Ok(next.run(req).await)
}

fn bearer_token(headers: &HeaderMap) -> AppResult<&str> {
    let value = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| ApiError::unauthorized("Authorization header is not provided"))?;

    let mut fields = value.split_whitespace();
    let (Some(scheme), Some(token)) = (fields.next(), fields.next()) else {
        return Err(ApiError::unauthorized(
            "Invalid authorization header format",
        ));
    };

    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(ApiError::unauthorized(
            "Unsupported authorization type, 'Bearer' required",
        ));
    }

    Ok(token)
}
