use std::sync::Arc;

use axum::{
    Json,
    extract::{Extension, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde_json::json;
use tracing::{info, instrument, warn};

use crate::{
    app_state::AppState,
    auth::{AuthError, hash_password, verify_password},
    http::error::{ApiError, AppResult},
    middleware::request_context::RequestContext,
    store::{NewUser, StoreError},
};
use shared::models::{AuthResponse, CreateUserRequest, LoginRequest, PublicUser};

/// Emails are compared case-insensitively everywhere.
pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// `POST /api/v1/auth/register`
#[instrument(skip_all)]
pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateUserRequest>,
) -> AppResult<impl IntoResponse> {
    let problems = payload.validate();
    if !problems.is_empty() {
        return Err(ApiError::bad_request("Invalid registration data")
            .with_details(json!({ "errors": problems })));
    }

    let password_hash = hash_password(&payload.password)?;
    let user = state
        .stores
        .users
        .create_user(NewUser {
            username: payload.username.trim().to_string(),
            email: normalize_email(&payload.email),
            password_hash,
        })
        .await?;

    let token = state.tokens.issue(user.id)?;
    info!(user_id = %user.id, "user registered");

    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            message: "User registered successfully".to_string(),
            token,
            user: user.to_public(),
        }),
    ))
}

/// `POST /api/v1/auth/login`
#[instrument(skip_all)]
pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<LoginRequest>,
) -> AppResult<Json<AuthResponse>> {
    let email = normalize_email(&payload.email);
    if email.is_empty() || payload.password.is_empty() {
        return Err(ApiError::bad_request("Email and password are required"));
    }

    let user = match state.stores.users.get_user_by_email(&email).await {
        Ok(user) => user,
        Err(StoreError::UserNotFound) => return Err(AuthError::InvalidCredentials.into()),
        Err(err) => return Err(err.into()),
    };

    if let Err(err) = verify_password(&user.password_hash, &payload.password) {
        warn!(user_id = %user.id, "failed login attempt");
        return Err(err.into());
    }

    let token = state.tokens.issue(user.id)?;
    Ok(Json(AuthResponse {
        message: "Login successful".to_string(),
        token,
        user: user.to_public(),
    }))
}

/// `GET /api/v1/auth/me`
#[instrument(skip_all)]
pub async fn me(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<RequestContext>,
) -> AppResult<Json<PublicUser>> {
    let user_id = context.require_user()?;
    match state.stores.users.get_user_by_id(user_id).await {
        Ok(user) => Ok(Json(user.to_public())),
        Err(StoreError::UserNotFound) => Err(ApiError::not_found(
            "User associated with token not found",
        )),
        Err(err) => Err(err.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_is_trimmed_and_lowercased() {
        assert_eq!(normalize_email("  Alice@Example.COM "), "alice@example.com");
    }

    #[tokio::test]
    async fn register_then_login_with_different_case() {
        let state = AppState::for_tests();
        let payload = CreateUserRequest {
            username: "alice".into(),
            email: "Alice@Example.com".into(),
            password: "secret-pass".into(),
        };
        let response = register(State(state.clone()), Json(payload))
            .await
            .unwrap()
            .into_response();
        assert_eq!(response.status(), StatusCode::CREATED);

        let Json(auth) = login(
            State(state.clone()),
            Json(LoginRequest {
                email: " alice@example.COM".into(),
                password: "secret-pass".into(),
            }),
        )
        .await
        .unwrap();
        assert_eq!(auth.user.email, "alice@example.com");
        assert_eq!(state.tokens.verify(&auth.token).unwrap().user_id, auth.user.id);
    }

    #[tokio::test]
    async fn unknown_email_and_wrong_password_look_the_same() {
        let state = AppState::for_tests();
        register(
            State(state.clone()),
            Json(CreateUserRequest {
                username: "bob".into(),
                email: "bob@example.com".into(),
                password: "secret-pass".into(),
            }),
        )
        .await
        .unwrap();

        let unknown = login(
            State(state.clone()),
            Json(LoginRequest {
                email: "nobody@example.com".into(),
                password: "secret-pass".into(),
            }),
        )
        .await
        .unwrap_err();
        let wrong = login(
            State(state),
            Json(LoginRequest {
                email: "bob@example.com".into(),
                password: "not-it".into(),
            }),
        )
        .await
        .unwrap_err();

        assert_eq!(unknown.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn register_rejects_bad_input_and_duplicates() {
        let state = AppState::for_tests();
        let bad = register(
            State(state.clone()),
            Json(CreateUserRequest {
                username: "al".into(),
                email: "not-an-email".into(),
                password: "123".into(),
            }),
        )
        .await
        .err()
        .unwrap();
        assert_eq!(bad.status(), StatusCode::BAD_REQUEST);

        let request = CreateUserRequest {
            username: "carol".into(),
            email: "carol@example.com".into(),
            password: "secret-pass".into(),
        };
        register(State(state.clone()), Json(request.clone()))
            .await
            .unwrap();
        let duplicate = register(State(state), Json(request)).await.err().unwrap();
        assert_eq!(duplicate.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn me_requires_an_existing_user() {
        let state = AppState::for_tests();
        let context = RequestContext {
            request_id: "req".into(),
            user_id: Some(uuid::Uuid::new_v4()),
        };
        let err = me(State(state), Extension(context)).await.unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }
}
