use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Timestamp;

/// Minimum accepted username length.
pub const USERNAME_MIN_LEN: usize = 3;
/// Maximum accepted username length.
pub const USERNAME_MAX_LEN: usize = 50;
/// Minimum accepted password length.
pub const PASSWORD_MIN_LEN: usize = 6;
/// Maximum accepted password length.
pub const PASSWORD_MAX_LEN: usize = 72;

/// Publicly visible user profile.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PublicUser {
    /// Unique identifier for the user.
    pub id: Uuid,

    /// The user's username.
    pub username: String,

    /// The user's email address.
    pub email: String,

    /// When the account was created.
    pub created_at: Timestamp,

    /// When the account was last modified.
    pub updated_at: Timestamp,
}

impl PublicUser {
    /// Placeholder used when the sender profile cannot be resolved.
    #[must_use]
    pub fn unknown(id: Uuid) -> Self {
        let now = Timestamp::now();
        Self {
            id,
            username: "Unknown".to_string(),
            email: String::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Request to create a new account.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CreateUserRequest {
    /// The desired username.
    pub username: String,

    /// The user's email address.
    pub email: String,

    /// The plain-text password.
    pub password: String,
}

impl CreateUserRequest {
    /// Collect every validation problem with the request.
    #[must_use]
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        let username_len = self.username.trim().chars().count();
        if !(USERNAME_MIN_LEN..=USERNAME_MAX_LEN).contains(&username_len) {
            errors.push(format!(
                "username must be between {USERNAME_MIN_LEN} and {USERNAME_MAX_LEN} characters"
            ));
        }

        if !looks_like_email(&self.email) {
            errors.push("email must be a valid address".to_string());
        }

        let password_len = self.password.len();
        if !(PASSWORD_MIN_LEN..=PASSWORD_MAX_LEN).contains(&password_len) {
            errors.push(format!(
                "password must be between {PASSWORD_MIN_LEN} and {PASSWORD_MAX_LEN} characters"
            ));
        }

        errors
    }
}

/// Request to authenticate with email and password.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct LoginRequest {
    /// The user's email address.
    pub email: String,

    /// The plain-text password.
    pub password: String,
}

/// Response returned by register and login.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AuthResponse {
    /// Human readable outcome.
    pub message: String,

    /// Bearer token for subsequent requests and the WebSocket upgrade.
    pub token: String,

    /// The authenticated user.
    pub user: PublicUser,
}

/// Minimal structural email check: one `@` with non-empty local part and a dotted domain.
#[must_use]
pub fn looks_like_email(value: &str) -> bool {
    let value = value.trim();
    let Some((local, domain)) = value.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && domain
            .split_once('.')
            .is_some_and(|(head, tail)| !head.is_empty() && !tail.is_empty())
        && !value.contains(char::is_whitespace)
}
