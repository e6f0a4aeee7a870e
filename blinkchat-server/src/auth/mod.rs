//! Credential handling: password hashing and bearer tokens.

use thiserror::Error;

pub mod password;
pub mod token;

pub use password::{hash_password, verify_password};
pub use token::{Claims, TokenService};

/// Errors produced by the auth collaborator.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("password hashing failed: {0}")]
    PasswordHash(String),
    #[error("invalid email or password")]
    InvalidCredentials,
    #[error("invalid or expired token")]
    InvalidToken,
    #[error("token service misconfigured: {0}")]
    Misconfigured(String),
}
