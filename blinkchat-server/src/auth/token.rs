use chrono::Utc;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use shared::config::server::AuthConfig;
use std::fmt;
use tracing::debug;
use uuid::Uuid;

use super::AuthError;

/// Claims carried by every bearer token.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    pub user_id: Uuid,
    pub exp: i64,
    pub iat: i64,
    pub nbf: i64,
    pub iss: String,
}

/// Issues and verifies HS256 tokens.
#[derive(Clone)]
pub struct TokenService {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    issuer: String,
    ttl_seconds: i64,
}

impl fmt::Debug for TokenService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenService")
            .field("issuer", &self.issuer)
            .field("ttl_seconds", &self.ttl_seconds)
            .finish_non_exhaustive()
    }
}

impl TokenService {
    /// Build the service from the auth section of the configuration.
    ///
    /// # Errors
    /// Returns [`AuthError::Misconfigured`] when the secret is empty or the
    /// lifetime is zero.
    pub fn from_config(config: &AuthConfig) -> Result<Self, AuthError> {
        if config.jwt_secret.is_empty() {
            return Err(AuthError::Misconfigured("JWT secret is empty".into()));
        }
        let ttl_seconds = i64::try_from(config.token_ttl().as_secs())
            .ok()
            .filter(|ttl| *ttl > 0)
            .ok_or_else(|| AuthError::Misconfigured("token lifetime out of range".into()))?;

        let secret = config.jwt_secret.as_bytes();
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[config.issuer.as_str()]);
        validation.validate_nbf = true;

        Ok(Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation,
            issuer: config.issuer.clone(),
            ttl_seconds,
        })
    }

    /// Sign a token for `user_id`.
    pub fn issue(&self, user_id: Uuid) -> Result<String, AuthError> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            user_id,
            exp: now + self.ttl_seconds,
            iat: now,
            nbf: now,
            iss: self.issuer.clone(),
        };

        encode(&Header::default(), &claims, &self.encoding)
            .map_err(|err| AuthError::Misconfigured(err.to_string()))
    }

    /// Check signature, expiry, not-before and issuer.
    pub fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        decode::<Claims>(token, &self.decoding, &self.validation)
            .map(|data| data.claims)
            .map_err(|err| {
                debug!(error = %err, "rejected bearer token");
                AuthError::InvalidToken
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> AuthConfig {
        AuthConfig {
            jwt_secret: "unit-test-secret-that-is-long-enough-for-hs256".into(),
            token_hours: 1,
            issuer: "blinkchat-backend".into(),
        }
    }

    #[test]
    fn issued_token_verifies_with_claims() {
        let service = TokenService::from_config(&config()).unwrap();
        let user_id = Uuid::new_v4();

        let token = service.issue(user_id).unwrap();
        let claims = service.verify(&token).unwrap();

        assert_eq!(claims.user_id, user_id);
        assert_eq!(claims.iss, "blinkchat-backend");
        assert_eq!(claims.exp - claims.iat, 3600);
    }

    #[test]
    fn token_from_another_secret_is_rejected() {
        let service = TokenService::from_config(&config()).unwrap();
        let mut other = config();
        other.jwt_secret = "a-completely-different-secret-of-decent-length".into();
        let foreign = TokenService::from_config(&other).unwrap();

        let token = foreign.issue(Uuid::new_v4()).unwrap();
        assert!(matches!(service.verify(&token), Err(AuthError::InvalidToken)));
    }

    #[test]
    fn wrong_issuer_is_rejected() {
        let service = TokenService::from_config(&config()).unwrap();
        let mut other = config();
        other.issuer = "someone-else".into();
        let foreign = TokenService::from_config(&other).unwrap();

        let token = foreign.issue(Uuid::new_v4()).unwrap();
        assert!(service.verify(&token).is_err());
    }

    #[test]
    fn expired_token_is_rejected() {
        let service = TokenService::from_config(&config()).unwrap();
        let past = Utc::now().timestamp() - 7200;
        let claims = Claims {
            user_id: Uuid::new_v4(),
            exp: past,
            iat: past - 3600,
            nbf: past - 3600,
            iss: "blinkchat-backend".into(),
        };
        let token = encode(&Header::default(), &claims, &service.encoding).unwrap();
        assert!(matches!(service.verify(&token), Err(AuthError::InvalidToken)));
    }

    #[test]
    fn garbage_and_empty_secret() {
        let service = TokenService::from_config(&config()).unwrap();
        assert!(service.verify("not.a.token").is_err());

        let mut empty = config();
        empty.jwt_secret.clear();
        assert!(matches!(
            TokenService::from_config(&empty),
            Err(AuthError::Misconfigured(_))
        ));
    }
}
