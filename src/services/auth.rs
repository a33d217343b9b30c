//! Authentication Service
//!
//! Verifies bearer JWTs signed with the configured secret. Registration
//! and credential handling live in an external identity service; this
//! platform trusts the token claims and lazily provisions the user row on
//! first authenticated request.

use crate::services::SqliteStore;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Authentication errors.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Missing or malformed Authorization header")]
    MissingToken,

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Database error: {0}")]
    Database(String),
}

/// JWT claims carried by platform tokens.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// User id.
    pub sub: String,
    pub email: String,
    /// Expiration timestamp (seconds).
    pub exp: i64,
    /// Issued-at timestamp (seconds).
    pub iat: i64,
}

/// The verified identity of a request.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user_id: String,
    pub email: String,
}

/// JWT verification and lazy user provisioning.
pub struct AuthService {
    secret: String,
    store: Arc<SqliteStore>,
}

impl AuthService {
    pub fn new(secret: String, store: Arc<SqliteStore>) -> Self {
        Self { secret, store }
    }

    /// Issue a token for a user. Used by tooling and tests; production
    /// tokens come from the identity service sharing the secret.
    pub fn issue_token(&self, user_id: &str, email: &str) -> Result<String, AuthError> {
        let now = Utc::now();
        let claims = Claims {
            sub: user_id.to_string(),
            email: email.to_string(),
            exp: (now + Duration::days(7)).timestamp(),
            iat: now.timestamp(),
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .map_err(|e| AuthError::InvalidToken(e.to_string()))
    }

    /// Verify a bearer token and return the authenticated user, creating
    /// the user row on first sight.
    pub fn authenticate(&self, token: &str) -> Result<AuthenticatedUser, AuthError> {
        let data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &Validation::default(),
        )
        .map_err(|e| AuthError::InvalidToken(e.to_string()))?;

        let claims = data.claims;
        let display_name = claims
            .email
            .split('@')
            .next()
            .unwrap_or(&claims.email)
            .to_string();
        self.store
            .ensure_user(&claims.sub, &claims.email, &display_name)
            .map_err(|e| AuthError::Database(e.to_string()))?;

        debug!("Authenticated user {}", claims.sub);
        Ok(AuthenticatedUser {
            user_id: claims.sub,
            email: claims.email,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> AuthService {
        let store = Arc::new(SqliteStore::new_in_memory().unwrap());
        AuthService::new("test-secret-at-least-32-bytes-long".into(), store)
    }

    #[test]
    fn test_token_round_trip() {
        let auth = service();
        let token = auth.issue_token("user-1", "user@example.com").unwrap();
        let user = auth.authenticate(&token).unwrap();
        assert_eq!(user.user_id, "user-1");
        assert_eq!(user.email, "user@example.com");
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let auth = service();
        let other = service();
        // Same secret, different store: token still validates.
        let token = auth.issue_token("user-1", "user@example.com").unwrap();
        assert!(other.authenticate(&token).is_ok());

        let bad = AuthService::new(
            "another-secret-which-does-not-match".into(),
            Arc::new(SqliteStore::new_in_memory().unwrap()),
        );
        assert!(bad.authenticate(&token).is_err());
    }

    #[test]
    fn test_garbage_token_rejected() {
        let auth = service();
        assert!(auth.authenticate("not.a.jwt").is_err());
    }

    #[test]
    fn test_user_row_provisioned() {
        let store = Arc::new(SqliteStore::new_in_memory().unwrap());
        let auth = AuthService::new("test-secret-at-least-32-bytes-long".into(), store.clone());
        let token = auth.issue_token("user-9", "trader@example.com").unwrap();
        auth.authenticate(&token).unwrap();

        let user = store.get_user("user-9").unwrap();
        assert_eq!(user.email, "trader@example.com");
        assert_eq!(user.display_name, "trader");
    }
}
