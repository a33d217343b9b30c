//! Bearer-token authentication extractor.
//!
//! All core routes take an `Authenticated` argument; the extractor
//! validates the `Authorization: Bearer` header against the configured
//! secret and resolves the calling user.

use axum::{extract::FromRequestParts, http::request::Parts};

use crate::error::AppError;
use crate::services::auth::AuthenticatedUser;
use crate::AppState;

/// Authenticated user extractor.
///
/// Use this in route handlers to require authentication:
/// ```ignore
/// async fn my_handler(auth: Authenticated) -> impl IntoResponse {
///     let user_id = auth.user.user_id;
///     // ...
/// }
/// ```
pub struct Authenticated {
    pub user: AuthenticatedUser,
}

#[axum::async_trait]
impl FromRequestParts<AppState> for Authenticated {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get("Authorization")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| AppError::Unauthorized("Missing Authorization header".to_string()))?;

        let token = auth_header
            .strip_prefix("Bearer ")
            .ok_or_else(|| AppError::Unauthorized("Expected a bearer token".to_string()))?;

        let user = state.auth.authenticate(token)?;
        Ok(Authenticated { user })
    }
}
