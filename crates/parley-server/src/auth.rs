//! Caller identity extractors.
//!
//! Authentication happens upstream; the identity proxy forwards the caller's
//! id in the `x-user-id` header.

use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use parley_core::ChatError;
use tracing::warn;

use crate::error::AppError;
use crate::ServerState;

pub const USER_HEADER: &str = "x-user-id";

/// Authenticated caller.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub String);

impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
            .map(|v| CurrentUser(v.to_string()))
            .ok_or_else(|| ChatError::Unauthenticated.into())
    }
}

/// Caller listed in `PARLEY_ADMIN_USERS`.
#[derive(Debug, Clone)]
pub struct AdminUser(pub String);

impl FromRequestParts<Arc<ServerState>> for AdminUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &Arc<ServerState>) -> Result<Self, Self::Rejection> {
        let CurrentUser(user_id) = CurrentUser::from_request_parts(parts, state).await?;
        if !state.config.is_admin(&user_id) {
            warn!("Admin access denied for user {}", user_id);
            return Err(ChatError::Forbidden.into());
        }
        Ok(AdminUser(user_id))
    }
}
