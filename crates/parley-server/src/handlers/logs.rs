//! Audit and error log handlers.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::Json;
use parley_core::LogEntry;

use crate::auth::{AdminUser, CurrentUser};
use crate::dto::LogQuery;
use crate::error::AppError;
use crate::services;
use crate::ServerState;

/// All entries, optionally filtered by `type`. Admin only.
pub async fn list(
    State(state): State<Arc<ServerState>>,
    _admin: AdminUser,
    Query(query): Query<LogQuery>,
) -> Result<Json<Vec<LogEntry>>, AppError> {
    let logs = services::audit::list(&state, query.log_type.as_deref(), None, query.limit)?;
    Ok(Json(logs))
}

/// The caller's own entries.
pub async fn mine(
    State(state): State<Arc<ServerState>>,
    CurrentUser(user_id): CurrentUser,
    Query(query): Query<LogQuery>,
) -> Result<Json<Vec<LogEntry>>, AppError> {
    let logs = services::audit::list(&state, query.log_type.as_deref(), Some(&user_id), query.limit)?;
    Ok(Json(logs))
}
