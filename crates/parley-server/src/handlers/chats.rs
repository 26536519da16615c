//! Chat CRUD handlers.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use parley_core::Chat;

use crate::auth::CurrentUser;
use crate::dto::{CreateChatRequest, CreatedResponse, SelectModelRequest, SuccessResponse, UpdateTitleRequest};
use crate::error::AppError;
use crate::services;
use crate::ServerState;

/// Lists the caller's non-archived chats, newest first.
pub async fn list(
    State(state): State<Arc<ServerState>>,
    CurrentUser(user_id): CurrentUser,
) -> Result<Json<Vec<Chat>>, AppError> {
    Ok(Json(services::chats::list(&state, &user_id)?))
}

pub async fn get(
    State(state): State<Arc<ServerState>>,
    CurrentUser(user_id): CurrentUser,
    Path(chat_id): Path<String>,
) -> Result<Json<Chat>, AppError> {
    Ok(Json(services::chats::get(&state, &user_id, &chat_id)?))
}

pub async fn create(
    State(state): State<Arc<ServerState>>,
    CurrentUser(user_id): CurrentUser,
    Json(req): Json<CreateChatRequest>,
) -> Result<(StatusCode, Json<CreatedResponse>), AppError> {
    let chat = services::chats::create(&state, &user_id, req.title.as_deref(), &req.model_id)?;
    Ok((StatusCode::CREATED, Json(CreatedResponse { id: chat.id })))
}

pub async fn update_title(
    State(state): State<Arc<ServerState>>,
    CurrentUser(user_id): CurrentUser,
    Path(chat_id): Path<String>,
    Json(req): Json<UpdateTitleRequest>,
) -> Result<Json<SuccessResponse>, AppError> {
    services::chats::update_title(&state, &user_id, &chat_id, &req.title)?;
    Ok(Json(SuccessResponse { success: true }))
}

pub async fn select_model(
    State(state): State<Arc<ServerState>>,
    CurrentUser(user_id): CurrentUser,
    Path(chat_id): Path<String>,
    Json(req): Json<SelectModelRequest>,
) -> Result<Json<SuccessResponse>, AppError> {
    services::chats::select_model(&state, &user_id, &chat_id, &req.model_id)?;
    Ok(Json(SuccessResponse { success: true }))
}

/// Soft-deletes a chat; its messages stay readable by id.
pub async fn archive(
    State(state): State<Arc<ServerState>>,
    CurrentUser(user_id): CurrentUser,
    Path(chat_id): Path<String>,
) -> Result<Json<SuccessResponse>, AppError> {
    services::chats::archive(&state, &user_id, &chat_id)?;
    Ok(Json(SuccessResponse { success: true }))
}
