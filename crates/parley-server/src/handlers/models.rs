//! Model catalog handlers.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use parley_core::ModelDescriptor;

use crate::auth::AdminUser;
use crate::dto::{CreateModelRequest, SuccessResponse, UpdateModelRequest};
use crate::error::AppError;
use crate::services;
use crate::ServerState;

/// Lists active models for the model picker.
pub async fn list_active(State(state): State<Arc<ServerState>>) -> Result<Json<Vec<ModelDescriptor>>, AppError> {
    Ok(Json(services::models::list(&state, true)?))
}

pub async fn list_all(
    State(state): State<Arc<ServerState>>,
    _admin: AdminUser,
) -> Result<Json<Vec<ModelDescriptor>>, AppError> {
    Ok(Json(services::models::list(&state, false)?))
}

pub async fn create(
    State(state): State<Arc<ServerState>>,
    AdminUser(admin_id): AdminUser,
    Json(req): Json<CreateModelRequest>,
) -> Result<(StatusCode, Json<ModelDescriptor>), AppError> {
    let model = services::models::create(&state, &admin_id, req)?;
    Ok((StatusCode::CREATED, Json(model)))
}

pub async fn update(
    State(state): State<Arc<ServerState>>,
    AdminUser(admin_id): AdminUser,
    Path(id): Path<String>,
    Json(req): Json<UpdateModelRequest>,
) -> Result<Json<ModelDescriptor>, AppError> {
    Ok(Json(services::models::update(&state, &admin_id, &id, req)?))
}

pub async fn remove(
    State(state): State<Arc<ServerState>>,
    AdminUser(admin_id): AdminUser,
    Path(id): Path<String>,
) -> Result<Json<SuccessResponse>, AppError> {
    services::models::remove(&state, &admin_id, &id)?;
    Ok(Json(SuccessResponse { success: true }))
}
