//! Model catalog administration.

use parley_core::{now_millis, ChatError, LogType, ModelDescriptor, Provider};
use rusqlite::Connection;
use serde_json::json;
use tracing::info;

use crate::db;
use crate::dto::{CreateModelRequest, UpdateModelRequest};
use crate::services::{audit, StorageExt};
use crate::ServerState;

pub fn list(state: &ServerState, active_only: bool) -> Result<Vec<ModelDescriptor>, ChatError> {
    let conn = state.db_lock()?;
    db::list_models(&conn, active_only).storage()
}

fn validate(model: &ModelDescriptor) -> Result<(), ChatError> {
    let required = [
        ("name", &model.name),
        ("model_id", &model.model_id),
        ("api_key_env_var", &model.api_key_env_var),
    ];
    if let Some((field, _)) = required.iter().find(|(_, v)| v.trim().is_empty()) {
        return Err(ChatError::InvalidInput(format!("{field} must not be empty")));
    }
    if model.max_tokens == Some(0) {
        return Err(ChatError::InvalidInput("max_tokens must be positive".into()));
    }
    if let Some(t) = model.temperature.filter(|t| !(0.0..=2.0).contains(t)) {
        return Err(ChatError::InvalidInput(format!("temperature {t} is outside 0.0..=2.0")));
    }
    Ok(())
}

fn ensure_unique(conn: &Connection, model: &ModelDescriptor) -> Result<(), ChatError> {
    let taken = db::list_models(conn, false)
        .storage()?
        .iter()
        .any(|m| m.model_id == model.model_id && m.id != model.id);
    match taken {
        true => Err(ChatError::InvalidInput(format!("model_id '{}' already exists", model.model_id))),
        false => Ok(()),
    }
}

pub fn create(state: &ServerState, admin_id: &str, req: CreateModelRequest) -> Result<ModelDescriptor, ChatError> {
    let provider: Provider = req.provider.trim().parse()?;
    let now = now_millis();
    let model = ModelDescriptor {
        id: uuid::Uuid::new_v4().to_string(),
        name: req.name.trim().to_string(),
        provider,
        model_id: req.model_id.trim().to_string(),
        api_key_env_var: req.api_key_env_var.trim().to_string(),
        description: req.description,
        is_active: true,
        is_restricted: req.is_restricted,
        max_tokens: req.max_tokens,
        temperature: req.temperature,
        created_at: now,
        updated_at: now,
    };
    validate(&model)?;

    let conn = state.db_lock()?;
    ensure_unique(&conn, &model)?;
    db::insert_model(&conn, &model).storage()?;
    audit::record(
        &conn,
        LogType::AdminAction,
        Some(admin_id),
        json!({ "action": "model_created", "model_id": model.model_id, "provider": provider.tag() }),
    )?;
    info!("Model {} ({}) created by {}", model.name, model.model_id, admin_id);
    Ok(model)
}

pub fn update(
    state: &ServerState,
    admin_id: &str,
    id: &str,
    req: UpdateModelRequest,
) -> Result<ModelDescriptor, ChatError> {
    let provider = req.provider.as_deref().map(|p| p.trim().parse::<Provider>()).transpose()?;

    let conn = state.db_lock()?;
    let mut model = db::get_model(&conn, id)
        .storage()?
        .ok_or_else(|| ChatError::NotFound(format!("model {id}")))?;

    if let Some(name) = req.name {
        model.name = name.trim().to_string();
    }
    if let Some(provider) = provider {
        model.provider = provider;
    }
    if let Some(model_id) = req.model_id {
        model.model_id = model_id.trim().to_string();
    }
    if let Some(env_var) = req.api_key_env_var {
        model.api_key_env_var = env_var.trim().to_string();
    }
    if let Some(description) = req.description {
        model.description = Some(description);
    }
    if let Some(active) = req.is_active {
        model.is_active = active;
    }
    if let Some(restricted) = req.is_restricted {
        model.is_restricted = restricted;
    }
    if let Some(max_tokens) = req.max_tokens {
        model.max_tokens = Some(max_tokens);
    }
    if let Some(temperature) = req.temperature {
        model.temperature = Some(temperature);
    }
    model.updated_at = now_millis();

    validate(&model)?;
    ensure_unique(&conn, &model)?;
    db::save_model(&conn, &model).storage()?;
    audit::record(
        &conn,
        LogType::AdminAction,
        Some(admin_id),
        json!({ "action": "model_updated", "id": model.id, "model_id": model.model_id }),
    )?;
    info!("Model {} updated by {}", model.id, admin_id);
    Ok(model)
}

pub fn remove(state: &ServerState, admin_id: &str, id: &str) -> Result<(), ChatError> {
    let conn = state.db_lock()?;
    let model = db::get_model(&conn, id)
        .storage()?
        .ok_or_else(|| ChatError::NotFound(format!("model {id}")))?;
    db::delete_model(&conn, id).storage()?;
    audit::record(
        &conn,
        LogType::AdminAction,
        Some(admin_id),
        json!({ "action": "model_deleted", "id": id, "model_id": model.model_id }),
    )?;
    info!("Model {} ({}) removed by {}", model.name, model.model_id, admin_id);
    Ok(())
}
