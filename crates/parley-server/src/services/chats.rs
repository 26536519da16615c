//! Chat lifecycle: create, rename, reselect model, archive.

use parley_core::{now_millis, Chat, ChatError, LogType};
use rusqlite::Connection;
use serde_json::json;
use tracing::info;

use crate::db;
use crate::services::{audit, StorageExt};
use crate::ServerState;

const DEFAULT_TITLE: &str = "New Chat";

/// Loads a chat and checks that `user_id` owns it.
pub fn load_owned(conn: &Connection, user_id: &str, chat_id: &str) -> Result<Chat, ChatError> {
    let chat = db::get_chat(conn, chat_id)
        .storage()?
        .ok_or_else(|| ChatError::ChatNotFound(chat_id.to_string()))?;
    if !chat.is_owned_by(user_id) {
        return Err(ChatError::Forbidden);
    }
    Ok(chat)
}

fn require(value: &str, field: &str) -> Result<String, ChatError> {
    match value.trim() {
        "" => Err(ChatError::InvalidInput(format!("{field} must not be empty"))),
        trimmed => Ok(trimmed.to_string()),
    }
}

pub fn list(state: &ServerState, user_id: &str) -> Result<Vec<Chat>, ChatError> {
    let conn = state.db_lock()?;
    db::list_chats(&conn, user_id).storage()
}

pub fn get(state: &ServerState, user_id: &str, chat_id: &str) -> Result<Chat, ChatError> {
    let conn = state.db_lock()?;
    load_owned(&conn, user_id, chat_id)
}

pub fn create(state: &ServerState, user_id: &str, title: Option<&str>, model_id: &str) -> Result<Chat, ChatError> {
    let model_id = require(model_id, "model_id")?;
    let title = title
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .unwrap_or(DEFAULT_TITLE)
        .to_string();

    let now = now_millis();
    let chat = Chat {
        id: uuid::Uuid::new_v4().to_string(),
        user_id: user_id.to_string(),
        title,
        model_id,
        is_archived: false,
        created_at: now,
        updated_at: now,
    };

    let conn = state.db_lock()?;
    db::insert_chat(&conn, &chat).storage()?;
    audit::record(
        &conn,
        LogType::UserAction,
        Some(user_id),
        json!({ "action": "chat_created", "chat_id": chat.id, "model_id": chat.model_id }),
    )?;
    info!("Chat {} created by {} (model: {})", chat.id, user_id, chat.model_id);
    Ok(chat)
}

pub fn update_title(state: &ServerState, user_id: &str, chat_id: &str, title: &str) -> Result<(), ChatError> {
    let title = require(title, "title")?;
    let conn = state.db_lock()?;
    load_owned(&conn, user_id, chat_id)?;
    db::update_chat_title(&conn, chat_id, &title).storage()
}

pub fn select_model(state: &ServerState, user_id: &str, chat_id: &str, model_id: &str) -> Result<(), ChatError> {
    let model_id = require(model_id, "model_id")?;
    let conn = state.db_lock()?;
    load_owned(&conn, user_id, chat_id)?;
    db::set_chat_model(&conn, chat_id, &model_id).storage()
}

pub fn archive(state: &ServerState, user_id: &str, chat_id: &str) -> Result<(), ChatError> {
    let conn = state.db_lock()?;
    load_owned(&conn, user_id, chat_id)?;
    db::archive_chat(&conn, chat_id).storage()?;
    audit::record(
        &conn,
        LogType::UserAction,
        Some(user_id),
        json!({ "action": "chat_archived", "chat_id": chat_id }),
    )?;
    info!("Chat {} archived by {}", chat_id, user_id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_state;

    #[test]
    fn owner_checks_distinguish_missing_from_foreign() {
        let (state, _jobs) = test_state();
        let chat = create(&state, "alice", Some("  Trip plans "), "gpt-4").unwrap();
        assert_eq!(chat.title, "Trip plans");

        assert_eq!(get(&state, "alice", &chat.id).unwrap().id, chat.id);
        assert!(matches!(get(&state, "bob", &chat.id), Err(ChatError::Forbidden)));
        assert!(matches!(get(&state, "alice", "nope"), Err(ChatError::ChatNotFound(_))));
    }

    #[test]
    fn blank_title_falls_back_and_model_is_required() {
        let (state, _jobs) = test_state();
        assert_eq!(create(&state, "alice", Some(" "), "gpt-4").unwrap().title, DEFAULT_TITLE);
        assert!(matches!(create(&state, "alice", None, ""), Err(ChatError::InvalidInput(_))));
    }

    #[test]
    fn rename_reselect_and_archive() {
        let (state, _jobs) = test_state();
        let chat = create(&state, "alice", None, "gpt-4").unwrap();

        update_title(&state, "alice", &chat.id, "Renamed").unwrap();
        select_model(&state, "alice", &chat.id, "claude-3-sonnet").unwrap();
        let stored = get(&state, "alice", &chat.id).unwrap();
        assert_eq!(stored.title, "Renamed");
        assert_eq!(stored.model_id, "claude-3-sonnet");

        assert!(matches!(archive(&state, "bob", &chat.id), Err(ChatError::Forbidden)));
        archive(&state, "alice", &chat.id).unwrap();
        assert!(list(&state, "alice").unwrap().is_empty());
    }
}
