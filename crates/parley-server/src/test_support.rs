//! Shared fixtures for server tests.

use std::collections::HashSet;
use std::sync::Arc;

use parley_config::{ModelCatalog, ServerConfig};
use parley_core::{now_millis, Chat, ChatMessage, MessageRole, ProviderEndpoints};
use tokio::sync::mpsc;

use crate::db;
use crate::services::generation::GenerationJob;
use crate::ServerState;

pub const ADMIN: &str = "root";

/// In-memory state with the built-in catalog seeded and `root` as admin.
pub fn test_state_with_endpoints(base: &str) -> (Arc<ServerState>, mpsc::UnboundedReceiver<GenerationJob>) {
    let config = ServerConfig {
        database_url: ":memory:".into(),
        admin_users: HashSet::from([ADMIN.to_string()]),
        endpoints: ProviderEndpoints::all(base),
        ..ServerConfig::default()
    };
    let conn = db::init_db(&config.database_url).unwrap();
    db::seed_models(&conn, &ModelCatalog::builtin()).unwrap();
    let (state, jobs) = ServerState::new(config, conn);
    (Arc::new(state), jobs)
}

/// State whose vendor endpoints point at an unroutable address.
pub fn test_state() -> (Arc<ServerState>, mpsc::UnboundedReceiver<GenerationJob>) {
    test_state_with_endpoints("http://127.0.0.1:9")
}

fn insert_chat(state: &ServerState, model_id: &str) -> String {
    let now = now_millis();
    let chat = Chat {
        id: uuid::Uuid::new_v4().to_string(),
        user_id: "alice".into(),
        title: "Test".into(),
        model_id: model_id.into(),
        is_archived: false,
        created_at: now,
        updated_at: now,
    };
    db::insert_chat(&state.db_lock().unwrap(), &chat).unwrap();
    chat.id
}

fn insert_message(state: &ServerState, chat_id: &str, role: MessageRole, content: &str) -> String {
    let now = now_millis();
    let message = ChatMessage {
        id: uuid::Uuid::new_v4().to_string(),
        chat_id: chat_id.into(),
        role,
        content: content.into(),
        user_id: (role == MessageRole::User).then(|| "alice".to_string()),
        created_at: now,
        updated_at: now,
    };
    db::insert_message(&state.db_lock().unwrap(), &message).unwrap();
    message.id
}

/// Chat owned by `alice` with one empty assistant message; returns `(chat_id, message_id)`.
pub fn placeholder(state: &ServerState) -> (String, String) {
    let chat_id = insert_chat(state, "gpt-4");
    let message_id = insert_message(state, &chat_id, MessageRole::Assistant, "");
    (chat_id, message_id)
}

/// Chat owned by `alice` holding `content` and an empty reply placeholder.
pub fn user_turn(state: &ServerState, model_id: &str, content: &str) -> (String, String) {
    let chat_id = insert_chat(state, model_id);
    insert_message(state, &chat_id, MessageRole::User, content);
    let message_id = insert_message(state, &chat_id, MessageRole::Assistant, "");
    (chat_id, message_id)
}

/// Adds another user turn and reply placeholder to `chat_id`; returns the placeholder id.
pub fn follow_up(state: &ServerState, chat_id: &str, content: &str) -> String {
    insert_message(state, chat_id, MessageRole::User, content);
    insert_message(state, chat_id, MessageRole::Assistant, "")
}

pub fn message_content(state: &ServerState, message_id: &str) -> String {
    let conn = state.db_lock().unwrap();
    db::get_message(&conn, message_id).unwrap().unwrap().content
}
