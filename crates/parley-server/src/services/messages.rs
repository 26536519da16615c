//! Message orchestration: persist the user turn, create the assistant
//! placeholder, hand generation to the queue.

use parley_core::{now_millis, ChatError, ChatMessage, LogType, MessageRole};
use serde_json::json;
use tracing::info;

use crate::db;
use crate::dto::{MessageEvent, SendMessageRequest};
use crate::services::chats::load_owned;
use crate::services::generation::GenerationJob;
use crate::services::{audit, StorageExt};
use crate::ServerState;

pub fn list(state: &ServerState, user_id: &str, chat_id: &str) -> Result<Vec<ChatMessage>, ChatError> {
    let conn = state.db_lock()?;
    load_owned(&conn, user_id, chat_id)?;
    db::list_messages(&conn, chat_id).storage()
}

/// Accepts a user message and schedules the reply.
///
/// Returns the empty assistant placeholder that generation will fill.
/// Two sends on the same chat may overlap; each gets its own placeholder.
pub fn send(
    state: &ServerState,
    user_id: &str,
    chat_id: &str,
    req: SendMessageRequest,
) -> Result<ChatMessage, ChatError> {
    if req.content.trim().is_empty() {
        return Err(ChatError::InvalidInput("content must not be empty".into()));
    }
    let requested_model = req
        .model_id
        .as_deref()
        .map(str::trim)
        .filter(|m| !m.is_empty())
        .map(String::from);

    let (user_message, placeholder, model_id) = {
        let mut conn = state.db_lock()?;
        let tx = conn.transaction().map_err(|e| ChatError::Storage(e.to_string()))?;

        let chat = load_owned(&tx, user_id, chat_id)?;
        let model_id = match requested_model {
            Some(model) if model != chat.model_id => {
                db::set_chat_model(&tx, chat_id, &model).storage()?;
                info!("Chat {} switched model {} -> {}", chat_id, chat.model_id, model);
                model
            }
            _ => chat.model_id,
        };

        let now = now_millis();
        let user_message = ChatMessage {
            id: uuid::Uuid::new_v4().to_string(),
            chat_id: chat_id.to_string(),
            role: MessageRole::User,
            content: req.content,
            user_id: Some(user_id.to_string()),
            created_at: now,
            updated_at: now,
        };
        let placeholder = ChatMessage {
            id: uuid::Uuid::new_v4().to_string(),
            chat_id: chat_id.to_string(),
            role: MessageRole::Assistant,
            content: String::new(),
            user_id: None,
            created_at: now,
            updated_at: now,
        };
        db::insert_message(&tx, &user_message).storage()?;
        db::insert_message(&tx, &placeholder).storage()?;
        audit::record(
            &tx,
            LogType::UserAction,
            Some(user_id),
            json!({
                "action": "message_sent",
                "chat_id": chat_id,
                "message_id": user_message.id,
                "model_id": model_id,
            }),
        )?;
        tx.commit().map_err(|e| ChatError::Storage(e.to_string()))?;
        (user_message, placeholder, model_id)
    };

    for message in [&user_message, &placeholder] {
        state.publish(MessageEvent::Created {
            chat_id: chat_id.to_string(),
            message: message.clone(),
        });
    }

    state.queue.submit(GenerationJob {
        chat_id: chat_id.to_string(),
        message_id: placeholder.id.clone(),
        user_id: user_id.to_string(),
        model_id: model_id.clone(),
        credential: req.api_key,
    })?;

    info!("Message accepted in chat {} (model: {}), reply {}", chat_id, model_id, placeholder.id);
    Ok(placeholder)
}
