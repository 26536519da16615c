//! SQLite persistence layer for chats, messages, model descriptors and logs.
//!
//! Free functions over a borrowed [`Connection`]; callers hold the server's
//! connection lock for the duration of each call and never across an await.

use std::fs;
use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result};
use parley_config::ModelCatalog;
use parley_core::{now_millis, Chat, ChatMessage, LogEntry, LogType, MessageRole, ModelDescriptor, Provider};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::info;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS chats (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    title TEXT NOT NULL,
    model_id TEXT NOT NULL,
    is_archived INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_chats_user ON chats (user_id, is_archived);

CREATE TABLE IF NOT EXISTS messages (
    id TEXT PRIMARY KEY,
    chat_id TEXT NOT NULL REFERENCES chats (id),
    role TEXT NOT NULL CHECK (role IN ('user', 'assistant')),
    content TEXT NOT NULL DEFAULT '',
    user_id TEXT,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_messages_chat ON messages (chat_id, created_at);

CREATE TABLE IF NOT EXISTS models (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    provider TEXT NOT NULL,
    model_id TEXT NOT NULL UNIQUE,
    api_key_env_var TEXT NOT NULL,
    description TEXT,
    is_active INTEGER NOT NULL DEFAULT 1,
    is_restricted INTEGER NOT NULL DEFAULT 0,
    max_tokens INTEGER,
    temperature REAL,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS logs (
    id TEXT PRIMARY KEY,
    type TEXT NOT NULL,
    timestamp INTEGER NOT NULL,
    user_id TEXT,
    details TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_logs_type ON logs (type, timestamp);
";

/// Opens (or creates) the database and applies the schema.
///
/// `:memory:` yields a private in-memory database.
pub fn init_db(path: &str) -> Result<Connection> {
    let conn = if path == ":memory:" {
        Connection::open_in_memory().context("failed to open in-memory database")?
    } else {
        if let Some(parent) = Path::new(path).parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).context("failed to create db directory")?;
        }
        Connection::open(path).context("failed to open database")?
    };
    conn.execute_batch(SCHEMA).context("failed to create tables")?;
    info!("Database initialized at {}", path);
    Ok(conn)
}

/// Wraps a domain parse failure as a column conversion error.
fn conversion_err<E>(idx: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

// === Chats ===

const CHAT_COLUMNS: &str = "id, user_id, title, model_id, is_archived, created_at, updated_at";

fn chat_from_row(row: &Row<'_>) -> rusqlite::Result<Chat> {
    Ok(Chat {
        id: row.get(0)?,
        user_id: row.get(1)?,
        title: row.get(2)?,
        model_id: row.get(3)?,
        is_archived: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

pub fn insert_chat(conn: &Connection, chat: &Chat) -> Result<()> {
    conn.execute(
        "INSERT INTO chats (id, user_id, title, model_id, is_archived, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            chat.id,
            chat.user_id,
            chat.title,
            chat.model_id,
            chat.is_archived,
            chat.created_at,
            chat.updated_at
        ],
    )
    .context("failed to insert chat")?;
    Ok(())
}

pub fn get_chat(conn: &Connection, id: &str) -> Result<Option<Chat>> {
    conn.query_row(
        &format!("SELECT {CHAT_COLUMNS} FROM chats WHERE id = ?1"),
        params![id],
        chat_from_row,
    )
    .optional()
    .context("failed to load chat")
}

/// Lists a user's non-archived chats, most recently created first.
pub fn list_chats(conn: &Connection, user_id: &str) -> Result<Vec<Chat>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {CHAT_COLUMNS} FROM chats
             WHERE user_id = ?1 AND is_archived = 0
             ORDER BY created_at DESC, rowid DESC"
        ))
        .context("failed to prepare chat list query")?;
    let rows = stmt.query_map(params![user_id], chat_from_row)?;
    rows.collect::<rusqlite::Result<Vec<_>>>()
        .context("failed to list chats")
}

pub fn update_chat_title(conn: &Connection, id: &str, title: &str) -> Result<()> {
    conn.execute(
        "UPDATE chats SET title = ?1, updated_at = ?2 WHERE id = ?3",
        params![title, now_millis(), id],
    )
    .context("failed to update chat title")?;
    Ok(())
}

pub fn set_chat_model(conn: &Connection, id: &str, model_id: &str) -> Result<()> {
    conn.execute(
        "UPDATE chats SET model_id = ?1, updated_at = ?2 WHERE id = ?3",
        params![model_id, now_millis(), id],
    )
    .context("failed to update chat model")?;
    Ok(())
}

pub fn archive_chat(conn: &Connection, id: &str) -> Result<()> {
    conn.execute(
        "UPDATE chats SET is_archived = 1, updated_at = ?1 WHERE id = ?2",
        params![now_millis(), id],
    )
    .context("failed to archive chat")?;
    Ok(())
}

// === Messages ===

const MESSAGE_COLUMNS: &str = "id, chat_id, role, content, user_id, created_at, updated_at";

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<ChatMessage> {
    let role: String = row.get(2)?;
    Ok(ChatMessage {
        id: row.get(0)?,
        chat_id: row.get(1)?,
        role: MessageRole::from_str(&role).map_err(|e| conversion_err(2, e))?,
        content: row.get(3)?,
        user_id: row.get(4)?,
        created_at: row.get(5)?,
        updated_at: row.get(6)?,
    })
}

pub fn insert_message(conn: &Connection, message: &ChatMessage) -> Result<()> {
    conn.execute(
        "INSERT INTO messages (id, chat_id, role, content, user_id, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            message.id,
            message.chat_id,
            message.role.as_str(),
            message.content,
            message.user_id,
            message.created_at,
            message.updated_at
        ],
    )
    .context("failed to insert message")?;
    Ok(())
}

#[cfg(test)]
pub fn get_message(conn: &Connection, id: &str) -> Result<Option<ChatMessage>> {
    conn.query_row(
        &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
        params![id],
        message_from_row,
    )
    .optional()
    .context("failed to load message")
}

/// Lists a chat's messages in creation order.
pub fn list_messages(conn: &Connection, chat_id: &str) -> Result<Vec<ChatMessage>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {MESSAGE_COLUMNS} FROM messages
             WHERE chat_id = ?1
             ORDER BY created_at ASC, rowid ASC"
        ))
        .context("failed to prepare message list query")?;
    let rows = stmt.query_map(params![chat_id], message_from_row)?;
    rows.collect::<rusqlite::Result<Vec<_>>>()
        .context("failed to list messages")
}

/// Appends `fragment` to a message in one statement.
///
/// Returns the new content length in bytes, or `None` if the message is gone.
pub fn append_message_content(conn: &Connection, id: &str, fragment: &str) -> Result<Option<usize>> {
    let updated = conn
        .execute(
            "UPDATE messages SET content = content || ?1, updated_at = ?2 WHERE id = ?3",
            params![fragment, now_millis(), id],
        )
        .context("failed to append message content")?;
    if updated == 0 {
        return Ok(None);
    }
    let len: i64 = conn
        .query_row(
            "SELECT length(CAST(content AS BLOB)) FROM messages WHERE id = ?1",
            params![id],
            |r| r.get(0),
        )
        .context("failed to read message length")?;
    Ok(Some(len as usize))
}

#[cfg(test)]
pub fn count_messages(conn: &Connection, chat_id: &str) -> Result<usize> {
    let count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM messages WHERE chat_id = ?1",
            params![chat_id],
            |r| r.get(0),
        )
        .context("failed to count messages")?;
    Ok(count as usize)
}

// === Models ===

const MODEL_COLUMNS: &str = "id, name, provider, model_id, api_key_env_var, description, \
                             is_active, is_restricted, max_tokens, temperature, created_at, updated_at";

fn model_from_row(row: &Row<'_>) -> rusqlite::Result<ModelDescriptor> {
    let provider: String = row.get(2)?;
    Ok(ModelDescriptor {
        id: row.get(0)?,
        name: row.get(1)?,
        provider: Provider::from_str(&provider).map_err(|e| conversion_err(2, e))?,
        model_id: row.get(3)?,
        api_key_env_var: row.get(4)?,
        description: row.get(5)?,
        is_active: row.get(6)?,
        is_restricted: row.get(7)?,
        max_tokens: row.get(8)?,
        temperature: row.get::<_, Option<f64>>(9)?.map(|t| t as f32),
        created_at: row.get(10)?,
        updated_at: row.get(11)?,
    })
}

pub fn insert_model(conn: &Connection, model: &ModelDescriptor) -> Result<()> {
    conn.execute(
        &format!(
            "INSERT INTO models ({MODEL_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"
        ),
        params![
            model.id,
            model.name,
            model.provider.tag(),
            model.model_id,
            model.api_key_env_var,
            model.description,
            model.is_active,
            model.is_restricted,
            model.max_tokens,
            model.temperature.map(f64::from),
            model.created_at,
            model.updated_at
        ],
    )
    .with_context(|| format!("failed to insert model {}", model.model_id))?;
    Ok(())
}

/// Overwrites every mutable column of an existing descriptor.
pub fn save_model(conn: &Connection, model: &ModelDescriptor) -> Result<()> {
    conn.execute(
        "UPDATE models SET name = ?1, provider = ?2, model_id = ?3, api_key_env_var = ?4,
             description = ?5, is_active = ?6, is_restricted = ?7, max_tokens = ?8,
             temperature = ?9, updated_at = ?10
         WHERE id = ?11",
        params![
            model.name,
            model.provider.tag(),
            model.model_id,
            model.api_key_env_var,
            model.description,
            model.is_active,
            model.is_restricted,
            model.max_tokens,
            model.temperature.map(f64::from),
            model.updated_at,
            model.id
        ],
    )
    .with_context(|| format!("failed to update model {}", model.id))?;
    Ok(())
}

pub fn get_model(conn: &Connection, id: &str) -> Result<Option<ModelDescriptor>> {
    conn.query_row(
        &format!("SELECT {MODEL_COLUMNS} FROM models WHERE id = ?1"),
        params![id],
        model_from_row,
    )
    .optional()
    .context("failed to load model")
}

/// Finds the active descriptor whose vendor id is `model_id`.
pub fn find_active_model(conn: &Connection, model_id: &str) -> Result<Option<ModelDescriptor>> {
    conn.query_row(
        &format!("SELECT {MODEL_COLUMNS} FROM models WHERE model_id = ?1 AND is_active = 1"),
        params![model_id],
        model_from_row,
    )
    .optional()
    .context("failed to look up model")
}

/// Lists descriptors ordered by display name.
pub fn list_models(conn: &Connection, active_only: bool) -> Result<Vec<ModelDescriptor>> {
    let filter = if active_only { "WHERE is_active = 1" } else { "" };
    let mut stmt = conn
        .prepare(&format!("SELECT {MODEL_COLUMNS} FROM models {filter} ORDER BY name ASC"))
        .context("failed to prepare model list query")?;
    let rows = stmt.query_map([], model_from_row)?;
    rows.collect::<rusqlite::Result<Vec<_>>>()
        .context("failed to list models")
}

/// Deletes a descriptor; returns whether a row was removed.
pub fn delete_model(conn: &Connection, id: &str) -> Result<bool> {
    let removed = conn
        .execute("DELETE FROM models WHERE id = ?1", params![id])
        .context("failed to delete model")?;
    Ok(removed > 0)
}

/// Inserts the catalog if the models table is empty.
///
/// Returns the number of descriptors inserted.
pub fn seed_models(conn: &Connection, catalog: &ModelCatalog) -> Result<usize> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM models", [], |r| r.get(0))?;
    if count > 0 {
        info!("Database already has {} models, skipping seed", count);
        return Ok(0);
    }

    info!("Seeding {} models...", catalog.models().len());
    let now = now_millis();
    for seed in catalog.models() {
        insert_model(
            conn,
            &ModelDescriptor {
                id: uuid::Uuid::new_v4().to_string(),
                name: seed.name.clone(),
                provider: seed.provider,
                model_id: seed.model_id.clone(),
                api_key_env_var: seed.api_key_env_var.clone(),
                description: seed.description.clone(),
                is_active: seed.is_active,
                is_restricted: seed.is_restricted,
                max_tokens: seed.max_tokens,
                temperature: seed.temperature,
                created_at: now,
                updated_at: now,
            },
        )?;
    }
    Ok(catalog.models().len())
}

// === Logs ===

/// Narrows a log listing.
#[derive(Debug, Clone, Default)]
pub struct LogFilter<'a> {
    pub log_type: Option<LogType>,
    pub user_id: Option<&'a str>,
    pub limit: u32,
}

fn log_from_row(row: &Row<'_>) -> rusqlite::Result<LogEntry> {
    let log_type: String = row.get(1)?;
    let details: String = row.get(4)?;
    Ok(LogEntry {
        id: row.get(0)?,
        log_type: LogType::from_str(&log_type).map_err(|e| conversion_err(1, e))?,
        timestamp: row.get(2)?,
        user_id: row.get(3)?,
        details: serde_json::from_str(&details).map_err(|e| conversion_err(4, e))?,
    })
}

pub fn insert_log(conn: &Connection, entry: &LogEntry) -> Result<()> {
    let details = serde_json::to_string(&entry.details).context("failed to serialize log details")?;
    conn.execute(
        "INSERT INTO logs (id, type, timestamp, user_id, details) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![entry.id, entry.log_type.as_str(), entry.timestamp, entry.user_id, details],
    )
    .context("failed to insert log entry")?;
    Ok(())
}

/// Lists log entries, newest first.
pub fn list_logs(conn: &Connection, filter: &LogFilter<'_>) -> Result<Vec<LogEntry>> {
    let mut stmt = conn
        .prepare(
            "SELECT id, type, timestamp, user_id, details FROM logs
             WHERE (?1 IS NULL OR type = ?1) AND (?2 IS NULL OR user_id = ?2)
             ORDER BY timestamp DESC, rowid DESC
             LIMIT ?3",
        )
        .context("failed to prepare log list query")?;
    let rows = stmt.query_map(
        params![filter.log_type.map(LogType::as_str), filter.user_id, filter.limit],
        log_from_row,
    )?;
    rows.collect::<rusqlite::Result<Vec<_>>>()
        .context("failed to list logs")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn chat(id: &str, user: &str, created_at: i64) -> Chat {
        Chat {
            id: id.into(),
            user_id: user.into(),
            title: format!("Chat {id}"),
            model_id: "gpt-4".into(),
            is_archived: false,
            created_at,
            updated_at: created_at,
        }
    }

    fn message(id: &str, chat_id: &str, role: MessageRole, content: &str) -> ChatMessage {
        ChatMessage {
            id: id.into(),
            chat_id: chat_id.into(),
            role,
            content: content.into(),
            user_id: None,
            created_at: 1,
            updated_at: 1,
        }
    }

    #[test]
    fn file_database_creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("parley.db");
        let path = path.to_str().unwrap();

        let conn = init_db(path).unwrap();
        insert_chat(&conn, &chat("a", "alice", 1)).unwrap();
        drop(conn);

        let reopened = init_db(path).unwrap();
        assert_eq!(get_chat(&reopened, "a").unwrap().unwrap().user_id, "alice");
    }

    #[test]
    fn chats_list_newest_first_and_hide_archived() {
        let conn = init_db(":memory:").unwrap();
        insert_chat(&conn, &chat("a", "alice", 1)).unwrap();
        insert_chat(&conn, &chat("b", "alice", 2)).unwrap();
        insert_chat(&conn, &chat("c", "bob", 3)).unwrap();
        archive_chat(&conn, "a").unwrap();

        let ids: Vec<String> = list_chats(&conn, "alice").unwrap().into_iter().map(|c| c.id).collect();
        assert_eq!(ids, vec!["b"]);
        assert!(get_chat(&conn, "a").unwrap().unwrap().is_archived);
        assert!(get_chat(&conn, "missing").unwrap().is_none());
    }

    #[test]
    fn append_concatenates_and_reports_length() {
        let conn = init_db(":memory:").unwrap();
        insert_chat(&conn, &chat("c", "alice", 1)).unwrap();
        insert_message(&conn, &message("m", "c", MessageRole::Assistant, "")).unwrap();

        assert_eq!(append_message_content(&conn, "m", "Hel").unwrap(), Some(3));
        assert_eq!(append_message_content(&conn, "m", "lo é").unwrap(), Some(8));
        assert_eq!(get_message(&conn, "m").unwrap().unwrap().content, "Hello é");
        assert_eq!(append_message_content(&conn, "gone", "x").unwrap(), None);
    }

    #[test]
    fn messages_keep_insertion_order_on_equal_timestamps() {
        let conn = init_db(":memory:").unwrap();
        insert_chat(&conn, &chat("c", "alice", 1)).unwrap();
        for (i, role) in [MessageRole::User, MessageRole::Assistant, MessageRole::User].into_iter().enumerate() {
            insert_message(&conn, &message(&format!("m{i}"), "c", role, "x")).unwrap();
        }
        let ids: Vec<String> = list_messages(&conn, "c").unwrap().into_iter().map(|m| m.id).collect();
        assert_eq!(ids, vec!["m0", "m1", "m2"]);
        assert_eq!(count_messages(&conn, "c").unwrap(), 3);
    }

    #[test]
    fn seeding_only_fills_an_empty_table() {
        let conn = init_db(":memory:").unwrap();
        let catalog = ModelCatalog::builtin();
        assert_eq!(seed_models(&conn, &catalog).unwrap(), catalog.models().len());
        assert_eq!(seed_models(&conn, &catalog).unwrap(), 0);

        let o3 = find_active_model(&conn, "o3-mini").unwrap().unwrap();
        assert_eq!(o3.provider, Provider::OpenAI);
        assert_eq!(list_models(&conn, false).unwrap().len(), catalog.models().len());
    }

    #[test]
    fn inactive_models_are_hidden_from_active_queries() {
        let conn = init_db(":memory:").unwrap();
        seed_models(&conn, &ModelCatalog::builtin()).unwrap();
        let mut model = find_active_model(&conn, "gemini-pro").unwrap().unwrap();
        model.is_active = false;
        model.temperature = Some(0.25);
        save_model(&conn, &model).unwrap();

        assert!(find_active_model(&conn, "gemini-pro").unwrap().is_none());
        assert!(list_models(&conn, true).unwrap().iter().all(|m| m.model_id != "gemini-pro"));
        let stored = get_model(&conn, &model.id).unwrap().unwrap();
        assert_eq!(stored.temperature, Some(0.25));
        assert!(delete_model(&conn, &model.id).unwrap());
        assert!(!delete_model(&conn, &model.id).unwrap());
    }

    #[test]
    fn logs_filter_by_type_and_user_newest_first() {
        let conn = init_db(":memory:").unwrap();
        let entries = [
            (LogType::UserAction, Some("alice"), 1),
            (LogType::Error, Some("alice"), 2),
            (LogType::UserAction, Some("bob"), 3),
            (LogType::AdminAction, None, 4),
        ];
        for (i, (log_type, user, ts)) in entries.into_iter().enumerate() {
            insert_log(
                &conn,
                &LogEntry {
                    id: format!("l{i}"),
                    log_type,
                    timestamp: ts,
                    user_id: user.map(String::from),
                    details: json!({ "n": i }),
                },
            )
            .unwrap();
        }

        let all = list_logs(&conn, &LogFilter { limit: 100, ..Default::default() }).unwrap();
        assert_eq!(all.iter().map(|l| l.timestamp).collect::<Vec<_>>(), vec![4, 3, 2, 1]);

        let actions = list_logs(
            &conn,
            &LogFilter { log_type: Some(LogType::UserAction), limit: 100, ..Default::default() },
        )
        .unwrap();
        assert_eq!(actions.len(), 2);

        let mine = list_logs(&conn, &LogFilter { user_id: Some("alice"), limit: 1, ..Default::default() }).unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].log_type, LogType::Error);
        assert_eq!(mine[0].details, json!({ "n": 1 }));
    }
}
