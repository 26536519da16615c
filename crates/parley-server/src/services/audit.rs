//! Append-only audit and error log entries.

use parley_core::{now_millis, ChatError, LogEntry, LogType};
use rusqlite::Connection;
use serde_json::Value;

use crate::db::{self, LogFilter};
use crate::services::StorageExt;
use crate::ServerState;

/// Default and maximum page size for log listings.
pub const DEFAULT_LIMIT: u32 = 100;

/// Writes one log entry on an already locked connection.
pub fn record(conn: &Connection, log_type: LogType, user_id: Option<&str>, details: Value) -> Result<(), ChatError> {
    let entry = LogEntry {
        id: uuid::Uuid::new_v4().to_string(),
        log_type,
        timestamp: now_millis(),
        user_id: user_id.map(String::from),
        details,
    };
    db::insert_log(conn, &entry).storage()
}

/// Lists entries newest first, optionally narrowed to one type or one user.
pub fn list(
    state: &ServerState,
    log_type: Option<&str>,
    user_id: Option<&str>,
    limit: Option<u32>,
) -> Result<Vec<LogEntry>, ChatError> {
    let log_type = log_type.map(str::parse::<LogType>).transpose()?;
    let filter = LogFilter {
        log_type,
        user_id,
        limit: limit.unwrap_or(DEFAULT_LIMIT).clamp(1, DEFAULT_LIMIT),
    };
    let conn = state.db_lock()?;
    db::list_logs(&conn, &filter).storage()
}
