//! HTTP route handlers for the chat server.

pub mod chats;
pub mod logs;
pub mod messages;
pub mod models;

/// Health check endpoint.
pub async fn health() -> &'static str {
    "OK"
}
