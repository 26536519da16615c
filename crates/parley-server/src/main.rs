//! HTTP server entry point and Axum router setup.
//!
//! Loads configuration, opens the database and seeds the model catalog,
//! starts the generation worker, then serves the chat API.

mod auth;
mod db;
mod dto;
mod error;
mod handlers;
mod services;

#[cfg(test)]
mod test_support;

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use anyhow::{Context, Result};
use axum::body::Body;
use axum::http::{Request, Response};
use axum::routing::{get, post, put};
use axum::Router;
use parley_config::{ModelCatalog, ServerConfig};
use parley_core::ChatError;
use rusqlite::Connection;
use tokio::sync::{broadcast, mpsc};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::dto::MessageEvent;
use crate::services::generation::{self, GenerationJob, GenerationQueue};

/// Shared server state accessible from all handlers.
pub struct ServerState {
    pub config: ServerConfig,
    pub db: Mutex<Connection>,
    /// Change feed for message inserts and appends.
    pub events: broadcast::Sender<MessageEvent>,
    pub queue: GenerationQueue,
}

impl ServerState {
    /// Builds the state and returns the receiving end of the generation queue.
    pub fn new(config: ServerConfig, conn: Connection) -> (Self, mpsc::UnboundedReceiver<GenerationJob>) {
        let (events, _) = broadcast::channel(config.event_buffer);
        let (queue, jobs) = GenerationQueue::new();
        let state = Self {
            config,
            db: Mutex::new(conn),
            events,
            queue,
        };
        (state, jobs)
    }

    /// Acquires the database lock, converting poison errors to a storage error.
    pub fn db_lock(&self) -> Result<MutexGuard<'_, Connection>, ChatError> {
        self.db.lock().map_err(|e| {
            tracing::error!("DB lock poisoned: {}", e);
            ChatError::Storage("database lock error".into())
        })
    }

    /// Publishes on the change feed; having no subscribers is fine.
    pub fn publish(&self, event: MessageEvent) {
        let _ = self.events.send(event);
    }
}

/// Builds the application router.
pub fn app(state: Arc<ServerState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let trace_layer = TraceLayer::new_for_http()
        .make_span_with(|req: &Request<Body>| {
            tracing::info_span!(
                "request",
                method = %req.method(),
                uri = %req.uri(),
                version = ?req.version(),
            )
        })
        .on_response(|res: &Response<Body>, latency: Duration, _span: &tracing::Span| {
            info!(
                latency = %format!("{} ms", latency.as_millis()),
                status = %res.status().as_u16(),
                "finished processing request"
            );
        });

    let logged_routes = Router::new()
        .route("/chats", get(handlers::chats::list).post(handlers::chats::create))
        .route("/chats/{id}", get(handlers::chats::get).patch(handlers::chats::update_title))
        .route("/chats/{id}/model", put(handlers::chats::select_model))
        .route("/chats/{id}/archive", post(handlers::chats::archive))
        .route(
            "/chats/{id}/messages",
            get(handlers::messages::list).post(handlers::messages::send),
        )
        .route("/models", get(handlers::models::list_active).post(handlers::models::create))
        .route("/models/all", get(handlers::models::list_all))
        .route(
            "/models/{id}",
            axum::routing::patch(handlers::models::update).delete(handlers::models::remove),
        )
        .route("/logs", get(handlers::logs::list))
        .route("/logs/mine", get(handlers::logs::mine))
        .layer(trace_layer);

    Router::new()
        .merge(logged_routes)
        .route("/chats/{id}/events", get(handlers::messages::events))
        .route("/health", get(handlers::health))
        .layer(cors)
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .compact()
        .init();

    let config = ServerConfig::from_env().context("invalid configuration")?;
    let (state, jobs) = init_server_state(config)?;
    let state = Arc::new(state);
    generation::spawn_worker(Arc::downgrade(&state), jobs);

    let addr = state.config.bind_addr.clone();
    info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    axum::serve(listener, app(state)).await?;

    Ok(())
}

/// Opens the database and seeds the model catalog on first run.
fn init_server_state(config: ServerConfig) -> Result<(ServerState, mpsc::UnboundedReceiver<GenerationJob>)> {
    let catalog = ModelCatalog::load_or_builtin(&config.models_file).unwrap_or_else(|e| {
        warn!("Failed to load model catalog {}: {}", config.models_file.display(), e);
        ModelCatalog::builtin()
    });

    let conn = db::init_db(&config.database_url)?;
    let seeded = db::seed_models(&conn, &catalog)?;
    info!("Seeded {} models", seeded);

    if config.admin_users.is_empty() {
        warn!("PARLEY_ADMIN_USERS is empty; model and log administration is disabled");
    }
    for provider in parley_core::Provider::ALL {
        info!("  - {} at {}", provider, config.endpoints.base_for(provider));
    }

    Ok(ServerState::new(config, conn))
}
