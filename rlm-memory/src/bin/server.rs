//! RLM Memory Server
//!
//! HTTP facade over one agent's layered memory store.
//!
//! Environment:
//! - `RLM_MEMORY_AGENT_ID` (required) - identity the store writes as
//! - `RLM_MEMORY_PROJECT_ROOT` (default `.`) - project whose policy is loaded
//! - `RLM_MEMORY_PORT` (default 8421)

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::Value;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rlm_memory::{load_policy, retrieval, Error, MemoryStore, ReadOutcome, SourcedRecord};

const DEFAULT_PORT: u16 = 8421;

/// Application state shared across handlers
struct AppState {
    store: MemoryStore,
}

type SharedState = Arc<AppState>;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let agent_id =
        std::env::var("RLM_MEMORY_AGENT_ID").context("RLM_MEMORY_AGENT_ID must be set")?;
    let project_root = PathBuf::from(
        std::env::var("RLM_MEMORY_PROJECT_ROOT").unwrap_or_else(|_| ".".into()),
    );
    let port = match std::env::var("RLM_MEMORY_PORT") {
        Ok(port) => port.parse::<u16>().context("RLM_MEMORY_PORT must be a port number")?,
        Err(_) => DEFAULT_PORT,
    };

    let policy = load_policy(&project_root, None)?;
    tracing::info!("Read layers: {:?}", policy.read_layers);
    tracing::info!("Write layers: {:?}", policy.write_layers);

    let store = MemoryStore::new(policy, agent_id)?;
    let state = Arc::new(AppState { store });

    let app = Router::new()
        .route("/health", get(health))
        .route("/records", get(list_records))
        .route("/records/:id", get(get_record))
        .route("/records/:id/history", get(get_history))
        .route("/layers/:layer/records", post(append_record))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(format!("127.0.0.1:{}", port)).await?;
    tracing::info!("Server listening on http://127.0.0.1:{}", port);

    axum::serve(listener, app).await?;

    Ok(())
}

// === Handlers ===

async fn health() -> &'static str {
    "ok"
}

async fn list_records(State(state): State<SharedState>) -> Result<Json<ReadOutcome>, StatusCode> {
    let outcome = blocking(state, |store| store.read_all_with_warnings()).await?;
    Ok(Json(outcome))
}

async fn get_record(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<SourcedRecord>, StatusCode> {
    let records = blocking(state, |store| store.read_all()).await?;
    retrieval::current(&records, &id)
        .cloned()
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

async fn get_history(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<Vec<SourcedRecord>>, StatusCode> {
    let records = blocking(state, |store| store.read_all()).await?;
    let versions: Vec<SourcedRecord> = retrieval::history(&records, &id)
        .into_iter()
        .cloned()
        .collect();
    if versions.is_empty() {
        return Err(StatusCode::NOT_FOUND);
    }
    Ok(Json(versions))
}

#[derive(Debug, Serialize)]
struct AppendResponse {
    id: String,
}

async fn append_record(
    State(state): State<SharedState>,
    Path(layer): Path<String>,
    Json(record): Json<Value>,
) -> Result<Json<AppendResponse>, StatusCode> {
    let id = blocking(state, move |store| store.append_to(&layer, record)).await?;
    Ok(Json(AppendResponse { id }))
}

// === Helpers ===

/// Run a store call on the blocking pool; appends may wait on a layer lock.
async fn blocking<T, F>(state: SharedState, f: F) -> Result<T, StatusCode>
where
    T: Send + 'static,
    F: FnOnce(&MemoryStore) -> rlm_memory::Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(move || f(&state.store))
        .await
        .map_err(|e| {
            tracing::error!("Store task failed: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map_err(|e| {
            let status = status_for(&e);
            if status.is_server_error() {
                tracing::error!("Store error: {}", e);
            } else {
                tracing::warn!("Rejected request: {}", e);
            }
            status
        })
}

fn status_for(error: &Error) -> StatusCode {
    match error {
        Error::UnknownLayer(_) => StatusCode::NOT_FOUND,
        Error::LayerNotWritable(_) | Error::PermissionDenied(_) => StatusCode::FORBIDDEN,
        Error::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
        Error::LockTimeout { .. } => StatusCode::SERVICE_UNAVAILABLE,
        Error::Config(_) | Error::Io(_) | Error::Json(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}
