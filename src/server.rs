use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::json;
use tokio::sync::Mutex;
use tracing::{error, info};

use crate::pipeline::{self, Pipeline};
use crate::sink::Sink;
use crate::source::Source;

pub struct AppState {
    pub pipeline: Pipeline,
    pub source: Source,
    pub sink: Sink,
    /// Held for the whole of a run so two triggers never replace outputs at once.
    pub run_lock: Mutex<()>,
}

impl AppState {
    pub fn new(pipeline: Pipeline, source: Source, sink: Sink) -> Self {
        Self {
            pipeline,
            source,
            sink,
            run_lock: Mutex::new(()),
        }
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/process", post(process_handler))
        .with_state(state)
}

pub async fn serve(state: Arc<AppState>, bind_addr: &str) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    info!(addr = %listener.local_addr()?, "risk rating service listening");
    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({ "status": "healthy" })))
}

async fn process_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let _guard = state.run_lock.lock().await;
    match pipeline::run(&state.pipeline, &state.source, &state.sink).await {
        Ok((summary, _)) => (
            StatusCode::OK,
            Json(json!({
                "status": "success",
                "run_id": summary.run_id,
                "scored_rows": summary.scored_rows,
                "entities": summary.companies,
            })),
        ),
        Err(err) => {
            error!(error = %err, "processing failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "status": "error", "message": err.to_string() })),
            )
        }
    }
}
