//! HTTP routes

pub mod intent;
pub mod query;

use axum::{
    extract::State,
    response::sse::Event,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;

use crate::server::state::AppState;
use crate::types::HealthResponse;

/// Build all routes
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .route("/intent", post(intent::predict_intent))
        .route("/intent/model", get(intent::model_summary))
        .route("/query", post(query::query_stream))
        .route("/query/simple", post(query::query_simple))
        .route("/query_with_intent", post(intent::query_with_intent))
}

/// Service info endpoint
async fn root(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "name": "intent-rag",
        "version": env!("CARGO_PKG_VERSION"),
        "message": "Intent-routed question answering service is running (streaming output)",
        "status": "healthy",
        "output_mode": state.config().server.output_mode,
        "supported_endpoints": [
            "/query",
            "/query/simple",
            "/query_with_intent",
            "/intent",
            "/intent/model",
            "/health"
        ]
    }))
}

/// Health check endpoint
async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        rag_initialized: state.rag_initialized(),
        classifier_initialized: state.classifier().is_ready(),
        agents_initialized: state.router().initialized(),
        output_mode: state.config().server.output_mode.clone(),
    })
}

/// Serialize a frame into an SSE `data:` event
pub(crate) fn json_event<T: Serialize>(frame: &T) -> Event {
    match serde_json::to_string(frame) {
        Ok(json) => Event::default().data(json),
        Err(e) => {
            tracing::error!("Failed to serialize stream frame: {}", e);
            Event::default().data(r#"{"error":"serialization failure","finished":true}"#)
        }
    }
}
