//! Router construction.

use axum::{routing::get, Json, Router};
use serde_json::{json, Value};
use tower_http::trace::TraceLayer;

use crate::handlers::voice::voice_handler;
use crate::state::AppState;

/// Public health check. Deliberately unauthenticated and state-free.
async fn health_check() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "service": "medvoice-gateway",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Build the application router: the health check and the voice WebSocket
/// endpoint. CORS is layered on in `main` from configuration.
pub fn create_router() -> Router<AppState> {
    Router::new()
        .route("/", get(health_check))
        .route("/voice", get(voice_handler))
        .layer(TraceLayer::new_for_http())
}
