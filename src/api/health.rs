use axum::extract::State;
use axum::Json;
use serde_json::{Value, json};

use super::AppState;

/// Liveness plus the storage clock, so operators can spot a zone misconfiguration.
pub async fn health(State(state): State<AppState>) -> Json<Value> {
    let engine = &state.engine;
    Json(json!({
        "status": "ok",
        "timezone": engine.zone().name(),
        "storage_time": engine.zone().format_local(engine.now_local()),
    }))
}
