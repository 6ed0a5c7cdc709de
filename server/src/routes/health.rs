//! Liveness endpoint, also what devices probe for connectivity.

use axum::{extract::State, routing::get, Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tillsync_engine::SchemaVersion;

use crate::AppState;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub time: DateTime<Utc>,
    /// Version of the table schema pushes are validated against
    pub schema_version: SchemaVersion,
    pub tables: Vec<String>,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/", get(root))
}

/// Answers without touching the database, so a device counts as online
/// as soon as the server process is reachable.
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let schema = &state.config.schema;
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        time: Utc::now(),
        schema_version: schema.version,
        tables: schema.table_names(),
    })
}

async fn root() -> &'static str {
    "Tillsync Server"
}
