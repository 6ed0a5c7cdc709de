//! Sync endpoint routes.

use axum::{
    extract::{Query, State},
    routing::{get, post},
    Json, Router,
};
use tillsync_engine::{PullQuery, PullResponse, PushRequest, PushResponse};

use crate::auth::{AuthUser, Tenant};
use crate::error::Result;
use crate::handlers::{handle_pull, handle_push};
use crate::AppState;

/// Create sync routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/sync/push", post(push_handler))
        .route("/sync/pull", get(pull_handler))
}

/// POST /sync/push - Apply a batch of device changes.
async fn push_handler(
    State(state): State<AppState>,
    auth: AuthUser,
    tenant: Tenant,
    Json(request): Json<PushRequest>,
) -> Result<Json<PushResponse>> {
    tracing::info!(
        tenant = tenant.as_str(),
        changes = request.changes.len(),
        anonymous = auth.is_anonymous(),
        "push batch"
    );
    let response = handle_push(&state.pool, &state.config.schema, tenant.as_str(), request).await?;
    Ok(Json(response))
}

/// GET /sync/pull - Read the change feed of one table.
async fn pull_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
    tenant: Tenant,
    Query(query): Query<PullQuery>,
) -> Result<Json<PullResponse>> {
    let response = handle_pull(&state.pool, &state.config.schema, tenant.as_str(), query).await?;
    Ok(Json(response))
}
