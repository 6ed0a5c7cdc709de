//! Local HTTP surface of the agent.
//!
//! The point-of-sale UI reads sync status and open conflicts here, submits
//! conflict decisions, and writes records through the replica so every edit
//! lands in the change log.

use crate::error::SyncError;
use crate::registry::SyncRegistry;
use crate::remote::Remote;
use axum::{
    extract::{FromRequestParts, Path, State},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tillsync_engine::{
    ConflictCase, Disposition, Error as EngineError, LocalRecord, Payload, Resolution,
};
use tower_http::trace::TraceLayer;

/// Shared state of the local surface.
pub struct AgentState<R: Remote> {
    pub registry: Arc<SyncRegistry<R>>,
}

impl<R: Remote> Clone for AgentState<R> {
    fn clone(&self) -> Self {
        Self {
            registry: self.registry.clone(),
        }
    }
}

/// Build the local router.
pub fn router<R: Remote>(state: AgentState<R>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/sync/status", get(status::<R>))
        .route("/sync/conflicts", get(conflicts::<R>))
        .route("/sync/resolve", post(resolve::<R>))
        .route("/sync/now", post(sync_now::<R>))
        .route("/sync/cancel", post(cancel::<R>))
        .route("/records/{table}", get(list_records::<R>))
        .route(
            "/records/{table}/{id}",
            put(put_record::<R>).delete(delete_record::<R>).get(get_record::<R>),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Error returned by the local surface.
#[derive(Debug)]
pub struct ApiError(SyncError);

impl From<SyncError> for ApiError {
    fn from(error: SyncError) -> Self {
        ApiError(error)
    }
}

impl From<EngineError> for ApiError {
    fn from(error: EngineError) -> Self {
        ApiError(error.into())
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            SyncError::Engine(EngineError::ConflictNotFound(_))
            | SyncError::Engine(EngineError::RecordNotFound(_)) => StatusCode::NOT_FOUND,
            SyncError::Engine(EngineError::AmbiguousConflict(_))
            | SyncError::Engine(EngineError::RecordAlreadyExists(_))
            | SyncError::Engine(EngineError::RecordDeleted(_))
            | SyncError::Cancelled => StatusCode::CONFLICT,
            SyncError::Engine(_) | SyncError::Config(_) => StatusCode::BAD_REQUEST,
            SyncError::TransientNetwork(_) => StatusCode::SERVICE_UNAVAILABLE,
            SyncError::Refused { .. } => StatusCode::BAD_GATEWAY,
            SyncError::LocalStorage(_)
            | SyncError::StaleVersion { .. }
            | SyncError::ValidationRejection { .. }
            | SyncError::SyncTimeout { .. } => {
                tracing::error!(error = %self.0, "local surface error");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (
            status,
            Json(ErrorResponse {
                error: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

type ApiResult<T> = std::result::Result<T, ApiError>;

/// Tenant a request is about: the `X-Tenant-Id` header, or the only tenant
/// running on this device.
pub struct TenantId(pub String);

impl<R: Remote> FromRequestParts<AgentState<R>> for TenantId {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AgentState<R>,
    ) -> Result<Self, Self::Rejection> {
        if let Some(value) = parts.headers.get("x-tenant-id") {
            let tenant = value
                .to_str()
                .map_err(|_| SyncError::Config("X-Tenant-Id is not valid text".to_string()))?;
            return Ok(TenantId(tenant.trim().to_string()));
        }

        match state.registry.tenants().as_slice() {
            [only] => Ok(TenantId(only.clone())),
            _ => Err(SyncError::Config("X-Tenant-Id header is required".to_string()).into()),
        }
    }
}

fn orchestrator<R: Remote>(
    state: &AgentState<R>,
    tenant_id: &str,
) -> ApiResult<Arc<crate::orchestrator::Orchestrator<R>>> {
    state
        .registry
        .get(tenant_id)
        .ok_or_else(|| SyncError::Config(format!("tenant {} is not signed in", tenant_id)).into())
}

async fn health() -> &'static str {
    "ok"
}

async fn status<R: Remote>(
    State(state): State<AgentState<R>>,
    TenantId(tenant): TenantId,
) -> ApiResult<Json<crate::orchestrator::SyncStatusView>> {
    Ok(Json(orchestrator(&state, &tenant)?.status()?))
}

/// An open case with the error it stands for.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ConflictView {
    #[serde(flatten)]
    case: ConflictCase,
    message: String,
}

async fn conflicts<R: Remote>(
    State(state): State<AgentState<R>>,
    TenantId(tenant): TenantId,
) -> ApiResult<Json<Vec<ConflictView>>> {
    let cases = state
        .registry
        .store()
        .with(|r| r.state().conflicts(&tenant).to_vec())?;
    Ok(Json(
        cases
            .into_iter()
            .map(|case| ConflictView {
                message: SyncError::for_case(&case).to_string(),
                case,
            })
            .collect(),
    ))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolveRequest {
    #[serde(default)]
    pub table: Option<String>,
    pub record_id: String,
    pub resolution: Resolution,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ResolveResponse {
    table: String,
    record_id: String,
    /// Change queued to carry the decision, if any
    change_id: Option<String>,
}

async fn resolve<R: Remote>(
    State(state): State<AgentState<R>>,
    TenantId(tenant): TenantId,
    Json(request): Json<ResolveRequest>,
) -> ApiResult<Json<ResolveResponse>> {
    let store = state.registry.store();
    let now = store.now();
    let outcome = store.apply(|r| {
        r.resolve(
            &tenant,
            request.table.as_deref(),
            &request.record_id,
            request.resolution.clone(),
            now,
        )
    })?;
    store.persist().await?;

    tracing::info!(
        tenant = %tenant,
        table = %outcome.case.table,
        record_id = %outcome.case.record_id,
        reason = %outcome.case.reason,
        requeued = outcome.change_id.is_some(),
        "conflict resolved by user"
    );

    Ok(Json(ResolveResponse {
        table: outcome.case.table,
        record_id: outcome.case.record_id,
        change_id: outcome.change_id,
    }))
}

async fn sync_now<R: Remote>(
    State(state): State<AgentState<R>>,
    TenantId(tenant): TenantId,
) -> ApiResult<Json<crate::orchestrator::CycleReport>> {
    let report = orchestrator(&state, &tenant)?.sync_now().await?;
    Ok(Json(report))
}

async fn cancel<R: Remote>(
    State(state): State<AgentState<R>>,
    TenantId(tenant): TenantId,
) -> ApiResult<StatusCode> {
    orchestrator(&state, &tenant)?.cancel();
    Ok(StatusCode::ACCEPTED)
}

async fn list_records<R: Remote>(
    State(state): State<AgentState<R>>,
    TenantId(tenant): TenantId,
    Path(table): Path<String>,
) -> ApiResult<Json<Vec<LocalRecord>>> {
    let records = state.registry.store().apply(|r| {
        if r.schema().get_table(&table).is_none() {
            return Err(EngineError::TableNotFound(table.clone()));
        }
        r.list(&tenant, &table)
    })?;
    Ok(Json(records))
}

async fn get_record<R: Remote>(
    State(state): State<AgentState<R>>,
    TenantId(tenant): TenantId,
    Path((table, id)): Path<(String, String)>,
) -> ApiResult<Json<LocalRecord>> {
    let record = state
        .registry
        .store()
        .apply(|r| r.get(&tenant, &table, &id))?
        .filter(LocalRecord::is_active)
        .ok_or(EngineError::RecordNotFound(id))?;
    Ok(Json(record))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WriteResponse {
    change_id: String,
    /// `false` when the edit cancelled a change the server never saw
    queued: bool,
}

/// Create the record, or patch it when it is live.
async fn put_record<R: Remote>(
    State(state): State<AgentState<R>>,
    TenantId(tenant): TenantId,
    Path((table, id)): Path<(String, String)>,
    Json(payload): Json<Payload>,
) -> ApiResult<(StatusCode, Json<WriteResponse>)> {
    let store = state.registry.store();
    let now = store.now();
    let (created, enqueued) = store.apply(|r| {
        let live = r.get(&tenant, &table, &id)?.is_some_and(|rec| rec.is_active());
        if live {
            Ok((false, r.update(&tenant, &table, &id, payload, now)?))
        } else {
            Ok((true, r.create(&tenant, &table, &id, payload, now)?))
        }
    })?;
    store.persist().await?;

    let status = if created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((
        status,
        Json(WriteResponse {
            queued: enqueued.disposition != Disposition::Cancelled,
            change_id: enqueued.change_id,
        }),
    ))
}

async fn delete_record<R: Remote>(
    State(state): State<AgentState<R>>,
    TenantId(tenant): TenantId,
    Path((table, id)): Path<(String, String)>,
) -> ApiResult<Json<WriteResponse>> {
    let store = state.registry.store();
    let now = store.now();
    let enqueued = store.apply(|r| r.delete(&tenant, &table, &id, now))?;
    store.persist().await?;

    Ok(Json(WriteResponse {
        queued: enqueued.disposition != Disposition::Cancelled,
        change_id: enqueued.change_id,
    }))
}
