//! HTTP surface over the dispatcher.
//!
//! Admin routes publish and inspect models; `/api/{table}` routes run record
//! operations through [`Dispatcher`]. The caller identity is read from the
//! `x-user-id` and `x-user-roles` headers. This is a stub for an upstream
//! authenticator, not authentication.

use std::future::Future;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::dispatch::{Dispatcher, Operation, Outcome};
use crate::error::{GateError, NotFound};
use crate::model::{Identity, ModelDefinition};
use crate::records::{payload_from_json, Page};

/// Header carrying the caller id.
pub const USER_ID_HEADER: &str = "x-user-id";
/// Header carrying comma-separated caller roles.
pub const USER_ROLES_HEADER: &str = "x-user-roles";

/// Shared state injected into every handler.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Registry, authorization and record store.
    pub dispatcher: Dispatcher,
    /// Page size used when `?limit=` is absent.
    pub list_limit: u32,
}

/// Build the router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/admin/models", get(list_models))
        .route("/admin/models/publish", post(publish_model))
        .route("/admin/models/{name}", get(get_model))
        .route("/api/{table}", post(create_record).get(list_records))
        .route(
            "/api/{table}/{id}",
            get(get_record).put(update_record).delete(delete_record),
        )
        .with_state(state)
}

/// Serve until `shutdown` resolves, then drain in-flight requests.
///
/// # Errors
///
/// Returns an I/O error if the listener fails.
pub async fn serve<F>(listener: TcpListener, state: AppState, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!(%addr, "http server listening");
    }
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

/// Caller identity from request headers; `None` without `x-user-id`.
pub fn identity_from_headers(headers: &HeaderMap) -> Option<Identity> {
    let id = headers
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|id| !id.is_empty())?;
    let roles = headers
        .get(USER_ROLES_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|r| !r.is_empty());
    Some(Identity::new(id, roles))
}

/// [`GateError`] rendered as `{ "error": message }` with a matching status.
pub struct ApiError(GateError);

impl From<GateError> for ApiError {
    fn from(err: GateError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            GateError::Validation(_) => StatusCode::BAD_REQUEST,
            GateError::NotFound(_) => StatusCode::NOT_FOUND,
            GateError::Unauthenticated => StatusCode::UNAUTHORIZED,
            GateError::Forbidden { .. } => StatusCode::FORBIDDEN,
            GateError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

// ── Admin ───────────────────────────────────────────────────────

async fn health(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let routes: Vec<String> = state
        .dispatcher
        .registry()
        .list_all()?
        .iter()
        .map(|m| format!("/api/{}", m.table()))
        .collect();
    Ok(Json(json!({ "status": "ok", "models": routes })))
}

async fn list_models(State(state): State<AppState>) -> ApiResult<Json<Vec<ModelDefinition>>> {
    let models = state
        .dispatcher
        .registry()
        .list_all()?
        .iter()
        .map(|m| m.definition.clone())
        .collect();
    Ok(Json(models))
}

async fn get_model(State(state): State<AppState>, Path(name): Path<String>) -> ApiResult<Json<ModelDefinition>> {
    let registered = state.dispatcher.registry().resolve(&name)?;
    Ok(Json(registered.definition.clone()))
}

async fn publish_model(State(state): State<AppState>, Json(body): Json<Value>) -> ApiResult<(StatusCode, Json<Value>)> {
    let model: ModelDefinition = serde_json::from_value(body)
        .map_err(|e| GateError::Validation(format!("invalid model definition: {e}")))?;
    let registered = state.dispatcher.registry().register(model).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "ok": true,
            "model": registered.definition,
            "message": format!("model '{}' published at /api/{}", registered.name(), registered.table()),
        })),
    ))
}

// ── Records ─────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ListParams {
    limit: Option<u32>,
    offset: Option<u32>,
}

fn parse_id(raw: &str) -> Result<i64, GateError> {
    raw.parse()
        .map_err(|_| GateError::Validation(format!("invalid record id '{raw}'")))
}

async fn run(state: &AppState, table: &str, headers: &HeaderMap, operation: Operation) -> ApiResult<Json<Outcome>> {
    let identity = identity_from_headers(headers);
    let outcome = state
        .dispatcher
        .dispatch_table(table, identity.as_ref(), operation)
        .await
        .inspect_err(|err| {
            if matches!(err, GateError::NotFound(NotFound::Model(_))) {
                warn!(table, "request for unknown table");
            }
        })?;
    Ok(Json(outcome))
}

async fn create_record(
    State(state): State<AppState>,
    Path(table): Path<String>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> ApiResult<(StatusCode, Json<Outcome>)> {
    let payload = payload_from_json(body)?;
    let outcome = run(&state, &table, &headers, Operation::Create(payload)).await?;
    Ok((StatusCode::CREATED, outcome))
}

async fn list_records(
    State(state): State<AppState>,
    Path(table): Path<String>,
    Query(params): Query<ListParams>,
    headers: HeaderMap,
) -> ApiResult<Json<Outcome>> {
    let page = Page {
        limit: params.limit.unwrap_or(state.list_limit),
        offset: params.offset.unwrap_or_default(),
    };
    run(&state, &table, &headers, Operation::List(page)).await
}

async fn get_record(
    State(state): State<AppState>,
    Path((table, id)): Path<(String, String)>,
    headers: HeaderMap,
) -> ApiResult<Json<Outcome>> {
    let id = parse_id(&id)?;
    run(&state, &table, &headers, Operation::Get(id)).await
}

async fn update_record(
    State(state): State<AppState>,
    Path((table, id)): Path<(String, String)>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> ApiResult<Json<Outcome>> {
    let id = parse_id(&id)?;
    let payload = payload_from_json(body)?;
    run(&state, &table, &headers, Operation::Update(id, payload)).await
}

async fn delete_record(
    State(state): State<AppState>,
    Path((table, id)): Path<(String, String)>,
    headers: HeaderMap,
) -> ApiResult<Json<Outcome>> {
    let id = parse_id(&id)?;
    run(&state, &table, &headers, Operation::Delete(id)).await
}
