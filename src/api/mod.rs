//! HTTP surface. Every response uses the `{ success, data?, error? }`
//! envelope; organization-scoped routes live under `/api/v1/{slug}` and
//! platform administration under `/api/v1/admin`.

pub mod auth;
mod read;
mod write;

use std::sync::Arc;
use std::time::Instant;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{MatchedPath, Request};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch, post, put};
use axum::{Json, Router};
use serde::Serialize;
use tower_http::trace::TraceLayer;
use tracing::{error, warn};
use ulid::Ulid;

use crate::error::Error;
use crate::platform::Platform;

#[derive(Clone)]
pub struct AppState {
    pub platform: Arc<Platform>,
    /// `None` leaves the API open.
    pub api_key: Option<Arc<str>>,
}

impl AppState {
    pub fn new(platform: Arc<Platform>, api_key: Option<String>) -> Self {
        Self {
            platform,
            api_key: api_key.filter(|k| !k.is_empty()).map(Arc::from),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

pub(crate) type ApiResult = Result<Response, Error>;

pub(crate) fn ok<T: Serialize>(data: T) -> ApiResult {
    Ok(Json(Envelope { success: true, data: Some(data), error: None }).into_response())
}

pub(crate) fn created<T: Serialize>(data: T) -> ApiResult {
    Ok((
        StatusCode::CREATED,
        Json(Envelope { success: true, data: Some(data), error: None }),
    )
        .into_response())
}

pub(crate) fn done() -> ApiResult {
    Ok(Json(Envelope::<()> { success: true, data: None, error: None }).into_response())
}

pub(crate) fn failure(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(Envelope::<()> { success: false, data: None, error: Some(message.into()) }),
    )
        .into_response()
}

/// Ids in paths that do not parse cannot name an existing entity.
pub(crate) fn parse_id(entity: &str, raw: &str) -> Result<Ulid, Error> {
    raw.parse()
        .map_err(|_| Error::NotFound(format!("{entity} not found: {raw}")))
}

pub(crate) fn bad_json(rejection: JsonRejection) -> Error {
    Error::InvalidInput(rejection.body_text())
}

pub(crate) fn bad_query(rejection: QueryRejection) -> Error {
    Error::InvalidInput(rejection.body_text())
}

pub fn status_of(e: &Error) -> StatusCode {
    match e {
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        Error::InvalidInput(_) => StatusCode::BAD_REQUEST,
        Error::Conflict(_) => StatusCode::CONFLICT,
        Error::ExternalService(_) => StatusCode::BAD_GATEWAY,
        Error::Internal(_) | Error::PartialImport { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = status_of(&self);
        match &self {
            Error::Internal(_) | Error::PartialImport { .. } => error!("request failed: {self}"),
            Error::ExternalService(_) => warn!("request failed: {self}"),
            _ => {}
        }
        if let Error::PartialImport { imported, .. } = &self {
            let body = Envelope {
                success: false,
                data: Some(serde_json::json!({ "imported": imported })),
                error: Some(self.to_string()),
            };
            return (status, Json(body)).into_response();
        }
        failure(status, self.to_string())
    }
}

async fn health() -> &'static str {
    "ok"
}

async fn track_metrics(request: Request, next: Next) -> Response {
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| "unmatched".to_string(), |p| p.as_str().to_string());
    let method = request.method().to_string();
    let started = Instant::now();
    let response = next.run(request).await;
    metrics::counter!(
        crate::observability::HTTP_REQUESTS_TOTAL,
        "method" => method.clone(),
        "route" => route.clone(),
        "status" => response.status().as_u16().to_string()
    )
    .increment(1);
    metrics::histogram!(
        crate::observability::HTTP_REQUEST_DURATION_SECONDS,
        "method" => method,
        "route" => route
    )
    .record(started.elapsed().as_secs_f64());
    response
}

pub fn router(state: AppState) -> Router {
    let admin = "/api/v1/admin";
    let org = "/api/v1/{slug}";
    let collection = "/api/v1/{slug}/collections/{id}";

    let api = Router::new()
        // Platform administration
        .route(
            &format!("{admin}/organizations"),
            get(write::list_organizations).post(write::create_organization),
        )
        .route(
            &format!("{admin}/organizations/{{id}}"),
            patch(write::update_organization).delete(write::delete_organization),
        )
        .route(&format!("{admin}/organizations/{{id}}/tier"), put(write::update_tier))
        .route(&format!("{admin}/organizations/{{id}}/provision"), post(write::provision))
        .route(&format!("{admin}/connections/test"), get(write::test_connection))
        // Organization-scoped
        .route(org, get(read::organization))
        .route(
            &format!("{org}/services"),
            get(read::services).post(write::create_service),
        )
        .route(&format!("{org}/services/{{id}}"), axum::routing::delete(write::delete_service))
        .route(
            &format!("{org}/resources"),
            get(read::resources).post(write::create_resource),
        )
        .route(&format!("{org}/resources/{{id}}"), axum::routing::delete(write::delete_resource))
        .route(&format!("{org}/resources/{{id}}/schedule"), put(write::set_schedule))
        .route(
            &format!("{org}/customers"),
            get(read::customers).post(write::create_customer),
        )
        .route(&format!("{org}/customers/{{id}}"), axum::routing::delete(write::delete_customer))
        .route(
            &format!("{org}/reservations"),
            get(read::reservations).post(write::create_reservation),
        )
        .route(&format!("{org}/reservations/stats"), get(read::reservation_stats))
        .route(
            &format!("{org}/reservations/{{id}}"),
            axum::routing::delete(write::delete_reservation),
        )
        .route(
            &format!("{org}/reservations/{{id}}/status"),
            patch(write::set_reservation_status),
        )
        .route(
            &format!("{org}/collections"),
            get(read::collections).post(write::create_collection),
        )
        .route(collection, get(read::collection).delete(write::delete_collection))
        .route(&format!("{collection}/fields"), post(write::add_field))
        .route(
            &format!("{collection}/fields/{{field_id}}"),
            axum::routing::delete(write::delete_field),
        )
        .route(
            &format!("{collection}/records"),
            get(read::records).post(write::create_record),
        )
        .route(
            &format!("{collection}/records/{{record_id}}"),
            patch(write::update_record).delete(write::delete_record),
        )
        .route(&format!("{collection}/import"), post(write::import))
        .route(&format!("{collection}/embedding-fields"), put(write::set_embedding_fields))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth::require_api_key))
        .route_layer(middleware::from_fn(track_metrics))
        .with_state(state);

    Router::new()
        .route("/health", get(health))
        .merge(api)
        .layer(TraceLayer::new_for_http())
}
