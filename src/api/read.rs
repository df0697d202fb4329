use axum::extract::rejection::QueryRejection;
use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::Json;
use serde::{Deserialize, Serialize};

use super::{bad_query, ok, parse_id, ApiResult, AppState};
use crate::collections::ResolvedRecord;

/// Flags arrive as strings; only the literal `true` switches them on.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Flags {
    include_resources: Option<String>,
    raw: Option<String>,
}

fn flag(value: &Option<String>) -> bool {
    value.as_deref() == Some("true")
}

pub async fn organization(State(state): State<AppState>, Path(slug): Path<String>) -> ApiResult {
    ok(state.platform.get_organization(&slug)?)
}

pub async fn services(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    flags: Result<Query<Flags>, QueryRejection>,
) -> ApiResult {
    let Query(flags) = flags.map_err(bad_query)?;
    ok(state
        .platform
        .list_services(&slug, flag(&flags.include_resources))?)
}

pub async fn resources(State(state): State<AppState>, Path(slug): Path<String>) -> ApiResult {
    ok(state.platform.list_resources(&slug)?)
}

pub async fn customers(State(state): State<AppState>, Path(slug): Path<String>) -> ApiResult {
    ok(state.platform.list_customers(&slug)?)
}

pub async fn reservations(State(state): State<AppState>, Path(slug): Path<String>) -> ApiResult {
    ok(state.platform.list_reservations(&slug)?)
}

pub async fn reservation_stats(State(state): State<AppState>, Path(slug): Path<String>) -> ApiResult {
    ok(state.platform.reservation_stats(&slug)?)
}

pub async fn collections(State(state): State<AppState>, Path(slug): Path<String>) -> ApiResult {
    ok(state.platform.list_collections(&slug)?)
}

pub async fn collection(State(state): State<AppState>, Path((slug, id)): Path<(String, String)>) -> ApiResult {
    let id = parse_id("collection", &id)?;
    ok(state.platform.get_collection(&slug, id)?)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ResolvedRecordsBody {
    success: bool,
    data: Vec<ResolvedRecord>,
    collection: String,
    field_count: usize,
}

/// Records keyed by field name, or by field id with `raw=true`.
pub async fn records(
    State(state): State<AppState>,
    Path((slug, id)): Path<(String, String)>,
    flags: Result<Query<Flags>, QueryRejection>,
) -> ApiResult {
    let Query(flags) = flags.map_err(bad_query)?;
    let id = parse_id("collection", &id)?;
    if flag(&flags.raw) {
        return ok(state.platform.list_records(&slug, id)?);
    }
    let resolved = state.platform.list_resolved_records(&slug, id)?;
    Ok(Json(ResolvedRecordsBody {
        success: true,
        data: resolved.records,
        collection: resolved.collection,
        field_count: resolved.field_count,
    })
    .into_response())
}
