use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;

use super::{bad_json, bad_query, created, done, ok, parse_id, ApiResult, AppState};
use crate::booking::{NewCustomer, NewReservation, NewResource, NewService, StatusChange};
use crate::collections::{EmbeddingFields, NewCollection, NewField, RecordData};
use crate::error::Error;
use crate::import::Mapping;
use crate::model::{JsonMap, WeeklySlot};
use crate::platform::{CreateOrganization, TierChange, UpdateOrganization};

type Body<T> = Result<Json<T>, JsonRejection>;

// ── Platform administration ──────────────────────────────────────

pub async fn list_organizations(State(state): State<AppState>) -> ApiResult {
    ok(state.platform.list_organizations())
}

pub async fn create_organization(State(state): State<AppState>, body: Body<CreateOrganization>) -> ApiResult {
    let Json(input) = body.map_err(bad_json)?;
    created(state.platform.create_organization(input).await?)
}

pub async fn update_organization(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Body<UpdateOrganization>,
) -> ApiResult {
    let id = parse_id("organization", &id)?;
    let Json(input) = body.map_err(bad_json)?;
    ok(state.platform.update_organization(id, input).await?)
}

pub async fn update_tier(State(state): State<AppState>, Path(id): Path<String>, body: Body<TierChange>) -> ApiResult {
    let id = parse_id("organization", &id)?;
    let Json(input) = body.map_err(bad_json)?;
    ok(state.platform.update_tier(id, input).await?)
}

pub async fn provision(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult {
    let id = parse_id("organization", &id)?;
    ok(state.platform.provision_dedicated(id).await?)
}

pub async fn delete_organization(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult {
    let id = parse_id("organization", &id)?;
    state.platform.delete_organization(id).await?;
    done()
}

#[derive(Debug, Deserialize)]
pub struct ConnectionQuery {
    url: String,
}

pub async fn test_connection(
    State(state): State<AppState>,
    query: Result<Query<ConnectionQuery>, QueryRejection>,
) -> ApiResult {
    let Query(query) = query.map_err(bad_query)?;
    ok(state.platform.test_connection(&query.url)?)
}

// ── Booking ──────────────────────────────────────────────────────

pub async fn create_service(State(state): State<AppState>, Path(slug): Path<String>, body: Body<NewService>) -> ApiResult {
    let Json(input) = body.map_err(bad_json)?;
    created(state.platform.create_service(&slug, input).await?)
}

pub async fn delete_service(State(state): State<AppState>, Path((slug, id)): Path<(String, String)>) -> ApiResult {
    let id = parse_id("service", &id)?;
    state.platform.delete_service(&slug, id).await?;
    done()
}

pub async fn create_resource(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    body: Body<NewResource>,
) -> ApiResult {
    let Json(input) = body.map_err(bad_json)?;
    created(state.platform.create_resource(&slug, input).await?)
}

#[derive(Debug, Deserialize)]
pub struct ScheduleBody {
    schedule: Vec<WeeklySlot>,
}

pub async fn set_schedule(
    State(state): State<AppState>,
    Path((slug, id)): Path<(String, String)>,
    body: Body<ScheduleBody>,
) -> ApiResult {
    let id = parse_id("resource", &id)?;
    let Json(input) = body.map_err(bad_json)?;
    ok(state.platform.set_schedule(&slug, id, input.schedule).await?)
}

pub async fn delete_resource(State(state): State<AppState>, Path((slug, id)): Path<(String, String)>) -> ApiResult {
    let id = parse_id("resource", &id)?;
    state.platform.delete_resource(&slug, id).await?;
    done()
}

pub async fn create_customer(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    body: Body<NewCustomer>,
) -> ApiResult {
    let Json(input) = body.map_err(bad_json)?;
    created(state.platform.create_customer(&slug, input).await?)
}

pub async fn delete_customer(State(state): State<AppState>, Path((slug, id)): Path<(String, String)>) -> ApiResult {
    let id = parse_id("customer", &id)?;
    state.platform.delete_customer(&slug, id).await?;
    done()
}

pub async fn create_reservation(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    body: Body<NewReservation>,
) -> ApiResult {
    let Json(input) = body.map_err(bad_json)?;
    created(state.platform.create_reservation(&slug, input).await?)
}

pub async fn set_reservation_status(
    State(state): State<AppState>,
    Path((slug, id)): Path<(String, String)>,
    body: Body<StatusChange>,
) -> ApiResult {
    let id = parse_id("reservation", &id)?;
    let Json(input) = body.map_err(bad_json)?;
    ok(state.platform.set_reservation_status(&slug, id, input.status).await?)
}

pub async fn delete_reservation(
    State(state): State<AppState>,
    Path((slug, id)): Path<(String, String)>,
) -> ApiResult {
    let id = parse_id("reservation", &id)?;
    state.platform.delete_reservation(&slug, id).await?;
    done()
}

// ── Collections ──────────────────────────────────────────────────

pub async fn create_collection(
    State(state): State<AppState>,
    Path(slug): Path<String>,
    body: Body<NewCollection>,
) -> ApiResult {
    let Json(input) = body.map_err(bad_json)?;
    created(state.platform.create_collection(&slug, input).await?)
}

pub async fn delete_collection(
    State(state): State<AppState>,
    Path((slug, id)): Path<(String, String)>,
) -> ApiResult {
    let id = parse_id("collection", &id)?;
    state.platform.delete_collection(&slug, id).await?;
    done()
}

pub async fn add_field(
    State(state): State<AppState>,
    Path((slug, id)): Path<(String, String)>,
    body: Body<NewField>,
) -> ApiResult {
    let id = parse_id("collection", &id)?;
    let Json(input) = body.map_err(bad_json)?;
    created(state.platform.add_field(&slug, id, input).await?)
}

pub async fn delete_field(
    State(state): State<AppState>,
    Path((slug, id, field_id)): Path<(String, String, String)>,
) -> ApiResult {
    let id = parse_id("collection", &id)?;
    let field_id = parse_id("field", &field_id)?;
    state.platform.delete_field(&slug, id, field_id).await?;
    done()
}

pub async fn create_record(
    State(state): State<AppState>,
    Path((slug, id)): Path<(String, String)>,
    body: Body<RecordData>,
) -> ApiResult {
    let id = parse_id("collection", &id)?;
    let Json(input) = body.map_err(bad_json)?;
    created(state.platform.create_record(&slug, id, input.data).await?)
}

pub async fn update_record(
    State(state): State<AppState>,
    Path((slug, id, record_id)): Path<(String, String, String)>,
    body: Body<RecordData>,
) -> ApiResult {
    let id = parse_id("collection", &id)?;
    let record_id = parse_id("record", &record_id)?;
    let Json(input) = body.map_err(bad_json)?;
    ok(state.platform.update_record(&slug, id, record_id, input.data).await?)
}

pub async fn delete_record(
    State(state): State<AppState>,
    Path((slug, id, record_id)): Path<(String, String, String)>,
) -> ApiResult {
    let id = parse_id("collection", &id)?;
    let record_id = parse_id("record", &record_id)?;
    state.platform.delete_record(&slug, id, record_id).await?;
    done()
}

/// Either `rows` (objects keyed by source column) or `csv` text with a
/// header row. `mapping` is required for rows; CSV falls back to matching
/// headers against field names.
#[derive(Debug, Deserialize)]
pub struct ImportBody {
    #[serde(default)]
    rows: Option<Vec<JsonMap>>,
    #[serde(default)]
    csv: Option<String>,
    #[serde(default)]
    mapping: Option<Mapping>,
}

pub async fn import(
    State(state): State<AppState>,
    Path((slug, id)): Path<(String, String)>,
    body: Body<ImportBody>,
) -> ApiResult {
    let id = parse_id("collection", &id)?;
    let Json(input) = body.map_err(bad_json)?;
    let summary = match (input.rows, input.csv) {
        (Some(rows), None) => {
            state
                .platform
                .import_records(&slug, id, rows, input.mapping.unwrap_or_default())
                .await?
        }
        (None, Some(csv)) => state.platform.import_csv(&slug, id, &csv, input.mapping).await?,
        _ => return Err(Error::invalid("provide either rows or csv")),
    };
    ok(summary)
}

pub async fn set_embedding_fields(
    State(state): State<AppState>,
    Path((slug, id)): Path<(String, String)>,
    body: Body<EmbeddingFields>,
) -> ApiResult {
    let id = parse_id("collection", &id)?;
    let Json(input) = body.map_err(bad_json)?;
    ok(state.platform.set_embedding_fields(&slug, id, input.field_ids).await?)
}
