use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use sea_orm::DatabaseConnection;
use serde::Deserialize;
use utoipa::IntoParams;
use serde_json::{json, Value};

use super::{domain_error, ApiError};
use crate::domain::FieldMap;
use crate::services::record_service;

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct RecordListQuery {
    /// Maximum records to return
    pub limit: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct CreateRecordRequest {
    pub id: String,
    #[serde(default)]
    pub fields: FieldMap,
}

#[derive(Debug, Deserialize)]
pub struct UpdateRecordRequest {
    pub fields: FieldMap,
    /// Overwrite instead of merging
    #[serde(default)]
    pub replace: bool,
}

#[utoipa::path(
    get,
    path = "/api/records",
    params(RecordListQuery),
    responses((status = 200, description = "Records ordered by id"))
)]
pub async fn list_records(
    State(db): State<DatabaseConnection>,
    Query(query): Query<RecordListQuery>,
) -> Result<Json<Value>, ApiError> {
    let records = record_service::list_records(&db, query.limit)
        .await
        .map_err(domain_error)?;

    Ok(Json(json!({
        "records": records,
        "total": records.len()
    })))
}

#[utoipa::path(
    post,
    path = "/api/records",
    responses(
        (status = 201, description = "Record created"),
        (status = 400, description = "Blank or duplicate id")
    )
)]
pub async fn create_record(
    State(db): State<DatabaseConnection>,
    Json(payload): Json<CreateRecordRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let record = record_service::create_record(&db, &payload.id, payload.fields)
        .await
        .map_err(domain_error)?;

    Ok((StatusCode::CREATED, Json(json!({ "record": record }))))
}

#[utoipa::path(
    get,
    path = "/api/records/{id}",
    params(("id" = String, Path, description = "Record id")),
    responses(
        (status = 200, description = "Record with the rows inserted about it"),
        (status = 404, description = "Record not found")
    )
)]
pub async fn get_record(
    State(db): State<DatabaseConnection>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let record = record_service::get_record(&db, &id)
        .await
        .map_err(domain_error)?;
    let entries = record_service::list_entries(&db, &id, None)
        .await
        .map_err(domain_error)?;

    Ok(Json(json!({
        "record": record,
        "entries": entries
    })))
}

#[utoipa::path(
    put,
    path = "/api/records/{id}",
    params(("id" = String, Path, description = "Record id")),
    responses(
        (status = 200, description = "Record updated"),
        (status = 404, description = "Record not found")
    )
)]
pub async fn update_record(
    State(db): State<DatabaseConnection>,
    Path(id): Path<String>,
    Json(payload): Json<UpdateRecordRequest>,
) -> Result<Json<Value>, ApiError> {
    let record = record_service::update_record(&db, &id, payload.fields, payload.replace)
        .await
        .map_err(domain_error)?;

    Ok(Json(json!({ "record": record })))
}
