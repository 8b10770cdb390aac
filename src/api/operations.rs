use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use utoipa::IntoParams;
use serde_json::{json, Value};
use uuid::Uuid;

use super::{orchestrator_error, ApiError};
use crate::infrastructure::auth::Claims;
use crate::infrastructure::AppState;
use crate::orchestrator::{Operation, OperationRequest, OrchestratorError};

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ListQuery {
    /// Most recent N operations
    pub limit: Option<usize>,
}

/// Operation as returned to clients, with the ids a failed run never reached.
fn operation_json(op: &Operation) -> Value {
    let mut value = json!(op);
    if let Value::Object(map) = &mut value {
        map.insert("remainingTargetIds".into(), json!(op.remaining_target_ids()));
    }
    value
}

#[utoipa::path(
    post,
    path = "/api/operations",
    responses(
        (status = 202, description = "Operation accepted and started"),
        (status = 400, description = "Unknown kind, empty targets or bad parameters"),
        (status = 401, description = "Missing or invalid bearer token")
    )
)]
pub async fn submit_operation(
    State(state): State<AppState>,
    claims: Claims,
    Json(request): Json<OperationRequest>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let id = state
        .orchestrator
        .submit(request, &claims.sub)
        .map_err(orchestrator_error)?;

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "operationId": id, "status": "pending" })),
    ))
}

#[utoipa::path(
    get,
    path = "/api/operations",
    params(ListQuery),
    responses((status = 200, description = "Recent operations, oldest first"))
)]
pub async fn list_operations(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Json<Value> {
    let limit = query.limit.unwrap_or(state.config.recent_operations_limit);
    let operations: Vec<Value> = state
        .orchestrator
        .list(limit)
        .iter()
        .map(operation_json)
        .collect();

    Json(json!({
        "total": operations.len(),
        "operations": operations,
    }))
}

#[utoipa::path(
    get,
    path = "/api/operations/{id}",
    params(("id" = Uuid, Path, description = "Operation id")),
    responses(
        (status = 200, description = "Current operation state"),
        (status = 404, description = "Unknown or dismissed operation")
    )
)]
pub async fn get_operation(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let op = state
        .orchestrator
        .get(id)
        .ok_or_else(|| orchestrator_error(OrchestratorError::NotFound(id)))?;
    Ok(Json(operation_json(&op)))
}

#[utoipa::path(
    delete,
    path = "/api/operations/{id}",
    params(("id" = Uuid, Path, description = "Operation id")),
    responses(
        (status = 200, description = "Operation dismissed; snapshot and audit are kept"),
        (status = 404, description = "Unknown operation"),
        (status = 409, description = "Operation is still pending or processing")
    )
)]
pub async fn dismiss_operation(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    state.orchestrator.remove(id).map_err(orchestrator_error)?;
    Ok(Json(json!({ "success": true })))
}

#[utoipa::path(
    post,
    path = "/api/operations/{id}/cancel",
    params(("id" = Uuid, Path, description = "Operation id")),
    responses(
        (status = 200, description = "Cancellation requested"),
        (status = 404, description = "Unknown operation"),
        (status = 409, description = "Operation already finished")
    )
)]
pub async fn cancel_operation(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    state.orchestrator.cancel(id).map_err(orchestrator_error)?;
    Ok(Json(json!({ "success": true })))
}

#[utoipa::path(
    post,
    path = "/api/operations/{id}/undo",
    params(("id" = Uuid, Path, description = "Operation id")),
    responses(
        (status = 200, description = "Targets restored to their prior state"),
        (status = 401, description = "Missing or invalid bearer token"),
        (status = 409, description = "No snapshot retained, or operation still running")
    )
)]
pub async fn undo_operation(
    State(state): State<AppState>,
    claims: Claims,
    Path(id): Path<Uuid>,
) -> Result<Json<Value>, ApiError> {
    let restored = state
        .orchestrator
        .undo(id, &claims.sub)
        .await
        .map_err(orchestrator_error)?;

    Ok(Json(json!({ "success": true, "restored": restored })))
}
