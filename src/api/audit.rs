use axum::{
    extract::{Query, State},
    Json,
};
use serde::Deserialize;
use utoipa::IntoParams;
use serde_json::{json, Value};

use super::{domain_error, ApiError};
use crate::infrastructure::AppState;

#[derive(Debug, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct AuditQuery {
    /// Most recent N entries
    pub limit: Option<u64>,
}

#[utoipa::path(
    get,
    path = "/api/audit",
    params(AuditQuery),
    responses((status = 200, description = "Audit entries, newest first"))
)]
pub async fn list_audit(
    State(state): State<AppState>,
    Query(query): Query<AuditQuery>,
) -> Result<Json<Value>, ApiError> {
    let limit = query
        .limit
        .unwrap_or(state.config.recent_operations_limit as u64);
    let entries = state.audit.recent(limit).await.map_err(domain_error)?;

    Ok(Json(json!({
        "total": entries.len(),
        "entries": entries,
    })))
}
