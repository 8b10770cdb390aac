pub mod audit;
pub mod health;
pub mod operations;
pub mod records;

use axum::{
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};

use crate::domain::DomainError;
use crate::infrastructure::AppState;
use crate::orchestrator::OrchestratorError;

/// Error half of every handler result
pub type ApiError = (StatusCode, Json<Value>);

pub fn api_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health::health_check))
        // Bulk operations
        .route(
            "/operations",
            get(operations::list_operations).post(operations::submit_operation),
        )
        .route(
            "/operations/:id",
            get(operations::get_operation).delete(operations::dismiss_operation),
        )
        .route("/operations/:id/cancel", post(operations::cancel_operation))
        .route("/operations/:id/undo", post(operations::undo_operation))
        // Audit trail
        .route("/audit", get(audit::list_audit))
        // Records
        .route(
            "/records",
            get(records::list_records).post(records::create_record),
        )
        .route(
            "/records/:id",
            get(records::get_record).put(records::update_record),
        )
        .with_state(state)
}

pub(crate) fn orchestrator_error(err: OrchestratorError) -> ApiError {
    let status = match &err {
        OrchestratorError::InvalidOperationRequest(_) => StatusCode::BAD_REQUEST,
        OrchestratorError::NotFound(_) => StatusCode::NOT_FOUND,
        OrchestratorError::NoSnapshot(_)
        | OrchestratorError::IllegalTransition { .. }
        | OrchestratorError::InProgress(_) => StatusCode::CONFLICT,
        OrchestratorError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        OrchestratorError::MutationFailure { .. }
        | OrchestratorError::SnapshotCaptureFailure(_)
        | OrchestratorError::AuditWriteFailure(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    if status.is_server_error() {
        tracing::error!("Request failed: {}", err);
    }
    (status, Json(json!({ "error": err.to_string() })))
}

pub(crate) fn domain_error(err: DomainError) -> ApiError {
    let status = match &err {
        DomainError::NotFound => StatusCode::NOT_FOUND,
        DomainError::Validation(_) => StatusCode::BAD_REQUEST,
        DomainError::Database(_) | DomainError::Internal(_) => {
            tracing::error!("Storage error: {}", err);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    (status, Json(json!({ "error": err.to_string() })))
}
