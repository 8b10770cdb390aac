use crate::api;
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        api::health::health_check,
        api::operations::submit_operation,
        api::operations::list_operations,
        api::operations::get_operation,
        api::operations::dismiss_operation,
        api::operations::cancel_operation,
        api::operations::undo_operation,
        api::audit::list_audit,
        api::records::list_records,
        api::records::create_record,
        api::records::get_record,
        api::records::update_record,
    ),
    tags(
        (name = "registrar", description = "Bulk record operations with undo and audit")
    )
)]
pub struct ApiDoc;
