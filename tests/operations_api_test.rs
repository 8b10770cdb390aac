use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use registrar::api;
use registrar::auth::create_jwt;
use registrar::config::Config;
use registrar::db;
use registrar::infrastructure::AppState;
use serde_json::{json, Value};
use std::time::Duration;
use tower::util::ServiceExt; // for `oneshot`

// Helper to create a router over a fresh in-memory database
async fn setup_app() -> Router {
    let db = db::init_db("sqlite::memory:")
        .await
        .expect("Failed to init DB");
    let state = AppState::new(db, Config::default());
    api::api_router(state)
}

fn token() -> String {
    create_jwt("registrar-admin", "admin").expect("Failed to create JWT")
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder()
        .uri(uri)
        .method(method)
        .header(header::AUTHORIZATION, format!("Bearer {}", token()));
    let body = match body {
        Some(json) => {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };

    let response = app
        .clone()
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

async fn seed(app: &Router, id: &str, fields: Value) {
    let (status, _) = send(app, "POST", "/records", Some(json!({ "id": id, "fields": fields }))).await;
    assert_eq!(status, StatusCode::CREATED);
}

async fn submit(app: &Router, body: Value) -> String {
    let (status, value) = send(app, "POST", "/operations", Some(body)).await;
    assert_eq!(status, StatusCode::ACCEPTED, "submit failed: {}", value);
    value["operationId"].as_str().unwrap().to_string()
}

async fn wait_until_settled(app: &Router, id: &str) -> Value {
    for _ in 0..200 {
        let (status, op) = send(app, "GET", &format!("/operations/{}", id), None).await;
        assert_eq!(status, StatusCode::OK);
        if op["status"] == "completed" || op["status"] == "failed" {
            return op;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("operation {} never settled", id);
}

#[tokio::test]
async fn test_health_check() {
    let app = setup_app().await;
    let (status, body) = send(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["service"], "registrar");
}

#[tokio::test]
async fn test_transfer_then_undo_restores_records() {
    let app = setup_app().await;
    seed(&app, "S1", json!({ "name": "Amal", "class_id": "C1", "stage": "primary" })).await;
    seed(&app, "S2", json!({ "name": "Badr", "class_id": "C2", "stage": "primary" })).await;

    let id = submit(
        &app,
        json!({
            "kind": "transfer",
            "targetIds": ["S1", "S2"],
            "parameters": { "classId": "C9", "stage": "middle" }
        }),
    )
    .await;

    let op = wait_until_settled(&app, &id).await;
    assert_eq!(op["status"], "completed");
    assert_eq!(op["progress"], 100);
    assert_eq!(op["performedBy"], "registrar-admin");
    assert_eq!(op["remainingTargetIds"], json!([]));

    let (_, record) = send(&app, "GET", "/records/S1", None).await;
    assert_eq!(record["record"]["fields"]["class_id"], "C9");
    assert_eq!(record["record"]["fields"]["stage"], "middle");

    let (status, body) = send(&app, "POST", &format!("/operations/{}/undo", id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["restored"], 2);

    let (_, record) = send(&app, "GET", "/records/S2", None).await;
    assert_eq!(
        record["record"]["fields"],
        json!({ "name": "Badr", "class_id": "C2", "stage": "primary" })
    );

    // Snapshot is consumed
    let (status, _) = send(&app, "POST", &format!("/operations/{}/undo", id), None).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (_, audit) = send(&app, "GET", "/audit", None).await;
    assert_eq!(audit["total"], 2);
    assert_eq!(audit["entries"][0]["detail"]["undo"], true);
    assert_eq!(audit["entries"][1]["kind"], "transfer");
    assert_eq!(audit["entries"][1]["itemCount"], 2);
}

#[tokio::test]
async fn test_notification_cannot_be_undone() {
    let app = setup_app().await;
    seed(&app, "S1", json!({ "name": "Amal" })).await;

    let id = submit(
        &app,
        json!({
            "kind": "sendNotification",
            "targetIds": ["S1"],
            "parameters": { "title": "Trip", "message": "Bring a hat" }
        }),
    )
    .await;
    let op = wait_until_settled(&app, &id).await;
    assert_eq!(op["status"], "completed");
    assert_eq!(op["undoable"], false);

    let (_, record) = send(&app, "GET", "/records/S1", None).await;
    assert_eq!(record["entries"][0]["title"], "Trip");
    assert_eq!(record["entries"][0]["collection"], "notifications");

    let (status, body) = send(&app, "POST", &format!("/operations/{}/undo", id), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(body["error"].as_str().unwrap().contains("No snapshot"));
}

#[tokio::test]
async fn test_failed_operation_reports_remaining_targets() {
    let app = setup_app().await;
    seed(&app, "S1", json!({ "status": "active" })).await;

    // S2 does not exist, so snapshot capture fails before anything is written
    let id = submit(
        &app,
        json!({
            "kind": "statusUpdate",
            "targetIds": ["S1", "S2"],
            "parameters": { "status": "suspended" }
        }),
    )
    .await;
    let op = wait_until_settled(&app, &id).await;
    assert_eq!(op["status"], "failed");
    assert_eq!(op["errorKind"], "snapshotCaptureFailure");
    assert_eq!(op["processedCount"], 0);
    assert_eq!(op["remainingTargetIds"], json!(["S1", "S2"]));

    let (_, record) = send(&app, "GET", "/records/S1", None).await;
    assert_eq!(record["record"]["fields"]["status"], "active");
}

#[tokio::test]
async fn test_invalid_submissions_are_rejected() {
    let app = setup_app().await;

    let (status, _) = send(
        &app,
        "POST",
        "/operations",
        Some(json!({ "kind": "teleport", "targetIds": ["S1"] })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app,
        "POST",
        "/operations",
        Some(json!({ "kind": "statusUpdate", "targetIds": [], "parameters": { "status": "x" } })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app,
        "POST",
        "/operations",
        Some(json!({ "kind": "transfer", "targetIds": ["S1"], "parameters": {} })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, list) = send(&app, "GET", "/operations", None).await;
    assert_eq!(list["total"], 0);
}

#[tokio::test]
async fn test_submit_requires_bearer_token() {
    let app = setup_app().await;
    let req = Request::builder()
        .uri("/operations")
        .method("POST")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(
            json!({ "kind": "printBatch", "targetIds": ["S1"] }).to_string(),
        ))
        .unwrap();

    let response = app.oneshot(req).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_dismiss_cancel_and_unknown_ids() {
    let app = setup_app().await;
    seed(&app, "S1", json!({ "account_enabled": true })).await;

    let id = submit(
        &app,
        json!({
            "kind": "toggleAccounts",
            "targetIds": ["S1"],
            "parameters": { "enabled": false }
        }),
    )
    .await;
    wait_until_settled(&app, &id).await;

    // Finished operations cannot be cancelled
    let (status, _) = send(&app, "POST", &format!("/operations/{}/cancel", id), None).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = send(&app, "DELETE", &format!("/operations/{}", id), None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = send(&app, "GET", &format!("/operations/{}", id), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // Dismissal keeps the snapshot
    let (status, _) = send(&app, "POST", &format!("/operations/{}/undo", id), None).await;
    assert_eq!(status, StatusCode::OK);
    let (_, record) = send(&app, "GET", "/records/S1", None).await;
    assert_eq!(record["record"]["fields"]["account_enabled"], true);

    let unknown = uuid::Uuid::new_v4();
    let (status, _) = send(&app, "DELETE", &format!("/operations/{}", unknown), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = send(&app, "GET", "/records/nobody", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_list_is_ordered_and_limited() {
    let app = setup_app().await;
    seed(&app, "S1", json!({})).await;

    let mut ids = Vec::new();
    for template in ["report-card", "id-card", "certificate"] {
        let id = submit(
            &app,
            json!({
                "kind": "printBatch",
                "targetIds": ["S1"],
                "parameters": { "template": template }
            }),
        )
        .await;
        wait_until_settled(&app, &id).await;
        ids.push(id);
    }

    let (_, list) = send(&app, "GET", "/operations?limit=2", None).await;
    assert_eq!(list["total"], 2);
    assert_eq!(list["operations"][0]["id"], ids[1].as_str());
    assert_eq!(list["operations"][1]["id"], ids[2].as_str());
    assert_eq!(list["operations"][1]["label"], "Print batch (1 records)");
}
