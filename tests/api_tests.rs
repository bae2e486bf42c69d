mod common;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use tower::ServiceExt;

use studyhub_engine::services::oracle::OracleChain;

use common::{seed, store, test_app, SUBJECT};

async fn send(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(value) => builder
            .header("content-type", "application/json")
            .body(Body::from(value.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, json)
}

fn subject_uri(path: &str) -> String {
    format!("/api/subjects/{SUBJECT}{path}")
}

#[tokio::test]
async fn test_health_reports_database() {
    let app = test_app(store().await, OracleChain::default());

    let (status, body) = send(&app, Method::GET, "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert_eq!(body["database"], "connected");
    assert_eq!(body["oracleBackends"], json!([]));
}

#[tokio::test]
async fn test_studied_pages_flow() {
    let app = test_app(store().await, OracleChain::default());

    let (status, _) = send(
        &app,
        Method::PUT,
        &subject_uri("/documents"),
        Some(json!({ "id": "d1", "title": "Limiti", "totalPages": 10 })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = send(
        &app,
        Method::PUT,
        &subject_uri("/topics"),
        Some(json!([
            { "id": "t1", "title": "Limiti notevoli", "sourceDocumentId": "d1", "sourcePageNumbers": [3, 4] },
            { "id": "t2", "title": "Continuità", "sourceDocumentId": "d1", "sourcePageNumbers": [9] }
        ])),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(
        &app,
        Method::PUT,
        &subject_uri("/documents/d1/studied-pages"),
        Some(json!({ "range": "4, 3, 40" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["document"]["studiedPages"], "3, 4");
    assert_eq!(body["data"]["newlyAffrontato"], json!(["t1"]));

    let (status, body) = send(&app, Method::GET, &subject_uri("/topics/ranked"), None).await;
    assert_eq!(status, StatusCode::OK);
    let ranked = body["data"].as_array().unwrap();
    assert_eq!(ranked.len(), 2);
    let t1 = ranked.iter().find(|t| t["id"] == "t1").unwrap();
    let t2 = ranked.iter().find(|t| t["id"] == "t2").unwrap();
    assert_eq!(t1["affrontato"], true);
    assert_eq!(t2["affrontato"], false);
}

#[tokio::test]
async fn test_studied_pages_unknown_document() {
    let app = test_app(store().await, OracleChain::default());

    let (status, body) = send(
        &app,
        Method::PUT,
        &subject_uri("/documents/missing/studied-pages"),
        Some(json!({ "range": "1-2" })),
    )
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
    assert_eq!(body["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_empty_structure_rejected() {
    let app = test_app(store().await, OracleChain::default());

    let (status, body) = send(
        &app,
        Method::POST,
        &subject_uri("/simulations"),
        Some(json!({ "structure": { "mcTheory": 0, "openTheory": 0, "mcExercise": 0, "openExercise": 0 } })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn test_generation_without_oracle_reports_stage() {
    let store = store().await;
    seed(&store).await;
    let app = test_app(store.clone(), OracleChain::default());

    let (status, body) = send(
        &app,
        Method::POST,
        &subject_uri("/simulations"),
        Some(json!({ "structure": { "mcTheory": 1, "openTheory": 1, "mcExercise": 0, "openExercise": 0 } })),
    )
    .await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["code"], "ORACLE_NOT_CONFIGURED");
    assert_eq!(body["stage"], "generation");

    let (status, body) = send(&app, Method::GET, &subject_uri("/simulations"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"], json!([]));
}

#[tokio::test]
async fn test_coach_without_record() {
    let app = test_app(store().await, OracleChain::default());

    let (status, body) = send(&app, Method::GET, &subject_uri("/coach"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["state"], "NEVER_SYNCED");
    assert_eq!(body["data"]["record"], Value::Null);

    let (status, body) = send(&app, Method::POST, &subject_uri("/coach/tasks/task-1/complete"), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn test_unknown_route() {
    let app = test_app(store().await, OracleChain::default());

    let (status, body) = send(&app, Method::GET, "/api/nothing-here", None).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");
}
