use std::sync::Arc;

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use serde_json::Value;
use ticketbooth_core::adapters::MemoryDatastore;
use ticketbooth_core::config::Config;
use ticketbooth_core::{create_app, AppState};
use tower::ServiceExt;

fn app() -> axum::Router {
    create_app(AppState::new(
        Arc::new(MemoryDatastore::new()),
        Config::default(),
    ))
}

async fn get_json(uri: &str) -> (StatusCode, Value, bool) {
    let response = app()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let has_request_id = response.headers().contains_key("x-request-id");
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap(), has_request_id)
}

#[tokio::test]
async fn test_health_reports_connected_store() {
    let (status, body, has_request_id) = get_json("/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["db"], "connected");
    assert!(body["version"].is_string());
    assert!(has_request_id);
}

#[tokio::test]
async fn test_openapi_document_lists_routes() {
    let (status, body, _) = get_json("/api-docs/openapi.json").await;

    assert_eq!(status, StatusCode::OK);
    let paths = body["paths"].as_object().unwrap();
    for path in [
        "/cart/items",
        "/cart/items/{lineId}",
        "/cart/checkout",
        "/webhooks/payments",
        "/producer/events/{eventId}/sales",
    ] {
        assert!(paths.contains_key(path), "missing {path}");
    }
}
