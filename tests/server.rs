use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Method, Request as HttpRequest, StatusCode};
use tower::ServiceExt;

use intravert::chain::Engine;
use intravert::memory::MemoryBackend;
use intravert::server::router;

fn app() -> axum::Router {
    router(Arc::new(Engine::new(Arc::new(MemoryBackend::new()))))
}

fn post_chain(body: &str) -> HttpRequest<Body> {
    HttpRequest::builder()
        .method(Method::POST)
        .uri("/v1/chain")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .expect("request builds")
}

async fn json_body(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body is read");
    serde_json::from_slice(&bytes).expect("body is json")
}

#[tokio::test]
async fn chains_are_served_over_http() {
    let body = r#"{"operations": [
        {"type": "create_keyspace", "params": {"name": "web", "replication": 1}},
        {"type": "set_keyspace", "params": {"keyspace": "web"}},
        {"type": "create_table", "params": {"name": "cf"}},
        {"type": "set_auto_timestamp", "params": {"enabled": true}},
        {"type": "assume", "columnfamily": "cf", "params": {"role": "value", "type": "UTF8Type"}},
        {"type": "set", "columnfamily": "cf", "params": {"rowkey": "r", "name": "c", "value": "over http"}},
        {"type": "get", "columnfamily": "cf", "params": {"rowkey": "r", "name": "c"}}
    ]}"#;
    let response = app().oneshot(post_chain(body)).await.expect("router answers");
    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["results"]["0"], "OK");
    assert_eq!(json["results"]["6"][0]["value"], "over http");
    assert!(json.get("exception").is_none());
}

#[tokio::test]
async fn chain_failures_still_answer_ok() {
    let body = r#"{"operations": [
        {"type": "create_keyspace", "params": {"name": "twice"}},
        {"type": "create_keyspace", "params": {"name": "twice"}}
    ]}"#;
    let response = app().oneshot(post_chain(body)).await.expect("router answers");
    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["results"]["0"], "OK");
    assert_eq!(json["exception"]["index"], 1);
    assert!(
        json["exception"]["message"].as_str().expect("a message").contains("already exists"),
        "{json}"
    );
}

#[tokio::test]
async fn malformed_chains_are_rejected() {
    let response = app().oneshot(post_chain("{\"operations\": [")).await.expect("router answers");
    assert!(response.status().is_client_error(), "{}", response.status());

    let response = app()
        .oneshot(post_chain(r#"{"operations": [{"params": {}}]}"#))
        .await
        .expect("router answers");
    assert!(response.status().is_client_error(), "{}", response.status());
}

#[tokio::test]
async fn unknown_consistency_hints_fall_back_to_the_default() {
    let body = r#"{"consistency": "SOMETIMES", "operations": [
        {"type": "create_keyspace", "params": {"name": "lenient", "replication": 1}},
        {"type": "list_keyspaces"}
    ]}"#;
    let response = app().oneshot(post_chain(body)).await.expect("router answers");
    assert_eq!(response.status(), StatusCode::OK);
    let json = json_body(response).await;
    assert_eq!(json["results"]["0"], "OK");
    assert_eq!(json["results"]["1"][0], "lenient");
    assert!(json.get("exception").is_none(), "{json}");
}
