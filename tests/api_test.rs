//! API integration tests: health, formats, OpenAPI, authentication and
//! request IDs.

#![cfg(unix)]

mod common;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use http_body_util::BodyExt;
use std::collections::BTreeSet;
use tower::ServiceExt;

use common::{TestHarness, TOKEN};
use lc_server::router::build_router;

async fn body_json(body: Body) -> serde_json::Value {
    let bytes = body.collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

// ---------------------------------------------------------------------------
// Health check
// ---------------------------------------------------------------------------

#[tokio::test]
async fn health_check_returns_ok() {
    let harness = TestHarness::with_server(TestHarness::config()).await;

    let resp = reqwest::get(harness.url("/health")).await.unwrap();
    assert_eq!(resp.status(), 200);
    let json: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(json, serde_json::json!({"status": "ok"}));
}

#[tokio::test]
async fn health_is_public_with_auth_enabled() {
    let harness = TestHarness::with_server(TestHarness::auth_config()).await;

    let resp = reqwest::get(harness.url("/health")).await.unwrap();
    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn health_ignores_saturated_gate() {
    let mut config = TestHarness::config();
    config.conversion.max_concurrent = 1;
    let harness = TestHarness::with_server(config).await;

    let _held = harness.ctx.gate.try_acquire().unwrap();
    let resp = reqwest::get(harness.url("/health")).await.unwrap();
    assert_eq!(resp.status(), 200);
}

// ---------------------------------------------------------------------------
// Formats
// ---------------------------------------------------------------------------

#[tokio::test]
async fn formats_lists_docx_outputs() {
    let harness = TestHarness::with_server(TestHarness::config()).await;

    let resp = reqwest::get(harness.url("/formats")).await.unwrap();
    assert_eq!(resp.status(), 200);
    let json: serde_json::Value = resp.json().await.unwrap();

    let docx: BTreeSet<&str> = json["docx"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_str().unwrap())
        .collect();
    let expected: BTreeSet<&str> = ["doc", "pdf", "odt", "txt", "rtf", "html"].into();
    assert_eq!(docx, expected);

    let inputs: BTreeSet<&str> = json.as_object().unwrap().keys().map(String::as_str).collect();
    let expected_inputs: BTreeSet<&str> = [
        "doc", "docx", "odt", "rtf", "xls", "xlsx", "ods", "csv", "ppt", "pptx", "odp",
    ]
    .into();
    assert_eq!(inputs, expected_inputs);
}

#[tokio::test]
async fn formats_requires_auth_when_enabled() {
    let harness = TestHarness::with_server(TestHarness::auth_config()).await;

    let resp = reqwest::get(harness.url("/formats")).await.unwrap();
    assert_eq!(resp.status(), 401);

    let resp = harness
        .client
        .get(harness.url("/formats"))
        .bearer_auth(TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
}

// ---------------------------------------------------------------------------
// OpenAPI
// ---------------------------------------------------------------------------

#[tokio::test]
async fn openapi_document_is_public() {
    let harness = TestHarness::with_server(TestHarness::auth_config()).await;

    let resp = reqwest::get(harness.url("/openapi.json")).await.unwrap();
    assert_eq!(resp.status(), 200);
    let json: serde_json::Value = resp.json().await.unwrap();
    assert!(json["paths"]["/convert"]["post"].is_object());
    assert!(json["paths"]["/health"]["get"].is_object());
}

// ---------------------------------------------------------------------------
// Authentication
// ---------------------------------------------------------------------------

#[tokio::test]
async fn convert_rejects_missing_malformed_and_wrong_tokens() {
    let harness = TestHarness::with_server(TestHarness::auth_config()).await;

    let resp = harness.convert("pdf", "report.docx", b"hello").await;
    assert_eq!(resp.status(), 401);
    let json: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(json["code"], "unauthorized");

    let resp = harness
        .client
        .post(harness.url("/convert?to=pdf"))
        .header(header::AUTHORIZATION, format!("Basic {TOKEN}"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);

    let resp = harness
        .convert_with_token("pdf", "report.docx", b"hello", "wrong-token")
        .await;
    assert_eq!(resp.status(), 401);

    // Nothing got as far as the gate or the scratch root.
    harness.wait_for_idle().await;
}

#[tokio::test]
async fn convert_accepts_correct_token() {
    let harness = TestHarness::with_server(TestHarness::auth_config()).await;

    let resp = harness
        .convert_with_token("pdf", "report.docx", b"hello", TOKEN)
        .await;
    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn unauthorized_body_carries_request_id() {
    let (ctx, _scratch, _bin) = TestHarness::context(TestHarness::auth_config());
    let app = build_router(ctx);

    let response = app
        .oneshot(
            Request::builder()
                .uri("/formats")
                .header("x-request-id", "req-abc")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(response.headers()["x-request-id"], "req-abc");
    let json = body_json(response.into_body()).await;
    assert_eq!(json["request_id"], "req-abc");
    assert_eq!(json["code"], "unauthorized");
}

// ---------------------------------------------------------------------------
// Request IDs
// ---------------------------------------------------------------------------

#[tokio::test]
async fn request_id_generated_when_absent() {
    let (ctx, _scratch, _bin) = TestHarness::context(TestHarness::config());
    let app = build_router(ctx);

    let response = app
        .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    let id = response.headers()["x-request-id"].to_str().unwrap();
    assert_eq!(id.len(), 36, "expected a UUID, got {id}");
}
