mod common;

use anyhow::Result;
use axum::http::StatusCode;
use common::{build_sqlite_context, build_test_context, post_json, request};
use serde_json::json;

#[tokio::test]
async fn counter_path_updates_accumulate() {
    let ctx = build_test_context();

    let resp = request(&ctx.app, "POST", "/update/counter/hits/3").await;
    assert_eq!(resp.status, StatusCode::OK);
    let resp = request(&ctx.app, "POST", "/update/counter/hits/-10").await;
    assert_eq!(resp.status, StatusCode::OK);

    let resp = request(&ctx.app, "GET", "/value/counter/hits").await;
    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(resp.text(), "-7");
}

#[tokio::test]
async fn missing_metric_is_404() {
    let ctx = build_test_context();
    let resp = request(&ctx.app, "GET", "/value/counter/missing").await;
    assert_eq!(resp.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn reading_counter_as_gauge_is_400() {
    let ctx = build_test_context();
    request(&ctx.app, "POST", "/update/counter/hits/3").await;

    let resp = request(&ctx.app, "GET", "/value/gauge/hits").await;
    assert_eq!(resp.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn batch_then_listing() {
    let ctx = build_test_context();
    let resp = post_json(
        &ctx.app,
        "/updates/",
        &json!([
            {"id": "a", "type": "counter", "delta": 1},
            {"id": "b", "type": "gauge", "value": 1.5}
        ]),
    )
    .await;
    assert_eq!(resp.status, StatusCode::OK);

    let resp = request(&ctx.app, "GET", "/").await;
    assert_eq!(resp.status, StatusCode::OK);
    assert!(resp
        .header("content-type")
        .is_some_and(|ct| ct.starts_with("text/html")));
    let page = resp.text();
    assert!(page.contains("a: 1"), "{page}");
    assert!(page.contains("b: 1.5"), "{page}");
}

#[tokio::test]
async fn json_update_then_json_value() {
    let ctx = build_test_context();
    let resp = post_json(
        &ctx.app,
        "/update/",
        &json!({"id": "x", "type": "counter", "delta": 0}),
    )
    .await;
    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(resp.json(), json!({"id": "x", "type": "counter", "delta": 0}));

    let resp = post_json(&ctx.app, "/value/", &json!({"id": "x", "type": "counter"})).await;
    assert_eq!(resp.status, StatusCode::OK);
    assert_eq!(resp.json(), json!({"id": "x", "type": "counter", "delta": 0}));
}

#[tokio::test]
async fn json_update_returns_new_total() {
    let ctx = build_test_context();
    post_json(&ctx.app, "/update/", &json!({"id": "c", "type": "counter", "delta": 5})).await;
    let resp = post_json(
        &ctx.app,
        "/update/",
        &json!({"id": "c", "type": "counter", "delta": 2}),
    )
    .await;
    assert_eq!(resp.json()["delta"], 7);

    let resp = post_json(
        &ctx.app,
        "/update/",
        &json!({"id": "g", "type": "gauge", "value": 0.125}),
    )
    .await;
    assert_eq!(resp.json(), json!({"id": "g", "type": "gauge", "value": 0.125}));
}

#[tokio::test]
async fn key_length_boundary() {
    let ctx = build_test_context();
    let ok_key = "k".repeat(63);
    let long_key = "k".repeat(64);

    let resp = request(&ctx.app, "POST", &format!("/update/gauge/{ok_key}/1")).await;
    assert_eq!(resp.status, StatusCode::OK);
    let resp = request(&ctx.app, "POST", &format!("/update/gauge/{long_key}/1")).await;
    assert_eq!(resp.status, StatusCode::BAD_REQUEST);

    let resp = post_json(
        &ctx.app,
        "/update/",
        &json!({"id": long_key, "type": "gauge", "value": 1.0}),
    )
    .await;
    assert_eq!(resp.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn empty_key_on_path_routes_is_404() {
    let ctx = build_test_context();
    let resp = request(&ctx.app, "POST", "/update/counter//1").await;
    assert_eq!(resp.status, StatusCode::NOT_FOUND);
    let resp = request(&ctx.app, "GET", "/value/counter/").await;
    assert_eq!(resp.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn empty_json_id_is_400() {
    let ctx = build_test_context();
    let resp = post_json(
        &ctx.app,
        "/update/",
        &json!({"id": "", "type": "counter", "delta": 1}),
    )
    .await;
    assert_eq!(resp.status, StatusCode::BAD_REQUEST);
    let resp = post_json(&ctx.app, "/value/", &json!({"id": "", "type": "gauge"})).await;
    assert_eq!(resp.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn invalid_payloads_are_400() {
    let ctx = build_test_context();

    for uri in [
        "/update/histogram/x/1",
        "/update/counter/x/1.5",
        "/update/counter/x/abc",
        "/update/gauge/x/NaN",
        "/update/gauge/x/inf",
    ] {
        let resp = request(&ctx.app, "POST", uri).await;
        assert_eq!(resp.status, StatusCode::BAD_REQUEST, "{uri}");
    }

    for body in [
        json!({"id": "x", "type": "histogram", "delta": 1}),
        json!({"id": "x", "type": "counter", "value": 1.0}),
        json!({"id": "x", "type": "gauge", "delta": 1}),
        json!({"id": "x", "type": "gauge"}),
        json!({"id": "x", "type": "counter", "delta": 1, "value": 1.0}),
    ] {
        let resp = post_json(&ctx.app, "/update/", &body).await;
        assert_eq!(resp.status, StatusCode::BAD_REQUEST, "{body}");
    }

    let resp = post_json(&ctx.app, "/updates/", &json!({"not": "an array"})).await;
    assert_eq!(resp.status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn invalid_batch_writes_nothing() {
    let ctx = build_test_context();
    let resp = post_json(
        &ctx.app,
        "/updates/",
        &json!([
            {"id": "a", "type": "counter", "delta": 1},
            {"id": "b", "type": "gauge"}
        ]),
    )
    .await;
    assert_eq!(resp.status, StatusCode::BAD_REQUEST);

    let resp = request(&ctx.app, "GET", "/value/counter/a").await;
    assert_eq!(resp.status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn writing_other_kind_is_400() {
    let ctx = build_test_context();
    request(&ctx.app, "POST", "/update/gauge/load/0.5").await;
    let resp = request(&ctx.app, "POST", "/update/counter/load/1").await;
    assert_eq!(resp.status, StatusCode::BAD_REQUEST);

    let resp = request(&ctx.app, "GET", "/value/gauge/load").await;
    assert_eq!(resp.text(), "0.5");
}

#[tokio::test]
async fn ping_and_trace_header() {
    let ctx = build_test_context();
    let resp = request(&ctx.app, "GET", "/ping").await;
    assert_eq!(resp.status, StatusCode::OK);
    let trace = resp.header("x-trace-id").expect("trace id header");
    assert_eq!(trace.len(), 16);
}

#[tokio::test]
async fn sqlite_backend_serves_same_routes() -> Result<()> {
    let ctx = build_sqlite_context().await?;

    request(&ctx.app, "POST", "/update/counter/hits/3").await;
    request(&ctx.app, "POST", "/update/counter/hits/-10").await;
    let resp = request(&ctx.app, "GET", "/value/counter/hits").await;
    assert_eq!(resp.text(), "-7");

    let resp = post_json(
        &ctx.app,
        "/updates/",
        &json!([
            {"id": "a", "type": "counter", "delta": 1},
            {"id": "a", "type": "counter", "delta": 2},
            {"id": "b", "type": "gauge", "value": 1.5}
        ]),
    )
    .await;
    assert_eq!(resp.status, StatusCode::OK);
    let resp = request(&ctx.app, "GET", "/value/counter/a").await;
    assert_eq!(resp.text(), "3");

    let resp = request(&ctx.app, "GET", "/value/gauge/hits").await;
    assert_eq!(resp.status, StatusCode::BAD_REQUEST);
    let resp = request(&ctx.app, "POST", "/update/gauge/hits/1").await;
    assert_eq!(resp.status, StatusCode::BAD_REQUEST);

    // rolled back as a whole
    let resp = post_json(
        &ctx.app,
        "/updates/",
        &json!([
            {"id": "fresh", "type": "counter", "delta": 1},
            {"id": "b", "type": "counter", "delta": 1}
        ]),
    )
    .await;
    assert_eq!(resp.status, StatusCode::BAD_REQUEST);
    let resp = request(&ctx.app, "GET", "/value/counter/fresh").await;
    assert_eq!(resp.status, StatusCode::NOT_FOUND);

    let resp = request(&ctx.app, "GET", "/ping").await;
    assert_eq!(resp.status, StatusCode::OK);
    Ok(())
}
