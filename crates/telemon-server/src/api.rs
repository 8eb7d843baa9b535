use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::Json;
use serde::de::DeserializeOwned;
use std::fmt::Write;
use telemon_common::types::{
    validate_gauge, validate_key, Metric, MetricError, MetricKind, MetricValue,
};

use crate::error::{Result, ServiceError};
use crate::state::AppState;

/// Bodies are parsed by hand so a wrong or missing `Content-Type` is not
/// rejected and malformed JSON maps to 400.
fn parse_json<T: DeserializeOwned>(body: &[u8]) -> Result<T> {
    serde_json::from_slice(body).map_err(ServiceError::parse)
}

fn plain_text(body: String) -> Response {
    (
        StatusCode::OK,
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        body,
    )
        .into_response()
}

/// An empty `{key}` segment is a missing resource, not a bad request.
fn path_key(key: &str) -> Result<()> {
    validate_key(key).map_err(|e| match e {
        MetricError::EmptyKey => ServiceError::MissingKey,
        e => e.into(),
    })
}

/// Parses the `{value}` segment according to the declared kind.
fn parse_value(kind: MetricKind, key: &str, raw: &str) -> Result<MetricValue> {
    match kind {
        MetricKind::Counter => raw
            .parse::<i64>()
            .map(MetricValue::Counter)
            .map_err(|e| ServiceError::Parse(format!("counter value '{raw}': {e}"))),
        MetricKind::Gauge => {
            let v = raw
                .parse::<f64>()
                .map_err(|e| ServiceError::Parse(format!("gauge value '{raw}': {e}")))?;
            validate_gauge(key, v)?;
            Ok(MetricValue::Gauge(v))
        }
    }
}

/// `POST /update/{type}/{key}/{value}`
pub async fn update_path(
    State(state): State<AppState>,
    Path((mtype, key, raw)): Path<(String, String, String)>,
) -> Result<Response> {
    path_key(&key)?;
    let kind: MetricKind = mtype.parse()?;
    let value = parse_value(kind, &key, &raw)?;
    state.service.update(&key, value).await?;
    Ok(plain_text(String::new()))
}

/// `POST /update/` responds with the stored metric.
pub async fn update_json(State(state): State<AppState>, body: Bytes) -> Result<Json<Metric>> {
    let metric: Metric = parse_json(&body)?;
    Ok(Json(state.service.update_metric(metric).await?))
}

/// `POST /updates/`
pub async fn update_batch(State(state): State<AppState>, body: Bytes) -> Result<StatusCode> {
    let metrics: Vec<Metric> = parse_json(&body)?;
    state.service.update_batch(metrics).await?;
    Ok(StatusCode::OK)
}

/// `POST /value/`
pub async fn value_json(State(state): State<AppState>, body: Bytes) -> Result<Json<Metric>> {
    let query: Metric = parse_json(&body)?;
    Ok(Json(state.service.value_metric(&query).await?))
}

/// `GET /value/{type}/{key}`
pub async fn value_path(
    State(state): State<AppState>,
    Path((mtype, key)): Path<(String, String)>,
) -> Result<Response> {
    path_key(&key)?;
    let kind: MetricKind = mtype.parse()?;
    let value = state.service.value(kind, &key).await?;
    Ok(plain_text(value.to_string()))
}

/// `GET /` lists every metric as `key: value`, sorted by key.
pub async fn list(State(state): State<AppState>) -> Result<Html<String>> {
    let all = state.service.all().await?;
    let mut page = String::from("<!DOCTYPE html>\n<html><head><title>Metrics</title></head><body><ul>\n");
    for (key, value) in &all {
        let _ = writeln!(page, "<li>{}: {value}</li>", escape_html(key));
    }
    page.push_str("</ul></body></html>\n");
    Ok(Html(page))
}

/// `GET /ping`
pub async fn ping(State(state): State<AppState>) -> Result<&'static str> {
    state.service.ping().await?;
    Ok("OK")
}

fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            c => out.push(c),
        }
    }
    out
}
