#![allow(dead_code)]

use anyhow::Result;
use axum::body::{to_bytes, Body, Bytes};
use axum::http::{HeaderMap, Request, StatusCode};
use rsa::pkcs8::{EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::RsaPrivateKey;
use serde_json::Value;
use telemon_common::crypto::{Decryptor, Encryptor};
use telemon_common::proto::metrics_server::Metrics;
use telemon_common::proto::{self, UpdateMetricsRequest, UpdateMetricsResponse};
use telemon_server::app;
use telemon_server::grpc::MetricsGrpc;
use telemon_server::service::MetricsService;
use telemon_server::state::AppState;
use telemon_storage::db::DbStorage;
use telemon_storage::memory::MemStorage;
use telemon_storage::Storage;
use tempfile::TempDir;
use tonic::metadata::MetadataValue;
use tower::util::ServiceExt;

pub struct TestContext {
    pub temp_dir: Option<TempDir>,
    pub state: AppState,
    pub app: axum::Router,
}

impl TestContext {
    fn new(state: AppState, temp_dir: Option<TempDir>) -> Self {
        let app = app::build_http_app(state.clone());
        Self {
            temp_dir,
            state,
            app,
        }
    }
}

/// Router over an empty in-memory store with no optional stages.
pub fn build_test_context() -> TestContext {
    build_with(|_| {})
}

/// Same as [`build_test_context`], letting the test enable pipeline stages.
pub fn build_with(configure: impl FnOnce(&mut AppState)) -> TestContext {
    let storage = Storage::memory(MemStorage::ephemeral());
    let mut state = AppState::new(MetricsService::new(storage));
    configure(&mut state);
    TestContext::new(state, None)
}

/// Router over a fresh SQLite database.
pub async fn build_sqlite_context() -> Result<TestContext> {
    let temp_dir = tempfile::tempdir()?;
    let dsn = format!(
        "sqlite://{}?mode=rwc",
        temp_dir.path().join("metrics.db").display()
    );
    let storage = Storage::database(DbStorage::connect(&dsn).await?);
    let state = AppState::new(MetricsService::new(storage));
    Ok(TestContext::new(state, Some(temp_dir)))
}

pub struct TestResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl TestResponse {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).to_string()
    }

    pub fn json(&self) -> Value {
        serde_json::from_slice(&self.body).expect("body should be JSON")
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

pub async fn send(app: &axum::Router, req: Request<Body>) -> TestResponse {
    let resp = app
        .clone()
        .oneshot(req)
        .await
        .expect("request should be handled");
    let status = resp.status();
    let headers = resp.headers().clone();
    let body = to_bytes(resp.into_body(), usize::MAX)
        .await
        .expect("body should read");
    TestResponse {
        status,
        headers,
        body,
    }
}

pub async fn request(app: &axum::Router, method: &str, uri: &str) -> TestResponse {
    let req = Request::builder()
        .method(method)
        .uri(uri)
        .body(Body::empty())
        .expect("request should build");
    send(app, req).await
}

pub async fn post_json(app: &axum::Router, uri: &str, body: &Value) -> TestResponse {
    let req = Request::builder()
        .method("POST")
        .uri(uri)
        .header("Content-Type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("request should build");
    send(app, req).await
}

pub fn rsa_keypair() -> (Encryptor, Decryptor) {
    let private = RsaPrivateKey::new(&mut rand::thread_rng(), 1024).expect("key should generate");
    let public_pem = private
        .to_public_key()
        .to_public_key_pem(LineEnding::LF)
        .expect("public key should encode");
    let private_pem = private
        .to_pkcs8_pem(LineEnding::LF)
        .expect("private key should encode");
    (
        Encryptor::from_pem(&public_pem).expect("public key should parse"),
        Decryptor::from_pem(&private_pem).expect("private key should parse"),
    )
}

/// Calls the gRPC service in-process with an optional `x-real-ip` entry.
pub async fn grpc_update_direct(
    service: &MetricsGrpc,
    values: Vec<proto::Metric>,
    real_ip: Option<&str>,
) -> std::result::Result<UpdateMetricsResponse, tonic::Status> {
    let mut req = tonic::Request::new(UpdateMetricsRequest { values });
    if let Some(ip) = real_ip {
        let value: MetadataValue<_> = ip.parse().expect("metadata value should parse");
        req.metadata_mut().insert("x-real-ip", value);
    }
    service.update_metrics(req).await.map(|r| r.into_inner())
}
