use super::{Transport, TransportError};
use async_trait::async_trait;
use reqwest::header::{CONTENT_ENCODING, CONTENT_TYPE};
use reqwest::StatusCode;
use std::time::Duration;
use telemon_common::compress::{gzip, GZIP};
use telemon_common::crypto::Encryptor;
use telemon_common::hash::{HashKey, HASH_HEADER};
use telemon_common::types::Metric;

const REAL_IP_HEADER: &str = "X-Real-IP";

/// JSON over HTTP to `POST /updates/`.
pub struct HttpTransport {
    client: reqwest::Client,
    url: String,
    real_ip: Option<String>,
    hash_key: Option<HashKey>,
    encryptor: Option<Encryptor>,
}

/// `host:port` or a full URL.
pub fn base_url(address: &str) -> String {
    let addr = address.trim().trim_end_matches('/');
    if addr.contains("://") {
        addr.to_string()
    } else {
        format!("http://{addr}")
    }
}

fn is_transient_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::REQUEST_TIMEOUT
            | StatusCode::TOO_MANY_REQUESTS
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

fn classify(err: reqwest::Error) -> TransportError {
    if err.is_connect() || err.is_timeout() || err.is_request() {
        TransportError::Transient(err.to_string())
    } else {
        TransportError::Permanent(err.to_string())
    }
}

fn permanent(e: impl std::fmt::Display) -> TransportError {
    TransportError::Permanent(e.to_string())
}

impl HttpTransport {
    pub fn new(address: &str, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: format!("{}/updates/", base_url(address)),
            real_ip: None,
            hash_key: None,
            encryptor: None,
        })
    }

    pub fn with_real_ip(mut self, ip: Option<String>) -> Self {
        self.real_ip = ip;
        self
    }

    pub fn with_hash_key(mut self, key: Option<HashKey>) -> Self {
        self.hash_key = key;
        self
    }

    pub fn with_encryptor(mut self, encryptor: Option<Encryptor>) -> Self {
        self.encryptor = encryptor;
        self
    }

    /// Compress, hash the compressed bytes, then encrypt.
    fn encode(&self, batch: &[Metric]) -> Result<(Vec<u8>, Option<String>), TransportError> {
        let json = serde_json::to_vec(batch).map_err(permanent)?;
        let packed = gzip(&json).map_err(permanent)?;
        let tag = match &self.hash_key {
            Some(key) => Some(key.sign(&packed).map_err(permanent)?),
            None => None,
        };
        let body = match &self.encryptor {
            Some(enc) => enc.encrypt(&packed).map_err(permanent)?,
            None => packed,
        };
        Ok((body, tag))
    }
}

#[async_trait]
impl Transport for HttpTransport {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn send_updates(&self, batch: &[Metric]) -> Result<(), TransportError> {
        let (body, tag) = self.encode(batch)?;

        let mut req = self
            .client
            .post(&self.url)
            .header(CONTENT_TYPE, "application/json")
            .header(CONTENT_ENCODING, GZIP)
            .body(body);
        if let Some(ip) = &self.real_ip {
            req = req.header(REAL_IP_HEADER, ip);
        }
        if let Some(tag) = tag {
            req = req.header(HASH_HEADER, tag);
        }

        let resp = req.send().await.map_err(classify)?;
        let status = resp.status();
        if status.is_success() {
            return Ok(());
        }
        let text = resp.text().await.unwrap_or_default();
        let msg = format!("HTTP {status}: {}", text.trim());
        if is_transient_status(status) {
            Err(TransportError::Transient(msg))
        } else {
            Err(TransportError::Permanent(msg))
        }
    }
}
