//! Ingress/egress stages of the HTTP pipeline.
//!
//! Outermost first: logging, trusted subnet, decryption, body hash
//! (verify on ingress, sign on egress), decompression. Read routes add
//! response compression inside the hash stage, so the response hash covers
//! the bytes actually sent.

use axum::body::{Body, Bytes};
use axum::extract::{Request, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use telemon_common::compress::{gunzip, gzip, GZIP};
use telemon_common::hash::HASH_HEADER;

use crate::logging::TraceId;
use crate::state::{admit, AppState, REAL_IP_HEADER};

/// Largest request or response body buffered by a stage.
const BODY_LIMIT: usize = 16 * 1024 * 1024;

fn trace_id(req: &Request) -> String {
    req.extensions()
        .get::<TraceId>()
        .map(|t| t.0.clone())
        .unwrap_or_default()
}

fn reject(status: StatusCode, trace_id: &str, reason: String) -> Response {
    tracing::warn!(trace_id = %trace_id, reason = %reason, "Request rejected");
    (status, reason).into_response()
}

fn has_gzip(headers: &HeaderMap, name: header::HeaderName) -> bool {
    headers
        .get_all(name)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|token| token.split(';').next().map(str::trim) == Some(GZIP))
}

async fn split_request(req: Request) -> Result<(axum::http::request::Parts, Bytes), Response> {
    let id = trace_id(&req);
    let (parts, body) = req.into_parts();
    match axum::body::to_bytes(body, BODY_LIMIT).await {
        Ok(bytes) => Ok((parts, bytes)),
        Err(e) => Err(reject(
            StatusCode::BAD_REQUEST,
            &id,
            format!("cannot read request body: {e}"),
        )),
    }
}

fn rebuild_request(mut parts: axum::http::request::Parts, body: Vec<u8>) -> Request {
    parts.headers.remove(header::CONTENT_LENGTH);
    Request::from_parts(parts, Body::from(body))
}

/// Rejects requests whose `X-Real-IP` is absent, malformed or outside the
/// trusted subnet.
pub async fn trusted_subnet(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let Some(subnet) = &state.trusted_subnet else {
        return next.run(req).await;
    };
    let real_ip = req
        .headers()
        .get(REAL_IP_HEADER)
        .and_then(|v| v.to_str().ok());
    match admit(subnet, real_ip) {
        Ok(_) => next.run(req).await,
        Err(e) => reject(StatusCode::BAD_REQUEST, &trace_id(&req), e.to_string()),
    }
}

/// Decrypts non-empty request bodies with the configured private key.
pub async fn decrypt_body(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let Some(decryptor) = state.decryptor.clone() else {
        return next.run(req).await;
    };
    let id = trace_id(&req);
    let (parts, body) = match split_request(req).await {
        Ok(split) => split,
        Err(resp) => return resp,
    };
    if body.is_empty() {
        return next.run(Request::from_parts(parts, Body::from(body))).await;
    }
    match decryptor.decrypt(&body) {
        Ok(plain) => next.run(rebuild_request(parts, plain)).await,
        Err(e) => reject(StatusCode::BAD_REQUEST, &id, format!("cannot decrypt body: {e}")),
    }
}

/// Verifies the request hash header when present and signs the response.
pub async fn body_hash(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let Some(key) = state.hash_key.clone() else {
        return next.run(req).await;
    };
    let id = trace_id(&req);

    let tag = req
        .headers()
        .get(HASH_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string);
    let req = match tag {
        Some(tag) => {
            let (parts, body) = match split_request(req).await {
                Ok(split) => split,
                Err(resp) => return resp,
            };
            if let Err(e) = key.verify(&body, &tag) {
                return reject(StatusCode::BAD_REQUEST, &id, format!("body hash: {e}"));
            }
            Request::from_parts(parts, Body::from(body))
        }
        None => req,
    };

    let response = next.run(req).await;
    let (mut parts, body) = response.into_parts();
    let bytes = match axum::body::to_bytes(body, BODY_LIMIT).await {
        Ok(b) => b,
        Err(e) => {
            tracing::error!(trace_id = %id, error = %e, "Cannot buffer response");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };
    match key
        .sign(&bytes)
        .ok()
        .and_then(|tag| HeaderValue::from_str(&tag).ok())
    {
        Some(value) => {
            parts.headers.insert(HASH_HEADER, value);
        }
        None => tracing::warn!(trace_id = %id, "Cannot sign response"),
    }
    Response::from_parts(parts, Body::from(bytes))
}

/// Inflates `Content-Encoding: gzip` request bodies.
pub async fn decompress_body(req: Request, next: Next) -> Response {
    if !has_gzip(req.headers(), header::CONTENT_ENCODING) {
        return next.run(req).await;
    }
    let id = trace_id(&req);
    let (mut parts, body) = match split_request(req).await {
        Ok(split) => split,
        Err(resp) => return resp,
    };
    match gunzip(&body) {
        Ok(plain) => {
            parts.headers.remove(header::CONTENT_ENCODING);
            next.run(rebuild_request(parts, plain)).await
        }
        Err(e) => reject(StatusCode::BAD_REQUEST, &id, format!("cannot gunzip body: {e}")),
    }
}

/// Gzips the response when the client accepts it. Read routes only.
pub async fn compress_response(req: Request, next: Next) -> Response {
    let accepts_gzip = has_gzip(req.headers(), header::ACCEPT_ENCODING);
    let response = next.run(req).await;
    if !accepts_gzip || response.headers().contains_key(header::CONTENT_ENCODING) {
        return response;
    }

    let (mut parts, body) = response.into_parts();
    let bytes = match axum::body::to_bytes(body, BODY_LIMIT).await {
        Ok(b) => b,
        Err(e) => {
            tracing::error!(error = %e, "Cannot buffer response");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };
    if bytes.is_empty() {
        return Response::from_parts(parts, Body::from(bytes));
    }
    match gzip(&bytes) {
        Ok(packed) => {
            parts.headers.remove(header::CONTENT_LENGTH);
            parts
                .headers
                .insert(header::CONTENT_ENCODING, HeaderValue::from_static(GZIP));
            Response::from_parts(parts, Body::from(packed))
        }
        Err(e) => {
            tracing::warn!(error = %e, "Cannot gzip response, sending identity");
            Response::from_parts(parts, Body::from(bytes))
        }
    }
}
