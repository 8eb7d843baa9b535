use crate::state::AppState;
use crate::{api, logging, middleware};
use axum::middleware::{from_fn, from_fn_with_state};
use axum::routing::{get, post};
use axum::Router;

/// Builds the HTTP router with the full request pipeline.
pub fn build_http_app(state: AppState) -> Router {
    let read_routes = Router::new()
        .route("/", get(api::list))
        .route("/value/", post(api::value_json))
        .route("/value/{mtype}/{key}", get(api::value_path))
        .layer(from_fn(middleware::compress_response));

    let write_routes = Router::new()
        .route("/update/", post(api::update_json))
        .route("/updates/", post(api::update_batch))
        .route("/update/{mtype}/{key}/{value}", post(api::update_path))
        .route("/ping", get(api::ping));

    // the last layer added runs first on ingress
    read_routes
        .merge(write_routes)
        .layer(from_fn(middleware::decompress_body))
        .layer(from_fn_with_state(state.clone(), middleware::body_hash))
        .layer(from_fn_with_state(state.clone(), middleware::decrypt_body))
        .layer(from_fn_with_state(state.clone(), middleware::trusted_subnet))
        .layer(from_fn(logging::request_logging))
        .with_state(state)
}
