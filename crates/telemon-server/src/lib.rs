pub mod api;
pub mod app;
pub mod config;
pub mod error;
pub mod grpc;
pub mod logging;
pub mod middleware;
pub mod service;
pub mod state;
