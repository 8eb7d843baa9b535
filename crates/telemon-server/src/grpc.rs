mod service;

pub use service::MetricsGrpc;

use telemon_common::proto::metrics_server::MetricsServer;

/// Wraps the service for `tonic::transport::Server::add_service`.
pub fn server(service: MetricsGrpc) -> MetricsServer<MetricsGrpc> {
    MetricsServer::new(service)
}
