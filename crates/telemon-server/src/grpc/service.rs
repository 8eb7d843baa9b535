use crate::service::MetricsService;
use crate::state::{admit, REAL_IP_HEADER};
use ipnet::IpNet;
use std::time::Instant;
use telemon_common::proto::metrics_server::Metrics;
use telemon_common::proto::{UpdateMetricsRequest, UpdateMetricsResponse};
use telemon_common::types::Metric;
use tonic::{Request, Response, Status};

/// `telemon.Metrics` service; routes batches through the same controller as
/// `POST /updates/`.
pub struct MetricsGrpc {
    service: MetricsService,
    trusted_subnet: Option<IpNet>,
}

impl MetricsGrpc {
    pub fn new(service: MetricsService, trusted_subnet: Option<IpNet>) -> Self {
        Self {
            service,
            trusted_subnet,
        }
    }

    fn check_subnet<T>(&self, request: &Request<T>) -> Result<(), Status> {
        let Some(subnet) = &self.trusted_subnet else {
            return Ok(());
        };
        let real_ip = request
            .metadata()
            .get(REAL_IP_HEADER)
            .and_then(|v| v.to_str().ok());
        admit(subnet, real_ip)
            .map(|_| ())
            .map_err(|e| Status::permission_denied(e.to_string()))
    }
}

#[tonic::async_trait]
impl Metrics for MetricsGrpc {
    async fn update_metrics(
        &self,
        request: Request<UpdateMetricsRequest>,
    ) -> Result<Response<UpdateMetricsResponse>, Status> {
        let start = Instant::now();
        let peer = request
            .remote_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|| "-".to_string());

        if let Err(status) = self.check_subnet(&request) {
            tracing::warn!(
                method = "UpdateMetrics",
                peer = %peer,
                reason = %status.message(),
                "gRPC request rejected"
            );
            return Err(status);
        }

        let metrics: Vec<Metric> = request
            .into_inner()
            .values
            .into_iter()
            .map(Metric::from)
            .collect();
        let count = metrics.len();

        let error = match self.service.update_batch(metrics).await {
            Ok(()) => String::new(),
            Err(e) => e.to_string(),
        };

        let elapsed_ms = start.elapsed().as_millis() as u64;
        if error.is_empty() {
            tracing::info!(method = "UpdateMetrics", peer = %peer, count, elapsed_ms, "gRPC ok");
        } else {
            tracing::warn!(
                method = "UpdateMetrics",
                peer = %peer,
                count,
                elapsed_ms,
                error = %error,
                "gRPC failed"
            );
        }
        Ok(Response::new(UpdateMetricsResponse { error }))
    }
}
