use super::http::base_url;
use super::{Transport, TransportError};
use async_trait::async_trait;
use std::time::Duration;
use telemon_common::proto::metrics_client::MetricsClient;
use telemon_common::proto::{self, UpdateMetricsRequest};
use telemon_common::types::Metric;
use tonic::metadata::MetadataValue;
use tonic::transport::{Channel, Endpoint};
use tonic::Code;

const REAL_IP_KEY: &str = "x-real-ip";

/// Protobuf over gRPC to `telemon.Metrics/UpdateMetrics`.
pub struct GrpcTransport {
    client: MetricsClient<Channel>,
    real_ip: Option<MetadataValue<tonic::metadata::Ascii>>,
}

fn is_transient_code(code: Code) -> bool {
    matches!(
        code,
        Code::Unavailable | Code::DeadlineExceeded | Code::ResourceExhausted | Code::Aborted
    )
}

impl GrpcTransport {
    /// The channel connects on first use, so an unreachable server surfaces
    /// as a transient send failure rather than a start-up error.
    pub fn new(address: &str, timeout: Duration) -> anyhow::Result<Self> {
        let channel = Endpoint::from_shared(base_url(address))?
            .connect_timeout(timeout)
            .timeout(timeout)
            .connect_lazy();
        Ok(Self {
            client: MetricsClient::new(channel),
            real_ip: None,
        })
    }

    pub fn with_real_ip(mut self, ip: Option<String>) -> anyhow::Result<Self> {
        self.real_ip = match ip {
            Some(ip) => Some(ip.parse()?),
            None => None,
        };
        Ok(self)
    }
}

#[async_trait]
impl Transport for GrpcTransport {
    fn name(&self) -> &'static str {
        "grpc"
    }

    async fn send_updates(&self, batch: &[Metric]) -> Result<(), TransportError> {
        let values = batch
            .iter()
            .map(proto::Metric::try_from)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| TransportError::Permanent(e.to_string()))?;

        let mut request = tonic::Request::new(UpdateMetricsRequest { values });
        if let Some(ip) = &self.real_ip {
            request.metadata_mut().insert(REAL_IP_KEY, ip.clone());
        }

        let mut client = self.client.clone();
        let response = client.update_metrics(request).await.map_err(|status| {
            let msg = format!("{:?}: {}", status.code(), status.message());
            if is_transient_code(status.code()) {
                TransportError::Transient(msg)
            } else {
                TransportError::Permanent(msg)
            }
        })?;

        let error = response.into_inner().error;
        if error.is_empty() {
            Ok(())
        } else {
            Err(TransportError::Permanent(error))
        }
    }
}
