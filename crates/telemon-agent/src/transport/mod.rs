//! Wire drivers. Both expose [`Transport::send_updates`] and classify
//! failures so the sender knows which ones are worth retrying.

pub mod grpc;
pub mod http;

use async_trait::async_trait;
use telemon_common::types::Metric;

pub use grpc::GrpcTransport;
pub use http::HttpTransport;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Connection refused, timeout or a status that asks to come back later.
    #[error("transient: {0}")]
    Transient(String),

    #[error("permanent: {0}")]
    Permanent(String),
}

impl TransportError {
    pub fn is_transient(&self) -> bool {
        matches!(self, TransportError::Transient(_))
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Driver name for logs.
    fn name(&self) -> &'static str;

    /// Delivers one batch. `Ok` means the server acknowledged all of it.
    async fn send_updates(&self, batch: &[Metric]) -> Result<(), TransportError>;
}
