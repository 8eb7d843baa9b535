use crate::store::MetricStore;
use crate::transport::{Transport, TransportError};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("send cancelled")]
    Cancelled,

    #[error("gave up after {attempts} attempts: {source}")]
    Exhausted {
        attempts: usize,
        source: TransportError,
    },

    #[error(transparent)]
    Rejected(TransportError),
}

/// Ships uncommitted changes of the store and commits them once the server
/// acknowledges the batch.
pub struct BatchSender {
    store: Arc<MetricStore>,
    transport: Arc<dyn Transport>,
    retry_delays: Vec<Duration>,
}

impl BatchSender {
    pub fn new(
        store: Arc<MetricStore>,
        transport: Arc<dyn Transport>,
        retry_delays: Vec<Duration>,
    ) -> Self {
        Self {
            store,
            transport,
            retry_delays,
        }
    }

    /// Sends the current diff once, retrying transient failures after each
    /// configured delay. Returns the number of metrics acknowledged.
    pub async fn send_once(&self, cancel: &CancellationToken) -> Result<usize, SendError> {
        let diff = self.store.uncommitted_diff();
        if diff.is_empty() {
            return Ok(0);
        }
        let batch = diff.to_metrics();

        let mut delays = self.retry_delays.iter();
        let mut attempts = 0;
        loop {
            attempts += 1;
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(SendError::Cancelled),
                r = self.transport.send_updates(&batch) => r,
            };
            match result {
                Ok(()) => {
                    self.store.commit(&diff);
                    return Ok(batch.len());
                }
                Err(e) if e.is_transient() => match delays.next() {
                    Some(delay) => {
                        tracing::warn!(
                            transport = self.transport.name(),
                            attempt = attempts,
                            retry_in_ms = delay.as_millis() as u64,
                            error = %e,
                            "Transient send failure"
                        );
                        tokio::select! {
                            biased;
                            _ = cancel.cancelled() => return Err(SendError::Cancelled),
                            _ = tokio::time::sleep(*delay) => {}
                        }
                    }
                    None => return Err(SendError::Exhausted { attempts, source: e }),
                },
                Err(e) => return Err(SendError::Rejected(e)),
            }
        }
    }

    /// Sends every `period` until `cancel` fires.
    pub fn spawn(self, period: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut tick = interval_at(Instant::now() + period, period);
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tick.tick() => {}
                }
                match self.send_once(&cancel).await {
                    Ok(0) => tracing::trace!("Nothing to send"),
                    Ok(count) => {
                        tracing::debug!(transport = self.transport.name(), count, "Metrics reported");
                    }
                    Err(SendError::Cancelled) => break,
                    Err(e) => {
                        tracing::error!(
                            transport = self.transport.name(),
                            error = %e,
                            "Send failed, changes kept for the next report"
                        );
                    }
                }
            }
            tracing::debug!("Sender stopped");
        })
    }
}
