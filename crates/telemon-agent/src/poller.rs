use crate::store::MetricStore;
use std::sync::Arc;
use std::time::Duration;
use telemon_collector::{Collector, Reading};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// A failed poll, forwarded to the shared error channel.
#[derive(Debug)]
pub struct PollError {
    pub collector: String,
    pub error: anyhow::Error,
}

/// Writes `readings` into the store. Non-finite gauges are dropped since the
/// server would reject the whole batch.
pub fn apply(store: &MetricStore, readings: Vec<Reading>) {
    for reading in readings {
        match reading {
            Reading::Gauge(key, value) if value.is_finite() => store.set_gauge(&key, value),
            Reading::Gauge(key, value) => {
                tracing::debug!(metric = %key, value, "Skipping non-finite gauge");
            }
            Reading::Increment(key, amount) => {
                store.add_counter(&key, amount);
            }
        }
    }
}

/// Polls `collector` every `period` until `cancel` fires.
pub fn spawn(
    mut collector: Box<dyn Collector>,
    store: Arc<MetricStore>,
    period: Duration,
    errors: mpsc::Sender<PollError>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut tick = interval(period);
        tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tick.tick() => {}
            }
            match collector.collect() {
                Ok(readings) => {
                    tracing::trace!(collector = collector.name(), count = readings.len(), "Polled");
                    apply(&store, readings);
                }
                Err(error) => {
                    let err = PollError {
                        collector: collector.name().to_string(),
                        error,
                    };
                    // a closed channel only means nobody is logging anymore
                    let _ = errors.send(err).await;
                }
            }
        }
        tracing::debug!(collector = collector.name(), "Poller stopped");
    })
}

/// Drains the merged error channel until every poller has dropped its sender.
pub async fn log_errors(mut errors: mpsc::Receiver<PollError>) {
    while let Some(PollError { collector, error }) = errors.recv().await {
        tracing::warn!(collector = %collector, error = %error, "Collection failed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;
    use telemon_collector::POLL_COUNT;

    struct Ticking;

    impl Collector for Ticking {
        fn name(&self) -> &str {
            "ticking"
        }

        fn collect(&mut self) -> anyhow::Result<Vec<Reading>> {
            Ok(vec![
                Reading::Increment(POLL_COUNT.to_string(), 1),
                Reading::gauge("Level", 0.5),
            ])
        }
    }

    struct Broken;

    impl Collector for Broken {
        fn name(&self) -> &str {
            "broken"
        }

        fn collect(&mut self) -> anyhow::Result<Vec<Reading>> {
            bail!("source unavailable")
        }
    }

    #[test]
    fn test_apply_accumulates_increments() {
        let store = MetricStore::new();
        apply(&store, vec![Reading::Increment("c".into(), 2)]);
        apply(&store, vec![Reading::Increment("c".into(), 3)]);
        apply(&store, vec![Reading::gauge("bad", f64::NAN)]);
        assert_eq!(store.get_counter("c"), (5, true));
        assert!(!store.get_gauge("bad").1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pollers_fill_store_and_report_errors() {
        let store = Arc::new(MetricStore::new());
        let cancel = CancellationToken::new();
        let (tx, mut rx) = mpsc::channel(8);

        let ok = spawn(
            Box::new(Ticking),
            store.clone(),
            Duration::from_secs(2),
            tx.clone(),
            cancel.clone(),
        );
        let broken = spawn(
            Box::new(Broken),
            store.clone(),
            Duration::from_secs(2),
            tx,
            cancel.clone(),
        );

        // first tick fires immediately, then at 2s and 4s
        tokio::time::sleep(Duration::from_millis(4_500)).await;
        cancel.cancel();
        ok.await.unwrap();
        broken.await.unwrap();

        assert_eq!(store.get_counter(POLL_COUNT), (3, true));
        assert_eq!(store.get_gauge("Level"), (0.5, true));

        let mut failures = 0;
        while let Some(err) = rx.recv().await {
            assert_eq!(err.collector, "broken");
            failures += 1;
        }
        assert_eq!(failures, 3);
    }
}
