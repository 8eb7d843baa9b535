use crate::error::{Result, ServiceError};
use std::collections::BTreeMap;
use telemon_common::types::{Metric, MetricKind, MetricValue};
use telemon_storage::error::StorageError;
use telemon_storage::{Storage, Transaction};

/// Controller shared by the HTTP and gRPC front ends.
///
/// Every call runs inside one transaction from the storage's
/// [`telemon_storage::TransactionManager`]; it is committed when the call
/// succeeds and rolled back otherwise.
#[derive(Clone)]
pub struct MetricsService {
    storage: Storage,
}

impl MetricsService {
    pub fn new(storage: Storage) -> Self {
        Self { storage }
    }

    /// Applies one validated update and returns the stored value: the new
    /// counter total or the gauge as written.
    pub async fn update(&self, key: &str, value: MetricValue) -> Result<MetricValue> {
        let tx = self.storage.transactions.begin().await?;
        let result = self.apply(&tx, key, value).await;
        finish(tx, result).await
    }

    /// Validates and applies a JSON update.
    pub async fn update_metric(&self, metric: Metric) -> Result<Metric> {
        let (key, value) = metric.into_update()?;
        let stored = self.update(&key, value).await?;
        Ok(Metric::from_value(key, stored))
    }

    /// Validates a whole batch before any write, then applies it in one
    /// transaction.
    pub async fn update_batch(&self, metrics: Vec<Metric>) -> Result<()> {
        let updates = metrics
            .into_iter()
            .map(Metric::into_update)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        self.handle_many(updates).await
    }

    /// Sums counter deltas and keeps the last gauge per key, then writes all
    /// counters and all gauges with one bulk call each.
    pub async fn handle_many(&self, updates: Vec<(String, MetricValue)>) -> Result<()> {
        if updates.is_empty() {
            return Ok(());
        }
        let (deltas, gauges) = partition(updates)?;

        let tx = self.storage.transactions.begin().await?;
        let result = self.apply_many(&tx, &deltas, &gauges).await;
        finish(tx, result).await?;

        tracing::debug!(
            counters = deltas.len(),
            gauges = gauges.len(),
            "Applied metric batch"
        );
        Ok(())
    }

    pub async fn value(&self, kind: MetricKind, key: &str) -> Result<MetricValue> {
        let repo = &self.storage.repository;
        let tx = self.storage.transactions.begin().await?;
        let result = match kind {
            MetricKind::Counter => repo.get_counter(&tx, key).await.map(MetricValue::Counter),
            MetricKind::Gauge => repo.get_gauge(&tx, key).await.map(MetricValue::Gauge),
        };
        finish(tx, result.map_err(ServiceError::from)).await
    }

    /// Validates a fetch request and returns it with its value filled in.
    pub async fn value_metric(&self, metric: &Metric) -> Result<Metric> {
        let kind = metric.query()?;
        let value = self.value(kind, &metric.id).await?;
        Ok(Metric::from_value(metric.id.clone(), value))
    }

    pub async fn all(&self) -> Result<BTreeMap<String, MetricValue>> {
        let tx = self.storage.transactions.begin().await?;
        let result = self.storage.repository.get_all(&tx).await;
        finish(tx, result.map_err(ServiceError::from)).await
    }

    pub async fn ping(&self) -> Result<()> {
        Ok(self.storage.repository.ping().await?)
    }

    async fn apply(&self, tx: &Transaction, key: &str, value: MetricValue) -> Result<MetricValue> {
        let repo = &self.storage.repository;
        match value {
            MetricValue::Gauge(v) => {
                repo.set_gauge(tx, key, v).await?;
                Ok(value)
            }
            MetricValue::Counter(delta) => {
                let total = self
                    .previous_counter(tx, key)
                    .await?
                    .checked_add(delta)
                    .ok_or_else(|| ServiceError::Overflow(key.to_string()))?;
                repo.set_counter(tx, key, total).await?;
                Ok(MetricValue::Counter(total))
            }
        }
    }

    /// Stored total, or zero for a key not seen yet.
    async fn previous_counter(&self, tx: &Transaction, key: &str) -> Result<i64> {
        match self.storage.repository.get_counter(tx, key).await {
            Ok(v) => Ok(v),
            Err(StorageError::NotFound { .. }) => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    async fn apply_many(
        &self,
        tx: &Transaction,
        deltas: &BTreeMap<String, i64>,
        gauges: &BTreeMap<String, f64>,
    ) -> Result<()> {
        let repo = &self.storage.repository;
        let mut totals = BTreeMap::new();
        for (key, delta) in deltas {
            let total = self
                .previous_counter(tx, key)
                .await?
                .checked_add(*delta)
                .ok_or_else(|| ServiceError::Overflow(key.clone()))?;
            totals.insert(key.clone(), total);
        }
        // both kinds are checked before the first write so the memory
        // backend, which has no rollback, is left untouched on failure
        for key in gauges.keys() {
            match repo.get_gauge(tx, key).await {
                Ok(_) | Err(StorageError::NotFound { .. }) => {}
                Err(e) => return Err(e.into()),
            }
        }
        repo.set_counters(tx, &totals).await?;
        repo.set_gauges(tx, gauges).await?;
        Ok(())
    }
}

type Partitioned = (BTreeMap<String, i64>, BTreeMap<String, f64>);

fn partition(updates: Vec<(String, MetricValue)>) -> Result<Partitioned> {
    let mut deltas: BTreeMap<String, i64> = BTreeMap::new();
    let mut gauges = BTreeMap::new();
    for (key, value) in updates {
        match value {
            MetricValue::Counter(d) => {
                if gauges.contains_key(&key) {
                    return Err(StorageError::wrong_kind(&key).into());
                }
                let slot = deltas.entry(key.clone()).or_insert(0);
                *slot = slot.checked_add(d).ok_or(ServiceError::Overflow(key))?;
            }
            MetricValue::Gauge(v) => {
                if deltas.contains_key(&key) {
                    return Err(StorageError::wrong_kind(&key).into());
                }
                gauges.insert(key, v);
            }
        }
    }
    Ok((deltas, gauges))
}

async fn finish<T>(tx: Transaction, result: Result<T>) -> Result<T> {
    match result {
        Ok(v) => {
            tx.commit().await?;
            Ok(v)
        }
        Err(e) => {
            if let Err(rollback) = tx.rollback().await {
                tracing::warn!(error = %rollback, "Rollback failed");
            }
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use telemon_storage::memory::MemStorage;

    fn service() -> MetricsService {
        MetricsService::new(Storage::memory(MemStorage::ephemeral()))
    }

    #[tokio::test]
    async fn test_counter_accumulates_deltas() {
        let svc = service();
        assert_eq!(
            svc.update("hits", MetricValue::Counter(3)).await.unwrap(),
            MetricValue::Counter(3)
        );
        assert_eq!(
            svc.update("hits", MetricValue::Counter(-10)).await.unwrap(),
            MetricValue::Counter(-7)
        );
        assert_eq!(
            svc.value(MetricKind::Counter, "hits").await.unwrap(),
            MetricValue::Counter(-7)
        );
    }

    #[tokio::test]
    async fn test_gauge_overwrites() {
        let svc = service();
        svc.update("load", MetricValue::Gauge(1.0)).await.unwrap();
        svc.update("load", MetricValue::Gauge(0.5)).await.unwrap();
        assert_eq!(
            svc.value(MetricKind::Gauge, "load").await.unwrap(),
            MetricValue::Gauge(0.5)
        );
    }

    #[tokio::test]
    async fn test_batch_merges_duplicate_keys() {
        let svc = service();
        svc.update("hits", MetricValue::Counter(10)).await.unwrap();
        svc.update_batch(vec![
            Metric::counter("hits", 1),
            Metric::gauge("load", 1.0),
            Metric::counter("hits", 2),
            Metric::gauge("load", 2.0),
        ])
        .await
        .unwrap();

        let all = svc.all().await.unwrap();
        assert_eq!(all["hits"], MetricValue::Counter(13));
        assert_eq!(all["load"], MetricValue::Gauge(2.0));
    }

    #[tokio::test]
    async fn test_invalid_batch_writes_nothing() {
        let svc = service();
        let err = svc
            .update_batch(vec![
                Metric::counter("a", 1),
                Metric {
                    id: "b".into(),
                    mtype: "histogram".into(),
                    ..Default::default()
                },
            ])
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Metric(_)));
        assert!(svc.all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_batch_with_both_kinds_for_one_key_is_rejected() {
        let svc = service();
        let err = svc
            .update_batch(vec![Metric::counter("x", 1), Metric::gauge("x", 1.0)])
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Storage(StorageError::WrongKind { .. })));
        assert!(svc.all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_wrong_kind_in_batch_writes_nothing() {
        let svc = service();
        svc.update("load", MetricValue::Gauge(1.0)).await.unwrap();
        let err = svc
            .update_batch(vec![Metric::counter("a", 1), Metric::counter("load", 1)])
            .await
            .unwrap_err();
        assert_eq!(err.status(), axum::http::StatusCode::BAD_REQUEST);
        assert!(matches!(
            svc.value(MetricKind::Counter, "a").await,
            Err(ServiceError::Storage(StorageError::NotFound { .. }))
        ));
    }

    #[tokio::test]
    async fn test_gauge_over_counter_in_batch_writes_nothing() {
        let svc = service();
        svc.update("hits", MetricValue::Counter(1)).await.unwrap();
        assert!(svc
            .update_batch(vec![Metric::counter("a", 5), Metric::gauge("hits", 1.0)])
            .await
            .is_err());
        assert_eq!(svc.all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_counter_overflow_is_rejected() {
        let svc = service();
        svc.update("big", MetricValue::Counter(i64::MAX)).await.unwrap();
        assert!(matches!(
            svc.update("big", MetricValue::Counter(1)).await,
            Err(ServiceError::Overflow(_))
        ));
        assert_eq!(
            svc.value(MetricKind::Counter, "big").await.unwrap(),
            MetricValue::Counter(i64::MAX)
        );
    }

    #[tokio::test]
    async fn test_value_metric_fills_field() {
        let svc = service();
        svc.update_metric(Metric::counter("x", 0)).await.unwrap();
        let query = Metric {
            id: "x".into(),
            mtype: "counter".into(),
            ..Default::default()
        };
        assert_eq!(svc.value_metric(&query).await.unwrap(), Metric::counter("x", 0));
    }
}
