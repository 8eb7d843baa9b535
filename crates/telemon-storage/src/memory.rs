use crate::error::{Result, StorageError};
use crate::snapshot::Snapshot;
use crate::{Repository, Transaction};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use telemon_common::types::MetricValue;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

/// In-memory repository with optional snapshot persistence.
///
/// Writers are serialised by one mutex. Each call is atomic on its own, but a
/// read followed by a write from the same request can interleave with other
/// requests; callers needing read-modify-write isolation must use the
/// relational backend.
pub struct MemStorage {
    inner: Arc<Inner>,
    sync_persist: bool,
    worker: Mutex<Option<SnapshotWorker>>,
}

struct Inner {
    state: Mutex<Snapshot>,
    path: Option<PathBuf>,
    persist_lock: Mutex<()>,
}

struct SnapshotWorker {
    stop: oneshot::Sender<oneshot::Sender<()>>,
    handle: JoinHandle<()>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}

impl Inner {
    fn write_snapshot(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let _guard = lock(&self.persist_lock);
        let snap = lock(&self.state).clone();
        snap.write_to(path)?;
        tracing::debug!(
            path = %path.display(),
            counters = snap.counters.len(),
            gauges = snap.gauges.len(),
            "Wrote metrics snapshot"
        );
        Ok(())
    }

    /// Writes the snapshot on the blocking pool; failures are logged only.
    async fn persist(self: &Arc<Self>) {
        let inner = Arc::clone(self);
        match tokio::task::spawn_blocking(move || inner.write_snapshot()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::error!(error = %e, "Failed to write metrics snapshot"),
            Err(e) => tracing::error!(error = %e, "Snapshot task panicked"),
        }
    }
}

impl MemStorage {
    /// Creates the store, restoring `path` when `restore` is set and the file
    /// exists. An unreadable snapshot is logged and the store starts empty.
    ///
    /// With a path and a non-zero `store_interval` a background task writes
    /// the snapshot on every tick. A zero interval writes it after every
    /// update instead. Must be called within a Tokio runtime.
    pub fn open(path: Option<PathBuf>, store_interval: Duration, restore: bool) -> Result<Self> {
        let initial = match (&path, restore) {
            (Some(p), true) => match Snapshot::read_from(p) {
                Ok(Some(snap)) => {
                    tracing::info!(
                        path = %p.display(),
                        counters = snap.counters.len(),
                        gauges = snap.gauges.len(),
                        "Restored metrics snapshot"
                    );
                    snap
                }
                Ok(None) => Snapshot::default(),
                Err(e) => {
                    tracing::error!(
                        path = %p.display(),
                        error = %e,
                        "Cannot restore metrics snapshot, starting empty"
                    );
                    Snapshot::default()
                }
            },
            _ => Snapshot::default(),
        };

        let inner = Arc::new(Inner {
            state: Mutex::new(initial),
            path,
            persist_lock: Mutex::new(()),
        });

        let persistent = inner.path.is_some();
        let sync_persist = persistent && store_interval.is_zero();
        let worker = (persistent && !store_interval.is_zero())
            .then(|| spawn_worker(Arc::clone(&inner), store_interval));

        Ok(Self {
            inner,
            sync_persist,
            worker: Mutex::new(worker),
        })
    }

    /// A store without persistence.
    pub fn ephemeral() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: Mutex::new(Snapshot::default()),
                path: None,
                persist_lock: Mutex::new(()),
            }),
            sync_persist: false,
            worker: Mutex::new(None),
        }
    }

    /// Copy of the current contents.
    pub fn snapshot(&self) -> Snapshot {
        lock(&self.inner.state).clone()
    }

    async fn written(&self) {
        if self.sync_persist {
            self.inner.persist().await;
        }
    }
}

fn spawn_worker(inner: Arc<Inner>, interval: Duration) -> SnapshotWorker {
    let (stop, mut stop_rx) = oneshot::channel::<oneshot::Sender<()>>();
    let handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick completes immediately
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => inner.persist().await,
                ack = &mut stop_rx => {
                    inner.persist().await;
                    if let Ok(ack) = ack {
                        let _ = ack.send(());
                    }
                    break;
                }
            }
        }
        tracing::debug!("Snapshot worker stopped");
    });
    SnapshotWorker { stop, handle }
}

#[async_trait]
impl Repository for MemStorage {
    async fn has(&self, _tx: &Transaction, key: &str) -> Result<bool> {
        let state = lock(&self.inner.state);
        Ok(state.counters.contains_key(key) || state.gauges.contains_key(key))
    }

    async fn get_counter(&self, _tx: &Transaction, key: &str) -> Result<i64> {
        let state = lock(&self.inner.state);
        match state.counters.get(key) {
            Some(v) => Ok(*v),
            None if state.gauges.contains_key(key) => Err(StorageError::wrong_kind(key)),
            None => Err(StorageError::not_found(key)),
        }
    }

    async fn get_gauge(&self, _tx: &Transaction, key: &str) -> Result<f64> {
        let state = lock(&self.inner.state);
        match state.gauges.get(key) {
            Some(v) => Ok(*v),
            None if state.counters.contains_key(key) => Err(StorageError::wrong_kind(key)),
            None => Err(StorageError::not_found(key)),
        }
    }

    async fn set_counter(&self, _tx: &Transaction, key: &str, value: i64) -> Result<()> {
        {
            let mut state = lock(&self.inner.state);
            if state.gauges.contains_key(key) {
                return Err(StorageError::wrong_kind(key));
            }
            state.counters.insert(key.to_string(), value);
        }
        self.written().await;
        Ok(())
    }

    async fn set_counters(&self, _tx: &Transaction, values: &BTreeMap<String, i64>) -> Result<()> {
        if values.is_empty() {
            return Ok(());
        }
        {
            let mut state = lock(&self.inner.state);
            if let Some(key) = values.keys().find(|k| state.gauges.contains_key(*k)) {
                return Err(StorageError::wrong_kind(key));
            }
            for (k, v) in values {
                state.counters.insert(k.clone(), *v);
            }
        }
        self.written().await;
        Ok(())
    }

    async fn set_gauge(&self, _tx: &Transaction, key: &str, value: f64) -> Result<()> {
        {
            let mut state = lock(&self.inner.state);
            if state.counters.contains_key(key) {
                return Err(StorageError::wrong_kind(key));
            }
            state.gauges.insert(key.to_string(), value);
        }
        self.written().await;
        Ok(())
    }

    async fn set_gauges(&self, _tx: &Transaction, values: &BTreeMap<String, f64>) -> Result<()> {
        if values.is_empty() {
            return Ok(());
        }
        {
            let mut state = lock(&self.inner.state);
            if let Some(key) = values.keys().find(|k| state.counters.contains_key(*k)) {
                return Err(StorageError::wrong_kind(key));
            }
            for (k, v) in values {
                state.gauges.insert(k.clone(), *v);
            }
        }
        self.written().await;
        Ok(())
    }

    async fn get_all(&self, _tx: &Transaction) -> Result<BTreeMap<String, MetricValue>> {
        let state = lock(&self.inner.state);
        let counters = state
            .counters
            .iter()
            .map(|(k, v)| (k.clone(), MetricValue::Counter(*v)));
        let gauges = state
            .gauges
            .iter()
            .map(|(k, v)| (k.clone(), MetricValue::Gauge(*v)));
        Ok(counters.chain(gauges).collect())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    /// Stops the snapshot worker after it writes a final snapshot.
    async fn close(&self) -> Result<()> {
        let worker = lock(&self.worker).take();
        match worker {
            Some(SnapshotWorker { stop, handle }) => {
                let (ack, done) = oneshot::channel();
                if stop.send(ack).is_ok() {
                    let _ = done.await;
                }
                if let Err(e) = handle.await {
                    tracing::error!(error = %e, "Snapshot worker failed");
                }
            }
            None => self.inner.persist().await,
        }
        Ok(())
    }
}
