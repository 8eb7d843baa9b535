//! Server-side metric storage.
//!
//! Two backends implement [`Repository`]:
//!
//! * [`memory::MemStorage`] keeps counters and gauges in memory and writes a
//!   gzip-framed snapshot file on an interval (or after every write).
//! * [`db::DbStorage`] keeps one row per metric in a relational table managed
//!   by SeaORM migrations.
//!
//! Every repository call takes an explicit [`Transaction`] handle obtained
//! from a [`TransactionManager`]. The memory backend uses
//! [`Transaction::Noop`]; its writers are serialised by a mutex but
//! multi-key reads followed by writes are not linearisable across requests.

pub mod db;
pub mod entities;
pub mod error;
pub mod memory;
pub mod snapshot;

use async_trait::async_trait;
use sea_orm::DatabaseTransaction;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use telemon_common::types::MetricValue;

use crate::db::DbStorage;
use crate::error::Result;
use crate::memory::MemStorage;

/// A unit of work spanning one or more repository calls.
pub enum Transaction {
    /// No isolation; calls apply immediately.
    Noop,
    /// A database transaction at repeatable-read isolation.
    Database(DatabaseTransaction),
}

impl Transaction {
    pub async fn commit(self) -> Result<()> {
        match self {
            Transaction::Noop => Ok(()),
            Transaction::Database(tx) => Ok(tx.commit().await?),
        }
    }

    pub async fn rollback(self) -> Result<()> {
        match self {
            Transaction::Noop => Ok(()),
            Transaction::Database(tx) => Ok(tx.rollback().await?),
        }
    }
}

/// Opens transactions for a backend.
#[async_trait]
pub trait TransactionManager: Send + Sync {
    async fn begin(&self) -> Result<Transaction>;
}

/// Transaction manager for backends without transactions.
pub struct NoopTransactionManager;

#[async_trait]
impl TransactionManager for NoopTransactionManager {
    async fn begin(&self) -> Result<Transaction> {
        Ok(Transaction::Noop)
    }
}

/// Uniform counter/gauge access over a storage backend.
///
/// Reads of an absent key fail with [`error::StorageError::NotFound`]; reads
/// or writes of a key held under the other kind fail with
/// [`error::StorageError::WrongKind`].
#[async_trait]
pub trait Repository: Send + Sync {
    /// Returns whether the key exists under either kind.
    async fn has(&self, tx: &Transaction, key: &str) -> Result<bool>;

    async fn get_counter(&self, tx: &Transaction, key: &str) -> Result<i64>;

    async fn get_gauge(&self, tx: &Transaction, key: &str) -> Result<f64>;

    /// Stores an absolute counter total.
    async fn set_counter(&self, tx: &Transaction, key: &str, value: i64) -> Result<()>;

    /// Stores several counter totals; either all are written or none.
    async fn set_counters(&self, tx: &Transaction, values: &BTreeMap<String, i64>) -> Result<()>;

    async fn set_gauge(&self, tx: &Transaction, key: &str, value: f64) -> Result<()>;

    /// Stores several gauges; either all are written or none.
    async fn set_gauges(&self, tx: &Transaction, values: &BTreeMap<String, f64>) -> Result<()>;

    async fn get_all(&self, tx: &Transaction) -> Result<BTreeMap<String, MetricValue>>;

    /// Checks that the backend is reachable.
    async fn ping(&self) -> Result<()>;

    /// Flushes and releases the backend.
    async fn close(&self) -> Result<()>;
}

/// Backend selection.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Snapshot file for the memory backend; `None` disables persistence.
    pub file_storage_path: Option<PathBuf>,
    /// Snapshot interval; zero writes the snapshot after every update.
    pub store_interval: Duration,
    /// Load the snapshot file on start if it exists.
    pub restore: bool,
    /// Connection string; selects the relational backend when set.
    pub database_dsn: Option<String>,
}

/// A repository paired with the transaction manager that matches it.
#[derive(Clone)]
pub struct Storage {
    pub repository: Arc<dyn Repository>,
    pub transactions: Arc<dyn TransactionManager>,
}

impl Storage {
    /// Opens the relational backend if a DSN is configured, the memory
    /// backend otherwise.
    pub async fn open(config: &StorageConfig) -> anyhow::Result<Self> {
        match config.database_dsn.as_deref().filter(|dsn| !dsn.is_empty()) {
            Some(dsn) => {
                let db = DbStorage::connect(dsn).await?;
                tracing::info!("Using relational storage");
                Ok(Self::database(db))
            }
            None => {
                let mem = MemStorage::open(
                    config.file_storage_path.clone(),
                    config.store_interval,
                    config.restore,
                )?;
                tracing::info!(
                    path = ?config.file_storage_path,
                    interval_secs = config.store_interval.as_secs(),
                    "Using in-memory storage"
                );
                Ok(Self::memory(mem))
            }
        }
    }

    pub fn memory(mem: MemStorage) -> Self {
        Self {
            repository: Arc::new(mem),
            transactions: Arc::new(NoopTransactionManager),
        }
    }

    pub fn database(db: DbStorage) -> Self {
        Self {
            transactions: Arc::new(db.transaction_manager()),
            repository: Arc::new(db),
        }
    }
}
