/// Errors that can occur within the storage layer.
///
/// # Examples
///
/// ```rust
/// use telemon_storage::error::StorageError;
///
/// let err = StorageError::WrongKind { key: "hits".to_string() };
/// assert!(err.to_string().contains("hits"));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The key is not present in the store.
    #[error("Storage: metric '{key}' not found")]
    NotFound { key: String },

    /// The key already exists under the other metric kind.
    #[error("Storage: metric '{key}' is stored under a different kind")]
    WrongKind { key: String },

    /// An underlying database error.
    #[error("Storage: database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    /// Reading or writing the snapshot file failed.
    #[error("Storage: I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The snapshot could not be encoded or decoded.
    #[error("Storage: snapshot encoding error: {0}")]
    Encode(#[from] bincode::Error),
}

impl StorageError {
    pub fn not_found(key: &str) -> Self {
        StorageError::NotFound {
            key: key.to_string(),
        }
    }

    pub fn wrong_kind(key: &str) -> Self {
        StorageError::WrongKind {
            key: key.to_string(),
        }
    }
}

/// Convenience `Result` alias for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;
