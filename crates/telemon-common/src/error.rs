/// Errors raised while hashing or encrypting request bodies.
///
/// # Examples
///
/// ```rust
/// use telemon_common::error::IntegrityError;
///
/// let err = IntegrityError::HashMismatch;
/// assert!(err.to_string().contains("mismatch"));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum IntegrityError {
    /// The received body does not match the supplied HMAC tag.
    #[error("Integrity: body hash mismatch")]
    HashMismatch,

    /// The hash header is not valid hex.
    #[error("Integrity: malformed hash header: {0}")]
    MalformedHash(#[from] hex::FromHexError),

    /// The shared secret could not be used as an HMAC key.
    #[error("Integrity: invalid HMAC key")]
    InvalidKey,

    /// A PEM key file could not be read or parsed.
    #[error("Integrity: invalid RSA key: {0}")]
    KeyFormat(String),

    /// RSA-OAEP encryption or decryption failed.
    #[error("Integrity: RSA error: {0}")]
    Rsa(#[from] rsa::Error),

    /// The ciphertext length is not a multiple of the key size.
    #[error("Integrity: ciphertext length {len} is not a multiple of block size {block}")]
    CiphertextLength { len: usize, block: usize },
}

/// Convenience `Result` alias for integrity operations.
pub type Result<T> = std::result::Result<T, IntegrityError>;
