use crate::error::{IntegrityError, Result};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Header carrying the hex encoded HMAC-SHA256 of a request or response body.
pub const HASH_HEADER: &str = "HashSHA256";

/// Shared-secret HMAC-SHA256 signer.
///
/// # Examples
///
/// ```
/// use telemon_common::hash::HashKey;
///
/// let key = HashKey::new("secret");
/// let tag = key.sign(b"payload").unwrap();
/// assert_eq!(tag.len(), 64);
/// assert!(key.verify(b"payload", &tag).is_ok());
/// assert!(key.verify(b"other", &tag).is_err());
/// ```
#[derive(Clone)]
pub struct HashKey {
    secret: Vec<u8>,
}

impl std::fmt::Debug for HashKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("HashKey(..)")
    }
}

impl HashKey {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            secret: secret.as_ref().to_vec(),
        }
    }

    fn mac(&self, body: &[u8]) -> Result<HmacSha256> {
        let mut mac =
            HmacSha256::new_from_slice(&self.secret).map_err(|_| IntegrityError::InvalidKey)?;
        mac.update(body);
        Ok(mac)
    }

    /// Returns the hex encoded tag for `body`.
    pub fn sign(&self, body: &[u8]) -> Result<String> {
        Ok(hex::encode(self.mac(body)?.finalize().into_bytes()))
    }

    /// Checks `tag` against the tag computed over `body`.
    pub fn verify(&self, body: &[u8], tag: &str) -> Result<()> {
        let expected = hex::decode(tag.trim())?;
        self.mac(body)?
            .verify_slice(&expected)
            .map_err(|_| IntegrityError::HashMismatch)
    }
}
