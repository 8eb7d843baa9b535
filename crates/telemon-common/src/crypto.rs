//! RSA-OAEP (SHA-256) body encryption.
//!
//! Payloads that fit in one OAEP block are encrypted single-shot. Longer
//! payloads are split into consecutive blocks of the maximum message size and
//! the ciphertext blocks are concatenated; each ciphertext block is exactly
//! the modulus size, which is how the receiver splits them again.

use crate::error::{IntegrityError, Result};
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::traits::PublicKeyParts;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use std::path::Path;

/// OAEP overhead for SHA-256: two digests plus two bytes.
const OAEP_SHA256_OVERHEAD: usize = 2 * 32 + 2;

fn read_pem(path: &Path) -> Result<String> {
    std::fs::read_to_string(path)
        .map_err(|e| IntegrityError::KeyFormat(format!("{}: {e}", path.display())))
}

/// Agent side: encrypts outgoing bodies with the server's public key.
#[derive(Clone)]
pub struct Encryptor {
    key: RsaPublicKey,
}

impl Encryptor {
    /// Parses a PKIX (`PUBLIC KEY`) or PKCS#1 (`RSA PUBLIC KEY`) PEM document.
    pub fn from_pem(pem: &str) -> Result<Self> {
        let key = RsaPublicKey::from_public_key_pem(pem)
            .or_else(|_| RsaPublicKey::from_pkcs1_pem(pem))
            .map_err(|e| IntegrityError::KeyFormat(e.to_string()))?;
        Ok(Self { key })
    }

    pub fn load(path: &Path) -> Result<Self> {
        Self::from_pem(&read_pem(path)?)
    }

    fn max_block(&self) -> usize {
        self.key.size().saturating_sub(OAEP_SHA256_OVERHEAD)
    }

    pub fn encrypt(&self, data: &[u8]) -> Result<Vec<u8>> {
        let block = self.max_block();
        if block == 0 {
            return Err(IntegrityError::KeyFormat(
                "key too small for OAEP SHA-256".to_string(),
            ));
        }
        let mut rng = rand::thread_rng();
        let mut out = Vec::with_capacity(data.len().div_ceil(block).max(1) * self.key.size());
        if data.is_empty() {
            out.extend(self.key.encrypt(&mut rng, Oaep::new::<Sha256>(), data)?);
            return Ok(out);
        }
        for chunk in data.chunks(block) {
            out.extend(self.key.encrypt(&mut rng, Oaep::new::<Sha256>(), chunk)?);
        }
        Ok(out)
    }
}

/// Server side: decrypts incoming bodies with the private key.
#[derive(Clone)]
pub struct Decryptor {
    key: RsaPrivateKey,
}

impl Decryptor {
    /// Parses a PKCS#8 (`PRIVATE KEY`) or PKCS#1 (`RSA PRIVATE KEY`) PEM document.
    pub fn from_pem(pem: &str) -> Result<Self> {
        let key = RsaPrivateKey::from_pkcs8_pem(pem)
            .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
            .map_err(|e| IntegrityError::KeyFormat(e.to_string()))?;
        Ok(Self { key })
    }

    pub fn load(path: &Path) -> Result<Self> {
        Self::from_pem(&read_pem(path)?)
    }

    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>> {
        let block = self.key.size();
        if data.is_empty() || data.len() % block != 0 {
            return Err(IntegrityError::CiphertextLength {
                len: data.len(),
                block,
            });
        }
        let mut out = Vec::with_capacity(data.len());
        for chunk in data.chunks(block) {
            out.extend(self.key.decrypt(Oaep::new::<Sha256>(), chunk)?);
        }
        Ok(out)
    }
}
