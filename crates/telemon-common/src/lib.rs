//! Types and helpers shared by the telemon agent and server.
//!
//! The body transforms in [`compress`], [`hash`] and [`crypto`] are applied in
//! a fixed order: compress, hash, encrypt on send; decrypt, verify the hash,
//! decompress on receive.

pub mod compress;
pub mod crypto;
pub mod error;
pub mod hash;
pub mod types;

pub mod proto {
    #![allow(clippy::pedantic)]
    #![allow(clippy::missing_errors_doc)]
    #![allow(clippy::doc_markdown)]
    #![allow(clippy::default_trait_access)]
    tonic::include_proto!("telemon");
}
