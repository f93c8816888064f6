//! Narinfo signing for the ferry push client.
//!
//! This crate provides:
//! - Ed25519 key generation and parsing
//! - Narinfo fingerprint signing
//! - Signature verification

pub mod error;
pub mod key;
pub mod signer;

pub use error::{SignerError, SignerResult};
pub use key::{KeyPair, PublicKey, SecretKey};
pub use signer::{NarInfoSigner, verify_fingerprint};
