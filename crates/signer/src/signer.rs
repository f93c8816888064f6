//! Narinfo fingerprint signing and verification.

use crate::error::{SignerError, SignerResult};
use crate::key::{KeyPair, PublicKey};
use base64::Engine;
use ed25519_dalek::Signer as _;
use ed25519_dalek::Verifier;
use ferry_core::config::PushSecret;

/// A signer that can sign narinfo fingerprints.
pub struct NarInfoSigner {
    keypair: KeyPair,
}

impl NarInfoSigner {
    /// Create a new signer from a key pair.
    pub fn new(keypair: KeyPair) -> Self {
        Self { keypair }
    }

    /// Create from a secret key string (`name:base64` or bare base64).
    pub fn parse(s: &str) -> SignerResult<Self> {
        Ok(Self::new(KeyPair::parse(s)?))
    }

    /// Build the signer a push secret calls for, if any.
    pub fn from_push_secret(secret: &PushSecret) -> SignerResult<Option<Self>> {
        secret.signing_key().map(Self::parse).transpose()
    }

    /// Generate a new signer with a random key.
    pub fn generate(key_name: impl Into<String>) -> Self {
        Self::new(KeyPair::generate(key_name))
    }

    /// Get the key name.
    pub fn key_name(&self) -> &str {
        &self.keypair.name
    }

    /// Get the public key.
    pub fn public_key(&self) -> &PublicKey {
        &self.keypair.public
    }

    /// Get the Nix-format public key string.
    pub fn nix_public_key(&self) -> String {
        self.keypair.to_nix_public_key()
    }

    /// Get the Nix-format secret key string.
    pub fn nix_secret_key(&self) -> String {
        self.keypair.to_nix_secret_key()
    }

    /// Sign a fingerprint and return the base64 signature.
    pub fn sign_fingerprint(&self, fingerprint: &str) -> String {
        let sig = self
            .keypair
            .secret
            .signing_key()
            .sign(fingerprint.as_bytes());
        base64::engine::general_purpose::STANDARD.encode(sig.to_bytes())
    }
}

impl std::fmt::Debug for NarInfoSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NarInfoSigner")
            .field("keypair", &self.keypair)
            .finish()
    }
}

/// Verify a base64 signature over a fingerprint.
pub fn verify_fingerprint(
    fingerprint: &str,
    signature_b64: &str,
    public_key: &PublicKey,
) -> SignerResult<()> {
    let sig_bytes = base64::engine::general_purpose::STANDARD
        .decode(signature_b64)
        .map_err(|e| SignerError::InvalidSignature(format!("invalid base64: {e}")))?;

    let sig_array: [u8; 64] = sig_bytes.try_into().map_err(|bytes: Vec<u8>| {
        SignerError::InvalidSignature(format!("expected 64 bytes, got {}", bytes.len()))
    })?;

    let signature = ed25519_dalek::Signature::from_bytes(&sig_array);

    public_key
        .verifying_key()
        .verify(fingerprint.as_bytes(), &signature)
        .map_err(|_| SignerError::VerificationFailed)?;

    Ok(())
}
