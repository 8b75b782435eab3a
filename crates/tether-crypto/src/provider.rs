//! Key material factory used by the handshake.
//!
//! The handshake never calls the generators directly. Injecting a provider lets
//! hosts reuse an expensive RSA key across sessions and lets tests run without
//! paying for key generation on every case.

use crate::{AesKey, Result, RsaKeyPair};

/// Source of fresh key material.
pub trait CryptoProvider: Send + Sync {
    /// Produce an RSA key pair of `bits` size.
    fn generate_rsa(&self, bits: usize) -> Result<RsaKeyPair>;

    /// Produce a fresh AES key and IV.
    fn generate_aes(&self) -> Result<AesKey>;
}

/// Provider backed by the operating system RNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsCryptoProvider;

impl CryptoProvider for OsCryptoProvider {
    fn generate_rsa(&self, bits: usize) -> Result<RsaKeyPair> {
        RsaKeyPair::generate(bits)
    }

    fn generate_aes(&self) -> Result<AesKey> {
        AesKey::generate()
    }
}
