//! Test doubles for the crypto and transport seams.
//!
//! Used by this crate's tests and by downstream integration tests. Not meant
//! for production use.

use crate::transport::DatagramSink;
use std::sync::OnceLock;
use tether_crypto::{AesKey, CryptoProvider, Error as CryptoError, RsaKeyPair};

/// Key size served from the shared cache.
const SHARED_KEY_BITS: usize = 2048;

/// Crypto provider that reuses one 2048-bit RSA key pair per process.
///
/// RSA generation dominates handshake test time; every 2048-bit request is
/// served from a single cached pair. Other sizes and all AES keys are
/// generated fresh.
#[derive(Debug, Clone, Copy, Default)]
pub struct CachedCryptoProvider {
    failing: bool,
}

impl CachedCryptoProvider {
    /// Provider backed by the shared key pair.
    pub fn new() -> Self {
        Self::default()
    }

    /// Provider whose every generation request fails.
    pub fn failing() -> Self {
        Self { failing: true }
    }

    fn check(&self) -> tether_crypto::Result<()> {
        if self.failing {
            return Err(CryptoError::KeyGeneration("mock provider set to fail".into()));
        }
        Ok(())
    }
}

impl CryptoProvider for CachedCryptoProvider {
    fn generate_rsa(&self, bits: usize) -> tether_crypto::Result<RsaKeyPair> {
        static SHARED: OnceLock<RsaKeyPair> = OnceLock::new();

        self.check()?;
        if bits != SHARED_KEY_BITS {
            return RsaKeyPair::generate(bits);
        }
        if let Some(pair) = SHARED.get() {
            return Ok(pair.clone());
        }
        let pair = RsaKeyPair::generate(bits)?;
        Ok(SHARED.get_or_init(|| pair).clone())
    }

    fn generate_aes(&self) -> tether_crypto::Result<AesKey> {
        self.check()?;
        AesKey::generate()
    }
}

/// Sink recording every datagram handed to it.
#[derive(Debug, Default)]
pub struct RecordingSink {
    sent: Vec<Vec<u8>>,
    refuse: bool,
}

impl RecordingSink {
    /// Empty sink accepting every datagram.
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse (return `false` for) every send while `refuse` is set.
    pub fn set_refuse(&mut self, refuse: bool) {
        self.refuse = refuse;
    }

    /// Datagrams recorded so far.
    pub fn sent(&self) -> &[Vec<u8>] {
        &self.sent
    }

    /// Take and clear the recorded datagrams.
    pub fn take(&mut self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.sent)
    }
}

impl DatagramSink for RecordingSink {
    fn send_datagram(&mut self, datagram: &[u8]) -> bool {
        if self.refuse {
            return false;
        }
        self.sent.push(datagram.to_vec());
        true
    }
}
