//! Handshake and session configuration.
//!
//! Every field has a default, so a TOML document only needs to name the values
//! it overrides:
//!
//! ```
//! use tether_core::TetherConfig;
//!
//! let config = TetherConfig::from_toml_str("resend_interval_ms = 1500").unwrap();
//! assert_eq!(config.resend_interval_ms, 1500);
//! assert_eq!(config.max_chunk_size, 1024);
//! ```

use crate::chunk::CHUNK_HEADER_SIZE;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Configuration shared by the handshake, reassembler and registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TetherConfig {
    /// Run the authenticated handshake. When false, peers are usable as soon
    /// as they connect.
    pub enable_auth: bool,
    /// Idle time before the current handshake message is sent again.
    pub resend_interval_ms: u64,
    /// Resends allowed before the handshake fails with a timeout.
    pub max_resends: u32,
    /// Largest datagram handed to the transport, chunk header included.
    pub max_chunk_size: usize,
    /// Age after which an incomplete chunked packet is dropped.
    pub chunk_timeout_ms: u64,
    /// Incomplete chunked packets kept per peer.
    pub max_pending_packets: usize,
    /// RSA key size generated by the initiator.
    pub rsa_key_bits: usize,
    /// Verify the identity token as a JWT against the verifier's key set.
    pub verify_token_signature: bool,
    /// Capacity of the transport event queue.
    pub task_queue_capacity: usize,
}

impl Default for TetherConfig {
    fn default() -> Self {
        Self {
            enable_auth: true,
            resend_interval_ms: 3000,
            max_resends: 10,
            max_chunk_size: 1024,
            chunk_timeout_ms: 30_000,
            max_pending_packets: 64,
            rsa_key_bits: 2048,
            verify_token_signature: false,
            task_queue_capacity: 1024,
        }
    }
}

impl TetherConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let config: Self = toml::from_str(s).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        Self::from_toml_str(&content)
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<()> {
        if self.resend_interval_ms == 0 {
            return Err(Error::Config("resend_interval_ms must be non-zero".into()));
        }
        if self.max_chunk_size <= CHUNK_HEADER_SIZE {
            return Err(Error::Config(format!(
                "max_chunk_size must exceed the {} byte chunk header",
                CHUNK_HEADER_SIZE
            )));
        }
        if !(2048..=4096).contains(&self.rsa_key_bits) {
            return Err(Error::Config(format!(
                "rsa_key_bits {} outside 2048..=4096",
                self.rsa_key_bits
            )));
        }
        if self.task_queue_capacity == 0 {
            return Err(Error::Config("task_queue_capacity must be non-zero".into()));
        }
        Ok(())
    }

    /// Resend interval as a `Duration`.
    pub fn resend_interval(&self) -> Duration {
        Duration::from_millis(self.resend_interval_ms)
    }

    /// Chunk timeout as a `Duration`.
    pub fn chunk_timeout(&self) -> Duration {
        Duration::from_millis(self.chunk_timeout_ms)
    }
}
