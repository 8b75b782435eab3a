//! Error types for cryptographic operations.

use thiserror::Error;

/// Result type alias for cryptographic operations.
pub type Result<T> = core::result::Result<T, Error>;

/// Cryptographic operation errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Key generation failed.
    #[error("Key generation failed: {0}")]
    KeyGeneration(String),

    /// Remote public key could not be imported.
    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),

    /// Symmetric key or IV has an unsupported length.
    #[error("Invalid key length: {0}")]
    InvalidKeyLength(String),

    /// Encryption failed.
    #[error("Encryption failed: {0}")]
    Encryption(String),

    /// Decryption failed (bad padding, wrong key, or malformed ciphertext).
    #[error("Decryption failed: {0}")]
    Decryption(String),
}
