//! Cryptographic primitives for the tether handshake.
//!
//! The handshake uses two primitives:
//! - RSA (OAEP with SHA-256) to wrap the symmetric key for transport
//! - AES in CBC mode with PKCS#7 padding for identity token segments
//!
//! Secrets are held in `Zeroizing` wrappers and never logged.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod aes;
pub mod error;
pub mod provider;
pub mod rsa;

pub use crate::aes::AesKey;
pub use crate::rsa::{PeerPublicKey, RsaKeyPair};
pub use error::{Error, Result};
pub use provider::{CryptoProvider, OsCryptoProvider};
