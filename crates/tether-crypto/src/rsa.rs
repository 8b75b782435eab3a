//! RSA key transport (OAEP with SHA-256).
//!
//! The initiator generates an RSA key pair and publishes the public modulus and
//! exponent. The responder imports those components and uses them to wrap the
//! AES key and IV it generated, which only the initiator can unwrap.
//!
//! Modulus and exponent travel as big-endian unsigned integers with leading zero
//! bytes stripped, so a 2048-bit key yields a 256-byte modulus and the usual
//! public exponent 65537 yields 3 bytes.
//!
//! # Example
//!
//! ```
//! use tether_crypto::{PeerPublicKey, RsaKeyPair};
//!
//! # fn example() -> Result<(), tether_crypto::Error> {
//! let keypair = RsaKeyPair::generate(2048)?;
//! let peer = PeerPublicKey::from_components(&keypair.modulus(), &keypair.exponent())?;
//!
//! let wrapped = peer.encrypt(b"0123456789abcdef")?;
//! let unwrapped = keypair.decrypt(&wrapped)?;
//! assert_eq!(&unwrapped[..], b"0123456789abcdef");
//! # Ok(())
//! # }
//! ```

use crate::{Error, Result};
use rand::rngs::OsRng;
use rsa::traits::PublicKeyParts;
use rsa::{BigUint, Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use zeroize::Zeroizing;

/// Smallest key size accepted for generation, in bits.
pub const MIN_KEY_BITS: usize = 2048;

/// Largest key size accepted for generation, in bits.
pub const MAX_KEY_BITS: usize = 4096;

/// Locally generated RSA key pair.
///
/// The private half never leaves this type; `RsaPrivateKey` clears its
/// components on drop.
#[derive(Clone)]
pub struct RsaKeyPair {
    private_key: RsaPrivateKey,
    public_key: RsaPublicKey,
}

impl RsaKeyPair {
    /// Generate a new key pair of `bits` size using the OS RNG.
    ///
    /// # Errors
    ///
    /// Returns [`Error::KeyGeneration`] if `bits` is outside
    /// [`MIN_KEY_BITS`]..=[`MAX_KEY_BITS`] or the underlying generator fails.
    pub fn generate(bits: usize) -> Result<Self> {
        if !(MIN_KEY_BITS..=MAX_KEY_BITS).contains(&bits) {
            return Err(Error::KeyGeneration(format!(
                "key size {} outside {}..={} bits",
                bits, MIN_KEY_BITS, MAX_KEY_BITS
            )));
        }

        let private_key = RsaPrivateKey::new(&mut OsRng, bits)
            .map_err(|e| Error::KeyGeneration(e.to_string()))?;
        let public_key = RsaPublicKey::from(&private_key);

        Ok(Self {
            private_key,
            public_key,
        })
    }

    /// Public modulus as big-endian bytes.
    pub fn modulus(&self) -> Vec<u8> {
        self.public_key.n().to_bytes_be()
    }

    /// Public exponent as big-endian bytes.
    pub fn exponent(&self) -> Vec<u8> {
        self.public_key.e().to_bytes_be()
    }

    /// Key size in bytes (length of the modulus).
    pub fn size(&self) -> usize {
        self.public_key.size()
    }

    /// Decrypt an OAEP-SHA256 ciphertext produced with this key's public half.
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        self.private_key
            .decrypt(Oaep::new::<Sha256>(), ciphertext)
            .map(Zeroizing::new)
            .map_err(|e| Error::Decryption(e.to_string()))
    }
}

impl core::fmt::Debug for RsaKeyPair {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RsaKeyPair")
            .field("bits", &(self.size() * 8))
            .finish_non_exhaustive()
    }
}

/// Public key imported from a remote peer.
#[derive(Debug, Clone)]
pub struct PeerPublicKey {
    key: RsaPublicKey,
}

impl PeerPublicKey {
    /// Import a public key from big-endian modulus and exponent bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPublicKey`] if either component is empty or the
    /// resulting key is rejected (exponent too small or too large, modulus too
    /// large).
    pub fn from_components(modulus: &[u8], exponent: &[u8]) -> Result<Self> {
        if modulus.is_empty() || exponent.is_empty() {
            return Err(Error::InvalidPublicKey("empty component".into()));
        }

        let n = BigUint::from_bytes_be(modulus);
        let e = BigUint::from_bytes_be(exponent);
        let key = RsaPublicKey::new(n, e).map_err(|e| Error::InvalidPublicKey(e.to_string()))?;

        Ok(Self { key })
    }

    /// Key size in bytes.
    pub fn size(&self) -> usize {
        self.key.size()
    }

    /// Encrypt `plaintext` with OAEP-SHA256.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        self.key
            .encrypt(&mut OsRng, Oaep::new::<Sha256>(), plaintext)
            .map_err(|e| Error::Encryption(e.to_string()))
    }
}
