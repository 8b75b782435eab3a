//! AES-CBC with PKCS#7 padding.
//!
//! Each identity token segment is encrypted independently under the same key
//! and IV. Key size selects the AES variant: 16 bytes for AES-128, 24 for
//! AES-192, 32 for AES-256. The IV is always one block (16 bytes).

use crate::{Error, Result};
use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::Zeroizing;

type Aes128CbcEnc = cbc::Encryptor<aes::Aes128>;
type Aes128CbcDec = cbc::Decryptor<aes::Aes128>;
type Aes192CbcEnc = cbc::Encryptor<aes::Aes192>;
type Aes192CbcDec = cbc::Decryptor<aes::Aes192>;
type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// AES block size in bytes; also the IV size.
pub const BLOCK_SIZE: usize = 16;

/// Key size produced by [`AesKey::generate`].
pub const GENERATED_KEY_SIZE: usize = 32;

/// Accepted key sizes in bytes.
pub const KEY_SIZES: [usize; 3] = [16, 24, 32];

/// Symmetric key and IV for token segment encryption.
#[derive(Clone)]
pub struct AesKey {
    key: Zeroizing<Vec<u8>>,
    iv: Zeroizing<[u8; BLOCK_SIZE]>,
}

impl AesKey {
    /// Generate a fresh AES-256 key and random IV.
    pub fn generate() -> Result<Self> {
        let mut key = Zeroizing::new(vec![0u8; GENERATED_KEY_SIZE]);
        let mut iv = Zeroizing::new([0u8; BLOCK_SIZE]);
        OsRng
            .try_fill_bytes(&mut key[..])
            .map_err(|e| Error::KeyGeneration(e.to_string()))?;
        OsRng
            .try_fill_bytes(&mut iv[..])
            .map_err(|e| Error::KeyGeneration(e.to_string()))?;

        Ok(Self { key, iv })
    }

    /// Build a key from received key and IV bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidKeyLength`] unless `key` is 16, 24 or 32 bytes
    /// and `iv` is exactly 16 bytes.
    pub fn from_parts(key: &[u8], iv: &[u8]) -> Result<Self> {
        if !KEY_SIZES.contains(&key.len()) {
            return Err(Error::InvalidKeyLength(format!(
                "AES key must be 16, 24 or 32 bytes, got {}",
                key.len()
            )));
        }
        let iv: [u8; BLOCK_SIZE] = iv.try_into().map_err(|_| {
            Error::InvalidKeyLength(format!("IV must be {} bytes, got {}", BLOCK_SIZE, iv.len()))
        })?;

        Ok(Self {
            key: Zeroizing::new(key.to_vec()),
            iv: Zeroizing::new(iv),
        })
    }

    /// Raw key bytes.
    pub fn key_bytes(&self) -> &[u8] {
        &self.key
    }

    /// Raw IV bytes.
    pub fn iv_bytes(&self) -> &[u8] {
        &self.iv[..]
    }

    /// Encrypt with PKCS#7 padding. Output length is the next multiple of 16
    /// strictly greater than the input length.
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let iv = &self.iv[..];
        let ciphertext = match self.key.len() {
            16 => Aes128CbcEnc::new_from_slices(&self.key, iv)
                .map(|c| c.encrypt_padded_vec_mut::<Pkcs7>(plaintext)),
            24 => Aes192CbcEnc::new_from_slices(&self.key, iv)
                .map(|c| c.encrypt_padded_vec_mut::<Pkcs7>(plaintext)),
            32 => Aes256CbcEnc::new_from_slices(&self.key, iv)
                .map(|c| c.encrypt_padded_vec_mut::<Pkcs7>(plaintext)),
            n => return Err(Error::InvalidKeyLength(format!("{} byte key", n))),
        };
        ciphertext.map_err(|e| Error::Encryption(e.to_string()))
    }

    /// Decrypt and strip PKCS#7 padding.
    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        if ciphertext.is_empty() || ciphertext.len() % BLOCK_SIZE != 0 {
            return Err(Error::Decryption(format!(
                "ciphertext length {} is not a positive multiple of {}",
                ciphertext.len(),
                BLOCK_SIZE
            )));
        }

        let iv = &self.iv[..];
        let plaintext = match self.key.len() {
            16 => Aes128CbcDec::new_from_slices(&self.key, iv)
                .map_err(|e| Error::Decryption(e.to_string()))?
                .decrypt_padded_vec_mut::<Pkcs7>(ciphertext),
            24 => Aes192CbcDec::new_from_slices(&self.key, iv)
                .map_err(|e| Error::Decryption(e.to_string()))?
                .decrypt_padded_vec_mut::<Pkcs7>(ciphertext),
            32 => Aes256CbcDec::new_from_slices(&self.key, iv)
                .map_err(|e| Error::Decryption(e.to_string()))?
                .decrypt_padded_vec_mut::<Pkcs7>(ciphertext),
            n => return Err(Error::InvalidKeyLength(format!("{} byte key", n))),
        };

        plaintext
            .map(Zeroizing::new)
            .map_err(|_| Error::Decryption("invalid padding".into()))
    }
}

impl core::fmt::Debug for AesKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("AesKey")
            .field("key_len", &self.key.len())
            .finish_non_exhaustive()
    }
}
