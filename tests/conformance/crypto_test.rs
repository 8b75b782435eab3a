//! Cryptographic conformance tests.
//!
//! AES-CBC against NIST SP 800-38A vectors and RSA-OAEP key transport between
//! independently constructed key objects.

#[cfg(test)]
mod aes_cbc_tests {
    use tether_crypto::AesKey;

    const IV: &str = "000102030405060708090a0b0c0d0e0f";
    const PLAINTEXT: &str = "6bc1bee22e409f96e93d7e117393172a\
                             ae2d8a571e03ac9c9eb76fac45af8e51\
                             30c81c46a35ce411e5fbc1191a0a52ef\
                             f69f2445df4f9b17ad2b417be66c3710";

    fn check_vector(key_hex: &str, expected_hex: &str) {
        let key = AesKey::from_parts(&hex::decode(key_hex).unwrap(), &hex::decode(IV).unwrap())
            .unwrap();
        let plaintext = hex::decode(PLAINTEXT).unwrap();
        let expected = hex::decode(expected_hex).unwrap();

        let ciphertext = key.encrypt(&plaintext).unwrap();

        // Block-aligned input gains one full PKCS#7 padding block
        assert_eq!(ciphertext.len(), plaintext.len() + 16);
        assert_eq!(&ciphertext[..expected.len()], expected.as_slice());
        assert_eq!(&key.decrypt(&ciphertext).unwrap()[..], plaintext.as_slice());
    }

    /// NIST SP 800-38A F.2.1 (CBC-AES128.Encrypt).
    #[test]
    fn test_cbc_aes128_vector() {
        check_vector(
            "2b7e151628aed2a6abf7158809cf4f3c",
            "7649abac8119b246cee98e9b12e9197d\
             5086cb9b507219ee95db113a917678b2\
             73bed6b8e3c1743b7116e69e22229516\
             3ff1caa1681fac09120eca307586e1a7",
        );
    }

    /// NIST SP 800-38A F.2.3 (CBC-AES192.Encrypt), first block.
    #[test]
    fn test_cbc_aes192_vector() {
        check_vector(
            "8e73b0f7da0e6452c810f32b809079e562f8ead2522c6b7b",
            "4f021db243bc633d7178183a9fa071e8",
        );
    }

    /// NIST SP 800-38A F.2.5 (CBC-AES256.Encrypt), first block.
    #[test]
    fn test_cbc_aes256_vector() {
        check_vector(
            "603deb1015ca71be2b73aef0857d77811f352c073b6108d72d9810a30914dff4",
            "f58c4c04d6e5f1ba779eabfb5f7bfbd6",
        );
    }

    #[test]
    fn test_segment_sized_plaintext() {
        // A full 640-byte token segment encrypts to 656 bytes
        let key = AesKey::generate().unwrap();
        let ciphertext = key.encrypt(&[0x61; 640]).unwrap();
        assert_eq!(ciphertext.len(), 656);
    }

    #[test]
    fn test_rejects_bad_key_and_iv_lengths() {
        assert!(AesKey::from_parts(&[0u8; 20], &[0u8; 16]).is_err());
        assert!(AesKey::from_parts(&[0u8; 32], &[0u8; 12]).is_err());
    }
}

#[cfg(test)]
mod rsa_oaep_tests {
    use std::sync::OnceLock;
    use tether_crypto::{AesKey, PeerPublicKey, RsaKeyPair};

    fn keypair() -> &'static RsaKeyPair {
        static KEY: OnceLock<RsaKeyPair> = OnceLock::new();
        KEY.get_or_init(|| RsaKeyPair::generate(2048).unwrap())
    }

    /// Wrapping an AES key and IV the way the responder does and unwrapping
    /// them the way the initiator does yields the same key.
    #[test]
    fn test_aes_key_transport() {
        let keypair = keypair();
        let peer = PeerPublicKey::from_components(&keypair.modulus(), &keypair.exponent()).unwrap();
        let aes = AesKey::generate().unwrap();

        let wrapped_key = peer.encrypt(aes.key_bytes()).unwrap();
        let wrapped_iv = peer.encrypt(aes.iv_bytes()).unwrap();
        assert_eq!(wrapped_key.len(), 256);
        assert_eq!(wrapped_iv.len(), 256);

        let key = keypair.decrypt(&wrapped_key).unwrap();
        let iv = keypair.decrypt(&wrapped_iv).unwrap();
        let received = AesKey::from_parts(&key, &iv).unwrap();

        let ciphertext = aes.encrypt(b"user-123").unwrap();
        assert_eq!(&received.decrypt(&ciphertext).unwrap()[..], b"user-123");
    }

    /// Leading zero bytes in received components do not change the key.
    #[test]
    fn test_leading_zero_components() {
        let keypair = keypair();
        let mut modulus = vec![0x00];
        modulus.extend_from_slice(&keypair.modulus());
        let exponent = [0x00, 0x01, 0x00, 0x01];

        let peer = PeerPublicKey::from_components(&modulus, &exponent).unwrap();
        assert_eq!(peer.size(), 256);
        let wrapped = peer.encrypt(b"0123456789abcdef").unwrap();
        assert_eq!(&keypair.decrypt(&wrapped).unwrap()[..], b"0123456789abcdef");
    }

    /// Ciphertext from a different key pair does not unwrap.
    #[test]
    fn test_foreign_ciphertext_rejected() {
        let other = RsaKeyPair::generate(2048).unwrap();
        let peer = PeerPublicKey::from_components(&other.modulus(), &other.exponent()).unwrap();
        let wrapped = peer.encrypt(&[0x42; 32]).unwrap();
        assert!(keypair().decrypt(&wrapped).is_err());
    }
}
