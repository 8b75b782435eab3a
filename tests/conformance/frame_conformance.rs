//! Handshake wire format conformance tests.
//!
//! Verifies exact byte layouts and length bounds of every handshake message.

use tether_core::frame::{
    classify, encode_application, FrameKind, HandshakeMessage, MessageType, APPLICATION_MAGIC,
    HANDSHAKE_MAGIC, MAX_SEGMENT_CIPHER_SIZE, TYPE_AES_KEY, TYPE_AUTH_RESULT, TYPE_AUTH_TOKEN,
    TYPE_RESEND_REQUEST, TYPE_RSA_KEY,
};
use tether_core::Error;

fn rsa_key(modulus_size: usize, exponent_size: usize) -> Vec<u8> {
    let mut buf = HANDSHAKE_MAGIC.to_vec();
    buf.push(TYPE_RSA_KEY);
    buf.extend_from_slice(&(modulus_size as u16).to_le_bytes());
    buf.extend_from_slice(&(exponent_size as u16).to_le_bytes());
    buf.extend(std::iter::repeat(0xD3).take(modulus_size));
    buf.extend(std::iter::repeat(0x01).take(exponent_size));
    buf
}

/// RsaKey: sentinel, type, modulusSize:u16 LE, exponentSize:u16 LE, modulus, exponent.
#[test]
fn test_rsa_key_format() {
    let msg = HandshakeMessage::RsaKey {
        modulus: vec![0xD3; 256],
        exponent: vec![0x01, 0x00, 0x01],
    };
    let bytes = msg.serialize().unwrap();

    assert_eq!(&bytes[0..2], &[0xA7, 0x48]);
    assert_eq!(bytes[2], TYPE_RSA_KEY);
    assert_eq!(&bytes[3..5], &[0x00, 0x01], "256 little-endian");
    assert_eq!(&bytes[5..7], &[0x03, 0x00]);
    assert_eq!(&bytes[263..266], &[0x01, 0x00, 0x01]);

    // 2 (sentinel) + 1 (type) + 4 (sizes) + 256 + 3 = 266 bytes
    assert_eq!(bytes.len(), 266);
    assert_eq!(HandshakeMessage::parse(&bytes).unwrap(), msg);
}

/// Modulus sizes are accepted from 256 to 512 bytes inclusive.
#[test]
fn test_rsa_modulus_bounds() {
    for ok in [256, 384, 512] {
        assert!(
            HandshakeMessage::parse(&rsa_key(ok, 3)).is_ok(),
            "{}-byte modulus must parse",
            ok
        );
    }
    for bad in [100, 255, 513] {
        assert!(
            matches!(
                HandshakeMessage::parse(&rsa_key(bad, 3)),
                Err(Error::OutOfBounds {
                    field: "modulus size",
                    ..
                })
            ),
            "{}-byte modulus must be rejected",
            bad
        );
    }
}

/// Exponent sizes are accepted from 2 to 4 bytes inclusive.
#[test]
fn test_rsa_exponent_bounds() {
    assert!(HandshakeMessage::parse(&rsa_key(256, 2)).is_ok());
    assert!(HandshakeMessage::parse(&rsa_key(256, 4)).is_ok());
    assert!(HandshakeMessage::parse(&rsa_key(256, 1)).is_err());
    assert!(HandshakeMessage::parse(&rsa_key(256, 5)).is_err());

    let oversized = HandshakeMessage::RsaKey {
        modulus: vec![0xD3; 256],
        exponent: vec![0x01; 5],
    };
    assert!(oversized.serialize().is_err(), "serializer enforces the same bounds");
}

/// AesKey: sentinel, type, keySize:u16 LE, ivSize:u16 LE, wrapped key, wrapped IV.
#[test]
fn test_aes_key_format() {
    let msg = HandshakeMessage::AesKey {
        encrypted_key: vec![0x11; 256],
        encrypted_iv: vec![0x22; 256],
    };
    let bytes = msg.serialize().unwrap();

    assert_eq!(bytes[2], TYPE_AES_KEY);
    assert_eq!(&bytes[3..7], &[0x00, 0x01, 0x00, 0x01]);
    assert!(bytes[7..263].iter().all(|&b| b == 0x11));
    assert!(bytes[263..519].iter().all(|&b| b == 0x22));
    assert_eq!(bytes.len(), 519);
    assert_eq!(HandshakeMessage::parse(&bytes).unwrap(), msg);

    let empty_iv = HandshakeMessage::AesKey {
        encrypted_key: vec![0x11; 256],
        encrypted_iv: Vec::new(),
    };
    assert!(empty_iv.serialize().is_err());

    let oversized = HandshakeMessage::AesKey {
        encrypted_key: vec![0x11; 513],
        encrypted_iv: vec![0x22; 256],
    };
    assert!(oversized.serialize().is_err());
}

/// AuthToken: sentinel, type, segmentIndex:u8, totalSegments:u8, packetSize:u16 LE, ciphertext.
#[test]
fn test_auth_token_format() {
    let msg = HandshakeMessage::AuthToken {
        segment_index: 1,
        total_segments: 3,
        cipher_text: vec![0x5A; 48],
    };
    let bytes = msg.serialize().unwrap();

    assert_eq!(&bytes[2..5], &[TYPE_AUTH_TOKEN, 1, 3]);
    assert_eq!(&bytes[5..7], &[48, 0]);
    assert_eq!(bytes.len(), 7 + 48);
    assert_eq!(HandshakeMessage::parse(&bytes).unwrap(), msg);
}

/// Segment index must be below a non-zero total; ciphertext is capped.
#[test]
fn test_auth_token_bounds() {
    let segment = |index: u8, total: u8, len: usize| HandshakeMessage::AuthToken {
        segment_index: index,
        total_segments: total,
        cipher_text: vec![0x5A; len],
    };

    assert!(segment(254, 255, 16).serialize().is_ok());
    assert!(segment(3, 3, 16).serialize().is_err());
    assert!(segment(0, 0, 16).serialize().is_err());
    assert!(segment(0, 1, 0).serialize().is_err());
    assert!(segment(0, 1, MAX_SEGMENT_CIPHER_SIZE).serialize().is_ok());
    assert!(segment(0, 1, MAX_SEGMENT_CIPHER_SIZE + 1).serialize().is_err());

    // Same checks on the parse side, on a hand-built datagram
    let mut raw = HANDSHAKE_MAGIC.to_vec();
    raw.extend_from_slice(&[TYPE_AUTH_TOKEN, 2, 2, 16, 0]);
    raw.extend_from_slice(&[0x5A; 16]);
    assert!(HandshakeMessage::parse(&raw).is_err());
}

/// AuthResult: single byte, 0 or 1.
#[test]
fn test_auth_result_format() {
    for (accepted, byte) in [(false, 0u8), (true, 1u8)] {
        let bytes = HandshakeMessage::AuthResult { accepted }.serialize().unwrap();
        assert_eq!(bytes, vec![0xA7, 0x48, TYPE_AUTH_RESULT, byte]);
    }
    assert!(HandshakeMessage::parse(&[0xA7, 0x48, TYPE_AUTH_RESULT, 2]).is_err());
}

/// ResendRequest carries the type byte of the requested message.
#[test]
fn test_resend_request_format() {
    let bytes = HandshakeMessage::ResendRequest {
        requested: MessageType::AuthResult,
    }
    .serialize()
    .unwrap();
    assert_eq!(bytes, vec![0xA7, 0x48, TYPE_RESEND_REQUEST, TYPE_AUTH_RESULT]);

    assert!(matches!(
        HandshakeMessage::parse(&[0xA7, 0x48, TYPE_RESEND_REQUEST, 0x09]),
        Err(Error::UnknownMessageType(0x09))
    ));
}

/// Every strict prefix of a valid datagram is rejected without panicking.
#[test]
fn test_truncated_datagrams_rejected() {
    let bytes = HandshakeMessage::AesKey {
        encrypted_key: vec![0x11; 256],
        encrypted_iv: vec![0x22; 256],
    }
    .serialize()
    .unwrap();

    for len in 0..bytes.len() {
        assert!(
            HandshakeMessage::parse(&bytes[..len]).is_err(),
            "prefix of {} bytes must not parse",
            len
        );
    }
}

/// Bytes after the declared payload are an error.
#[test]
fn test_trailing_bytes_rejected() {
    let mut bytes = HandshakeMessage::AuthResult { accepted: true }
        .serialize()
        .unwrap();
    bytes.push(0x00);
    assert!(matches!(
        HandshakeMessage::parse(&bytes),
        Err(Error::InvalidFrame(_))
    ));
}

/// Unknown message types and wrong sentinels are rejected.
#[test]
fn test_unknown_type_and_sentinel() {
    assert!(matches!(
        HandshakeMessage::parse(&[0xA7, 0x48, 0x05]),
        Err(Error::UnknownMessageType(0x05))
    ));
    assert!(HandshakeMessage::parse(&[0xA7, 0x44, TYPE_AUTH_RESULT, 1]).is_err());
}

/// Datagram families are told apart by their first bytes.
#[test]
fn test_classification() {
    let handshake = HandshakeMessage::AuthResult { accepted: true }
        .serialize()
        .unwrap();
    assert_eq!(classify(&handshake), FrameKind::Handshake);

    let application = encode_application(b"payload");
    assert_eq!(&application[..2], &APPLICATION_MAGIC);
    assert_eq!(classify(&application), FrameKind::Application(b"payload"));
    assert_eq!(classify(&APPLICATION_MAGIC), FrameKind::Application(&[]));

    // Chunk marker 0xCAFEBABE starts with 0xBE on the wire
    assert_eq!(classify(&[0xBE, 0xBA, 0xFE, 0xCA]), FrameKind::Unknown);
    assert_eq!(classify(&[0xA7]), FrameKind::Unknown);
    assert_eq!(classify(&[]), FrameKind::Unknown);
}

/// Message type identifiers are stable.
#[test]
fn test_message_type_values() {
    let expected = [
        (MessageType::RsaKey, 0x00),
        (MessageType::AesKey, 0x01),
        (MessageType::AuthToken, 0x02),
        (MessageType::AuthResult, 0x03),
        (MessageType::ResendRequest, 0x04),
    ];
    for (ty, value) in expected {
        assert_eq!(ty.to_u8(), value);
        assert_eq!(MessageType::from_u8(value), Some(ty));
    }
    assert_eq!(MessageType::from_u8(0x05), None);
}
