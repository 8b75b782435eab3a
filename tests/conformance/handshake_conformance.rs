//! Handshake conformance tests.
//!
//! Two independent [`Handshake`] instances exchange datagrams through
//! recording sinks; tests control loss and time explicitly.

use std::sync::Arc;
use std::time::Duration;
use tether_conformance::{jwks, pump, signed_token, Side, JWKS_SECRET};
use tether_core::frame::{HandshakeMessage, HANDSHAKE_MAGIC, TYPE_RSA_KEY};
use tether_core::mock::CachedCryptoProvider;
use tether_core::{
    verify_jwt, Error, Handshake, HandshakeState, SessionVerifier, StaticCredentials,
    TetherConfig,
};

const RESEND: Duration = Duration::from_secs(3);

fn pair(config: &TetherConfig, token: &str) -> (Side, Side, Arc<SessionVerifier>) {
    let crypto = Arc::new(CachedCryptoProvider::new());
    let verifier = Arc::new(SessionVerifier::auto_accept());
    let initiator = Handshake::initiator(
        config,
        crypto.clone(),
        Arc::new(StaticCredentials::new(token)),
    );
    let responder = Handshake::responder(config, crypto, verifier.clone());
    (Side::new(initiator), Side::new(responder), verifier)
}

/// Pump and advance both sides one resend interval at a time until both are
/// terminal or `rounds` intervals have passed.
fn run(a: &mut Side, b: &mut Side, rounds: usize, lose: &mut dyn FnMut(usize) -> bool) {
    for _ in 0..rounds {
        pump(a, b, lose);
        if a.handshake.is_completed() && b.handshake.is_completed() {
            return;
        }
        a.handshake.advance(RESEND, &mut a.out);
        b.handshake.advance(RESEND, &mut b.out);
    }
    pump(a, b, lose);
}

fn rsa_key_datagram(modulus_size: usize) -> Vec<u8> {
    let mut buf = HANDSHAKE_MAGIC.to_vec();
    buf.push(TYPE_RSA_KEY);
    buf.extend_from_slice(&(modulus_size as u16).to_le_bytes());
    buf.extend_from_slice(&3u16.to_le_bytes());
    buf.extend(std::iter::repeat(0xC5).take(modulus_size));
    buf.extend_from_slice(&[0x01, 0x00, 0x01]);
    buf
}

#[test]
fn test_happy_path() {
    let (mut initiator, mut responder, verifier) = pair(&TetherConfig::default(), "user-123");
    responder.activate();
    initiator.activate();

    match HandshakeMessage::parse(&initiator.out.sent()[0]).unwrap() {
        HandshakeMessage::RsaKey { modulus, exponent } => {
            assert_eq!(modulus.len(), 256);
            assert_eq!(exponent, vec![0x01, 0x00, 0x01]);
        }
        other => panic!("expected RsaKey, got {:?}", other),
    }

    let delivered = pump(&mut initiator, &mut responder, &mut |_| false);
    assert_eq!(delivered, 4, "RsaKey, AesKey, AuthToken, AuthResult");

    assert!(initiator.handshake.is_connected());
    assert!(responder.handshake.is_connected());
    assert_eq!(responder.handshake.identity(), Some("user-123"));
    assert_eq!(verifier.pending(), 0, "record dropped on completion");

    // Completed handshakes stay quiet
    for _ in 0..5 {
        initiator.handshake.advance(RESEND, &mut initiator.out);
        responder.handshake.advance(RESEND, &mut responder.out);
    }
    assert!(initiator.out.sent().is_empty());
    assert!(responder.out.sent().is_empty());
}

#[test]
fn test_undersized_modulus_rejected() {
    let (_, mut responder, _) = pair(&TetherConfig::default(), "user-123");
    responder.activate();

    responder
        .handshake
        .incoming(&rsa_key_datagram(100), &mut responder.out);

    assert_eq!(responder.handshake.state(), HandshakeState::AuthFail);
    assert!(matches!(
        responder.handshake.failure(),
        Some(Error::OutOfBounds { .. })
    ));
    assert!(responder.out.sent().is_empty(), "no AesKey for a rejected key");
}

#[test]
fn test_modulus_just_outside_bounds_rejected() {
    for size in [255, 513] {
        let (_, mut responder, _) = pair(&TetherConfig::default(), "user-123");
        responder.activate();
        responder
            .handshake
            .incoming(&rsa_key_datagram(size), &mut responder.out);
        assert!(
            responder.handshake.is_completed() && !responder.handshake.is_connected(),
            "{}-byte modulus must fail the handshake",
            size
        );
    }
}

#[test]
fn test_recovers_from_any_single_loss() {
    for lost in 0..4 {
        let (mut initiator, mut responder, _) = pair(&TetherConfig::default(), "user-123");
        responder.activate();
        initiator.activate();

        let mut seen = 0;
        let mut lose = |_: usize| {
            seen += 1;
            seen - 1 == lost
        };
        run(&mut initiator, &mut responder, 10, &mut lose);

        assert!(
            initiator.handshake.is_connected(),
            "initiator stuck in {:?} after losing datagram {}",
            initiator.handshake.state(),
            lost
        );
        assert!(
            responder.handshake.is_connected(),
            "responder stuck in {:?} after losing datagram {}",
            responder.handshake.state(),
            lost
        );
    }
}

#[test]
fn test_silent_responder_times_out() {
    let config = TetherConfig::default();
    let (mut initiator, _, _) = pair(&config, "user-123");
    initiator.activate();

    for _ in 0..config.max_resends {
        initiator.handshake.advance(RESEND, &mut initiator.out);
        assert_eq!(initiator.handshake.state(), HandshakeState::SentKey);
    }
    assert_eq!(initiator.out.take().len(), 1 + config.max_resends as usize);

    initiator.handshake.advance(RESEND, &mut initiator.out);
    assert_eq!(initiator.handshake.state(), HandshakeState::AuthFail);
    assert!(matches!(
        initiator.handshake.failure(),
        Some(Error::HandshakeTimeout(_))
    ));
    assert!(initiator.out.sent().is_empty());
}

#[test]
fn test_signed_token_identity() {
    let config = TetherConfig {
        verify_token_signature: true,
        ..TetherConfig::default()
    };
    let token = signed_token("user-123", JWKS_SECRET, 300);
    let (mut initiator, mut responder, verifier) = pair(&config, &token);
    responder.activate();
    initiator.activate();

    pump(&mut initiator, &mut responder, &mut |_| false);
    assert_eq!(responder.handshake.state(), HandshakeState::WaitForJwks);
    assert!(responder.out.sent().is_empty());

    verifier.set_verification_keys(jwks());
    run(&mut initiator, &mut responder, 2, &mut |_| false);

    assert!(initiator.handshake.is_connected());
    assert!(responder.handshake.is_connected());
    assert_eq!(responder.handshake.identity(), Some("user-123"));
}

#[test]
fn test_forged_token_fails() {
    let config = TetherConfig {
        verify_token_signature: true,
        ..TetherConfig::default()
    };
    let token = signed_token("user-123", b"other-secret-value-00", 300);
    let (mut initiator, mut responder, verifier) = pair(&config, &token);
    verifier.set_verification_keys(jwks());
    responder.activate();
    initiator.activate();

    pump(&mut initiator, &mut responder, &mut |_| false);
    assert_eq!(responder.handshake.state(), HandshakeState::AuthFail);
    assert!(matches!(
        responder.handshake.failure(),
        Some(Error::TokenVerification(_))
    ));
    assert_eq!(initiator.handshake.state(), HandshakeState::SentAuth);
}

#[test]
fn test_verify_jwt() {
    let keys = jwks();

    let valid = signed_token("user-123", JWKS_SECRET, 300);
    assert_eq!(verify_jwt(&valid, &keys).unwrap(), "user-123");

    let forged = signed_token("user-123", b"other-secret-value-00", 300);
    assert!(verify_jwt(&forged, &keys).is_err());

    let expired = signed_token("user-123", JWKS_SECRET, -3600);
    assert!(verify_jwt(&expired, &keys).is_err());

    assert!(verify_jwt("not-a-token", &keys).is_err());

    let other_kid: jsonwebtoken::jwk::JwkSet = serde_json::from_str(
        r#"{"keys":[{"kty":"oct","alg":"HS256","kid":"secondary","k":"dGV0aGVyLWp3a3Mtc2lnbmluZy1rZXktMDAwMDAx"}]}"#,
    )
    .unwrap();
    assert!(verify_jwt(&valid, &other_kid).is_err(), "key id must match");
}

#[test]
fn test_banned_identity_never_connects() {
    let config = TetherConfig {
        max_resends: 2,
        ..TetherConfig::default()
    };
    let (mut initiator, mut responder, verifier) = pair(&config, "user-123");
    verifier.ban("user-123");
    responder.activate();
    initiator.activate();

    run(&mut initiator, &mut responder, 6, &mut |_| false);

    assert_eq!(responder.handshake.state(), HandshakeState::AuthFail);
    assert!(matches!(responder.handshake.failure(), Some(Error::Rejected(_))));
    assert_eq!(initiator.handshake.state(), HandshakeState::AuthFail);
    assert!(matches!(
        initiator.handshake.failure(),
        Some(Error::HandshakeTimeout(2))
    ));
}
