//! Shared fixtures for the conformance suites.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::Serialize;
use std::time::{SystemTime, UNIX_EPOCH};
use tether_core::mock::RecordingSink;
use tether_core::Handshake;

/// HMAC secret behind [`JWKS`].
pub const JWKS_SECRET: &[u8] = b"tether-jwks-signing-key-000001";

/// Key set with one HS256 key (`kid` = `primary`) whose secret is [`JWKS_SECRET`].
pub const JWKS: &str = r#"{"keys":[{"kty":"oct","alg":"HS256","kid":"primary","k":"dGV0aGVyLWp3a3Mtc2lnbmluZy1rZXktMDAwMDAx"}]}"#;

/// Parsed [`JWKS`].
pub fn jwks() -> JwkSet {
    serde_json::from_str(JWKS).expect("fixture key set parses")
}

#[derive(Serialize)]
struct Claims<'a> {
    sub: &'a str,
    exp: u64,
}

/// HS256 token for `sub`, signed with `secret`, expiring `ttl_secs` from now
/// (negative values produce an expired token).
pub fn signed_token(sub: &str, secret: &[u8], ttl_secs: i64) -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("clock after epoch")
        .as_secs() as i64;
    let mut header = Header::new(Algorithm::HS256);
    header.kid = Some("primary".into());
    encode(
        &header,
        &Claims {
            sub,
            exp: (now + ttl_secs).max(0) as u64,
        },
        &EncodingKey::from_secret(secret),
    )
    .expect("token encodes")
}

/// One side of a handshake together with its outbound sink.
pub struct Side {
    /// Handshake under test.
    pub handshake: Handshake,
    /// Datagrams it sent and that have not been delivered yet.
    pub out: RecordingSink,
}

impl Side {
    /// Wrap a handshake with an empty sink.
    pub fn new(handshake: Handshake) -> Self {
        Self {
            handshake,
            out: RecordingSink::new(),
        }
    }

    /// Activate the handshake.
    pub fn activate(&mut self) {
        self.handshake.activate(&mut self.out);
    }
}

/// Deliver queued datagrams between `a` and `b` until both sinks are empty.
///
/// `lose` sees every datagram's global position and returns `true` to drop it.
/// Returns the number of datagrams that were offered for delivery.
pub fn pump(a: &mut Side, b: &mut Side, lose: &mut dyn FnMut(usize) -> bool) -> usize {
    let mut offered = 0;
    loop {
        let to_b = a.out.take();
        let to_a = b.out.take();
        if to_b.is_empty() && to_a.is_empty() {
            return offered;
        }
        for datagram in to_b {
            offered += 1;
            if !lose(offered - 1) {
                b.handshake.incoming(&datagram, &mut b.out);
            }
        }
        for datagram in to_a {
            offered += 1;
            if !lose(offered - 1) {
                a.handshake.incoming(&datagram, &mut a.out);
            }
        }
    }
}
