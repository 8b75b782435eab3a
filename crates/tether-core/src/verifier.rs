//! Identity verification collaborators.
//!
//! The responder hands the decrypted identity to an [`IdentityVerifier`] and
//! polls it until a verdict is available. The initiator obtains its token
//! from a [`CredentialProvider`]. Both are shared by every session of a host,
//! so they take `&self` and keep their own synchronisation.
//!
//! [`SessionVerifier`] is an in-process verifier with a ban list and an
//! asynchronous resolution hook. [`verify_jwt`] checks a token signature
//! against a JSON Web Key Set.

use crate::{Error, Result};
use jsonwebtoken::jwk::JwkSet;
use jsonwebtoken::{decode, decode_header, DecodingKey, Validation};
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use tracing::{debug, info, warn};

/// Verification progress for one identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStatus {
    /// Checks still running.
    Pending,
    /// Identity accepted.
    Accepted,
    /// Identity refused.
    Rejected,
}

/// Outcome of asking for the token verification key set.
#[derive(Debug, Clone)]
pub enum KeyFetch {
    /// Keys not available yet; ask again later.
    Pending,
    /// Keys available.
    Ready(JwkSet),
}

/// Responder-side identity checks.
pub trait IdentityVerifier: Send + Sync {
    /// Whether the verifier can take requests.
    fn is_active(&self) -> bool;

    /// Start verifying `identity`.
    ///
    /// Returns `false` if the identity is refused outright (a previous check
    /// already failed, or it is banned).
    fn authenticate(&self, identity: &str) -> bool;

    /// Current verdict for `identity`.
    fn poll_status(&self, identity: &str) -> AuthStatus;

    /// Key set for token signature verification.
    fn fetch_verification_keys(&self) -> KeyFetch {
        KeyFetch::Pending
    }

    /// The handshake for `identity` finished successfully; drop its record.
    fn complete(&self, identity: &str);

    /// The handshake for `identity` was rejected; schedule the peer for removal.
    fn mark_for_kick(&self, identity: &str);
}

/// Initiator-side token source.
pub trait CredentialProvider: Send + Sync {
    /// Whether a token can be produced.
    fn is_active(&self) -> bool {
        true
    }

    /// Identity token to present to the responder.
    fn identity_token(&self) -> Option<String>;
}

/// Credential provider returning a fixed token.
#[derive(Clone)]
pub struct StaticCredentials {
    token: String,
}

impl StaticCredentials {
    /// Provider presenting `token`.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl core::fmt::Debug for StaticCredentials {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("StaticCredentials")
            .field("token_len", &self.token.len())
            .finish()
    }
}

impl CredentialProvider for StaticCredentials {
    fn is_active(&self) -> bool {
        !self.token.is_empty()
    }

    fn identity_token(&self) -> Option<String> {
        Some(self.token.clone()).filter(|t| !t.is_empty())
    }
}

#[derive(Debug, Default)]
struct VerifierState {
    active: bool,
    auto_accept: bool,
    records: HashMap<String, AuthStatus>,
    banned: HashSet<String>,
    kicks: Vec<String>,
    keys: Option<JwkSet>,
}

/// In-process verifier keeping one record per identity under verification.
///
/// New identities start `Pending` and stay there until [`resolve`](Self::resolve)
/// is called, unless auto-accept is on. Banned identities are refused at
/// [`authenticate`](IdentityVerifier::authenticate).
#[derive(Debug)]
pub struct SessionVerifier {
    state: Mutex<VerifierState>,
}

impl Default for SessionVerifier {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionVerifier {
    /// Active verifier that waits for [`resolve`](Self::resolve).
    pub fn new() -> Self {
        Self {
            state: Mutex::new(VerifierState {
                active: true,
                ..VerifierState::default()
            }),
        }
    }

    /// Active verifier that accepts every identity not on the ban list.
    pub fn auto_accept() -> Self {
        let verifier = Self::new();
        verifier.lock().auto_accept = true;
        verifier
    }

    fn lock(&self) -> MutexGuard<'_, VerifierState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enable or disable the verifier.
    pub fn set_active(&self, active: bool) {
        self.lock().active = active;
    }

    /// Add `identity` to the ban list.
    pub fn ban(&self, identity: &str) {
        let mut state = self.lock();
        state.banned.insert(identity.to_owned());
        if let Some(status) = state.records.get_mut(identity) {
            *status = AuthStatus::Rejected;
        }
    }

    /// Publish the key set used for token signature verification.
    pub fn set_verification_keys(&self, keys: JwkSet) {
        self.lock().keys = Some(keys);
    }

    /// Deliver the verdict of an external check for a pending identity.
    ///
    /// Returns `false` if no record exists for `identity`.
    pub fn resolve(&self, identity: &str, accepted: bool) -> bool {
        let mut state = self.lock();
        match state.records.get_mut(identity) {
            Some(status) => {
                *status = if accepted {
                    AuthStatus::Accepted
                } else {
                    AuthStatus::Rejected
                };
                true
            }
            None => false,
        }
    }

    /// Remove the record for `identity`.
    pub fn remove(&self, identity: &str) {
        self.lock().records.remove(identity);
    }

    /// Identities marked for kick since the last call.
    pub fn drain_kicks(&self) -> Vec<String> {
        std::mem::take(&mut self.lock().kicks)
    }

    /// Number of identities with an open record.
    pub fn pending(&self) -> usize {
        self.lock().records.len()
    }
}

impl IdentityVerifier for SessionVerifier {
    fn is_active(&self) -> bool {
        self.lock().active
    }

    fn authenticate(&self, identity: &str) -> bool {
        let mut state = self.lock();
        if let Some(status) = state.records.get(identity) {
            return *status != AuthStatus::Rejected;
        }

        if state.banned.contains(identity) {
            warn!("identity is banned");
            state
                .records
                .insert(identity.to_owned(), AuthStatus::Rejected);
            return false;
        }

        let status = if state.auto_accept {
            AuthStatus::Accepted
        } else {
            AuthStatus::Pending
        };
        state.records.insert(identity.to_owned(), status);
        debug!(?status, "identity verification started");
        true
    }

    fn poll_status(&self, identity: &str) -> AuthStatus {
        self.lock()
            .records
            .get(identity)
            .copied()
            .unwrap_or(AuthStatus::Rejected)
    }

    fn fetch_verification_keys(&self) -> KeyFetch {
        match &self.lock().keys {
            Some(keys) => KeyFetch::Ready(keys.clone()),
            None => KeyFetch::Pending,
        }
    }

    fn complete(&self, identity: &str) {
        self.lock().records.remove(identity);
        info!("identity verified");
    }

    fn mark_for_kick(&self, identity: &str) {
        let mut state = self.lock();
        state.records.remove(identity);
        state.kicks.push(identity.to_owned());
    }
}

#[derive(Debug, Deserialize)]
struct IdentityClaims {
    sub: String,
}

/// Verify `token` as a JWT against every key in `keys`.
///
/// A key is skipped when both it and the token header carry a key id and the
/// ids differ. Returns the `sub` claim of the first key that verifies.
pub fn verify_jwt(token: &str, keys: &JwkSet) -> Result<String> {
    let header = decode_header(token).map_err(|e| Error::TokenVerification(e.to_string()))?;
    let validation = Validation::new(header.alg);

    let mut last_error = String::from("no usable key in key set");
    for jwk in &keys.keys {
        if let (Some(kid), Some(key_id)) = (&header.kid, &jwk.common.key_id) {
            if kid != key_id {
                continue;
            }
        }

        let key = match DecodingKey::from_jwk(jwk) {
            Ok(key) => key,
            Err(e) => {
                last_error = e.to_string();
                continue;
            }
        };

        match decode::<IdentityClaims>(token, &key, &validation) {
            Ok(data) if !data.claims.sub.is_empty() => return Ok(data.claims.sub),
            Ok(_) => last_error = "empty sub claim".into(),
            Err(e) => last_error = e.to_string(),
        }
    }

    Err(Error::TokenVerification(last_error))
}
