//! Authenticated handshake state machine.
//!
//! Implements both sides of the key exchange and identity check:
//!
//! ```text
//! Initiator                                   Responder
//!   RsaKey(modulus, exponent)  ───────────▶   import key, generate AES
//!                              ◀───────────   AesKey(RSA(key), RSA(iv))
//!   AuthToken[0..n](AES(token)) ──────────▶   reassemble, verify identity
//!                              ◀───────────   AuthResult(accepted)
//! ```
//!
//! The channel is lossy, so each side runs a resend timer. When it expires the
//! side re-sends whatever the peer should be answering, or asks the peer to
//! re-send what it is waiting for. Duplicates never move state backwards, and
//! any validation or cryptographic failure ends the handshake in
//! [`HandshakeState::AuthFail`].
//!
//! A handshake is driven from a single thread: [`Handshake::activate`] once the
//! link is up, [`Handshake::incoming`] for every handshake datagram, and
//! [`Handshake::advance`] on every tick.

use crate::config::TetherConfig;
use crate::frame::{HandshakeMessage, MessageType};
use crate::transport::DatagramSink;
use crate::verifier::{verify_jwt, AuthStatus, CredentialProvider, IdentityVerifier, KeyFetch};
use crate::{Error, Result};
use std::sync::Arc;
use std::time::Duration;
use tether_crypto::{AesKey, CryptoProvider, PeerPublicKey, RsaKeyPair};
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

/// Plaintext bytes carried by one token segment.
pub const SEGMENT_PLAINTEXT_SIZE: usize = (128 / 8) * 40;

/// Most segments a token may be split into.
pub const MAX_SEGMENTS: usize = u8::MAX as usize;

/// Smallest plaintext AES key accepted from the responder.
pub const MIN_AES_KEY_SIZE: usize = 16;
/// Largest plaintext AES key accepted from the responder.
pub const MAX_AES_KEY_SIZE: usize = 32;
/// Required plaintext IV size.
pub const AES_IV_SIZE: usize = 16;

/// Side of the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Client side: publishes an RSA key and presents an identity token.
    Initiator,
    /// Host side: wraps the AES key and verifies the identity.
    Responder,
}

/// Handshake progress.
///
/// States are ordered; a handshake only ever moves to a later state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum HandshakeState {
    /// Nothing exchanged yet.
    Uninitialized,
    /// Initiator: RSA key sent, waiting for the AES key.
    SentKey,
    /// Key exchange done (initiator holds the AES key; responder holds the
    /// peer's public key and is collecting token segments).
    RecvedKey,
    /// Responder: token complete, waiting for the verification key set.
    WaitForJwks,
    /// Responder: key set received, verifying the token signature.
    ReadyJwks,
    /// Responder: waiting for the identity verifier's verdict.
    WaitForAuth,
    /// Initiator: all token segments sent, waiting for the verdict.
    SentAuth,
    /// Authenticated; application traffic may flow.
    Initialized,
    /// Failed; the session must be torn down.
    AuthFail,
}

impl HandshakeState {
    /// Whether no further transition can happen.
    pub fn is_terminal(self) -> bool {
        matches!(self, HandshakeState::Initialized | HandshakeState::AuthFail)
    }

    /// Whether the responder is waiting on its verifier. No resends happen
    /// in these states.
    pub fn is_verifying(self) -> bool {
        matches!(
            self,
            HandshakeState::WaitForJwks | HandshakeState::ReadyJwks | HandshakeState::WaitForAuth
        )
    }
}

/// One side of an authenticated handshake with one peer.
pub struct Handshake {
    role: Role,
    state: HandshakeState,
    activated: bool,

    crypto: Arc<dyn CryptoProvider>,
    verifier: Option<Arc<dyn IdentityVerifier>>,
    credentials: Option<Arc<dyn CredentialProvider>>,

    rsa_key_bits: usize,
    verify_signature: bool,
    resend_interval: Duration,
    max_resends: u32,
    resend_timer: Duration,
    resends: u32,

    // Initiator
    rsa: Option<RsaKeyPair>,
    outgoing_segments: Vec<Vec<u8>>,

    // Shared: generated by the responder, received by the initiator
    aes: Option<AesKey>,

    // Responder
    peer_modulus: Option<Vec<u8>>,
    aes_datagram: Option<Vec<u8>>,
    segments: Vec<Option<Zeroizing<Vec<u8>>>>,
    segments_expected: Option<u8>,
    segments_received: usize,
    token: Option<Zeroizing<String>>,
    result: Option<bool>,

    identity: Option<String>,
    failure: Option<Error>,
}

impl Handshake {
    /// Create a handshake for `role`. Attach collaborators with
    /// [`with_verifier`](Self::with_verifier) or
    /// [`with_credentials`](Self::with_credentials) before activating.
    pub fn new(role: Role, config: &TetherConfig, crypto: Arc<dyn CryptoProvider>) -> Self {
        Self {
            role,
            state: HandshakeState::Uninitialized,
            activated: false,
            crypto,
            verifier: None,
            credentials: None,
            rsa_key_bits: config.rsa_key_bits,
            verify_signature: config.verify_token_signature,
            resend_interval: config.resend_interval(),
            max_resends: config.max_resends,
            resend_timer: config.resend_interval(),
            resends: 0,
            rsa: None,
            outgoing_segments: Vec::new(),
            aes: None,
            peer_modulus: None,
            aes_datagram: None,
            segments: Vec::new(),
            segments_expected: None,
            segments_received: 0,
            token: None,
            result: None,
            identity: None,
            failure: None,
        }
    }

    /// Initiator presenting the token from `credentials`.
    pub fn initiator(
        config: &TetherConfig,
        crypto: Arc<dyn CryptoProvider>,
        credentials: Arc<dyn CredentialProvider>,
    ) -> Self {
        Self::new(Role::Initiator, config, crypto).with_credentials(credentials)
    }

    /// Responder checking identities with `verifier`.
    pub fn responder(
        config: &TetherConfig,
        crypto: Arc<dyn CryptoProvider>,
        verifier: Arc<dyn IdentityVerifier>,
    ) -> Self {
        Self::new(Role::Responder, config, crypto).with_verifier(verifier)
    }

    /// Attach the identity verifier (responder).
    pub fn with_verifier(mut self, verifier: Arc<dyn IdentityVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    /// Attach the credential provider (initiator).
    pub fn with_credentials(mut self, credentials: Arc<dyn CredentialProvider>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Side of this handshake.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Current state.
    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// Whether the handshake reached `Initialized`.
    pub fn is_connected(&self) -> bool {
        self.state == HandshakeState::Initialized
    }

    /// Whether the handshake reached a terminal state.
    pub fn is_completed(&self) -> bool {
        self.state.is_terminal()
    }

    /// Whether [`activate`](Self::activate) has run.
    pub fn is_activated(&self) -> bool {
        self.activated
    }

    /// Verified peer identity (responder only, once known).
    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }

    /// Reason for `AuthFail`.
    pub fn failure(&self) -> Option<&Error> {
        self.failure.as_ref()
    }

    /// Resends performed since the last forward transition.
    pub fn resend_count(&self) -> u32 {
        self.resends
    }

    /// Token segments received so far (responder).
    pub fn segments_received(&self) -> usize {
        self.segments_received
    }

    /// Start the handshake once the link is up.
    ///
    /// The responder generates its AES key and waits for the peer's RSA key.
    /// The initiator generates its RSA key pair and sends the public half.
    /// Calling this more than once has no effect.
    pub fn activate(&mut self, sink: &mut dyn DatagramSink) {
        if self.activated || self.state.is_terminal() {
            return;
        }
        self.activated = true;
        self.resend_timer = self.resend_interval;
        debug!(role = ?self.role, "handshake activated");

        match self.role {
            Role::Responder => {
                if !self.verifier.as_ref().is_some_and(|v| v.is_active()) {
                    self.fail(Error::NotConfigured("identity verifier"));
                    return;
                }
                match self.crypto.generate_aes() {
                    Ok(aes) => self.aes = Some(aes),
                    Err(e) => self.fail(e.into()),
                }
            }
            Role::Initiator => {
                if !self.credentials.as_ref().is_some_and(|c| c.is_active()) {
                    self.fail(Error::NotConfigured("credential provider"));
                    return;
                }
                match self.crypto.generate_rsa(self.rsa_key_bits) {
                    Ok(rsa) => self.rsa = Some(rsa),
                    Err(e) => {
                        self.fail(e.into());
                        return;
                    }
                }
                self.send_rsa_key(sink);
            }
        }
    }

    /// Process one handshake datagram (sentinel included).
    pub fn incoming(&mut self, datagram: &[u8], sink: &mut dyn DatagramSink) {
        if self.state == HandshakeState::AuthFail {
            return;
        }
        if !self.activated {
            debug!(role = ?self.role, "handshake datagram before activation, ignoring");
            return;
        }

        let message = match HandshakeMessage::parse(datagram) {
            Ok(message) => message,
            Err(e) if self.state == HandshakeState::Initialized => {
                warn!(role = ?self.role, error = %e, "malformed handshake datagram after completion");
                return;
            }
            Err(e) => {
                self.fail(e);
                return;
            }
        };

        match self.role {
            Role::Initiator => self.initiator_incoming(message, sink),
            Role::Responder => self.responder_incoming(message, sink),
        }
    }

    /// Advance timers by `elapsed`.
    ///
    /// Polls the verifier while the responder is waiting on it; otherwise
    /// counts down the resend timer and re-sends on expiry. Waiting on the
    /// verifier counts timer expiries the same way but sends nothing.
    /// Exceeding the resend ceiling fails the handshake with
    /// [`Error::HandshakeTimeout`].
    pub fn advance(&mut self, elapsed: Duration, sink: &mut dyn DatagramSink) {
        if !self.activated || self.state.is_terminal() {
            return;
        }
        if self.state.is_verifying() {
            self.poll_verifier(sink);
            if !self.state.is_verifying() {
                return;
            }
        }

        self.resend_timer = self.resend_timer.saturating_sub(elapsed);
        if !self.resend_timer.is_zero() {
            return;
        }
        self.resend_timer = self.resend_interval;
        self.resends += 1;
        if self.resends > self.max_resends {
            self.verification_abandoned();
            self.fail(Error::HandshakeTimeout(self.max_resends));
            return;
        }
        if self.state.is_verifying() {
            debug!(state = ?self.state, waited = self.resends, "still waiting on verifier");
            return;
        }

        debug!(
            role = ?self.role,
            state = ?self.state,
            attempt = self.resends,
            "resend timer expired"
        );
        self.resend(sink);
    }

    fn verification_abandoned(&self) {
        if self.state != HandshakeState::WaitForAuth {
            return;
        }
        if let (Some(verifier), Some(identity)) = (&self.verifier, &self.identity) {
            warn!(role = ?self.role, "verifier gave no verdict in time");
            verifier.mark_for_kick(identity);
        }
    }

    fn resend(&mut self, sink: &mut dyn DatagramSink) {
        match (self.role, self.state) {
            (Role::Initiator, HandshakeState::Uninitialized | HandshakeState::SentKey) => {
                self.send_rsa_key(sink)
            }
            (Role::Initiator, HandshakeState::RecvedKey) => self.send_token(sink),
            (Role::Initiator, HandshakeState::SentAuth) => {
                self.request_resend(MessageType::AuthResult, sink)
            }
            (Role::Responder, HandshakeState::Uninitialized) => {
                self.request_resend(MessageType::RsaKey, sink)
            }
            (Role::Responder, HandshakeState::RecvedKey) if self.segments_received == 0 => {
                self.resend_aes_key(sink)
            }
            (Role::Responder, HandshakeState::RecvedKey) => {
                self.request_resend(MessageType::AuthToken, sink)
            }
            _ => {}
        }
    }

    // === Transitions ===

    fn advance_to(&mut self, next: HandshakeState) {
        if self.state.is_terminal() || next <= self.state {
            warn!(
                role = ?self.role,
                from = ?self.state,
                to = ?next,
                "refusing backward transition"
            );
            return;
        }
        debug!(role = ?self.role, from = ?self.state, to = ?next, "handshake transition");
        self.state = next;
        self.resends = 0;
    }

    fn fail(&mut self, error: Error) {
        if self.state.is_terminal() {
            return;
        }
        warn!(role = ?self.role, state = ?self.state, error = %error, "handshake failed");
        self.state = HandshakeState::AuthFail;
        self.failure = Some(error);
        self.outgoing_segments.clear();
        self.segments.clear();
        self.token = None;
    }

    // === Sending ===

    fn send(&mut self, sink: &mut dyn DatagramSink, datagram: &[u8]) -> bool {
        let sent = sink.send_datagram(datagram);
        if sent {
            self.resend_timer = self.resend_interval;
        } else {
            debug!(role = ?self.role, len = datagram.len(), "transport refused datagram");
        }
        sent
    }

    fn send_message(&mut self, sink: &mut dyn DatagramSink, message: &HandshakeMessage) -> bool {
        match message.serialize() {
            Ok(datagram) => self.send(sink, &datagram),
            Err(e) => {
                self.fail(e);
                false
            }
        }
    }

    fn request_resend(&mut self, requested: MessageType, sink: &mut dyn DatagramSink) {
        self.send_message(sink, &HandshakeMessage::ResendRequest { requested });
    }

    // === Initiator ===

    fn initiator_incoming(&mut self, message: HandshakeMessage, sink: &mut dyn DatagramSink) {
        match message {
            HandshakeMessage::AesKey {
                encrypted_key,
                encrypted_iv,
            } => self.on_aes_key(&encrypted_key, &encrypted_iv, sink),
            HandshakeMessage::AuthResult { accepted } => self.on_auth_result(accepted),
            HandshakeMessage::ResendRequest {
                requested: MessageType::RsaKey,
            } if matches!(
                self.state,
                HandshakeState::Uninitialized | HandshakeState::SentKey
            ) =>
            {
                self.send_rsa_key(sink)
            }
            HandshakeMessage::ResendRequest {
                requested: MessageType::AuthToken,
            } if matches!(self.state, HandshakeState::RecvedKey | HandshakeState::SentAuth) => {
                self.send_segments(sink)
            }
            other => debug!(
                role = ?self.role,
                state = ?self.state,
                message = ?other.message_type(),
                "ignoring message"
            ),
        }
    }

    fn send_rsa_key(&mut self, sink: &mut dyn DatagramSink) {
        let message = match &self.rsa {
            Some(rsa) => HandshakeMessage::RsaKey {
                modulus: rsa.modulus(),
                exponent: rsa.exponent(),
            },
            None => return,
        };
        if self.send_message(sink, &message) && self.state == HandshakeState::Uninitialized {
            self.advance_to(HandshakeState::SentKey);
        }
    }

    fn on_aes_key(&mut self, encrypted_key: &[u8], encrypted_iv: &[u8], sink: &mut dyn DatagramSink) {
        match self.state {
            HandshakeState::Uninitialized | HandshakeState::SentKey => {
                match self.unwrap_aes_key(encrypted_key, encrypted_iv) {
                    Ok(aes) => {
                        self.aes = Some(aes);
                        self.advance_to(HandshakeState::RecvedKey);
                        self.send_token(sink);
                    }
                    Err(e) => self.fail(e),
                }
            }
            HandshakeState::RecvedKey | HandshakeState::SentAuth => self.send_segments(sink),
            _ => {}
        }
    }

    fn unwrap_aes_key(&self, encrypted_key: &[u8], encrypted_iv: &[u8]) -> Result<AesKey> {
        let rsa = self
            .rsa
            .as_ref()
            .ok_or(Error::NotConfigured("RSA key pair"))?;
        let key = rsa.decrypt(encrypted_key)?;
        let iv = rsa.decrypt(encrypted_iv)?;

        if key.len() < MIN_AES_KEY_SIZE || key.len() > MAX_AES_KEY_SIZE {
            return Err(Error::OutOfBounds {
                field: "AES key size",
                value: key.len(),
                min: MIN_AES_KEY_SIZE,
                max: MAX_AES_KEY_SIZE,
            });
        }
        if iv.len() != AES_IV_SIZE {
            return Err(Error::OutOfBounds {
                field: "IV size",
                value: iv.len(),
                min: AES_IV_SIZE,
                max: AES_IV_SIZE,
            });
        }

        Ok(AesKey::from_parts(&key, &iv)?)
    }

    fn send_token(&mut self, sink: &mut dyn DatagramSink) {
        if self.outgoing_segments.is_empty() {
            match self.seal_token() {
                Ok(segments) => self.outgoing_segments = segments,
                Err(e) => {
                    self.fail(e);
                    return;
                }
            }
        }
        self.send_segments(sink);
    }

    fn seal_token(&self) -> Result<Vec<Vec<u8>>> {
        let credentials = self
            .credentials
            .as_ref()
            .ok_or(Error::NotConfigured("credential provider"))?;
        let token = Zeroizing::new(
            credentials
                .identity_token()
                .filter(|t| !t.is_empty())
                .ok_or(Error::NotConfigured("identity token"))?,
        );
        let aes = self
            .aes
            .as_ref()
            .ok_or_else(|| Error::InvalidState("no AES key to seal token".into()))?;

        let pieces: Vec<&[u8]> = token.as_bytes().chunks(SEGMENT_PLAINTEXT_SIZE).collect();
        if pieces.len() > MAX_SEGMENTS {
            return Err(Error::OutOfBounds {
                field: "token segments",
                value: pieces.len(),
                min: 1,
                max: MAX_SEGMENTS,
            });
        }

        let total_segments = pieces.len() as u8;
        pieces
            .iter()
            .enumerate()
            .map(|(index, piece)| -> Result<Vec<u8>> {
                HandshakeMessage::AuthToken {
                    segment_index: index as u8,
                    total_segments,
                    cipher_text: aes.encrypt(piece)?,
                }
                .serialize()
            })
            .collect()
    }

    fn send_segments(&mut self, sink: &mut dyn DatagramSink) {
        if self.outgoing_segments.is_empty() {
            return;
        }
        let segments = std::mem::take(&mut self.outgoing_segments);
        let all_sent = segments.iter().all(|segment| self.send(sink, segment));
        self.outgoing_segments = segments;

        if all_sent && self.state == HandshakeState::RecvedKey {
            self.advance_to(HandshakeState::SentAuth);
        }
    }

    fn on_auth_result(&mut self, accepted: bool) {
        if !matches!(self.state, HandshakeState::RecvedKey | HandshakeState::SentAuth) {
            return;
        }
        if accepted {
            self.advance_to(HandshakeState::Initialized);
            self.outgoing_segments.clear();
            info!(role = ?self.role, "handshake complete");
        } else {
            self.fail(Error::Rejected("responder refused identity".into()));
        }
    }

    // === Responder ===

    fn responder_incoming(&mut self, message: HandshakeMessage, sink: &mut dyn DatagramSink) {
        match message {
            HandshakeMessage::RsaKey { modulus, exponent } => {
                self.on_rsa_key(modulus, &exponent, sink)
            }
            HandshakeMessage::AuthToken {
                segment_index,
                total_segments,
                cipher_text,
            } => self.on_auth_token(segment_index, total_segments, &cipher_text, sink),
            HandshakeMessage::ResendRequest {
                requested: MessageType::AesKey,
            } if self.state == HandshakeState::RecvedKey => self.resend_aes_key(sink),
            HandshakeMessage::ResendRequest {
                requested: MessageType::AuthResult,
            } => self.resend_result(sink),
            other => debug!(
                role = ?self.role,
                state = ?self.state,
                message = ?other.message_type(),
                "ignoring message"
            ),
        }
    }

    fn on_rsa_key(&mut self, modulus: Vec<u8>, exponent: &[u8], sink: &mut dyn DatagramSink) {
        match self.state {
            HandshakeState::Uninitialized => {
                let peer = match PeerPublicKey::from_components(&modulus, exponent) {
                    Ok(peer) => peer,
                    Err(e) => {
                        warn!(role = ?self.role, error = %e, "peer key unusable, requesting resend");
                        self.request_resend(MessageType::RsaKey, sink);
                        return;
                    }
                };
                let datagram = match self.wrap_aes_key(&peer) {
                    Ok(datagram) => datagram,
                    Err(e) => {
                        self.fail(e);
                        return;
                    }
                };

                self.peer_modulus = Some(modulus);
                self.aes_datagram = Some(datagram.clone());
                self.advance_to(HandshakeState::RecvedKey);
                self.send(sink, &datagram);
            }
            HandshakeState::RecvedKey if self.peer_modulus.as_deref() == Some(&modulus[..]) => {
                self.resend_aes_key(sink)
            }
            _ => debug!(role = ?self.role, state = ?self.state, "ignoring RSA key"),
        }
    }

    fn wrap_aes_key(&self, peer: &PeerPublicKey) -> Result<Vec<u8>> {
        let aes = self
            .aes
            .as_ref()
            .ok_or(Error::NotConfigured("AES key"))?;
        HandshakeMessage::AesKey {
            encrypted_key: peer.encrypt(aes.key_bytes())?,
            encrypted_iv: peer.encrypt(aes.iv_bytes())?,
        }
        .serialize()
    }

    fn resend_aes_key(&mut self, sink: &mut dyn DatagramSink) {
        if let Some(datagram) = self.aes_datagram.clone() {
            self.send(sink, &datagram);
        }
    }

    fn on_auth_token(
        &mut self,
        segment_index: u8,
        total_segments: u8,
        cipher_text: &[u8],
        sink: &mut dyn DatagramSink,
    ) {
        if self.state != HandshakeState::RecvedKey {
            debug!(role = ?self.role, state = ?self.state, "ignoring token segment");
            return;
        }

        let plaintext = match self.open_segment(cipher_text) {
            Ok(plaintext) => plaintext,
            Err(e) => {
                self.fail(e);
                return;
            }
        };

        match self.segments_expected {
            None => {
                self.segments_expected = Some(total_segments);
                self.segments = (0..total_segments).map(|_| None).collect();
            }
            Some(expected) if expected != total_segments => {
                self.fail(Error::InvalidFrame(format!(
                    "segment count changed from {} to {}",
                    expected, total_segments
                )));
                return;
            }
            Some(_) => {}
        }

        let slot = &mut self.segments[segment_index as usize];
        if slot.is_some() {
            debug!(role = ?self.role, segment_index, "duplicate token segment");
            return;
        }
        *slot = Some(plaintext);
        self.segments_received += 1;

        if self.segments_received == total_segments as usize {
            self.finish_token(sink);
        }
    }

    fn open_segment(&self, cipher_text: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        let aes = self
            .aes
            .as_ref()
            .ok_or(Error::NotConfigured("AES key"))?;
        let plaintext = aes.decrypt(cipher_text)?;
        if plaintext.len() > SEGMENT_PLAINTEXT_SIZE {
            return Err(Error::OutOfBounds {
                field: "segment plaintext size",
                value: plaintext.len(),
                min: 0,
                max: SEGMENT_PLAINTEXT_SIZE,
            });
        }
        Ok(plaintext)
    }

    fn finish_token(&mut self, sink: &mut dyn DatagramSink) {
        let mut joined = Zeroizing::new(Vec::new());
        for segment in self.segments.drain(..).flatten() {
            joined.extend_from_slice(&segment);
        }

        let token = match String::from_utf8(std::mem::take(&mut *joined)) {
            Ok(token) => Zeroizing::new(token),
            Err(_) => {
                self.fail(Error::TokenVerification("token is not valid UTF-8".into()));
                return;
            }
        };

        if self.verify_signature {
            self.token = Some(token);
            self.advance_to(HandshakeState::WaitForJwks);
            self.poll_verifier(sink);
        } else {
            self.begin_auth(String::clone(&token), sink);
        }
    }

    fn begin_auth(&mut self, identity: String, sink: &mut dyn DatagramSink) {
        let verifier = match &self.verifier {
            Some(verifier) => Arc::clone(verifier),
            None => {
                self.fail(Error::NotConfigured("identity verifier"));
                return;
            }
        };

        let started = verifier.authenticate(&identity);
        self.identity = Some(identity);
        if !started {
            self.fail(Error::Rejected("identity refused by verifier".into()));
            return;
        }

        self.advance_to(HandshakeState::WaitForAuth);
        self.poll_verifier(sink);
    }

    fn poll_verifier(&mut self, sink: &mut dyn DatagramSink) {
        let verifier = match &self.verifier {
            Some(verifier) => Arc::clone(verifier),
            None => return,
        };

        match self.state {
            HandshakeState::WaitForJwks => {
                let keys = match verifier.fetch_verification_keys() {
                    KeyFetch::Ready(keys) => keys,
                    KeyFetch::Pending => return,
                };
                self.advance_to(HandshakeState::ReadyJwks);

                let verified = match self.token.take() {
                    Some(token) => verify_jwt(&token, &keys),
                    None => Err(Error::InvalidState("token missing".into())),
                };
                match verified {
                    Ok(subject) => self.begin_auth(subject, sink),
                    Err(e) => self.fail(e),
                }
            }
            HandshakeState::WaitForAuth => {
                let identity = match &self.identity {
                    Some(identity) => identity.clone(),
                    None => return,
                };
                match verifier.poll_status(&identity) {
                    AuthStatus::Pending => {}
                    AuthStatus::Accepted => {
                        if self.send_result(true, sink) {
                            self.advance_to(HandshakeState::Initialized);
                            verifier.complete(&identity);
                            info!(role = ?self.role, "handshake complete");
                        }
                    }
                    AuthStatus::Rejected => {
                        if self.send_result(false, sink) {
                            verifier.mark_for_kick(&identity);
                            self.fail(Error::Rejected("identity rejected by verifier".into()));
                        }
                    }
                }
            }
            _ => {}
        }
    }

    fn send_result(&mut self, accepted: bool, sink: &mut dyn DatagramSink) -> bool {
        self.result = Some(accepted);
        self.send_message(sink, &HandshakeMessage::AuthResult { accepted })
    }

    fn resend_result(&mut self, sink: &mut dyn DatagramSink) {
        if let Some(accepted) = self.result {
            self.send_message(sink, &HandshakeMessage::AuthResult { accepted });
        }
    }
}

impl core::fmt::Debug for Handshake {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Handshake")
            .field("role", &self.role)
            .field("state", &self.state)
            .field("resends", &self.resends)
            .field("identity", &self.identity)
            .finish_non_exhaustive()
    }
}
