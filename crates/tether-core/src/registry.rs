//! Peer session registry.
//!
//! Owns one [`PeerSession`] per connected peer: its handshake, its chunk
//! reassembler, its outbound sink and the application payloads received
//! since the last [`recv`](PeerSessionRegistry::recv). All state is mutated on
//! the tick thread; transports report through the registry's [`TaskQueue`].

use crate::alias::PeerAliases;
use crate::chunk::ChunkReassembler;
use crate::config::TetherConfig;
use crate::frame::{classify, encode_application, FrameKind};
use crate::handshake::{Handshake, HandshakeState, Role};
use crate::task::{LinkState, TaskQueue, TaskSender, TransportEvent};
use crate::transport::DatagramSink;
use crate::verifier::{CredentialProvider, IdentityVerifier};
use crate::{Error, Result};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tether_crypto::CryptoProvider;
use tracing::{debug, info, warn};

/// Why a session was torn down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// [`PeerSessionRegistry::disconnect`] was called.
    Requested,
    /// The transport reported the link down.
    LinkDown(LinkState),
    /// The handshake ended in `AuthFail`.
    HandshakeFailed(String),
}

/// Session lifecycle notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    /// Handshake completed (or auth is disabled); application traffic may flow.
    Connected {
        /// Local handle.
        handle: u64,
        /// Peer identity.
        identity: String,
    },
    /// Session removed.
    Disconnected {
        /// Handle the session had.
        handle: u64,
        /// Peer identity.
        identity: String,
        /// Cause.
        reason: DisconnectReason,
    },
}

struct PeerSession {
    identity: String,
    handshake: Option<Handshake>,
    reassembler: ChunkReassembler,
    sink: Box<dyn DatagramSink>,
    inbound: VecDeque<Vec<u8>>,
    announced: bool,
}

impl PeerSession {
    fn is_connected(&self) -> bool {
        self.handshake.as_ref().map_or(true, Handshake::is_connected)
    }

    fn is_completed(&self) -> bool {
        self.handshake.as_ref().map_or(true, Handshake::is_completed)
    }

    fn activate(&mut self) {
        let PeerSession {
            handshake,
            reassembler,
            sink,
            ..
        } = self;
        if let Some(handshake) = handshake {
            handshake.activate(&mut ChunkingSink {
                reassembler,
                sink: sink.as_mut(),
            });
        }
    }
}

/// Fragments each handshake datagram before handing it to the peer's sink.
struct ChunkingSink<'a> {
    reassembler: &'a mut ChunkReassembler,
    sink: &'a mut dyn DatagramSink,
}

impl DatagramSink for ChunkingSink<'_> {
    fn send_datagram(&mut self, datagram: &[u8]) -> bool {
        match self.reassembler.fragment(datagram) {
            Ok(chunks) => chunks.iter().all(|chunk| self.sink.send_datagram(chunk)),
            Err(e) => {
                warn!(error = %e, "cannot fragment handshake datagram");
                false
            }
        }
    }
}

/// Registry of peer sessions, driven by [`tick`](Self::tick).
pub struct PeerSessionRegistry {
    config: TetherConfig,
    crypto: Arc<dyn CryptoProvider>,
    verifier: Option<Arc<dyn IdentityVerifier>>,
    credentials: Option<Arc<dyn CredentialProvider>>,
    aliases: PeerAliases,
    sessions: HashMap<u64, PeerSession>,
    tasks: TaskQueue,
    events: VecDeque<PeerEvent>,
}

impl PeerSessionRegistry {
    /// Create an empty registry.
    ///
    /// Fails with [`Error::Config`] if `config` does not pass
    /// [`TetherConfig::validate`].
    pub fn new(config: TetherConfig, crypto: Arc<dyn CryptoProvider>) -> Result<Self> {
        config.validate()?;
        let tasks = TaskQueue::new(config.task_queue_capacity);
        Ok(Self {
            config,
            crypto,
            verifier: None,
            credentials: None,
            aliases: PeerAliases::new(),
            sessions: HashMap::new(),
            tasks,
            events: VecDeque::new(),
        })
    }

    /// Verifier handed to every responder handshake.
    pub fn with_verifier(mut self, verifier: Arc<dyn IdentityVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    /// Credentials handed to every initiator handshake.
    pub fn with_credentials(mut self, credentials: Arc<dyn CredentialProvider>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Configuration in use.
    pub fn config(&self) -> &TetherConfig {
        &self.config
    }

    /// Producer handle for transport callbacks.
    pub fn task_sender(&self) -> TaskSender {
        self.tasks.sender()
    }

    /// Register `identity` and start its handshake, returning its handle.
    ///
    /// Idempotent: a peer that is already registered keeps its session and
    /// `sink` is dropped. With auth disabled the session is usable at once.
    pub fn connect(
        &mut self,
        identity: &str,
        role: Role,
        sink: Box<dyn DatagramSink>,
    ) -> Result<u64> {
        if identity.is_empty() {
            return Err(Error::InvalidState("peer identity must not be empty".into()));
        }
        if let Some(handle) = self.aliases.handle(identity) {
            debug!(peer = handle, "peer already registered");
            return Ok(handle);
        }

        let handshake = self.config.enable_auth.then(|| {
            let mut handshake = Handshake::new(role, &self.config, Arc::clone(&self.crypto));
            if let Some(verifier) = &self.verifier {
                handshake = handshake.with_verifier(Arc::clone(verifier));
            }
            if let Some(credentials) = &self.credentials {
                handshake = handshake.with_credentials(Arc::clone(credentials));
            }
            handshake
        });

        let handle = self.aliases.add(identity);
        let mut session = PeerSession {
            identity: identity.to_owned(),
            handshake,
            reassembler: ChunkReassembler::new(&self.config),
            sink,
            inbound: VecDeque::new(),
            announced: false,
        };
        session.activate();
        self.sessions.insert(handle, session);

        info!(peer = handle, ?role, auth = self.config.enable_auth, "peer registered");
        Ok(handle)
    }

    /// Tear down a session. Returns the peer identity if it existed.
    pub fn disconnect(&mut self, handle: u64) -> Option<String> {
        self.teardown(handle, DisconnectReason::Requested)
    }

    /// Run one tick.
    ///
    /// Drains transport events, advances every handshake and chunk buffer by
    /// `elapsed`, announces completed sessions and tears down failed ones.
    pub fn tick(&mut self, elapsed: Duration) {
        for event in self.tasks.drain() {
            self.handle_event(event);
        }

        let mut failed = Vec::new();
        for (&handle, session) in self.sessions.iter_mut() {
            session.reassembler.evict_expired(elapsed);

            let PeerSession {
                handshake,
                reassembler,
                sink,
                ..
            } = &mut *session;
            if let Some(handshake) = handshake {
                handshake.advance(
                    elapsed,
                    &mut ChunkingSink {
                        reassembler,
                        sink: sink.as_mut(),
                    },
                );
                if handshake.state() == HandshakeState::AuthFail {
                    let reason = handshake
                        .failure()
                        .map(ToString::to_string)
                        .unwrap_or_else(|| "handshake failed".into());
                    failed.push((handle, reason));
                    continue;
                }
            }

            if session.is_connected() && !session.announced {
                session.announced = true;
                self.events.push_back(PeerEvent::Connected {
                    handle,
                    identity: session.identity.clone(),
                });
            }
        }

        for (handle, reason) in failed {
            self.teardown(handle, DisconnectReason::HandshakeFailed(reason));
        }
    }

    /// Send an application payload to an authenticated peer.
    pub fn send(&mut self, handle: u64, payload: &[u8]) -> Result<()> {
        let session = self
            .sessions
            .get_mut(&handle)
            .ok_or(Error::UnknownPeer(handle))?;
        if !session.is_connected() {
            return Err(Error::InvalidState(format!(
                "peer {} has not completed the handshake",
                handle
            )));
        }

        let chunks = session.reassembler.fragment(&encode_application(payload))?;
        for (index, chunk) in chunks.iter().enumerate() {
            if !session.sink.send_datagram(chunk) {
                return Err(Error::SendFailed(format!(
                    "transport refused chunk {} of {}",
                    index + 1,
                    chunks.len()
                )));
            }
        }
        Ok(())
    }

    /// Next application payload received from `handle`.
    pub fn recv(&mut self, handle: u64) -> Option<Vec<u8>> {
        self.sessions.get_mut(&handle)?.inbound.pop_front()
    }

    /// Next lifecycle event.
    pub fn poll_event(&mut self) -> Option<PeerEvent> {
        self.events.pop_front()
    }

    /// Call `f` for every session whose handshake is complete.
    pub fn for_each_active(&self, mut f: impl FnMut(u64, &str)) {
        for (&handle, session) in &self.sessions {
            if session.is_connected() {
                f(handle, &session.identity);
            }
        }
    }

    /// Whether `handle` is authenticated.
    pub fn is_connected(&self, handle: u64) -> bool {
        self.sessions.get(&handle).is_some_and(PeerSession::is_connected)
    }

    /// Whether the handshake of `handle` reached a terminal state.
    pub fn is_completed(&self, handle: u64) -> bool {
        self.sessions.get(&handle).is_some_and(PeerSession::is_completed)
    }

    /// Handshake state of `handle`, if it runs one.
    pub fn handshake_state(&self, handle: u64) -> Option<HandshakeState> {
        self.sessions.get(&handle)?.handshake.as_ref().map(Handshake::state)
    }

    /// Handle of `identity`.
    pub fn handle_of(&self, identity: &str) -> Option<u64> {
        self.aliases.handle(identity)
    }

    /// Identity behind `handle`.
    pub fn identity_of(&self, handle: u64) -> Option<&str> {
        self.aliases.identity(handle)
    }

    /// Number of sessions.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no session exists.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn handle_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::StateChanged { peer, state } => {
                let Some(handle) = self.aliases.handle(&peer) else {
                    debug!(?state, "link state for unknown peer");
                    return;
                };
                debug!(peer = handle, ?state, "link state changed");
                if state.is_up() {
                    if let Some(session) = self.sessions.get_mut(&handle) {
                        session.activate();
                    }
                } else if state.is_down() {
                    self.teardown(handle, DisconnectReason::LinkDown(state));
                }
            }
            TransportEvent::Datagram { peer, data } => match self.aliases.handle(&peer) {
                Some(handle) => self.route(handle, &data),
                None => debug!(len = data.len(), "datagram from unknown peer"),
            },
        }
    }

    fn route(&mut self, handle: u64, datagram: &[u8]) {
        let Some(session) = self.sessions.get_mut(&handle) else {
            return;
        };
        let packet = match session.reassembler.reassemble(datagram) {
            Ok(Some(packet)) => packet,
            Ok(None) => return,
            Err(e) => {
                warn!(peer = handle, error = %e, "dropping malformed chunk");
                return;
            }
        };

        let PeerSession {
            handshake,
            reassembler,
            sink,
            inbound,
            ..
        } = session;
        match classify(&packet) {
            FrameKind::Handshake => match handshake {
                Some(handshake) => handshake.incoming(
                    &packet,
                    &mut ChunkingSink {
                        reassembler,
                        sink: sink.as_mut(),
                    },
                ),
                None => debug!(peer = handle, "handshake datagram with auth disabled"),
            },
            FrameKind::Application(payload) => {
                if handshake.as_ref().map_or(true, Handshake::is_connected) {
                    inbound.push_back(payload.to_vec());
                } else {
                    warn!(peer = handle, "application datagram before handshake completed");
                }
            }
            FrameKind::Unknown => warn!(peer = handle, len = packet.len(), "unrecognized datagram"),
        }
    }

    fn teardown(&mut self, handle: u64, reason: DisconnectReason) -> Option<String> {
        let mut session = self.sessions.remove(&handle)?;
        self.aliases.remove(handle);
        session.reassembler.clear();

        info!(peer = handle, ?reason, "peer disconnected");
        self.events.push_back(PeerEvent::Disconnected {
            handle,
            identity: session.identity.clone(),
            reason,
        });
        Some(session.identity)
    }
}

impl core::fmt::Debug for PeerSessionRegistry {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("PeerSessionRegistry")
            .field("sessions", &self.sessions.len())
            .field("pending_events", &self.events.len())
            .finish_non_exhaustive()
    }
}
