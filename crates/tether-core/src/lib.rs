//! Core engine for the tether handshake and peer sessions.
//!
//! This crate implements everything above the raw datagram channel:
//! - Handshake framing with fixed bounds on every length field
//! - The authenticated handshake state machine (RSA key exchange, AES key
//!   transport, segmented identity token, auth result) with resend supervision
//! - Chunk fragmentation and reassembly for datagrams over the channel limit
//! - The peer session registry and the transport event queue that feeds it
//!
//! Concrete transports live in `tether-transport`; they only need to implement
//! [`DatagramSink`] and push [`TransportEvent`]s through a [`TaskSender`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod alias;
pub mod chunk;
pub mod config;
pub mod error;
pub mod frame;
pub mod handshake;
pub mod mock;
pub mod registry;
pub mod task;
pub mod transport;
pub mod verifier;

pub use chunk::ChunkReassembler;
pub use config::TetherConfig;
pub use error::{Error, Result};
pub use frame::{FrameKind, HandshakeMessage, MessageType};
pub use handshake::{Handshake, HandshakeState, Role};
pub use registry::{DisconnectReason, PeerEvent, PeerSessionRegistry};
pub use task::{LinkState, TaskQueue, TaskSender, TransportEvent};
pub use transport::DatagramSink;
pub use verifier::{
    verify_jwt, AuthStatus, CredentialProvider, IdentityVerifier, KeyFetch, SessionVerifier,
    StaticCredentials,
};
