//! Datagram transports for tether sessions.
//!
//! Each transport delivers unordered, unreliable datagrams between two peers:
//! - WebRTC DataChannel with `ordered: false, maxRetransmits: 0` (feature `webrtc`)
//! - In-memory loopback with configurable loss, for tests and local tools
//!
//! Transports never touch session state. Outbound traffic goes through a
//! [`DatagramSink`](tether_core::DatagramSink); inbound datagrams and link
//! state changes are pushed into the registry's
//! [`TaskSender`](tether_core::TaskSender) from whatever thread the transport
//! runs its callbacks on.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod loopback;

#[cfg(feature = "webrtc")]
pub mod webrtc;

pub use error::{Error, Result};
pub use loopback::{LoopbackLink, LoopbackSink, LossModel};
