//! Error types for handshake and session operations.

use thiserror::Error;

/// Result type alias for handshake and session operations.
pub type Result<T> = core::result::Result<T, Error>;

/// Handshake and session errors.
///
/// Every error raised while a handshake is in flight ends that handshake in
/// `AuthFail`, except where noted on the variant.
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed datagram (bad sentinel, unknown layout, trailing bytes).
    #[error("Invalid frame format: {0}")]
    InvalidFrame(String),

    /// Datagram ended before a declared field.
    #[error("Insufficient data: need {0} bytes")]
    InsufficientData(usize),

    /// Length field outside its permitted range.
    #[error("{field} out of bounds: {value} not in {min}..={max}")]
    OutOfBounds {
        /// Name of the offending field.
        field: &'static str,
        /// Value received.
        value: usize,
        /// Smallest accepted value.
        min: usize,
        /// Largest accepted value.
        max: usize,
    },

    /// Handshake message type byte not recognised.
    #[error("Unknown message type: 0x{0:02X}")]
    UnknownMessageType(u8),

    /// Resend ceiling reached without progress.
    #[error("Handshake timeout after {0} resends")]
    HandshakeTimeout(u32),

    /// A required collaborator is missing or inactive.
    #[error("Not configured: {0}")]
    NotConfigured(&'static str),

    /// The remote side or the identity verifier refused the peer.
    #[error("Authentication rejected: {0}")]
    Rejected(String),

    /// Identity token signature or claims did not verify.
    #[error("Token verification failed: {0}")]
    TokenVerification(String),

    /// Operation not valid in the current state. Does not end the handshake.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// No session registered under this handle. Does not end a handshake.
    #[error("Unknown peer handle: {0}")]
    UnknownPeer(u64),

    /// Transport refused a datagram. Transient; covered by resend supervision.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Configuration rejected.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Cryptographic error.
    #[error("Crypto error: {0}")]
    Crypto(#[from] tether_crypto::Error),
}
