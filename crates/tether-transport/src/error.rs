//! Transport layer errors.

use thiserror::Error;

/// Result type alias.
pub type Result<T> = core::result::Result<T, Error>;

/// Transport errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Connection setup failed.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Transport not available in this context.
    #[error("Transport not available: {0}")]
    TransportUnavailable(String),
}
