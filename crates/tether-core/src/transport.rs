//! Outbound datagram seam between the handshake and a concrete transport.

/// Largest datagram any transport is asked to carry.
pub const MAX_DATAGRAM_SIZE: usize = 65_000;

/// Fire-and-forget datagram output.
///
/// Implementations must not block. Returning `false` means the datagram was
/// not handed to the transport (channel not open, buffer full, too large);
/// callers treat that as transient and rely on resend supervision.
pub trait DatagramSink: Send {
    /// Hand one datagram to the transport.
    fn send_datagram(&mut self, datagram: &[u8]) -> bool;
}

impl<S: DatagramSink + ?Sized> DatagramSink for Box<S> {
    fn send_datagram(&mut self, datagram: &[u8]) -> bool {
        (**self).send_datagram(datagram)
    }
}
