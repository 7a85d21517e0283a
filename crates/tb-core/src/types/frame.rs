//! The unit handed from the feed connection to the relay pump.

use bytes::Bytes;

/// One upstream data message, tagged at receipt.
///
/// Immutable once created. `payload` is reference counted, so cloning a frame
/// for a publish retry does not copy the message body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Strictly increasing for the lifetime of one feed connection, starting at 1.
    pub seq: u64,
    /// Which `Streaming` session (1-based) delivered this frame.
    pub session: u64,
    /// Wall-clock receipt time in microseconds since Unix epoch.
    pub received_at_us: u64,
    /// The upstream message, byte-for-byte.
    pub payload: Bytes,
}

impl Frame {
    pub fn new(seq: u64, session: u64, received_at_us: u64, payload: impl Into<Bytes>) -> Self {
        Self { seq, session, received_at_us, payload: payload.into() }
    }
}
