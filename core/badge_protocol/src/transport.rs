//! Radio transport seam
//!
//! Broadcast-only, unacknowledged, unencrypted. The transport supplies the
//! sender identity and signal strength alongside each payload; the protocol
//! takes them as given.

use crate::identity::Identity;

/// One received payload plus the link metadata the radio attaches to it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundFrame {
    pub sender: Identity,
    pub payload: Vec<u8>,
    /// Received signal strength (dBm)
    pub rssi: i16,
}

/// Broadcast failure. Always non-fatal: the next scheduled broadcast retries.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("radio busy")]
    Busy,
    #[error("payload of {0} bytes exceeds the radio limit")]
    TooLarge(usize),
    #[error("radio I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Broadcast radio as seen by the protocol
pub trait Transport {
    /// Best-effort broadcast to everyone in range
    fn send(&mut self, payload: &[u8]) -> Result<(), SendError>;

    /// Non-blocking poll; `None` when nothing is queued
    fn receive(&mut self) -> Option<InboundFrame>;
}
