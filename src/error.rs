//! Crate-wide error taxonomy.
//! Local validation errors surface before any radio activity; delivery
//! errors always carry enough context (packet index, total) to act on.

use thiserror::Error;

use crate::core::bluetooth::transport::TransportError;

#[derive(Error, Debug)]
pub enum BridgeError {
    /// Malformed hex payload. Non-retryable, raised before any I/O.
    #[error("invalid hex payload: {0}")]
    InvalidEncoding(String),

    /// Misconfiguration such as a zero chunk size. Non-retryable.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A write session is already in flight on this writer.
    #[error("a write session is already in progress")]
    AlreadyWriting,

    /// Retry budget exhausted for one packet; the whole session aborts.
    #[error("packet {index} of {total} failed delivery after exhausting retries")]
    PacketDeliveryFailed { index: usize, total: usize },

    /// The peripheral disconnected while work was pending.
    #[error("device link lost")]
    LinkLost,

    /// A connect or discovery step exceeded its allotted time.
    #[error("{0} timed out")]
    Timeout(&'static str),

    /// The scanner reported an error mid-scan.
    #[error("scan error: {0}")]
    ScanError(String),

    /// The caller cancelled the write session.
    #[error("write cancelled after {sent} of {total} packets")]
    Cancelled { sent: usize, total: usize },

    /// Backend failure outside the retryable write path (connect,
    /// discovery, adapter access).
    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl BridgeError {
    /// True for errors the caller can fix locally without touching the
    /// radio (bad payload, bad config, busy writer).
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            Self::InvalidEncoding(_) | Self::InvalidConfig(_) | Self::AlreadyWriting
        )
    }
}
