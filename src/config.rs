//! Writer and session configuration.
//! Defaults mirror the peripheral's observed limits: 20-byte packets,
//! 50 ms pacing between packets, three retries with linear backoff.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::bluetooth::constants::{
    DEFAULT_CHUNK_SIZE, DEFAULT_INTER_PACKET_DELAY_MS, DEFAULT_MAX_RETRIES,
    DEFAULT_OPERATION_TIMEOUT_SECS, DEFAULT_RETRY_BACKOFF_UNIT_MS, MIN_RSSI_THRESHOLD,
};
use crate::error::BridgeError;

/// Configuration for a [`PacketWriter`](crate::core::bluetooth::writer::PacketWriter).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WriterConfig {
    /// Maximum payload bytes per packet. Must not exceed the link MTU.
    pub chunk_size: usize,

    /// Delay between consecutive packets, to avoid overrunning the
    /// peripheral's receive buffer. Skipped after the final packet.
    pub inter_packet_delay_ms: u64,

    /// Retries allowed per packet before the session aborts.
    pub max_retries: u32,

    /// Backoff before retry n is `retry_backoff_unit_ms * n` (linear).
    pub retry_backoff_unit_ms: u64,

    /// Write with delivery acknowledgement from the peripheral.
    pub with_response: bool,

    /// Append a one-byte sum checksum to each packet.
    pub add_checksum: bool,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            inter_packet_delay_ms: DEFAULT_INTER_PACKET_DELAY_MS,
            max_retries: DEFAULT_MAX_RETRIES,
            retry_backoff_unit_ms: DEFAULT_RETRY_BACKOFF_UNIT_MS,
            with_response: true,
            add_checksum: false,
        }
    }
}

impl WriterConfig {
    pub fn validate(&self) -> Result<(), BridgeError> {
        if self.chunk_size == 0 {
            return Err(BridgeError::InvalidConfig(
                "chunk_size must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    pub fn inter_packet_delay(&self) -> Duration {
        Duration::from_millis(self.inter_packet_delay_ms)
    }

    /// Linear backoff before the given retry attempt (1-based).
    /// Pure so the policy is testable apart from any I/O.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.retry_backoff_unit_ms * u64::from(attempt))
    }
}

/// Configuration for a [`ConnectionSession`](crate::core::bluetooth::session::ConnectionSession).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Name-substring predicate selecting the target peripheral during
    /// scanning. Always supplied by the caller; there is no canonical
    /// device name.
    pub name_filter: String,

    /// Bound on connect and each discovery step.
    pub operation_timeout_secs: u64,

    /// Advertisements weaker than this are ignored. Devices reported
    /// without a signal reading are not filtered.
    pub min_rssi: Option<i16>,

    /// Restrict service discovery to this service, when known.
    pub service_filter: Option<Uuid>,

    /// Restrict characteristic resolution to this characteristic, when known.
    pub characteristic_filter: Option<Uuid>,
}

impl SessionConfig {
    pub fn new(name_filter: impl Into<String>) -> Self {
        Self {
            name_filter: name_filter.into(),
            operation_timeout_secs: DEFAULT_OPERATION_TIMEOUT_SECS,
            min_rssi: Some(MIN_RSSI_THRESHOLD),
            service_filter: None,
            characteristic_filter: None,
        }
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }
}
