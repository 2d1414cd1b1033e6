//! ble-bridge
//! Reliable delivery of arbitrary-length command payloads to a BLE
//! peripheral over a fixed-MTU characteristic: hex decoding,
//! packetization, retry-with-backoff delivery, and the
//! scan/connect/discover session that precedes a write.

// Module declarations
pub mod config;
pub mod core;
pub mod error;

pub use crate::config::{SessionConfig, WriterConfig};
pub use crate::core::bluetooth::{
    BleDevice, BluestBackend, CharacteristicRef, ConnectionSession, DeviceHandle, GattAccessor,
    Link, Packet, PacketWriter, ProgressFn, ScanEvent, Scanner, SessionEvent, SessionState,
    Transport, TransportError,
};
pub use crate::error::BridgeError;

/// Initialize logging. Respects `RUST_LOG`; call once from the embedding
/// host.
pub fn setup_logging() {
    env_logger::init();
    log::info!("Logging initialized");
}
