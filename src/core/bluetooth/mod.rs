//! Bluetooth core: reliable delivery of large command payloads over a
//! fixed-MTU characteristic, and the scan → connect → discover session
//! that must complete first.

mod backend;
pub mod codec;
pub mod constants;
pub mod packet;
pub mod session;
pub mod transport;
pub mod types;
pub mod writer;

#[cfg(test)]
pub(crate) mod mock;

pub use backend::BluestBackend;
pub use packet::Packet;
pub use session::{ConnectionSession, SessionEvent, SessionState};
pub use transport::{GattAccessor, Link, ScanEvent, Scanner, Transport, TransportError};
pub use types::{BleDevice, CharacteristicRef, DeviceHandle};
pub use writer::{PacketWriter, ProgressFn};
