//! Constants used throughout the bluetooth core: packet sizing, pacing,
//! retry budget, and the well-known UUIDs the backend logs during
//! discovery.

use uuid::Uuid;

/// BLE link MTU used as the packet chunk-size ceiling, in bytes.
pub const DEFAULT_CHUNK_SIZE: usize = 20;

/// Delay between consecutive packet writes in milliseconds.
pub const DEFAULT_INTER_PACKET_DELAY_MS: u64 = 50;

/// Retries allowed per packet before the write session aborts.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Backoff unit in milliseconds; retry n waits n times this.
pub const DEFAULT_RETRY_BACKOFF_UNIT_MS: u64 = 1000;

/// Timeout for connect and each discovery step in seconds.
pub const DEFAULT_OPERATION_TIMEOUT_SECS: u64 = 10;

/// Advertisements below this signal strength are ignored by the backend
/// scanner unless the session config overrides it.
pub const MIN_RSSI_THRESHOLD: i16 = -80;

/// Interval at which the backend polls connection liveness, in milliseconds.
pub const DISCONNECT_POLL_INTERVAL_MS: u64 = 1000;

/// Standard Bluetooth Service UUIDs, logged during discovery.
pub const UUID_GENERIC_ACCESS_SERVICE: Uuid =
    Uuid::from_u128(0x00001800_0000_1000_8000_00805f9b34fb);
pub const UUID_DEVICE_INFORMATION_SERVICE: Uuid =
    Uuid::from_u128(0x0000180a_0000_1000_8000_00805f9b34fb);
pub const UUID_BATTERY_SERVICE: Uuid =
    Uuid::from_u128(0x0000180f_0000_1000_8000_00805f9b34fb);
