//! Shared data structures for the bluetooth core.

use regex::Regex;
use uuid::Uuid;

/// A device observed during scanning, as reported to embedding hosts.
#[derive(Debug, Clone, serde::Serialize)]
pub struct BleDevice {
    /// Platform-specific unique identifier for the device (especially
    /// important on macOS, where the MAC address is hidden).
    pub id: String,
    /// The advertised name, if any.
    pub name: Option<String>,
    /// MAC address extracted from the platform id where the platform
    /// exposes one, "N/A" otherwise.
    pub address: String,
    /// Signal strength of the advertisement.
    pub rssi: Option<i16>,
}

impl BleDevice {
    pub fn new(id: String, name: Option<String>, rssi: Option<i16>) -> Self {
        let address = extract_mac_address(&id).unwrap_or_else(|| "N/A".to_string());
        Self {
            id,
            name,
            address,
            rssi,
        }
    }

    /// True if the advertised name contains the given substring.
    pub fn matches_filter(&self, filter: &str) -> bool {
        self.name
            .as_ref()
            .map(|name| name.contains(filter))
            .unwrap_or(false)
    }
}

/// Identifies a connected peripheral by its stable platform id. Becomes
/// stale once the link disconnects.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct DeviceHandle {
    pub id: String,
    pub name: Option<String>,
}

/// A (service, characteristic) pair resolved after discovery on a
/// connected device. Immutable once resolved; required before any write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct CharacteristicRef {
    pub service: Uuid,
    pub characteristic: Uuid,
}

fn extract_mac_address(device_id: &str) -> Option<String> {
    let re = Regex::new(r"([0-9A-Fa-f]{2}[:-]){5}([0-9A-Fa-f]{2})").ok()?;
    re.find_iter(device_id)
        .last()
        .map(|m| m.as_str().to_uppercase())
}
