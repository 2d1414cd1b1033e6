//! Collaborator boundary: the narrow interfaces through which the core
//! talks to the platform BLE stack. A production backend implements
//! these over bluest; tests substitute stubs.

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use thiserror::Error;

use crate::core::bluetooth::types::{CharacteristicRef, DeviceHandle};

/// Failures reported by a backend.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The device link dropped. Terminal for any in-flight work; never
    /// retried at the packet level.
    #[error("device link lost")]
    LinkLost,

    /// No active connection for the requested handle.
    #[error("device {0} is not connected")]
    NotConnected(String),

    /// A write was rejected or failed in a transient way. The retryable
    /// class.
    #[error("write failed: {0}")]
    WriteFailed(String),

    /// Scanner, connect, or discovery failure at the backend.
    #[error("backend error: {0}")]
    Backend(String),
}

/// One observation from an active scan.
#[derive(Debug, Clone)]
pub enum ScanEvent {
    Advertisement {
        id: String,
        name: Option<String>,
        rssi: Option<i16>,
    },
    /// The scanner itself failed; the session stops scanning and fails.
    Error(String),
}

/// Device discovery.
#[async_trait]
pub trait Scanner: Send + Sync {
    /// Starts a scan and returns the advertisement stream. The stream
    /// ends when the scan stops.
    async fn scan(&self) -> Result<BoxStream<'static, ScanEvent>, TransportError>;

    /// Stops an active scan. Idempotent.
    async fn stop_scan(&self);
}

/// Connection management for a single peripheral.
#[async_trait]
pub trait Link: Send + Sync {
    async fn connect(&self, id: &str) -> Result<DeviceHandle, TransportError>;

    async fn disconnect(&self, id: &str) -> Result<(), TransportError>;

    /// A stream yielding one item when the named device disconnects
    /// (voluntarily or by error).
    async fn subscribe_disconnect(
        &self,
        id: &str,
    ) -> Result<BoxStream<'static, ()>, TransportError>;
}

/// Service and characteristic discovery on a connected device.
#[async_trait]
pub trait GattAccessor: Send + Sync {
    async fn discover_services(
        &self,
        handle: &DeviceHandle,
    ) -> Result<Vec<uuid::Uuid>, TransportError>;

    async fn discover_characteristics(
        &self,
        handle: &DeviceHandle,
        service: uuid::Uuid,
    ) -> Result<Vec<CharacteristicRef>, TransportError>;
}

/// Byte delivery to a resolved characteristic.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Writes `bytes` to the characteristic. With `with_response` the
    /// call resolves on the peripheral's acknowledgement; without, it
    /// resolves once the write is issued.
    async fn write(
        &self,
        handle: &DeviceHandle,
        target: &CharacteristicRef,
        bytes: &[u8],
        with_response: bool,
    ) -> Result<(), TransportError>;
}
