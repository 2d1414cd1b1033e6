//! bluest-backed implementations of the collaborator traits.
//! One backend instance wraps the platform adapter and keeps a registry
//! of devices seen during scanning, keyed by platform id, so handles can
//! be resolved back to live `Device` objects later.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use bluest::{Adapter, Characteristic, Device};
use futures_util::stream::{self, BoxStream, StreamExt};
use log::{debug, info, warn};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::core::bluetooth::constants::{
    DISCONNECT_POLL_INTERVAL_MS, UUID_BATTERY_SERVICE, UUID_DEVICE_INFORMATION_SERVICE,
    UUID_GENERIC_ACCESS_SERVICE,
};
use crate::core::bluetooth::transport::{
    GattAccessor, Link, ScanEvent, Scanner, Transport, TransportError,
};
use crate::core::bluetooth::types::{CharacteristicRef, DeviceHandle};

pub struct BluestBackend {
    adapter: Adapter,
    devices: Arc<Mutex<HashMap<String, Device>>>,
    /// Resolved characteristic handles, cached per (device, characteristic)
    /// so packet writes skip rediscovery.
    characteristics: Mutex<HashMap<(String, Uuid), Characteristic>>,
    scan_cancel: Mutex<CancellationToken>,
}

impl BluestBackend {
    pub async fn new() -> Result<Self> {
        let adapter = Adapter::default()
            .await
            .ok_or_else(|| anyhow!("No Bluetooth adapter found"))?;
        adapter.wait_available().await?;
        info!("Bluetooth adapter is available");
        Ok(Self {
            adapter,
            devices: Arc::new(Mutex::new(HashMap::new())),
            characteristics: Mutex::new(HashMap::new()),
            scan_cancel: Mutex::new(CancellationToken::new()),
        })
    }

    fn device_for(&self, id: &str) -> Result<Device, TransportError> {
        self.devices
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| TransportError::NotConnected(id.to_string()))
    }

    async fn resolve_characteristic(
        &self,
        device: &Device,
        id: &str,
        target: &CharacteristicRef,
    ) -> Result<Characteristic, TransportError> {
        let key = (id.to_string(), target.characteristic);
        if let Some(cached) = self.characteristics.lock().unwrap().get(&key) {
            return Ok(cached.clone());
        }

        let services = device
            .services()
            .await
            .map_err(|e| TransportError::Backend(e.to_string()))?;
        let service = services
            .iter()
            .find(|s| s.uuid() == target.service)
            .ok_or_else(|| {
                TransportError::Backend(format!("service {} not found", target.service))
            })?;
        let characteristics = service
            .characteristics()
            .await
            .map_err(|e| TransportError::Backend(e.to_string()))?;
        let characteristic = characteristics
            .into_iter()
            .find(|c| c.uuid() == target.characteristic)
            .ok_or_else(|| {
                TransportError::Backend(format!(
                    "characteristic {} not found",
                    target.characteristic
                ))
            })?;

        self.characteristics
            .lock()
            .unwrap()
            .insert(key, characteristic.clone());
        Ok(characteristic)
    }

    fn register(devices: &Arc<Mutex<HashMap<String, Device>>>, device: &Device) -> String {
        let id = device.id().to_string();
        devices.lock().unwrap().insert(id.clone(), device.clone());
        id
    }
}

fn service_label(uuid: Uuid) -> Option<&'static str> {
    if uuid == UUID_GENERIC_ACCESS_SERVICE {
        Some("Generic Access")
    } else if uuid == UUID_DEVICE_INFORMATION_SERVICE {
        Some("Device Information")
    } else if uuid == UUID_BATTERY_SERVICE {
        Some("Battery")
    } else {
        None
    }
}

#[async_trait]
impl Scanner for BluestBackend {
    async fn scan(&self) -> Result<BoxStream<'static, ScanEvent>, TransportError> {
        // Restarting the scan invalidates the previous stream.
        let cancel = {
            let mut slot = self.scan_cancel.lock().unwrap();
            slot.cancel();
            *slot = CancellationToken::new();
            slot.clone()
        };

        self.devices.lock().unwrap().clear();
        let adapter = self.adapter.clone();
        let devices = self.devices.clone();
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(async move {
            // Already-connected devices advertise nothing; report them
            // first so a session can match one without radio traffic.
            match adapter.connected_devices().await {
                Ok(connected) => {
                    for device in connected {
                        let id = BluestBackend::register(&devices, &device);
                        let _ = tx.send(ScanEvent::Advertisement {
                            id,
                            name: device.name().ok(),
                            rssi: None,
                        });
                    }
                }
                Err(err) => debug!("connected_devices query failed: {err}"),
            }

            let mut scan_stream = match adapter.scan(&[]).await {
                Ok(stream) => stream,
                Err(err) => {
                    let _ = tx.send(ScanEvent::Error(err.to_string()));
                    return;
                }
            };
            info!("Bluetooth scan started");

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    discovered = scan_stream.next() => match discovered {
                        Some(found) => {
                            let device = found.device;
                            let id = BluestBackend::register(&devices, &device);
                            let _ = tx.send(ScanEvent::Advertisement {
                                id,
                                name: device.name().ok(),
                                rssi: found.rssi,
                            });
                        }
                        None => {
                            info!("Bluetooth scan stream ended");
                            break;
                        }
                    }
                }
            }
        });

        Ok(stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|event| (event, rx))
        })
        .boxed())
    }

    async fn stop_scan(&self) {
        self.scan_cancel.lock().unwrap().cancel();
        info!("Bluetooth scan stopped");
    }
}

#[async_trait]
impl Link for BluestBackend {
    async fn connect(&self, id: &str) -> Result<DeviceHandle, TransportError> {
        let device = self.device_for(id)?;
        if !device.is_connected().await {
            info!("Initiating connection to {id}");
            self.adapter
                .connect_device(&device)
                .await
                .map_err(|e| TransportError::Backend(e.to_string()))?;
        }
        Ok(DeviceHandle {
            id: id.to_string(),
            name: device.name().ok(),
        })
    }

    async fn disconnect(&self, id: &str) -> Result<(), TransportError> {
        let device = self.device_for(id)?;
        self.characteristics
            .lock()
            .unwrap()
            .retain(|(device_id, _), _| device_id != id);
        if device.is_connected().await {
            info!("Disconnecting from {id}");
            self.adapter
                .disconnect_device(&device)
                .await
                .map_err(|e| TransportError::Backend(e.to_string()))?;
        }
        Ok(())
    }

    /// bluest exposes no portable disconnect event, so liveness is
    /// polled. One item is yielded when the device stops reporting
    /// connected, then the stream ends.
    async fn subscribe_disconnect(
        &self,
        id: &str,
    ) -> Result<BoxStream<'static, ()>, TransportError> {
        let device = self.device_for(id)?;
        let poll_interval = Duration::from_millis(DISCONNECT_POLL_INTERVAL_MS);
        Ok(stream::unfold(Some(device), move |state| async move {
            let device = state?;
            loop {
                tokio::time::sleep(poll_interval).await;
                if !device.is_connected().await {
                    return Some(((), None));
                }
            }
        })
        .boxed())
    }
}

#[async_trait]
impl GattAccessor for BluestBackend {
    async fn discover_services(
        &self,
        handle: &DeviceHandle,
    ) -> Result<Vec<Uuid>, TransportError> {
        let device = self.device_for(&handle.id)?;
        let services = device
            .services()
            .await
            .map_err(|e| TransportError::Backend(e.to_string()))?;
        let uuids: Vec<Uuid> = services.iter().map(|s| s.uuid()).collect();
        for uuid in &uuids {
            match service_label(*uuid) {
                Some(label) => debug!("Discovered service {uuid} ({label})"),
                None => debug!("Discovered service {uuid}"),
            }
        }
        Ok(uuids)
    }

    async fn discover_characteristics(
        &self,
        handle: &DeviceHandle,
        service_uuid: Uuid,
    ) -> Result<Vec<CharacteristicRef>, TransportError> {
        let device = self.device_for(&handle.id)?;
        let services = device
            .services()
            .await
            .map_err(|e| TransportError::Backend(e.to_string()))?;
        let service = services
            .iter()
            .find(|s| s.uuid() == service_uuid)
            .ok_or_else(|| {
                TransportError::Backend(format!("service {service_uuid} not found"))
            })?;
        let characteristics = service
            .characteristics()
            .await
            .map_err(|e| TransportError::Backend(e.to_string()))?;

        let mut refs = Vec::with_capacity(characteristics.len());
        for characteristic in characteristics {
            debug!("Discovered characteristic {}", characteristic.uuid());
            self.characteristics.lock().unwrap().insert(
                (handle.id.clone(), characteristic.uuid()),
                characteristic.clone(),
            );
            refs.push(CharacteristicRef {
                service: service_uuid,
                characteristic: characteristic.uuid(),
            });
        }
        Ok(refs)
    }
}

#[async_trait]
impl Transport for BluestBackend {
    async fn write(
        &self,
        handle: &DeviceHandle,
        target: &CharacteristicRef,
        bytes: &[u8],
        with_response: bool,
    ) -> Result<(), TransportError> {
        let device = self.device_for(&handle.id)?;
        if !device.is_connected().await {
            warn!("Write requested but {} is not connected", handle.id);
            return Err(TransportError::LinkLost);
        }

        let characteristic = self.resolve_characteristic(&device, &handle.id, target).await?;
        let result = if with_response {
            characteristic.write(bytes).await
        } else {
            characteristic.write_without_response(bytes).await
        };
        result.map_err(|e| TransportError::WriteFailed(e.to_string()))
    }
}
