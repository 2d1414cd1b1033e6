//! Connection session: the scan → connect → discover state machine that
//! must complete before packets can be written.
//!
//! Scanning is gated on two external signals, radio power and scan
//! permission. The gate is level-triggered: every signal change
//! re-evaluates it from current values, so scanning starts whenever both
//! are true and the session is armed, and stops the moment either drops.

use std::sync::{Arc, Mutex};

use futures_util::StreamExt;
use log::{debug, error, info, warn};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::{SessionConfig, WriterConfig};
use crate::core::bluetooth::transport::{
    GattAccessor, Link, ScanEvent, Scanner, Transport, TransportError,
};
use crate::core::bluetooth::types::{BleDevice, CharacteristicRef, DeviceHandle};
use crate::core::bluetooth::writer::PacketWriter;
use crate::error::BridgeError;

/// Session lifecycle states. `Ready` is the only state that hands out a
/// characteristic reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub enum SessionState {
    Idle,
    Scanning,
    Found,
    Connecting,
    Connected,
    Discovering,
    Ready,
    Disconnected,
    Failed,
}

/// Events surfaced to the embedding host.
#[derive(Debug)]
pub enum SessionEvent {
    DeviceFound(BleDevice),
    Ready {
        handle: DeviceHandle,
        characteristic: CharacteristicRef,
    },
    Failed(BridgeError),
    Disconnected,
}

struct Shared {
    state: SessionState,
    armed: bool,
    radio_powered: bool,
    permission_granted: bool,
    ready: Option<(DeviceHandle, CharacteristicRef)>,
    scan_cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

struct Inner {
    scanner: Arc<dyn Scanner>,
    link: Arc<dyn Link>,
    gatt: Arc<dyn GattAccessor>,
    config: SessionConfig,
    shared: Mutex<Shared>,
    events: mpsc::UnboundedSender<SessionEvent>,
    link_lost: CancellationToken,
}

/// Owns one device link end to end. Exactly one device may be connected
/// per session; tearing the session down stops any scan and disconnects.
pub struct ConnectionSession {
    inner: Arc<Inner>,
}

impl ConnectionSession {
    /// Must be called within a tokio runtime; the session spawns its
    /// scan/connect work as tasks.
    pub fn new(
        scanner: Arc<dyn Scanner>,
        link: Arc<dyn Link>,
        gatt: Arc<dyn GattAccessor>,
        config: SessionConfig,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let inner = Arc::new(Inner {
            scanner,
            link,
            gatt,
            config,
            shared: Mutex::new(Shared {
                state: SessionState::Idle,
                armed: false,
                radio_powered: false,
                permission_granted: false,
                ready: None,
                scan_cancel: CancellationToken::new(),
                task: None,
            }),
            events,
            link_lost: CancellationToken::new(),
        });
        (Self { inner }, rx)
    }

    /// Arms the session. Scanning starts once the gate opens (radio
    /// powered and permission granted).
    pub fn start(&self) {
        self.inner.shared.lock().unwrap().armed = true;
        self.reevaluate_gate();
    }

    /// External radio-power signal.
    pub fn set_radio_powered(&self, powered: bool) {
        self.inner.shared.lock().unwrap().radio_powered = powered;
        self.reevaluate_gate();
    }

    /// External permission signal.
    pub fn set_permission_granted(&self, granted: bool) {
        self.inner.shared.lock().unwrap().permission_granted = granted;
        self.reevaluate_gate();
    }

    pub fn state(&self) -> SessionState {
        self.inner.shared.lock().unwrap().state
    }

    /// The connected device and resolved characteristic, only while
    /// `Ready`.
    pub fn ready_target(&self) -> Option<(DeviceHandle, CharacteristicRef)> {
        let shared = self.inner.shared.lock().unwrap();
        match shared.state {
            SessionState::Ready => shared.ready.clone(),
            _ => None,
        }
    }

    /// Cancelled when the link drops or the session is torn down. Hand
    /// this to a [`PacketWriter`] so an active transfer force-fails on
    /// disconnect.
    pub fn link_lost_token(&self) -> CancellationToken {
        self.inner.link_lost.clone()
    }

    /// Builds a writer bound to this session's resolved characteristic.
    /// Rejected unless the session is `Ready`; writes against an
    /// unresolved characteristic are a contract violation.
    pub fn writer(
        &self,
        transport: Arc<dyn Transport>,
        config: WriterConfig,
    ) -> Result<PacketWriter, BridgeError> {
        let shared = self.inner.shared.lock().unwrap();
        match (shared.state, shared.ready.as_ref()) {
            (SessionState::Ready, Some((handle, target))) => Ok(PacketWriter::new(
                transport,
                handle.clone(),
                *target,
                config,
                self.inner.link_lost.clone(),
            )),
            _ => Err(TransportError::NotConnected(
                "session has no resolved characteristic".into(),
            )
            .into()),
        }
    }

    /// Tears the session down: stops any scan, disconnects if connected,
    /// and force-fails any active write.
    pub async fn shutdown(&self) {
        let (prior, device, task) = {
            let mut shared = self.inner.shared.lock().unwrap();
            shared.armed = false;
            shared.scan_cancel.cancel();
            let prior = shared.state;
            let device = shared.ready.take().map(|(handle, _)| handle);
            if prior != SessionState::Idle {
                shared.state = SessionState::Disconnected;
            }
            (prior, device, shared.task.take())
        };

        if let Some(task) = task {
            task.abort();
        }
        self.inner.scanner.stop_scan().await;
        if let Some(handle) = device {
            if let Err(err) = self.inner.link.disconnect(&handle.id).await {
                warn!("Disconnect during shutdown failed: {err}");
            }
        }
        self.inner.link_lost.cancel();

        if prior != SessionState::Idle && prior != SessionState::Disconnected {
            let _ = self.inner.events.send(SessionEvent::Disconnected);
        }
        info!("Session shut down");
    }

    /// Level-triggered: recomputed from current signal values on every
    /// change, never from the edge that changed.
    fn reevaluate_gate(&self) {
        let mut shared = self.inner.shared.lock().unwrap();
        let gate_open = shared.armed && shared.radio_powered && shared.permission_granted;

        match shared.state {
            SessionState::Idle if gate_open => {
                info!(
                    "Gate open, starting scan (filter {:?})",
                    self.inner.config.name_filter
                );
                shared.state = SessionState::Scanning;
                let cancel = CancellationToken::new();
                shared.scan_cancel = cancel.clone();
                let inner = self.inner.clone();
                shared.task = Some(tokio::spawn(async move {
                    Inner::drive(inner, cancel).await;
                }));
            }
            SessionState::Scanning if !gate_open => {
                info!("Gate closed while scanning, stopping scan");
                shared.scan_cancel.cancel();
                shared.state = SessionState::Idle;
            }
            _ => {}
        }
    }
}

impl Drop for ConnectionSession {
    fn drop(&mut self) {
        // Guaranteed release on every exit path: no orphan scan, no
        // writer left waiting on a dead link.
        let mut shared = self.inner.shared.lock().unwrap();
        shared.scan_cancel.cancel();
        if let Some(task) = shared.task.take() {
            // The abort can land before the task's own stop_scan runs,
            // so a scanning session stops the backend scan here too.
            task.abort();
            if shared.state == SessionState::Scanning {
                if let Ok(runtime) = tokio::runtime::Handle::try_current() {
                    let scanner = self.inner.scanner.clone();
                    runtime.spawn(async move {
                        scanner.stop_scan().await;
                    });
                }
            }
        }
        self.inner.link_lost.cancel();
    }
}

impl Inner {
    async fn drive(inner: Arc<Inner>, cancel: CancellationToken) {
        if let Err(err) = inner.run_to_ready(&cancel).await {
            if cancel.is_cancelled() {
                // Gate drop or shutdown already handled the state.
                return;
            }
            error!("Connection session failed: {err}");
            inner.set_state(SessionState::Failed);
            let _ = inner.events.send(SessionEvent::Failed(err));
        }
    }

    async fn run_to_ready(self: &Arc<Self>, cancel: &CancellationToken) -> Result<(), BridgeError> {
        let mut adverts = self
            .scanner
            .scan()
            .await
            .map_err(|err| BridgeError::ScanError(err.to_string()))?;

        let device = loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    self.scanner.stop_scan().await;
                    return Ok(());
                }
                event = adverts.next() => match event {
                    Some(ScanEvent::Advertisement { id, name, rssi }) => {
                        let device = BleDevice::new(id, name, rssi);
                        debug!("Advertisement: {:?} ({}) rssi {:?}", device.name, device.id, device.rssi);
                        // Devices reported without a signal reading
                        // (already-connected ones) pass the floor.
                        if let (Some(floor), Some(rssi)) = (self.config.min_rssi, device.rssi) {
                            if rssi < floor {
                                continue;
                            }
                        }
                        if device.matches_filter(&self.config.name_filter) {
                            break device;
                        }
                    }
                    Some(ScanEvent::Error(message)) => {
                        self.scanner.stop_scan().await;
                        return Err(BridgeError::ScanError(message));
                    }
                    None => {
                        return Err(BridgeError::ScanError("scan stream ended".into()));
                    }
                }
            }
        };

        // First-seen match wins; stop scanning before connect so the two
        // never contend for the radio.
        self.scanner.stop_scan().await;
        {
            // The gate may have closed between the match and here. Its
            // handler only recognizes `Scanning`, so the transition to
            // `Found` must be claimed under the lock, or a relaunched
            // session would run concurrently with this one.
            let mut shared = self.shared.lock().unwrap();
            if cancel.is_cancelled() {
                return Ok(());
            }
            shared.state = SessionState::Found;
        }
        info!("Matched device {:?} ({})", device.name, device.id);
        let _ = self.events.send(SessionEvent::DeviceFound(device.clone()));

        self.set_state(SessionState::Connecting);
        let timeout = self.config.operation_timeout();
        let handle = tokio::time::timeout(timeout, self.link.connect(&device.id))
            .await
            .map_err(|_| BridgeError::Timeout("connect"))??;
        info!("Connected to {}", handle.id);
        self.set_state(SessionState::Connected);

        self.set_state(SessionState::Discovering);
        let services = tokio::time::timeout(timeout, self.gatt.discover_services(&handle))
            .await
            .map_err(|_| BridgeError::Timeout("service discovery"))??;
        let target = self.resolve_characteristic(&handle, services).await?;
        info!(
            "Resolved characteristic {} under service {}",
            target.characteristic, target.service
        );

        {
            let mut shared = self.shared.lock().unwrap();
            shared.ready = Some((handle.clone(), target));
            shared.state = SessionState::Ready;
        }

        self.spawn_disconnect_watch(&handle).await?;
        let _ = self.events.send(SessionEvent::Ready {
            handle,
            characteristic: target,
        });
        Ok(())
    }

    /// Walks discovered services for a characteristic, honoring the
    /// configured service/characteristic restrictions.
    async fn resolve_characteristic(
        self: &Arc<Self>,
        handle: &DeviceHandle,
        services: Vec<Uuid>,
    ) -> Result<CharacteristicRef, BridgeError> {
        let candidates = match self.config.service_filter {
            Some(wanted) if services.contains(&wanted) => vec![wanted],
            Some(wanted) => {
                for service in &services {
                    debug!("Available service: {service}");
                }
                return Err(
                    TransportError::Backend(format!("service {wanted} not found")).into(),
                );
            }
            None => services,
        };

        let timeout = self.config.operation_timeout();
        for service in candidates {
            let characteristics = tokio::time::timeout(
                timeout,
                self.gatt.discover_characteristics(handle, service),
            )
            .await
            .map_err(|_| BridgeError::Timeout("characteristic discovery"))??;

            let resolved = match self.config.characteristic_filter {
                Some(wanted) => characteristics
                    .into_iter()
                    .find(|c| c.characteristic == wanted),
                None => characteristics.into_iter().next(),
            };
            if let Some(target) = resolved {
                return Ok(target);
            }
        }
        Err(TransportError::Backend("no characteristic resolved".into()).into())
    }

    async fn spawn_disconnect_watch(
        self: &Arc<Self>,
        handle: &DeviceHandle,
    ) -> Result<(), BridgeError> {
        let mut events = self.link.subscribe_disconnect(&handle.id).await?;
        let inner = self.clone();
        tokio::spawn(async move {
            if events.next().await.is_some() {
                inner.on_link_lost();
            }
        });
        Ok(())
    }

    fn on_link_lost(&self) {
        {
            let mut shared = self.shared.lock().unwrap();
            if shared.state == SessionState::Disconnected {
                return;
            }
            shared.state = SessionState::Disconnected;
            shared.ready = None;
        }
        warn!("Device link lost, abandoning session work");
        self.link_lost.cancel();
        let _ = self.events.send(SessionEvent::Disconnected);
    }

    fn set_state(&self, state: SessionState) {
        self.shared.lock().unwrap().state = state;
    }
}
