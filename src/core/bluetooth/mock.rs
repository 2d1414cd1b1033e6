//! Collaborator stubs for writer and session tests. Writes, scans, and
//! connects are recorded in an operation log so tests can assert
//! ordering (scan stopped before connect, no dispatch after abort).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use futures_util::stream::{self, BoxStream, StreamExt};
use tokio::sync::{mpsc, watch, Semaphore};
use uuid::Uuid;

use crate::core::bluetooth::transport::{
    GattAccessor, Link, ScanEvent, Scanner, Transport, TransportError,
};
use crate::core::bluetooth::types::{CharacteristicRef, DeviceHandle};

/// Shared, observable log of collaborator operations.
#[derive(Clone)]
pub struct OpLog {
    entries: Arc<Mutex<Vec<String>>>,
    version: watch::Sender<usize>,
}

impl OpLog {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(Mutex::new(Vec::new())),
            version: watch::channel(0).0,
        }
    }

    pub fn push(&self, entry: impl Into<String>) {
        self.entries.lock().unwrap().push(entry.into());
        self.version.send_modify(|v| *v += 1);
    }

    pub fn entries(&self) -> Vec<String> {
        self.entries.lock().unwrap().clone()
    }

    pub fn index_of(&self, entry: &str) -> Option<usize> {
        self.entries().iter().position(|e| e == entry)
    }

    pub async fn wait_for(&self, entry: &str) {
        let mut rx = self.version.subscribe();
        loop {
            if self.index_of(entry).is_some() {
                return;
            }
            rx.changed().await.expect("log sender alive");
        }
    }
}

// ── Transport ───────────────────────────────────────────────────────────

pub struct MockTransport {
    writes: Mutex<Vec<Vec<u8>>>,
    write_count: watch::Sender<usize>,
    /// Remaining transient failures keyed by a packet's first byte.
    fail_plan: Mutex<HashMap<u8, u32>>,
    /// When present, each write must acquire a permit before settling.
    gate: Option<Arc<Semaphore>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self {
            writes: Mutex::new(Vec::new()),
            write_count: watch::channel(0).0,
            fail_plan: Mutex::new(HashMap::new()),
            gate: None,
        }
    }

    /// A transport whose writes block until [`release_writes`] grants
    /// permits.
    pub fn gated() -> Self {
        Self {
            gate: Some(Arc::new(Semaphore::new(0))),
            ..Self::new()
        }
    }

    /// The next `count` writes whose first byte is `first_byte` fail
    /// with a retryable error.
    pub fn fail_packet(&self, first_byte: u8, count: u32) {
        self.fail_plan.lock().unwrap().insert(first_byte, count);
    }

    pub fn release_writes(&self, count: usize) {
        self.gate
            .as_ref()
            .expect("transport is not gated")
            .add_permits(count);
    }

    pub fn written_bytes(&self) -> Vec<Vec<u8>> {
        self.writes.lock().unwrap().clone()
    }

    pub async fn wait_for_writes(&self, count: usize) {
        let mut rx = self.write_count.subscribe();
        while *rx.borrow() < count {
            rx.changed().await.expect("transport alive");
        }
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn write(
        &self,
        _handle: &DeviceHandle,
        _target: &CharacteristicRef,
        bytes: &[u8],
        _with_response: bool,
    ) -> Result<(), TransportError> {
        if let Some(gate) = self.gate.as_ref() {
            gate.acquire().await.expect("gate open").forget();
        }

        // Attempts are recorded before the fail plan is consulted, so
        // the log is a full dispatch trace including rejected writes.
        self.writes.lock().unwrap().push(bytes.to_vec());
        self.write_count.send_modify(|n| *n += 1);

        if let Some(first) = bytes.first() {
            let mut plan = self.fail_plan.lock().unwrap();
            if let Some(remaining) = plan.get_mut(first) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(TransportError::WriteFailed("stubbed failure".into()));
                }
            }
        }
        Ok(())
    }
}

// ── Scanner ─────────────────────────────────────────────────────────────

pub struct MockScanner {
    events: Vec<ScanEvent>,
    /// Keep the stream open after the scripted events, as a real scan
    /// stream would be.
    hold_open: bool,
    /// When present, each `stop_scan` must acquire a permit before
    /// returning.
    stop_gate: Option<Arc<Semaphore>>,
    log: OpLog,
}

impl MockScanner {
    pub fn new(events: Vec<ScanEvent>, log: OpLog) -> Self {
        Self {
            events,
            hold_open: true,
            stop_gate: None,
            log,
        }
    }

    /// A scanner whose `stop_scan` blocks until [`release_stops`]
    /// grants permits, parking the caller between the scan and whatever
    /// follows it.
    pub fn stalling_stop(events: Vec<ScanEvent>, log: OpLog) -> Self {
        Self {
            stop_gate: Some(Arc::new(Semaphore::new(0))),
            ..Self::new(events, log)
        }
    }

    pub fn release_stops(&self, count: usize) {
        self.stop_gate
            .as_ref()
            .expect("scanner stop is not gated")
            .add_permits(count);
    }

    /// A scanner whose stream ends after the scripted events, as when
    /// the platform tears the scan down underneath us.
    pub fn closing(events: Vec<ScanEvent>, log: OpLog) -> Self {
        Self {
            hold_open: false,
            ..Self::new(events, log)
        }
    }

    pub fn advert(id: &str, name: &str) -> ScanEvent {
        Self::advert_with_rssi(id, name, -50)
    }

    pub fn advert_with_rssi(id: &str, name: &str, rssi: i16) -> ScanEvent {
        ScanEvent::Advertisement {
            id: id.to_string(),
            name: Some(name.to_string()),
            rssi: Some(rssi),
        }
    }
}

#[async_trait]
impl Scanner for MockScanner {
    async fn scan(&self) -> Result<BoxStream<'static, ScanEvent>, TransportError> {
        self.log.push("scan");
        let scripted = stream::iter(self.events.clone());
        if self.hold_open {
            Ok(scripted.chain(stream::pending()).boxed())
        } else {
            Ok(scripted.boxed())
        }
    }

    async fn stop_scan(&self) {
        if let Some(gate) = self.stop_gate.as_ref() {
            gate.acquire().await.expect("stop gate open").forget();
        }
        self.log.push("stop_scan");
    }
}

// ── Link ────────────────────────────────────────────────────────────────

pub struct MockLink {
    log: OpLog,
    hang_connect: bool,
    fail_connect: bool,
    disconnect_tx: mpsc::UnboundedSender<()>,
    disconnect_rx: Mutex<Option<mpsc::UnboundedReceiver<()>>>,
}

impl MockLink {
    pub fn new(log: OpLog) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            log,
            hang_connect: false,
            fail_connect: false,
            disconnect_tx: tx,
            disconnect_rx: Mutex::new(Some(rx)),
        }
    }

    pub fn hanging(log: OpLog) -> Self {
        Self {
            hang_connect: true,
            ..Self::new(log)
        }
    }

    pub fn refusing(log: OpLog) -> Self {
        Self {
            fail_connect: true,
            ..Self::new(log)
        }
    }

    /// Simulates the peripheral dropping the link.
    pub fn fire_disconnect(&self) {
        let _ = self.disconnect_tx.send(());
    }
}

#[async_trait]
impl Link for MockLink {
    async fn connect(&self, id: &str) -> Result<DeviceHandle, TransportError> {
        self.log.push(format!("connect:{id}"));
        if self.hang_connect {
            futures_util::future::pending::<()>().await;
        }
        if self.fail_connect {
            return Err(TransportError::Backend("connect refused".into()));
        }
        Ok(DeviceHandle {
            id: id.to_string(),
            name: Some("Scent_d60000-foo".to_string()),
        })
    }

    async fn disconnect(&self, id: &str) -> Result<(), TransportError> {
        self.log.push(format!("disconnect:{id}"));
        Ok(())
    }

    async fn subscribe_disconnect(
        &self,
        _id: &str,
    ) -> Result<BoxStream<'static, ()>, TransportError> {
        match self.disconnect_rx.lock().unwrap().take() {
            Some(rx) => Ok(stream::unfold(rx, |mut rx| async move {
                rx.recv().await.map(|item| (item, rx))
            })
            .boxed()),
            None => Ok(stream::pending().boxed()),
        }
    }
}

// ── GATT ────────────────────────────────────────────────────────────────

pub struct MockGatt {
    services: Vec<Uuid>,
    characteristics: HashMap<Uuid, Vec<CharacteristicRef>>,
    log: OpLog,
}

impl MockGatt {
    pub fn new(log: OpLog) -> Self {
        Self {
            services: Vec::new(),
            characteristics: HashMap::new(),
            log,
        }
    }

    pub fn with_characteristic(log: OpLog, service: Uuid, characteristic: Uuid) -> Self {
        let mut gatt = Self::new(log);
        gatt.add(service, characteristic);
        gatt
    }

    pub fn add(&mut self, service: Uuid, characteristic: Uuid) {
        if !self.services.contains(&service) {
            self.services.push(service);
        }
        self.characteristics
            .entry(service)
            .or_default()
            .push(CharacteristicRef {
                service,
                characteristic,
            });
    }
}

#[async_trait]
impl GattAccessor for MockGatt {
    async fn discover_services(
        &self,
        _handle: &DeviceHandle,
    ) -> Result<Vec<Uuid>, TransportError> {
        self.log.push("discover_services");
        Ok(self.services.clone())
    }

    async fn discover_characteristics(
        &self,
        _handle: &DeviceHandle,
        service: Uuid,
    ) -> Result<Vec<CharacteristicRef>, TransportError> {
        self.log.push(format!("discover_characteristics:{service}"));
        Ok(self
            .characteristics
            .get(&service)
            .cloned()
            .unwrap_or_default())
    }
}
