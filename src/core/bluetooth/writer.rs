//! Packet delivery engine.
//! Drives one packetized payload over a [`Transport`] in strict sequence
//! order: per-packet retry with linear backoff, inter-packet pacing,
//! single-flight, cancellation, and progress reporting.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use log::{debug, info, warn};
use tokio_util::sync::CancellationToken;

use crate::config::WriterConfig;
use crate::core::bluetooth::packet::{self, Packet};
use crate::core::bluetooth::transport::{Transport, TransportError};
use crate::core::bluetooth::types::{CharacteristicRef, DeviceHandle};
use crate::core::bluetooth::codec;
use crate::error::BridgeError;

/// Progress observer: `(completed, total)` after each successful packet.
pub type ProgressFn = Box<dyn Fn(usize, usize) + Send + Sync>;

/// One in-flight multi-packet transfer: the packet sequence plus the
/// cursor of the next packet to send. Never advances past a packet that
/// has not settled successfully.
struct WriteSession {
    packets: Vec<Packet>,
    cursor: usize,
}

impl WriteSession {
    fn new(packets: Vec<Packet>) -> Self {
        Self { packets, cursor: 0 }
    }

    fn total(&self) -> usize {
        self.packets.len()
    }

    fn current(&self) -> Option<&Packet> {
        self.packets.get(self.cursor)
    }

    fn advance(&mut self) {
        self.cursor += 1;
    }
}

/// Writes large payloads to a resolved characteristic on a connected
/// device. At most one write session may be in flight per writer.
#[derive(Clone)]
pub struct PacketWriter {
    transport: Arc<dyn Transport>,
    handle: DeviceHandle,
    target: CharacteristicRef,
    config: WriterConfig,
    writing: Arc<AtomicBool>,
    cancel: Arc<Mutex<CancellationToken>>,
    link_lost: CancellationToken,
}

/// Clears the single-flight flag on every exit path of a session.
struct FlightGuard(Arc<AtomicBool>);

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl PacketWriter {
    /// `link_lost` is cancelled by the owning session when the device
    /// disconnects; an active write session then fails with `LinkLost`.
    pub fn new(
        transport: Arc<dyn Transport>,
        handle: DeviceHandle,
        target: CharacteristicRef,
        config: WriterConfig,
        link_lost: CancellationToken,
    ) -> Self {
        Self {
            transport,
            handle,
            target,
            config,
            writing: Arc::new(AtomicBool::new(false)),
            cancel: Arc::new(Mutex::new(CancellationToken::new())),
            link_lost,
        }
    }

    /// Delivers a hex-encoded payload as a sequence of MTU-bounded
    /// packets. Fails before any radio activity on malformed input or
    /// configuration; fails with `AlreadyWriting` if a session is
    /// already in flight.
    pub async fn write_large_payload(
        &self,
        hex: &str,
        progress: Option<ProgressFn>,
    ) -> Result<(), BridgeError> {
        self.config.validate()?;
        let payload = codec::decode(hex)?;
        let packets = packet::split(&payload, self.config.chunk_size, self.config.add_checksum)?;

        if self
            .writing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(BridgeError::AlreadyWriting);
        }
        let _guard = FlightGuard(self.writing.clone());

        // Fresh token per session so an earlier cancel cannot poison
        // this one.
        let cancel = {
            let mut slot = self.cancel.lock().unwrap();
            *slot = CancellationToken::new();
            slot.clone()
        };

        let mut session = WriteSession::new(packets);
        let total = session.total();
        info!(
            "Starting write session: {} bytes in {} packets to {}",
            payload.len(),
            total,
            self.handle.id
        );

        while let Some(packet) = session.current().cloned() {
            let index = packet.index;
            self.deliver_with_retry(&packet, total, &cancel).await?;
            session.advance();
            debug!("Packet {}/{} written", index + 1, total);
            if let Some(observer) = progress.as_ref() {
                observer(session.cursor, total);
            }

            if session.cursor < total {
                self.pause(self.config.inter_packet_delay(), &cancel).await?;
                // Checked after the pause so a cancel that lands while
                // the current packet settles, or during the pacing
                // delay itself, stops the next dispatch.
                if cancel.is_cancelled() {
                    info!("Write session cancelled after {} of {} packets", session.cursor, total);
                    return Err(BridgeError::Cancelled {
                        sent: session.cursor,
                        total,
                    });
                }
            }
        }

        info!("Write session complete: {} packets delivered", total);
        Ok(())
    }

    /// Cancels the active write session, if any. Advisory: a transport
    /// call already issued is left to settle, but no packet after it is
    /// dispatched.
    pub fn cancel(&self) {
        self.cancel.lock().unwrap().cancel();
    }

    /// One packet, retried up to the configured budget with linear
    /// backoff. Link loss is terminal and never retried.
    async fn deliver_with_retry(
        &self,
        packet: &Packet,
        total: usize,
        cancel: &CancellationToken,
    ) -> Result<(), BridgeError> {
        let bytes = packet.wire_bytes();
        let mut attempts: u32 = 0;

        loop {
            if self.link_lost.is_cancelled() {
                return Err(BridgeError::LinkLost);
            }

            let written = tokio::select! {
                result = self.transport.write(
                    &self.handle,
                    &self.target,
                    &bytes,
                    self.config.with_response,
                ) => result,
                _ = self.link_lost.cancelled() => Err(TransportError::LinkLost),
            };

            match written {
                Ok(()) => return Ok(()),
                Err(TransportError::LinkLost) | Err(TransportError::NotConnected(_)) => {
                    warn!("Link lost while writing packet {} of {}", packet.index, total);
                    return Err(BridgeError::LinkLost);
                }
                Err(err) => {
                    attempts += 1;
                    if attempts > self.config.max_retries {
                        warn!(
                            "Packet {} of {} failed after {} attempts: {}",
                            packet.index, total, attempts, err
                        );
                        return Err(BridgeError::PacketDeliveryFailed {
                            index: packet.index,
                            total,
                        });
                    }
                    warn!(
                        "Packet {} write failed ({}), retry {}/{}",
                        packet.index, err, attempts, self.config.max_retries
                    );
                    self.pause(self.config.backoff_delay(attempts), cancel).await?;
                    if cancel.is_cancelled() {
                        return Err(BridgeError::Cancelled {
                            sent: packet.index,
                            total,
                        });
                    }
                }
            }
        }
    }

    /// Sleeps unless the link drops first. Resolves early when `cancel`
    /// fires so the caller can observe it without waiting out the
    /// delay.
    async fn pause(
        &self,
        duration: std::time::Duration,
        cancel: &CancellationToken,
    ) -> Result<(), BridgeError> {
        tokio::select! {
            _ = tokio::time::sleep(duration) => Ok(()),
            _ = self.link_lost.cancelled() => Err(BridgeError::LinkLost),
            _ = cancel.cancelled() => Ok(()),
        }
    }
}
