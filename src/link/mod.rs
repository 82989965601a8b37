//! # Radio Link Lifecycle
//!
//! The radio firmware accepts exactly one live transport connection and
//! silently drops any prior connection when a new one is opened. This module
//! manages around that constraint: [`LinkManager`] owns the single
//! [`ConnectionHandle`] for the whole process and is the only component
//! allowed to open the endpoint. Everything else obtains send capability
//! through [`LinkManager::send_frame`] and never touches the socket.
//!
//! Each (re)connect increments a monotonic generation counter. Frames are
//! delivered tagged with the generation that produced them so consumers can
//! discard stale data, and a `force_reconnect` caller holding a stale
//! generation becomes a no-op -- that is what prevents the dead-socket
//! callback and the silence watchdog from double-reconnecting when they race.

pub mod framer;
pub mod health;
pub mod transport;

use std::sync::atomic::{AtomicI64, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use log::{debug, info, warn};
use rand::Rng;
use thiserror::Error;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;

use crate::config::ConnectionConfig;
use crate::metrics;
use transport::{TransportReader, TransportWriter};

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("failed to open radio transport: {0}")]
    Connect(String),
    #[error("no live radio connection")]
    NotConnected,
    #[error("radio transport write failed: {0}")]
    SendFailed(String),
    #[error("shutdown in progress")]
    Shutdown,
}

/// Connection lifecycle states, readable by diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LinkState {
    Disconnected = 0,
    Connecting = 1,
    Connected = 2,
    Degraded = 3,
}

impl LinkState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => LinkState::Connecting,
            2 => LinkState::Connected,
            3 => LinkState::Degraded,
            _ => LinkState::Disconnected,
        }
    }
}

/// Events emitted by the per-generation read loop.
#[derive(Debug)]
pub enum LinkEvent {
    /// A whole frame arrived on the given generation.
    Frame { generation: u64, payload: Vec<u8> },
    /// The peer closed the stream cleanly (zero-length read). This is the
    /// dead-connection signal: react immediately, don't wait for the watchdog.
    PeerClosed { generation: u64 },
    /// The read half errored; treated like a dead connection.
    ReadFailed { generation: u64, error: String },
}

/// One live transport connection. Created by the manager, superseded on
/// reconnect, never handed out to other components.
pub struct ConnectionHandle {
    generation: u64,
    writer: Mutex<TransportWriter>,
    state: AtomicU8,
    last_rx_ms: AtomicI64,
    last_tx_ms: AtomicI64,
}

impl ConnectionHandle {
    fn new(generation: u64, writer: TransportWriter) -> Self {
        let now = Utc::now().timestamp_millis();
        Self {
            generation,
            writer: Mutex::new(writer),
            state: AtomicU8::new(LinkState::Connected as u8),
            last_rx_ms: AtomicI64::new(now),
            last_tx_ms: AtomicI64::new(now),
        }
    }

    fn touch_rx(&self) {
        self.last_rx_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    fn touch_tx(&self) {
        self.last_tx_ms
            .store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    fn state(&self) -> LinkState {
        LinkState::from_u8(self.state.load(Ordering::Relaxed))
    }

    fn set_state(&self, s: LinkState) {
        self.state.store(s as u8, Ordering::Relaxed);
    }
}

/// Owns the process-wide radio connection and serializes every lifecycle
/// transition behind one async mutex.
pub struct LinkManager {
    cfg: ConnectionConfig,
    /// Current handle; readers observe either the old handle fully functional
    /// or the new one, never a half-installed state.
    handle: std::sync::RwLock<Option<Arc<ConnectionHandle>>>,
    /// Monotonic generation counter; incremented on every (re)connect.
    generation: AtomicU64,
    /// Serializes connect / force_reconnect so concurrent triggers cannot
    /// double-reconnect.
    lifecycle: Mutex<()>,
    /// Read-loop task of the current generation; aborted when superseded.
    read_task: std::sync::Mutex<Option<JoinHandle<()>>>,
    event_tx: mpsc::UnboundedSender<LinkEvent>,
    shutdown: watch::Receiver<bool>,
}

impl LinkManager {
    pub fn new(
        cfg: ConnectionConfig,
        event_tx: mpsc::UnboundedSender<LinkEvent>,
        shutdown: watch::Receiver<bool>,
    ) -> Arc<Self> {
        Arc::new(Self {
            cfg,
            handle: std::sync::RwLock::new(None),
            generation: AtomicU64::new(0),
            lifecycle: Mutex::new(()),
            read_task: std::sync::Mutex::new(None),
            event_tx,
            shutdown,
        })
    }

    /// Current connection generation (0 before the first connect).
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> LinkState {
        self.handle
            .read()
            .expect("link handle lock poisoned")
            .as_ref()
            .map(|h| h.state())
            .unwrap_or(LinkState::Disconnected)
    }

    pub fn is_connected(&self) -> bool {
        matches!(self.state(), LinkState::Connected | LinkState::Degraded)
    }

    /// Elapsed time since the last successfully received frame, or None when
    /// no connection exists.
    pub fn last_rx_age(&self) -> Option<Duration> {
        let guard = self.handle.read().expect("link handle lock poisoned");
        let handle = guard.as_ref()?;
        let last = handle.last_rx_ms.load(Ordering::Relaxed);
        let now = Utc::now().timestamp_millis();
        Some(Duration::from_millis((now - last).max(0) as u64))
    }

    /// Elapsed time since the last successful send, or None when no
    /// connection exists.
    pub fn last_tx_age(&self) -> Option<Duration> {
        let guard = self.handle.read().expect("link handle lock poisoned");
        let handle = guard.as_ref()?;
        let last = handle.last_tx_ms.load(Ordering::Relaxed);
        let now = Utc::now().timestamp_millis();
        Some(Duration::from_millis((now - last).max(0) as u64))
    }

    /// Establish the connection. Fails if the transport cannot be opened;
    /// the caller decides the startup retry policy. A second call while a
    /// handle is live is refused and reports the existing generation -- the
    /// single-connection constraint is enforced here, not merely documented.
    pub async fn connect(self: &Arc<Self>) -> Result<u64, LinkError> {
        let _guard = self.lifecycle.lock().await;
        if let Some(existing) = self
            .handle
            .read()
            .expect("link handle lock poisoned")
            .as_ref()
        {
            warn!(
                "Refusing second open of radio endpoint; returning existing generation {}",
                existing.generation
            );
            return Ok(existing.generation);
        }
        let (reader, writer) = transport::connect(&self.cfg.host, self.cfg.port)
            .await
            .map_err(|e| LinkError::Connect(e.to_string()))?;
        let generation = self.install(reader, writer);
        info!(
            "Radio link established to {}:{} (generation {})",
            self.cfg.host, self.cfg.port, generation
        );
        Ok(generation)
    }

    /// Send one already-encoded frame through the single live connection.
    pub async fn send_frame(&self, payload: &[u8]) -> Result<(), LinkError> {
        let handle = {
            let guard = self.handle.read().expect("link handle lock poisoned");
            guard.as_ref().cloned().ok_or(LinkError::NotConnected)?
        };
        let mut writer = handle.writer.lock().await;
        match writer.write_frame(payload).await {
            Ok(()) => {
                handle.touch_tx();
                Ok(())
            }
            Err(e) => {
                handle.set_state(LinkState::Degraded);
                metrics::inc_send_failures();
                Err(LinkError::SendFailed(e.to_string()))
            }
        }
    }

    /// Tear down the current handle and rebuild the connection with
    /// exponential backoff. `observed_generation` is the generation the
    /// caller believed was live: if another trigger already reconnected, the
    /// observed generation is stale and this call is a no-op returning
    /// `Ok(false)`. Returns `Ok(true)` once a new handle is installed.
    ///
    /// Retries until success or shutdown; an unreachable peer produces
    /// periodic attempt logs with growing delays, never a crash loop.
    pub async fn force_reconnect(
        self: &Arc<Self>,
        reason: &str,
        observed_generation: u64,
    ) -> Result<bool, LinkError> {
        let _guard = self.lifecycle.lock().await;
        let current = self.generation();
        if current != observed_generation {
            debug!(
                "Skipping forced reconnect ({}): generation moved {} -> {}",
                reason, observed_generation, current
            );
            return Ok(false);
        }
        warn!(
            "Forcing radio reconnect (reason: {}, generation {})",
            reason, current
        );
        metrics::inc_reconnects_forced();
        self.teardown();

        let mut delay = self.cfg.base_delay();
        let mut attempt: u32 = 0;
        let mut shutdown = self.shutdown.clone();
        loop {
            if *shutdown.borrow() {
                return Err(LinkError::Shutdown);
            }
            attempt += 1;
            match transport::connect(&self.cfg.host, self.cfg.port).await {
                Ok((reader, writer)) => {
                    let generation = self.install(reader, writer);
                    info!(
                        "Radio link re-established after {} attempt(s) (generation {})",
                        attempt, generation
                    );
                    return Ok(true);
                }
                Err(e) => {
                    warn!(
                        "Reconnect attempt {} failed: {} (next try in {:?})",
                        attempt, e, delay
                    );
                    let sleep_for = delay + self.jitter();
                    tokio::select! {
                        _ = tokio::time::sleep(sleep_for) => {}
                        _ = shutdown.changed() => {
                            if *shutdown.borrow() {
                                return Err(LinkError::Shutdown);
                            }
                        }
                    }
                    delay = (delay * 2).min(self.cfg.max_delay());
                }
            }
        }
    }

    /// Close the connection exactly once on shutdown; subsequent calls are
    /// no-ops.
    pub async fn close(&self) {
        let _guard = self.lifecycle.lock().await;
        if self
            .handle
            .read()
            .expect("link handle lock poisoned")
            .is_some()
        {
            info!("Closing radio link (generation {})", self.generation());
            self.teardown();
        }
    }

    fn jitter(&self) -> Duration {
        if self.cfg.reconnect_jitter_ms == 0 {
            return Duration::ZERO;
        }
        let ms = rand::thread_rng().gen_range(0..=self.cfg.reconnect_jitter_ms);
        Duration::from_millis(ms)
    }

    /// Drop the current handle and abort its read loop. Called with the
    /// lifecycle lock held.
    fn teardown(&self) {
        if let Some(old) = self
            .handle
            .write()
            .expect("link handle lock poisoned")
            .take()
        {
            old.set_state(LinkState::Disconnected);
        }
        if let Some(task) = self
            .read_task
            .lock()
            .expect("read task lock poisoned")
            .take()
        {
            task.abort();
        }
    }

    /// Install a fresh handle under the lifecycle lock and spawn its read
    /// loop. The handle swap is atomic with respect to `send_frame` readers.
    fn install(self: &Arc<Self>, reader: TransportReader, writer: TransportWriter) -> u64 {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let handle = Arc::new(ConnectionHandle::new(generation, writer));
        *self.handle.write().expect("link handle lock poisoned") = Some(handle.clone());

        let event_tx = self.event_tx.clone();
        let shutdown = self.shutdown.clone();
        let task = tokio::spawn(read_loop(reader, handle, generation, event_tx, shutdown));
        if let Some(old) = self
            .read_task
            .lock()
            .expect("read task lock poisoned")
            .replace(task)
        {
            old.abort();
        }
        generation
    }
}

/// One read loop per connection generation: frames from a single generation
/// are produced in receipt order. No ordering is promised across a reconnect
/// boundary; in-flight packets of a dead generation may be lost.
async fn read_loop(
    mut reader: TransportReader,
    handle: Arc<ConnectionHandle>,
    generation: u64,
    event_tx: mpsc::UnboundedSender<LinkEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            result = reader.read_frame() => {
                match result {
                    Ok(Some(payload)) => {
                        handle.touch_rx();
                        metrics::inc_frames_received();
                        if event_tx.send(LinkEvent::Frame { generation, payload }).is_err() {
                            return; // consumer gone, process is exiting
                        }
                    }
                    Ok(None) => {
                        handle.set_state(LinkState::Disconnected);
                        let _ = event_tx.send(LinkEvent::PeerClosed { generation });
                        return;
                    }
                    Err(e) => {
                        handle.set_state(LinkState::Disconnected);
                        let _ = event_tx.send(LinkEvent::ReadFailed {
                            generation,
                            error: e.to_string(),
                        });
                        return;
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    debug!("Read loop generation {} observed shutdown", generation);
                    return;
                }
            }
        }
    }
}
