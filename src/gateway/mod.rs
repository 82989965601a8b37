//! # Gateway Runtime
//!
//! Wires the pieces together and drives the event loop: frames and
//! connection events from the link layer, a one-second housekeeping tick
//! (retention eviction, periodic stats), and the shutdown signal. The
//! notification/command layer is an external collaborator; it consumes the
//! routed partitions and the [`Gateway::send_text`] capability and nothing
//! else.
//!
//! Failure policy: anything local to one packet or one external call is
//! logged and swallowed at its boundary. Only conditions that make the core
//! non-functional (config unreadable, store cannot open, radio unreachable
//! with `require_device_at_startup`) are allowed to end the process.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use log::{debug, error, info, warn};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

use crate::config::Config;
use crate::ingest::decode::{decode_frame, encode_text};
use crate::ingest::{Classification, Classifier, SourceLane};
use crate::link::health::HealthMonitor;
use crate::link::{LinkError, LinkEvent, LinkManager};
use crate::logutil::truncate_for_log;
use crate::metrics;
use crate::services::weather::WeatherService;
use crate::store::PacketStore;

/// What happened to one ingested frame; returned for tests and diagnostics.
#[derive(Debug, PartialEq, Eq)]
pub enum IngestOutcome {
    Stored(SourceLane),
    Duplicate,
    Rejected,
    EchoDropped,
    PersistFailed,
}

pub struct Gateway {
    config: Config,
    link: Arc<LinkManager>,
    store: Arc<PacketStore>,
    classifier: Classifier,
    event_rx: Option<mpsc::UnboundedReceiver<LinkEvent>>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    our_node_id: Option<u32>,
    last_eviction: Instant,
    last_stats: Instant,
}

impl Gateway {
    pub fn new(config: Config) -> Result<Self> {
        let store = Arc::new(
            PacketStore::open(&config.storage.data_dir)
                .with_context(|| format!("cannot open packet store in {}", config.storage.data_dir))?,
        );
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let link = LinkManager::new(config.connection.clone(), event_tx, shutdown_rx.clone());
        let classifier = Classifier::new(&config.dedup);
        let our_node_id = config.gateway.node_id_numeric();
        Ok(Self {
            config,
            link,
            store,
            classifier,
            event_rx: Some(event_rx),
            shutdown_tx,
            shutdown_rx,
            our_node_id,
            last_eviction: Instant::now(),
            last_stats: Instant::now(),
        })
    }

    pub fn store(&self) -> Arc<PacketStore> {
        self.store.clone()
    }

    pub fn link(&self) -> Arc<LinkManager> {
        self.link.clone()
    }

    /// Outbound send boundary for the notification layer. Everything funnels
    /// through the lifecycle manager's single handle.
    pub async fn send_text(
        &self,
        text: &str,
        destination: Option<u32>,
        channel: u32,
    ) -> Result<(), LinkError> {
        let frame = encode_text(destination, channel, text);
        self.link.send_frame(&frame).await
    }

    /// Run until shutdown.
    pub async fn run(&mut self) -> Result<()> {
        info!("Gateway '{}' starting", self.config.gateway.name);

        // One-time lane migration; a failure here is loud but not fatal, it
        // retries on the next startup.
        match self.store.migrate_legacy_once() {
            Ok(0) => {}
            Ok(n) => info!("Startup migration moved {} record(s)", n),
            Err(e) => error!("Lane migration failed, will retry next startup: {}", e),
        }

        // Initial connect. The manager does not retry this internally; the
        // startup policy lives here.
        match self.link.connect().await {
            Ok(generation) => debug!("Initial connect done (generation {})", generation),
            Err(e) if self.config.connection.require_device_at_startup => {
                return Err(anyhow!("cannot open the radio transport: {}", e));
            }
            Err(e) => {
                warn!(
                    "Radio unreachable at startup ({}); background reconnect will keep trying",
                    e
                );
                self.spawn_reconnect("startup connect failed", 0);
            }
        }

        let health_task = HealthMonitor::new(
            self.link.clone(),
            &self.config.health,
            self.shutdown_rx.clone(),
        )
        .spawn();

        self.spawn_weather_poller();

        let mut event_rx = self
            .event_rx
            .take()
            .ok_or_else(|| anyhow!("gateway already running"))?;
        let mut tick = tokio::time::interval(Duration::from_secs(1));
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                maybe_event = event_rx.recv() => {
                    match maybe_event {
                        Some(event) => self.handle_link_event(event),
                        None => {
                            warn!("Link event channel closed");
                            break;
                        }
                    }
                }
                _ = tick.tick() => {
                    self.housekeeping();
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Received shutdown signal");
                    break;
                }
            }
        }

        // Shutdown: flip the watch once; every task observes it within one
        // tick/read-timeout. The connection is closed exactly once.
        let _ = self.shutdown_tx.send(true);
        self.link.close().await;
        if let Err(e) = self.store.flush() {
            warn!("Store flush on shutdown failed: {}", e);
        }
        let _ = tokio::time::timeout(Duration::from_secs(2), health_task).await;
        info!("Gateway shutdown complete");
        Ok(())
    }

    fn handle_link_event(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::Frame {
                generation,
                payload,
            } => {
                if generation != self.link.generation() {
                    debug!("Dropping frame from stale generation {}", generation);
                    return;
                }
                self.ingest_frame(&payload);
            }
            // Dead-socket shortcut: reconnect now instead of waiting for the
            // silence watchdog. Runs off the loop so housekeeping continues
            // through a long backoff.
            LinkEvent::PeerClosed { generation } => {
                warn!("Radio closed the connection (generation {})", generation);
                self.spawn_reconnect("peer closed", generation);
            }
            LinkEvent::ReadFailed { generation, error } => {
                warn!(
                    "Radio read failed (generation {}): {}",
                    generation, error
                );
                self.spawn_reconnect("read error", generation);
            }
        }
    }

    /// Decode, policy-filter, classify, and route one frame.
    pub fn ingest_frame(&mut self, payload: &[u8]) -> IngestOutcome {
        let event = match decode_frame(payload) {
            Ok(ev) => ev,
            Err(e) => {
                debug!("Rejected undecodable frame: {}", e);
                metrics::inc_packets_rejected();
                return IngestOutcome::Rejected;
            }
        };

        // Echoes of our own traffic are rejected by policy before the
        // classifier ever sees them; they are not duplicates.
        if Some(event.origin_id) == self.our_node_id {
            debug!("Dropping self-origin echo from 0x{:08X}", event.origin_id);
            metrics::inc_self_echoes_dropped();
            return IngestOutcome::EchoDropped;
        }

        match self.classifier.classify_event(event) {
            Classification::Fresh(record) => {
                let lane = record.source_lane;
                if let Some(text) = &record.payload_text {
                    debug!(
                        "Packet {}/{:?} from 0x{:08X}: {}",
                        lane.as_str(),
                        record.kind,
                        record.origin_id,
                        truncate_for_log(text, 80)
                    );
                }
                match self.store.route(&record) {
                    Ok(()) => {
                        match lane {
                            SourceLane::Radio => metrics::inc_packets_radio(),
                            SourceLane::Companion => metrics::inc_packets_companion(),
                        }
                        IngestOutcome::Stored(lane)
                    }
                    Err(e) => {
                        // Record dropped; the partition stays consistent and
                        // the process keeps running.
                        error!("Failed to persist packet: {}", e);
                        metrics::inc_persist_errors();
                        IngestOutcome::PersistFailed
                    }
                }
            }
            Classification::Duplicate => {
                debug!("Duplicate packet suppressed");
                metrics::inc_duplicates_suppressed();
                IngestOutcome::Duplicate
            }
            Classification::Rejected(e) => {
                debug!("Rejected packet: {}", e);
                metrics::inc_packets_rejected();
                IngestOutcome::Rejected
            }
        }
    }

    fn spawn_reconnect(&self, reason: &'static str, observed_generation: u64) {
        let link = self.link.clone();
        tokio::spawn(async move {
            match link.force_reconnect(reason, observed_generation).await {
                Ok(true) => {}
                Ok(false) => debug!("Reconnect ({}) already handled by another trigger", reason),
                Err(e) => debug!("Reconnect ({}) ended: {}", reason, e),
            }
        });
    }

    fn housekeeping(&mut self) {
        let eviction_every = Duration::from_secs(self.config.storage.eviction_interval_secs.max(60));
        if self.last_eviction.elapsed() >= eviction_every {
            self.last_eviction = Instant::now();
            self.run_retention_pass();
        }
        if self.last_stats.elapsed() >= Duration::from_secs(60) {
            self.last_stats = Instant::now();
            info!("stats {}", metrics::snapshot().summary());
        }
    }

    fn run_retention_pass(&self) {
        let passes = [
            (SourceLane::Radio, self.config.storage.radio_retention_hours),
            (
                SourceLane::Companion,
                self.config.storage.companion_retention_hours,
            ),
        ];
        for (lane, hours) in passes {
            if hours == 0 {
                continue; // retention disabled for this partition
            }
            let cutoff = chrono::Utc::now() - chrono::Duration::hours(hours as i64);
            match self.store.evict_older_than(lane, cutoff) {
                Ok(0) => {}
                Ok(n) => info!("Evicted {} record(s) from {} partition", n, lane.as_str()),
                Err(e) => error!("Retention pass failed for {}: {}", lane.as_str(), e),
            }
        }
    }

    /// Poll the weather feed on its own task so a slow or failing feed can
    /// never stall frame ingestion or kill unrelated periodic work.
    fn spawn_weather_poller(&self) {
        let mut service = WeatherService::new(self.config.weather.clone());
        if !service.is_configured() {
            return;
        }
        let mut shutdown = self.shutdown_rx.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(300));
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match service.current_conditions().await {
                            Ok(report) => info!("{}", report),
                            Err(e) => warn!("Weather poll skipped: {}", e),
                        }
                    }
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            return;
                        }
                    }
                }
            }
        });
    }
}
