//! Silence watchdog for the radio link.
//!
//! A pure timeout comparator: each tick it measures the time since the last
//! received frame and forces a reconnect when it crosses the configured
//! threshold. The threshold is deployment configuration (sparse meshes go
//! minutes between packets); the cool-down between forced reconnects is a
//! fixed escalation guard so a persistently unreachable peer cannot cause a
//! tight reconnect loop. The dead-socket event path in the gateway shortcuts
//! this monitor entirely, so a clean close recovers in well under one tick.

use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::LinkManager;
use crate::config::HealthConfig;

/// Outcome of one check tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthVerdict {
    Healthy,
    Silent,
}

/// Compare observed silence against the threshold.
pub fn assess(rx_age: Duration, threshold: Duration) -> HealthVerdict {
    if rx_age >= threshold {
        HealthVerdict::Silent
    } else {
        HealthVerdict::Healthy
    }
}

pub struct HealthMonitor {
    link: Arc<LinkManager>,
    check_interval: Duration,
    silence_threshold: Duration,
    /// Minimum spacing between forced reconnects from this monitor. Not part
    /// of the config surface; fixed relative to the check interval.
    cooldown: Duration,
    shutdown: watch::Receiver<bool>,
}

impl HealthMonitor {
    pub fn new(link: Arc<LinkManager>, cfg: &HealthConfig, shutdown: watch::Receiver<bool>) -> Self {
        let cfg = cfg.sanitized();
        let check_interval = Duration::from_secs(cfg.check_interval_secs);
        Self {
            link,
            check_interval,
            silence_threshold: Duration::from_secs(cfg.silence_threshold_secs),
            cooldown: check_interval * 3,
            shutdown,
        }
    }

    /// Override the cool-down guard; test hook only.
    #[doc(hidden)]
    pub fn with_cooldown(mut self, cooldown: Duration) -> Self {
        self.cooldown = cooldown;
        self
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) {
        let mut ticker = tokio::time::interval(self.check_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // A forced reconnect resets this; further forcing waits out the guard.
        let mut last_forced: Option<Instant> = None;
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.shutdown.changed() => {
                    if *self.shutdown.borrow() {
                        debug!("Health monitor observed shutdown");
                        return;
                    }
                    continue;
                }
            }

            if !self.link.is_connected() {
                // Disconnected means a reconnect is already in flight (or the
                // gateway chose to start without a device); nothing to watch.
                continue;
            }
            let Some(age) = self.link.last_rx_age() else {
                continue;
            };
            if assess(age, self.silence_threshold) == HealthVerdict::Healthy {
                continue;
            }
            if let Some(t) = last_forced {
                if t.elapsed() < self.cooldown {
                    debug!(
                        "Silence {}s persists but reconnect cool-down is active",
                        age.as_secs()
                    );
                    continue;
                }
            }
            warn!(
                "No frames received for {}s (threshold {}s)",
                age.as_secs(),
                self.silence_threshold.as_secs()
            );
            let observed = self.link.generation();
            match self.link.force_reconnect("silence timeout", observed).await {
                Ok(true) => {}
                Ok(false) => debug!("Another trigger already reconnected; watchdog no-op"),
                Err(e) => warn!("Watchdog reconnect did not complete: {}", e),
            }
            last_forced = Some(Instant::now());
        }
    }
}
