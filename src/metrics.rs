//! Process-wide ingestion and link counters.
//! Exposed through [`snapshot`] for the `status` command and the periodic stats log.
use std::sync::atomic::{AtomicU64, Ordering};

static FRAMES_RECEIVED: AtomicU64 = AtomicU64::new(0);
static PACKETS_RADIO: AtomicU64 = AtomicU64::new(0);
static PACKETS_COMPANION: AtomicU64 = AtomicU64::new(0);
static DUPLICATES_SUPPRESSED: AtomicU64 = AtomicU64::new(0);
static PACKETS_REJECTED: AtomicU64 = AtomicU64::new(0);
static SELF_ECHOES_DROPPED: AtomicU64 = AtomicU64::new(0);
static RECONNECTS_FORCED: AtomicU64 = AtomicU64::new(0);
static SEND_FAILURES: AtomicU64 = AtomicU64::new(0);
static RECORDS_EVICTED: AtomicU64 = AtomicU64::new(0);
static RECORDS_MIGRATED: AtomicU64 = AtomicU64::new(0);
static PERSIST_ERRORS: AtomicU64 = AtomicU64::new(0);

pub fn inc_frames_received() {
    FRAMES_RECEIVED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_packets_radio() {
    PACKETS_RADIO.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_packets_companion() {
    PACKETS_COMPANION.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_duplicates_suppressed() {
    DUPLICATES_SUPPRESSED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_packets_rejected() {
    PACKETS_REJECTED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_self_echoes_dropped() {
    SELF_ECHOES_DROPPED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_reconnects_forced() {
    RECONNECTS_FORCED.fetch_add(1, Ordering::Relaxed);
}
pub fn inc_send_failures() {
    SEND_FAILURES.fetch_add(1, Ordering::Relaxed);
}
pub fn add_records_evicted(n: u64) {
    RECORDS_EVICTED.fetch_add(n, Ordering::Relaxed);
}
pub fn add_records_migrated(n: u64) {
    RECORDS_MIGRATED.fetch_add(n, Ordering::Relaxed);
}
pub fn inc_persist_errors() {
    PERSIST_ERRORS.fetch_add(1, Ordering::Relaxed);
}

#[derive(Debug, Default, Clone)]
pub struct Snapshot {
    pub frames_received: u64,
    pub packets_radio: u64,
    pub packets_companion: u64,
    pub duplicates_suppressed: u64,
    pub packets_rejected: u64,
    pub self_echoes_dropped: u64,
    pub reconnects_forced: u64,
    pub send_failures: u64,
    pub records_evicted: u64,
    pub records_migrated: u64,
    pub persist_errors: u64,
}

pub fn snapshot() -> Snapshot {
    Snapshot {
        frames_received: FRAMES_RECEIVED.load(Ordering::Relaxed),
        packets_radio: PACKETS_RADIO.load(Ordering::Relaxed),
        packets_companion: PACKETS_COMPANION.load(Ordering::Relaxed),
        duplicates_suppressed: DUPLICATES_SUPPRESSED.load(Ordering::Relaxed),
        packets_rejected: PACKETS_REJECTED.load(Ordering::Relaxed),
        self_echoes_dropped: SELF_ECHOES_DROPPED.load(Ordering::Relaxed),
        reconnects_forced: RECONNECTS_FORCED.load(Ordering::Relaxed),
        send_failures: SEND_FAILURES.load(Ordering::Relaxed),
        records_evicted: RECORDS_EVICTED.load(Ordering::Relaxed),
        records_migrated: RECORDS_MIGRATED.load(Ordering::Relaxed),
        persist_errors: PERSIST_ERRORS.load(Ordering::Relaxed),
    }
}

impl Snapshot {
    /// One-line summary used by the periodic stats log.
    pub fn summary(&self) -> String {
        format!(
            "frames={} radio={} companion={} dupes={} rejected={} echoes={} reconnects={} send_fail={} evicted={} migrated={} persist_err={}",
            self.frames_received,
            self.packets_radio,
            self.packets_companion,
            self.duplicates_suppressed,
            self.packets_rejected,
            self.self_echoes_dropped,
            self.reconnects_forced,
            self.send_failures,
            self.records_evicted,
            self.records_migrated,
            self.persist_errors,
        )
    }
}
