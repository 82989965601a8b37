//! # Packet Classification & Deduplication
//!
//! Every frame the link layer delivers passes through here exactly once:
//! decode (the external protocol boundary in [`decode`]), then fingerprint
//! and duplicate suppression, then conversion into an immutable
//! [`PacketRecord`] ready for routing.
//!
//! The mesh retransmits aggressively, so the same logical packet commonly
//! arrives several times within a few seconds. The deduplicator keeps a
//! bounded recent-fingerprint cache; entries older than the configured
//! horizon may re-admit, which is acceptable because genuine radio
//! retransmissions arrive within seconds, not minutes.

pub mod decode;

use std::collections::{HashMap, VecDeque};

use chrono::{DateTime, Utc};
use crc::{Crc, CRC_32_ISO_HDLC};
use serde::{Deserialize, Serialize};

use crate::config::DedupConfig;
use decode::{decode_frame, DecodeError};

const CONTENT_CRC: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// Logical protocol origin of a packet. Set once at decode time from the
/// envelope's explicit lane tag; routing and partitioning key off this and
/// nothing else.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceLane {
    Radio,
    Companion,
}

impl SourceLane {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceLane::Radio => "radio",
            SourceLane::Companion => "companion",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PacketKind {
    Text,
    Position,
    Telemetry,
    NodeInfo,
}

/// One decoded unit from the protocol boundary, before dedup.
#[derive(Debug, Clone)]
pub struct DecodedEvent {
    pub source_lane: SourceLane,
    pub origin_id: u32,
    pub destination_id: Option<u32>,
    pub kind: PacketKind,
    pub channel: u32,
    pub payload_text: Option<String>,
    pub snr: Option<f32>,
    pub rssi: Option<i32>,
    pub hop_count: u8,
    pub size_bytes: u32,
    pub is_broadcast: bool,
    pub received_at: DateTime<Utc>,
}

/// One ingested packet. Immutable once persisted; deleted only by retention
/// eviction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PacketRecord {
    pub source_lane: SourceLane,
    pub origin_id: u32,
    pub destination_id: Option<u32>,
    pub kind: PacketKind,
    pub channel: u32,
    pub payload_text: Option<String>,
    pub snr: Option<f32>,
    pub rssi: Option<i32>,
    pub hop_count: u8,
    pub size_bytes: u32,
    pub is_broadcast: bool,
    pub received_at: DateTime<Utc>,
}

impl PacketRecord {
    fn from_event(ev: DecodedEvent) -> Self {
        Self {
            source_lane: ev.source_lane,
            origin_id: ev.origin_id,
            destination_id: ev.destination_id,
            kind: ev.kind,
            channel: ev.channel,
            payload_text: ev.payload_text,
            snr: ev.snr,
            rssi: ev.rssi,
            hop_count: ev.hop_count,
            size_bytes: ev.size_bytes,
            is_broadcast: ev.is_broadcast,
            received_at: ev.received_at,
        }
    }
}

/// Derived dedup key. Two frames with the same fingerprint inside the cache
/// horizon are the same logical packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint {
    lane: SourceLane,
    origin_id: u32,
    kind: PacketKind,
    content_hash: u32,
    time_bucket: i64,
}

impl Fingerprint {
    fn of(ev: &DecodedEvent, bucket_secs: i64) -> Self {
        let content_hash = CONTENT_CRC.checksum(
            ev.payload_text
                .as_deref()
                .map(str::as_bytes)
                .unwrap_or_default(),
        );
        Self {
            lane: ev.source_lane,
            origin_id: ev.origin_id,
            kind: ev.kind,
            content_hash,
            time_bucket: ev.received_at.timestamp() / bucket_secs.max(1),
        }
    }
}

/// Outcome of classifying one frame.
#[derive(Debug)]
pub enum Classification {
    /// First sighting inside the horizon; ready for routing.
    Fresh(PacketRecord),
    /// Already recorded; counted in diagnostics, never persisted.
    Duplicate,
    /// Could not be decoded into any known packet kind; never persisted and
    /// never changes dedup state.
    Rejected(DecodeError),
}

/// Bounded recent-fingerprint cache with LRU capacity eviction and a time
/// horizon after which entries re-admit.
struct FingerprintCache {
    capacity: usize,
    horizon_secs: i64,
    seen: HashMap<Fingerprint, DateTime<Utc>>,
    order: VecDeque<Fingerprint>,
}

impl FingerprintCache {
    fn new(capacity: usize, horizon_secs: i64) -> Self {
        Self {
            capacity: capacity.max(1),
            horizon_secs,
            seen: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    /// Returns true when the fingerprint is a live duplicate; otherwise
    /// records it (evicting the oldest entry at capacity) and returns false.
    fn check_and_insert(&mut self, fp: Fingerprint, now: DateTime<Utc>) -> bool {
        if let Some(seen_at) = self.seen.get(&fp) {
            if (now - *seen_at).num_seconds() < self.horizon_secs {
                return true;
            }
            // Past the horizon: refresh and re-admit
            self.seen.insert(fp, now);
            return false;
        }
        while self.seen.len() >= self.capacity {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.seen.remove(&oldest);
                }
                None => break,
            }
        }
        self.seen.insert(fp, now);
        self.order.push_back(fp);
        false
    }

    fn len(&self) -> usize {
        self.seen.len()
    }
}

/// Classifier & deduplicator. Single owner per process; the gateway loop
/// feeds it frames in receipt order.
///
/// Self-origin frames (echoes of the gateway's own traffic) are a policy
/// rejection upstream in the gateway and never reach this type.
pub struct Classifier {
    cache: FingerprintCache,
    bucket_secs: i64,
}

impl Classifier {
    pub fn new(cfg: &DedupConfig) -> Self {
        let horizon = cfg.horizon_secs.max(1) as i64;
        Self {
            cache: FingerprintCache::new(cfg.cache_capacity, horizon),
            bucket_secs: horizon,
        }
    }

    /// Decode and classify one raw frame.
    pub fn classify_frame(&mut self, frame: &[u8]) -> Classification {
        match decode_frame(frame) {
            Ok(event) => self.classify_event(event),
            Err(e) => Classification::Rejected(e),
        }
    }

    /// Classify an already-decoded event.
    pub fn classify_event(&mut self, event: DecodedEvent) -> Classification {
        let fp = Fingerprint::of(&event, self.bucket_secs);
        if self.cache.check_and_insert(fp, event.received_at) {
            Classification::Duplicate
        } else {
            Classification::Fresh(PacketRecord::from_event(event))
        }
    }

    pub fn cached_fingerprints(&self) -> usize {
        self.cache.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;

    fn event(lane: SourceLane, origin: u32, text: &str) -> DecodedEvent {
        DecodedEvent {
            source_lane: lane,
            origin_id: origin,
            destination_id: None,
            kind: PacketKind::Text,
            channel: 0,
            payload_text: Some(text.to_string()),
            snr: Some(7.25),
            rssi: Some(-90),
            hop_count: 1,
            size_bytes: 64,
            is_broadcast: true,
            received_at: Utc::now(),
        }
    }

    fn classifier(capacity: usize, horizon_secs: u64) -> Classifier {
        Classifier::new(&DedupConfig {
            cache_capacity: capacity,
            horizon_secs,
        })
    }

    #[test]
    fn repeated_fingerprint_within_horizon_is_duplicate() {
        let mut c = classifier(16, 300);
        let first = event(SourceLane::Radio, 0xA1, "retransmit me");
        let mut second = first.clone();
        second.received_at = first.received_at + ChronoDuration::seconds(1);

        assert!(matches!(
            c.classify_event(first),
            Classification::Fresh(_)
        ));
        assert!(matches!(c.classify_event(second), Classification::Duplicate));
    }

    #[test]
    fn different_origins_are_distinct() {
        let mut c = classifier(16, 300);
        assert!(matches!(
            c.classify_event(event(SourceLane::Radio, 1, "same text")),
            Classification::Fresh(_)
        ));
        assert!(matches!(
            c.classify_event(event(SourceLane::Radio, 2, "same text")),
            Classification::Fresh(_)
        ));
    }

    #[test]
    fn lanes_never_cross_deduplicate() {
        let mut c = classifier(16, 300);
        let radio = event(SourceLane::Radio, 5, "bridged payload");
        let mut companion = radio.clone();
        companion.source_lane = SourceLane::Companion;
        assert!(matches!(c.classify_event(radio), Classification::Fresh(_)));
        assert!(matches!(
            c.classify_event(companion),
            Classification::Fresh(_)
        ));
    }

    #[test]
    fn capacity_eviction_is_lru() {
        let mut c = classifier(2, 300);
        let a = event(SourceLane::Radio, 1, "a");
        let b = event(SourceLane::Radio, 2, "b");
        let x = event(SourceLane::Radio, 3, "x");
        assert!(matches!(c.classify_event(a.clone()), Classification::Fresh(_)));
        assert!(matches!(c.classify_event(b), Classification::Fresh(_)));
        // Inserting a third evicts the oldest (a); a then re-admits
        assert!(matches!(c.classify_event(x), Classification::Fresh(_)));
        assert_eq!(c.cached_fingerprints(), 2);
        assert!(matches!(c.classify_event(a), Classification::Fresh(_)));
    }

    #[test]
    fn stale_entry_readmits_past_horizon() {
        let mut c = classifier(16, 2);
        let first = event(SourceLane::Companion, 9, "old news");
        let mut later = first.clone();
        later.received_at = first.received_at + ChronoDuration::seconds(600);
        assert!(matches!(c.classify_event(first), Classification::Fresh(_)));
        // Way past the horizon (and in a different time bucket): re-admitted
        assert!(matches!(c.classify_event(later), Classification::Fresh(_)));
    }

    #[test]
    fn undecodable_frame_is_rejected_without_dedup_state() {
        let mut c = classifier(16, 300);
        assert!(matches!(
            c.classify_frame(b"LANE:radio FROM:1 KIND:nope MSG:x"),
            Classification::Rejected(_)
        ));
        assert_eq!(c.cached_fingerprints(), 0);
    }
}
