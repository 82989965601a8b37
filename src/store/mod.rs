//! # Packet Persistence
//!
//! Append-only packet partitions on sled: one tree per source lane plus a
//! small metadata tree. A record is written to exactly one partition,
//! determined solely by its `source_lane`; cross-partition queries are a
//! read-time concern for the reporting tools, never a write-time concern
//! here.
//!
//! Keys are big-endian `(unix_millis: u64, seq: u32)` pairs, so iteration
//! and range scans follow receipt order even for same-millisecond bursts,
//! and retention eviction is a cheap range delete.
//!
//! Early deployments wrote both lanes into whichever partition the bridge
//! happened to be pointed at; [`PacketStore::migrate_legacy_once`] repairs
//! that exactly once, gated by a completion marker, moving misfiled records
//! copy-then-delete inside a single multi-tree transaction.

use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};

use chrono::{DateTime, Utc};
use log::{debug, info};
use sled::transaction::TransactionError;
use sled::Transactional;
use thiserror::Error;

use crate::ingest::{PacketRecord, SourceLane};
use crate::metrics;

const RADIO_TREE: &str = "packets_radio";
const COMPANION_TREE: &str = "packets_companion";
const META_TREE: &str = "meta";
const MIGRATION_MARKER: &[u8] = b"lane_migration_complete";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Sled(#[from] sled::Error),
    #[error("record codec error: {0}")]
    Codec(#[from] bincode::Error),
    #[error("lane migration failed: {0}")]
    Migration(String),
}

pub struct PacketStore {
    db: sled::Db,
    radio: sled::Tree,
    companion: sled::Tree,
    meta: sled::Tree,
    seq: AtomicU32,
}

fn make_key(ts_millis: u64, seq: u32) -> [u8; 12] {
    let mut key = [0u8; 12];
    key[..8].copy_from_slice(&ts_millis.to_be_bytes());
    key[8..].copy_from_slice(&seq.to_be_bytes());
    key
}

impl PacketStore {
    /// Open (creating if needed) the packet database under `data_dir`.
    pub fn open<P: AsRef<Path>>(data_dir: P) -> Result<Self, StoreError> {
        let path = data_dir.as_ref().join("packets");
        let db = sled::open(&path)?;
        let radio = db.open_tree(RADIO_TREE)?;
        let companion = db.open_tree(COMPANION_TREE)?;
        let meta = db.open_tree(META_TREE)?;
        debug!(
            "Packet store opened at {} (radio={} companion={} records)",
            path.display(),
            radio.len(),
            companion.len()
        );
        Ok(Self {
            db,
            radio,
            companion,
            meta,
            seq: AtomicU32::new(0),
        })
    }

    fn tree(&self, lane: SourceLane) -> &sled::Tree {
        match lane {
            SourceLane::Radio => &self.radio,
            SourceLane::Companion => &self.companion,
        }
    }

    /// Append a record to the partition matching its source lane. This is
    /// the only write path; records are never updated in place.
    pub fn route(&self, record: &PacketRecord) -> Result<(), StoreError> {
        self.append_to(record.source_lane, record)
    }

    /// Append to an explicit partition. `route` delegates here; tests and
    /// legacy-data seeding use it directly to build misfiled partitions.
    pub fn append_to(&self, lane: SourceLane, record: &PacketRecord) -> Result<(), StoreError> {
        let key = make_key(
            record.received_at.timestamp_millis().max(0) as u64,
            self.seq.fetch_add(1, Ordering::Relaxed),
        );
        let value = bincode::serialize(record)?;
        self.tree(lane).insert(key, value)?;
        Ok(())
    }

    /// Number of records in a partition.
    pub fn count(&self, lane: SourceLane) -> usize {
        self.tree(lane).len()
    }

    /// All records of a partition in receipt order. Used by the status
    /// command and tests; the browsing tools read the partitions directly.
    pub fn records(&self, lane: SourceLane) -> Result<Vec<PacketRecord>, StoreError> {
        let mut out = Vec::with_capacity(self.tree(lane).len());
        for item in self.tree(lane).iter() {
            let (_, value) = item?;
            out.push(bincode::deserialize(&value)?);
        }
        Ok(out)
    }

    /// Whether the one-time lane migration has already completed.
    pub fn migration_complete(&self) -> Result<bool, StoreError> {
        Ok(self.meta.get(MIGRATION_MARKER)?.is_some())
    }

    /// One-time repair of partitions containing records whose lane disagrees
    /// with where they sit. Idempotent and safe to call on every startup:
    /// a completion marker makes re-runs a no-op, and the move happens
    /// copy-then-delete inside one multi-tree transaction so a crash
    /// mid-migration loses nothing -- the scan simply runs again next start.
    ///
    /// Returns the number of records moved.
    pub fn migrate_legacy_once(&self) -> Result<u64, StoreError> {
        if self.migration_complete()? {
            debug!("Lane migration already complete; skipping");
            return Ok(0);
        }

        // Scan both partitions for records filed under the wrong lane.
        let mut misfiled: Vec<(SourceLane, Vec<u8>, Vec<u8>)> = Vec::new();
        for &lane in &[SourceLane::Radio, SourceLane::Companion] {
            for item in self.tree(lane).iter() {
                let (key, value) = item?;
                let record: PacketRecord = bincode::deserialize(&value)?;
                if record.source_lane != lane {
                    misfiled.push((lane, key.to_vec(), value.to_vec()));
                }
            }
        }

        info!(
            "Lane migration: {} misfiled record(s) to move",
            misfiled.len()
        );
        let moved = misfiled.len() as u64;

        let result: Result<(), TransactionError<()>> = (&self.radio, &self.companion, &self.meta)
            .transaction(|(radio, companion, meta)| {
                for (from_lane, key, value) in &misfiled {
                    let (src, dst) = match from_lane {
                        SourceLane::Radio => (radio, companion),
                        SourceLane::Companion => (companion, radio),
                    };
                    // Copy before delete; the transaction makes the pair atomic.
                    dst.insert(key.clone(), value.clone())?;
                    src.remove(key.clone())?;
                }
                meta.insert(MIGRATION_MARKER, &[1u8][..])?;
                Ok(())
            });
        result.map_err(|e| StoreError::Migration(format!("{:?}", e)))?;

        if moved > 0 {
            metrics::add_records_migrated(moved);
            info!("Lane migration complete: moved {} record(s)", moved);
        } else {
            info!("Lane migration complete: partitions were already clean");
        }
        Ok(moved)
    }

    /// Evict records older than `cutoff` from one partition. Retention is
    /// per-partition and independently configured; eviction never cascades
    /// across partitions. Returns the number of records removed.
    pub fn evict_older_than(
        &self,
        lane: SourceLane,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let boundary = make_key(cutoff.timestamp_millis().max(0) as u64, 0);
        let tree = self.tree(lane);
        let mut batch = sled::Batch::default();
        let mut removed: u64 = 0;
        for item in tree.range(..boundary) {
            let (key, _) = item?;
            batch.remove(key);
            removed += 1;
        }
        if removed > 0 {
            tree.apply_batch(batch)?;
            metrics::add_records_evicted(removed);
            debug!(
                "Evicted {} record(s) older than {} from {} partition",
                removed,
                cutoff.to_rfc3339(),
                lane.as_str()
            );
        }
        Ok(removed)
    }

    /// Flush sled to disk; called on shutdown.
    pub fn flush(&self) -> Result<(), StoreError> {
        self.db.flush()?;
        Ok(())
    }
}
