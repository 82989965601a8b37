//! Integration tests for the one-time lane migration: misfiled records move
//! to their correct partition atomically, payload-identical, exactly once.

use chrono::{Duration as ChronoDuration, TimeZone, Utc};

use meshgate::ingest::{PacketKind, PacketRecord, SourceLane};
use meshgate::store::PacketStore;

fn record(lane: SourceLane, origin: u32, text: &str, offset_secs: i64) -> PacketRecord {
    let base = Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap();
    PacketRecord {
        source_lane: lane,
        origin_id: origin,
        destination_id: None,
        kind: PacketKind::Text,
        channel: 0,
        payload_text: Some(text.to_string()),
        snr: Some(3.5),
        rssi: Some(-95),
        hop_count: 1,
        size_bytes: text.len() as u32,
        is_broadcast: true,
        received_at: base + ChronoDuration::seconds(offset_secs),
    }
}

/// Early deployments wrote both lanes into one partition. Seed that shape,
/// migrate, and verify lane purity with payloads intact.
#[test]
fn migration_moves_misfiled_records_once() {
    let dir = tempfile::tempdir().unwrap();
    let store = PacketStore::open(dir.path()).unwrap();

    // Everything lands in the radio partition, lanes interleaved.
    let seeded = vec![
        record(SourceLane::Radio, 0x10, "radio one", 0),
        record(SourceLane::Companion, 0x20, "companion one", 1),
        record(SourceLane::Radio, 0x11, "radio two", 2),
        record(SourceLane::Companion, 0x21, "companion two", 3),
        record(SourceLane::Companion, 0x22, "companion three", 4),
    ];
    for r in &seeded {
        store.append_to(SourceLane::Radio, r).unwrap();
    }
    assert_eq!(store.count(SourceLane::Radio), 5);
    assert_eq!(store.count(SourceLane::Companion), 0);
    assert!(!store.migration_complete().unwrap());

    let moved = store.migrate_legacy_once().unwrap();
    assert_eq!(moved, 3);
    assert!(store.migration_complete().unwrap());

    // Lane purity after migration.
    let radio = store.records(SourceLane::Radio).unwrap();
    let companion = store.records(SourceLane::Companion).unwrap();
    assert_eq!(radio.len(), 2);
    assert_eq!(companion.len(), 3);
    assert!(radio.iter().all(|r| r.source_lane == SourceLane::Radio));
    assert!(companion
        .iter()
        .all(|r| r.source_lane == SourceLane::Companion));

    // Moved records are identical to what was seeded, payloads included.
    let expected: Vec<&PacketRecord> = seeded
        .iter()
        .filter(|r| r.source_lane == SourceLane::Companion)
        .collect();
    for (got, want) in companion.iter().zip(expected) {
        assert_eq!(got, want);
    }

    // Second run is a marker-gated no-op.
    let again = store.migrate_legacy_once().unwrap();
    assert_eq!(again, 0);
}

/// Clean partitions still get the marker so the scan never runs twice.
#[test]
fn clean_partitions_complete_without_moves() {
    let dir = tempfile::tempdir().unwrap();
    let store = PacketStore::open(dir.path()).unwrap();
    store
        .route(&record(SourceLane::Radio, 1, "already right", 0))
        .unwrap();
    store
        .route(&record(SourceLane::Companion, 2, "also right", 1))
        .unwrap();

    let moved = store.migrate_legacy_once().unwrap();
    assert_eq!(moved, 0);
    assert!(store.migration_complete().unwrap());
    assert_eq!(store.count(SourceLane::Radio), 1);
    assert_eq!(store.count(SourceLane::Companion), 1);
}

/// The marker survives reopen; a restarted gateway does not rescan.
#[test]
fn marker_persists_across_reopen() {
    let dir = tempfile::tempdir().unwrap();
    {
        let store = PacketStore::open(dir.path()).unwrap();
        store.migrate_legacy_once().unwrap();
        store.flush().unwrap();
    }
    let store = PacketStore::open(dir.path()).unwrap();
    assert!(store.migration_complete().unwrap());
    assert_eq!(store.migrate_legacy_once().unwrap(), 0);
}
