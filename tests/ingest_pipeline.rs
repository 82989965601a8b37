//! End-to-end ingest pipeline: raw frames through decode, dedup, and routing
//! into the per-lane partitions, using the gateway's own ingest path.

use meshgate::config::Config;
use meshgate::gateway::{Gateway, IngestOutcome};
use meshgate::ingest::SourceLane;

fn test_gateway(dir: &std::path::Path) -> Gateway {
    let mut config = Config::default();
    config.storage.data_dir = dir.to_string_lossy().into_owned();
    config.gateway.node_id = "0x000000AA".to_string();
    Gateway::new(config).expect("gateway construction")
}

/// Three frames where two are the same logical radio packet moments apart
/// and one is companion traffic. One record per partition, one suppressed
/// duplicate.
#[tokio::test]
async fn duplicate_suppression_and_lane_routing() {
    let dir = tempfile::tempdir().unwrap();
    let mut gw = test_gateway(dir.path());

    let radio_frame = b"LANE:radio FROM:0x11 TO:^all KIND:text CH:0 HOP:2 MSG:mesh hello";
    let companion_frame = b"LANE:companion FROM:0x22 TO:^all KIND:text CH:0 MSG:bridge hello";

    assert_eq!(
        gw.ingest_frame(radio_frame),
        IngestOutcome::Stored(SourceLane::Radio)
    );
    // The retransmission arrives moments later: same origin, kind, payload.
    assert_eq!(gw.ingest_frame(radio_frame), IngestOutcome::Duplicate);
    assert_eq!(
        gw.ingest_frame(companion_frame),
        IngestOutcome::Stored(SourceLane::Companion)
    );

    let store = gw.store();
    assert_eq!(store.count(SourceLane::Radio), 1);
    assert_eq!(store.count(SourceLane::Companion), 1);

    let radio = store.records(SourceLane::Radio).unwrap();
    assert_eq!(radio[0].origin_id, 0x11);
    assert_eq!(radio[0].payload_text.as_deref(), Some("mesh hello"));
    assert_eq!(radio[0].source_lane, SourceLane::Radio);
}

/// Identical payloads arriving on different lanes are both fresh: the two
/// lanes never cross-deduplicate.
#[tokio::test]
async fn lanes_are_deduplicated_independently() {
    let dir = tempfile::tempdir().unwrap();
    let mut gw = test_gateway(dir.path());

    assert_eq!(
        gw.ingest_frame(b"LANE:radio FROM:0x33 KIND:text MSG:bridged"),
        IngestOutcome::Stored(SourceLane::Radio)
    );
    assert_eq!(
        gw.ingest_frame(b"LANE:companion FROM:0x33 KIND:text MSG:bridged"),
        IngestOutcome::Stored(SourceLane::Companion)
    );
}

/// An echo of the gateway's own traffic is a policy rejection: never stored,
/// and it must not poison the dedup cache for the real sender.
#[tokio::test]
async fn self_echo_is_dropped_without_dedup_state() {
    let dir = tempfile::tempdir().unwrap();
    let mut gw = test_gateway(dir.path());

    assert_eq!(
        gw.ingest_frame(b"LANE:radio FROM:0xAA KIND:text MSG:our own ping"),
        IngestOutcome::EchoDropped
    );
    assert_eq!(gw.store().count(SourceLane::Radio), 0);

    // Another node saying the same words is its own packet.
    assert_eq!(
        gw.ingest_frame(b"LANE:radio FROM:0xBB KIND:text MSG:our own ping"),
        IngestOutcome::Stored(SourceLane::Radio)
    );
}

/// Undecodable frames are rejected without touching storage or dedup;
/// ingestion continues for whatever comes next.
#[tokio::test]
async fn rejected_frames_do_not_stop_the_pipeline() {
    let dir = tempfile::tempdir().unwrap();
    let mut gw = test_gateway(dir.path());

    assert_eq!(
        gw.ingest_frame(&[0x94, 0xC3, 0xFF, 0xFE]),
        IngestOutcome::Rejected
    );
    assert_eq!(
        gw.ingest_frame(b"LANE:radio FROM:0x44 KIND:jpeg MSG:nope"),
        IngestOutcome::Rejected
    );
    assert_eq!(
        gw.ingest_frame(b"LANE:radio FROM:0x44 KIND:text MSG:still alive"),
        IngestOutcome::Stored(SourceLane::Radio)
    );
    assert_eq!(gw.store().count(SourceLane::Radio), 1);
}

/// Non-text kinds carry no MSG payload and still persist.
#[tokio::test]
async fn payloadless_kinds_are_stored() {
    let dir = tempfile::tempdir().unwrap();
    let mut gw = test_gateway(dir.path());

    assert_eq!(
        gw.ingest_frame(b"LANE:radio FROM:0x55 KIND:position SNR:4.25 RSSI:-102"),
        IngestOutcome::Stored(SourceLane::Radio)
    );
    let records = gw.store().records(SourceLane::Radio).unwrap();
    assert_eq!(records[0].payload_text, None);
    assert_eq!(records[0].snr, Some(4.25));
    assert_eq!(records[0].rssi, Some(-102));
}
