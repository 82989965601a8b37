//! Integration tests for the single-connection lifecycle manager and the
//! silence watchdog, against a local TCP listener standing in for the radio.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;

use meshgate::config::{ConnectionConfig, HealthConfig};
use meshgate::link::framer::frame_payload;
use meshgate::link::health::HealthMonitor;
use meshgate::link::{LinkEvent, LinkManager};

fn fast_config(port: u16) -> ConnectionConfig {
    ConnectionConfig {
        host: "127.0.0.1".to_string(),
        port,
        require_device_at_startup: true,
        reconnect_base_delay_ms: 20,
        reconnect_max_delay_ms: 100,
        reconnect_jitter_ms: 0,
    }
}

async fn fake_radio() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind fake radio");
    let port = listener.local_addr().unwrap().port();
    (listener, port)
}

/// A frame arrives tagged with the live generation; a clean close from the
/// radio produces PeerClosed immediately, without waiting for any watchdog.
#[tokio::test]
async fn clean_close_emits_peer_closed() {
    let (listener, port) = fake_radio().await;
    let server = tokio::spawn(async move {
        let (mut sock, _) = listener.accept().await.unwrap();
        sock.write_all(&frame_payload(b"LANE:radio FROM:1 KIND:text MSG:hi"))
            .await
            .unwrap();
        sock.flush().await.unwrap();
        // Give the client time to read the frame, then close cleanly.
        tokio::time::sleep(Duration::from_millis(50)).await;
        drop(sock);
    });

    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let link = LinkManager::new(fast_config(port), event_tx, shutdown_rx);

    let generation = link.connect().await.expect("connect to fake radio");
    assert_eq!(generation, 1);
    assert!(link.is_connected());

    let first = timeout(Duration::from_secs(2), event_rx.recv())
        .await
        .expect("frame within 2s")
        .expect("channel open");
    match first {
        LinkEvent::Frame {
            generation: g,
            payload,
        } => {
            assert_eq!(g, 1);
            assert_eq!(payload, b"LANE:radio FROM:1 KIND:text MSG:hi");
        }
        other => panic!("expected Frame, got {:?}", other),
    }

    let second = timeout(Duration::from_secs(2), event_rx.recv())
        .await
        .expect("peer-closed within 2s")
        .expect("channel open");
    assert!(matches!(second, LinkEvent::PeerClosed { generation: 1 }));

    server.await.unwrap();
}

/// The manager owns the single connection: a second connect call is refused
/// and reports the existing generation instead of opening another socket.
#[tokio::test]
async fn second_connect_is_refused() {
    let (listener, port) = fake_radio().await;
    let server = tokio::spawn(async move {
        let (_sock, _) = listener.accept().await.unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;
    });

    let (event_tx, _event_rx) = mpsc::unbounded_channel();
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let link = LinkManager::new(fast_config(port), event_tx, shutdown_rx);

    assert_eq!(link.connect().await.unwrap(), 1);
    // Same generation back, no new handle installed.
    assert_eq!(link.connect().await.unwrap(), 1);
    assert_eq!(link.generation(), 1);

    server.abort();
}

/// Concurrent reconnect triggers observing the same generation collapse to a
/// single reconnect: one does the work, the other is a stale no-op. The
/// generation advances by exactly one.
#[tokio::test]
async fn racing_triggers_reconnect_exactly_once() {
    let (listener, port) = fake_radio().await;
    let server = tokio::spawn(async move {
        loop {
            let (sock, _) = listener.accept().await.unwrap();
            // Hold sockets open so the client side stays connected.
            tokio::spawn(async move {
                let _sock = sock;
                tokio::time::sleep(Duration::from_secs(5)).await;
            });
        }
    });

    let (event_tx, _event_rx) = mpsc::unbounded_channel();
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let link = LinkManager::new(fast_config(port), event_tx, shutdown_rx);
    let observed = link.connect().await.unwrap();

    let a = {
        let link = Arc::clone(&link);
        tokio::spawn(async move { link.force_reconnect("socket died", observed).await })
    };
    let b = {
        let link = Arc::clone(&link);
        tokio::spawn(async move { link.force_reconnect("silence timeout", observed).await })
    };
    let ra = timeout(Duration::from_secs(5), a).await.unwrap().unwrap();
    let rb = timeout(Duration::from_secs(5), b).await.unwrap().unwrap();

    let performed = [&ra, &rb]
        .iter()
        .filter(|r| matches!(r, Ok(true)))
        .count();
    let skipped = [&ra, &rb]
        .iter()
        .filter(|r| matches!(r, Ok(false)))
        .count();
    assert_eq!(performed, 1, "exactly one trigger performs the reconnect");
    assert_eq!(skipped, 1, "the loser observes a stale generation");
    assert_eq!(link.generation(), observed + 1);

    server.abort();
}

/// A trigger holding an outdated generation is a no-op even when it runs
/// alone.
#[tokio::test]
async fn stale_generation_is_a_noop() {
    let (listener, port) = fake_radio().await;
    let server = tokio::spawn(async move {
        let (_sock, _) = listener.accept().await.unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;
    });

    let (event_tx, _event_rx) = mpsc::unbounded_channel();
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let link = LinkManager::new(fast_config(port), event_tx, shutdown_rx);
    link.connect().await.unwrap();

    let result = link.force_reconnect("late callback", 0).await.unwrap();
    assert!(!result);
    assert_eq!(link.generation(), 1);
    assert!(link.is_connected());

    server.abort();
}

/// Reconnect backoff gives up when shutdown is signalled mid-retry instead of
/// looping against an unreachable peer.
#[tokio::test]
async fn reconnect_backoff_observes_shutdown() {
    let (listener, port) = fake_radio().await;
    let server = tokio::spawn(async move {
        let (_sock, _) = listener.accept().await.unwrap();
        // Accept once, then stop answering: reconnects will fail.
    });

    let (event_tx, _event_rx) = mpsc::unbounded_channel();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let link = LinkManager::new(fast_config(port), event_tx, shutdown_rx);
    let observed = link.connect().await.unwrap();
    server.await.unwrap();

    let reconnect = {
        let link = Arc::clone(&link);
        tokio::spawn(async move { link.force_reconnect("peer gone", observed).await })
    };
    tokio::time::sleep(Duration::from_millis(100)).await;
    shutdown_tx.send(true).unwrap();

    let result = timeout(Duration::from_secs(2), reconnect)
        .await
        .expect("reconnect loop exits promptly on shutdown")
        .unwrap();
    assert!(result.is_err(), "shutdown surfaces as an error, not a hang");
}

/// End to end: a radio that accepts the connection but never sends anything
/// trips the silence watchdog, which forces exactly one reconnect per
/// cool-down window.
#[tokio::test]
async fn silence_watchdog_forces_reconnect() {
    let (listener, port) = fake_radio().await;
    let server = tokio::spawn(async move {
        loop {
            let (sock, _) = listener.accept().await.unwrap();
            tokio::spawn(async move {
                let _sock = sock; // connected but silent
                tokio::time::sleep(Duration::from_secs(30)).await;
            });
        }
    });

    let (event_tx, _event_rx) = mpsc::unbounded_channel();
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let link = LinkManager::new(fast_config(port), event_tx, shutdown_rx.clone());
    link.connect().await.unwrap();

    let cfg = HealthConfig {
        silence_threshold_secs: 1,
        check_interval_secs: 1,
    };
    // A long cool-down so the window under test sees at most one forcing.
    let monitor =
        HealthMonitor::new(Arc::clone(&link), &cfg, shutdown_rx).with_cooldown(Duration::from_secs(30));
    let task = monitor.spawn();

    // Threshold 1s + check tick 1s: well within 5s the watchdog must fire.
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while link.generation() < 2 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    assert_eq!(
        link.generation(),
        2,
        "watchdog forced exactly one reconnect"
    );

    // Cool-down holds: no second forcing shortly after.
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(link.generation(), 2);

    task.abort();
    server.abort();
}
