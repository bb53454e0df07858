//! Peripheral link integration tests for micled.
//!
//! Uses the scripted transport to check the link's externally visible
//! guarantees: resource release, backoff spacing and single-flight attempts.

use micled::config::PeripheralConfig;
use micled::error::LinkError;
use micled::link::mock::MockTransport;
use micled::link::{LinkPhase, LinkSettings, PeripheralLink};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;

fn link(transport: &MockTransport) -> PeripheralLink<MockTransport> {
    let settings = LinkSettings::from_config(&PeripheralConfig::default()).unwrap();
    PeripheralLink::new(transport.clone(), settings, CancellationToken::new())
}

// =============================================================================
// Resource Release
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_every_failed_connection_is_released() {
    let transport = MockTransport::advertising();
    let link = link(&transport);

    // resolution exhausted, write failure, async disconnect
    transport.fail_resolves(3);
    assert!(link.connect().await.is_err());
    assert_eq!(transport.open_sessions(), 0);

    sleep(Duration::from_secs(3)).await;
    link.connect().await.unwrap();
    transport.fail_writes(1);
    assert!(link.set_state(true).await.is_err());
    assert_eq!(transport.open_sessions(), 0);

    sleep(Duration::from_secs(3)).await;
    link.connect().await.unwrap();
    transport.drop_connection();
    assert!(!link.status().await);
    assert_eq!(transport.open_sessions(), 0);

    assert_eq!(transport.open_count(), 3);
    assert_eq!(transport.close_count(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_open_failure_reported_as_transport_fault() {
    let transport = MockTransport::advertising();
    transport.set_open_error(Some("connection refused"));
    let link = link(&transport);

    let err = link.connect().await.unwrap_err();

    assert!(matches!(err, LinkError::TransportFault(_)));
    assert_eq!(link.phase().await, LinkPhase::Idle);
    assert_eq!(transport.open_sessions(), 0);
}

// =============================================================================
// Backoff
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_attempts_never_closer_than_backoff() {
    let transport = MockTransport::advertising();
    transport.set_scan_error(Some("adapter powered off"));
    let link = link(&transport);

    let start = Instant::now();
    while start.elapsed() < Duration::from_secs(10) {
        let _ = link.connect().await;
        sleep(Duration::from_millis(250)).await;
    }

    let starts = transport.scan_starts();
    assert_eq!(starts.len(), 4);
    for pair in starts.windows(2) {
        assert!(pair[1] - pair[0] >= Duration::from_secs(3));
    }
}

#[tokio::test(start_paused = true)]
async fn test_idle_disconnect_leaves_backoff_running() {
    let transport = MockTransport::advertising();
    transport.set_scan_error(Some("adapter powered off"));
    let link = link(&transport);

    let _ = link.connect().await;
    link.disconnect().await;

    assert!(!link.reconnect_eligible().await);
    assert!(matches!(
        link.connect().await,
        Err(LinkError::Backoff { .. })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_force_reset_bypasses_backoff() {
    let transport = MockTransport::advertising();
    transport.set_scan_error(Some("adapter powered off"));
    let link = link(&transport);

    let _ = link.connect().await;
    transport.set_scan_error(None);
    link.force_reset().await;

    link.connect().await.unwrap();
    assert_eq!(transport.scan_count(), 2);
}

// =============================================================================
// Single Flight
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_concurrent_connect_is_single_flight() {
    let transport = MockTransport::advertising();
    transport.set_advertise_after(Duration::from_secs(2));
    let link = Arc::new(link(&transport));

    let first = tokio::spawn({
        let link = link.clone();
        async move { link.connect().await }
    });
    sleep(Duration::from_millis(500)).await;

    let snapshot = link.snapshot().await;
    assert!(snapshot.attempt_in_flight);
    assert_eq!(snapshot.phase, LinkPhase::Discovering);
    assert!(matches!(
        link.connect().await,
        Err(LinkError::AlreadyInFlight)
    ));

    first.await.unwrap().unwrap();
    assert_eq!(transport.scan_count(), 1);
    assert_eq!(transport.open_count(), 1);
    assert_eq!(link.phase().await, LinkPhase::Connected);
}

// =============================================================================
// Hung Transport
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_shutdown_during_hung_resolution_is_bounded() {
    let transport = MockTransport::advertising();
    transport.hang_resolves(10);
    let link = Arc::new(link(&transport));
    let start = Instant::now();

    let attempt = tokio::spawn({
        let link = link.clone();
        async move { link.connect().await }
    });
    sleep(Duration::from_secs(1)).await;
    link.shutdown().await;

    let result = attempt.await.unwrap();
    assert!(matches!(result, Err(LinkError::Cancelled)));
    assert!(start.elapsed() <= Duration::from_millis(16_200));
    assert_eq!(transport.open_sessions(), 0);
    assert_eq!(link.phase().await, LinkPhase::Idle);
}

#[tokio::test(start_paused = true)]
async fn test_link_usable_after_hung_resolution() {
    let transport = MockTransport::advertising();
    transport.hang_resolves(3);
    let link = link(&transport);

    assert!(matches!(
        link.connect().await,
        Err(LinkError::ResolutionFailure { attempts: 3, .. })
    ));
    assert!(link.reconnect_eligible().await);

    link.connect().await.unwrap();
    link.set_state(true).await.unwrap();
    assert_eq!(transport.writes(), vec![1]);
    assert_eq!(transport.open_count(), 2);
}
