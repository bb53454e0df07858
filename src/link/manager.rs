//! Peripheral link manager
//!
//! Owns the single logical connection to the LED peripheral. The state
//! machine, backoff timer and open session live behind one async lock.
//! Scanning and resolution run outside that lock; their outcome is committed
//! under it only if no reset or shutdown happened in the meantime.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};
use tokio::time::{timeout, Instant};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::backoff::BackoffTimer;
use super::state::{LinkEvent, LinkPhase, LinkStateMachine, TransitionReason};
use super::transport::{Session, Transport};
use crate::config::PeripheralConfig;
use crate::error::{ConfigError, LinkError, TransportError};
use crate::retry::{retry_fixed, RetryPolicy};

/// Fixed parameters of the peripheral link
#[derive(Debug, Clone)]
pub struct LinkSettings {
    pub advertised_name: String,
    pub characteristic: Uuid,
    pub scan_timeout: Duration,
    pub reconnect_delay: Duration,
    pub resolve: RetryPolicy,
    /// Bound on opening the device and on each resolution attempt
    pub resolve_timeout: Duration,
    pub write_timeout: Duration,
}

impl LinkSettings {
    pub fn from_config(config: &PeripheralConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            advertised_name: config.advertised_name.clone(),
            characteristic: config.characteristic()?,
            scan_timeout: config.scan_timeout(),
            reconnect_delay: config.reconnect_delay(),
            resolve: RetryPolicy::new(config.resolve_attempts, config.resolve_retry_delay()),
            resolve_timeout: config.resolve_timeout(),
            write_timeout: config.write_timeout(),
        })
    }
}

/// Snapshot of the link for display
#[derive(Debug, Clone)]
pub struct LinkStatus {
    pub phase: LinkPhase,
    pub address: Option<String>,
    pub attempt_in_flight: bool,
    pub last_failure: Option<TransitionReason>,
}

/// Established connection; replaced wholesale, never patched
struct Connection<S: Session> {
    address: String,
    session: S,
    characteristic: S::Characteristic,
}

struct LinkInner<S: Session> {
    machine: LinkStateMachine,
    backoff: BackoffTimer,
    connection: Option<Connection<S>>,
}

/// Clears the in-flight flag when `connect` returns or its future is dropped
struct InFlightGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

/// Handle that voids any in-flight connection attempt without taking the
/// link lock
///
/// Safe to use from threads that are not running the link's runtime.
#[derive(Debug, Clone)]
pub struct LinkInvalidator {
    generation: Arc<AtomicU64>,
}

impl LinkInvalidator {
    pub fn invalidate(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
    }
}

/// Logical connection to the LED peripheral over transport `T`
pub struct PeripheralLink<T: Transport> {
    transport: T,
    settings: LinkSettings,
    inner: Mutex<LinkInner<T::Session>>,
    /// Set while a scan/resolution started by `connect` is still running
    in_flight: AtomicBool,
    /// Bumped by every reset, abort and shutdown
    generation: Arc<AtomicU64>,
    cancel: CancellationToken,
}

impl<T: Transport> PeripheralLink<T> {
    /// Create an idle link; `cancel` is the process shutdown token
    pub fn new(transport: T, settings: LinkSettings, cancel: CancellationToken) -> Self {
        let backoff = BackoffTimer::new(settings.reconnect_delay);
        Self {
            transport,
            settings,
            inner: Mutex::new(LinkInner {
                machine: LinkStateMachine::new(),
                backoff,
                connection: None,
            }),
            in_flight: AtomicBool::new(false),
            generation: Arc::new(AtomicU64::new(0)),
            cancel,
        }
    }

    pub fn settings(&self) -> &LinkSettings {
        &self.settings
    }

    pub fn invalidator(&self) -> LinkInvalidator {
        LinkInvalidator {
            generation: self.generation.clone(),
        }
    }

    /// Current phase without re-validating against the transport
    pub async fn phase(&self) -> LinkPhase {
        self.inner.lock().await.machine.phase()
    }

    pub async fn snapshot(&self) -> LinkStatus {
        let inner = self.inner.lock().await;
        LinkStatus {
            phase: inner.machine.phase(),
            address: inner.machine.address().map(str::to_string),
            attempt_in_flight: self.in_flight.load(Ordering::SeqCst),
            last_failure: inner.machine.last_failure().cloned(),
        }
    }

    /// Whether the link is connected, re-validated against the transport
    ///
    /// Applies pending disconnect notifications first. Degrades to `Failed`
    /// if the transport no longer reports the peripheral as connected.
    pub async fn status(&self) -> bool {
        let mut inner = self.inner.lock().await;
        self.apply_pending_disconnect(&mut inner).await;

        if inner.machine.phase() != LinkPhase::Connected {
            return false;
        }

        let live = match inner.connection.as_ref() {
            Some(connection) => timeout(
                self.settings.resolve_timeout,
                connection.session.is_connected(),
            )
            .await
            .unwrap_or(false),
            None => false,
        };
        if !live {
            tracing::info!("Device connection status changed to disconnected");
            self.fail(&mut inner, LinkEvent::TransportDisconnected).await;
        }
        live
    }

    /// Whether a new connection attempt may start now
    pub async fn reconnect_eligible(&self) -> bool {
        let inner = self.inner.lock().await;
        let in_flight = self.in_flight.load(Ordering::SeqCst);
        let phase = inner.machine.phase();
        // an attempting phase with nothing in flight was left by a dropped attempt
        let blocked = phase.blocks_reconnect() && !(phase.is_attempting() && !in_flight);
        !blocked && !in_flight && inner.backoff.permits(Instant::now())
    }

    /// Discover the peripheral, open it and resolve the switch characteristic
    ///
    /// Returns `Ok(())` immediately if already connected. The scan and the
    /// resolution retries run without holding the link lock. Dropping the
    /// returned future abandons the attempt; the next call recovers from it.
    pub async fn connect(&self) -> Result<(), LinkError> {
        let (generation, _guard) = {
            let mut inner = self.inner.lock().await;

            if inner.machine.phase() == LinkPhase::Connected {
                return Ok(());
            }
            if self.in_flight.load(Ordering::SeqCst) {
                return Err(LinkError::AlreadyInFlight);
            }
            if self.cancel.is_cancelled() {
                return Err(LinkError::Cancelled);
            }
            let now = Instant::now();
            let remaining = inner.backoff.remaining(now);
            if !remaining.is_zero() {
                return Err(LinkError::Backoff { remaining });
            }

            if inner.machine.phase().is_attempting() {
                tracing::warn!(
                    "Resetting abandoned attempt left in {:?}",
                    inner.machine.phase()
                );
                inner.machine.process_event(LinkEvent::DisconnectRequested);
            }

            self.teardown(&mut inner).await;
            inner.backoff.record_attempt(now);
            self.in_flight.store(true, Ordering::SeqCst);
            let guard = InFlightGuard {
                flag: &self.in_flight,
            };
            inner.machine.process_event(LinkEvent::AttemptStarted);
            (self.generation.load(Ordering::SeqCst), guard)
        };

        self.attempt(generation).await
    }

    async fn attempt(&self, generation: u64) -> Result<(), LinkError> {
        let name = &self.settings.advertised_name;
        tracing::info!("Scanning for '{}' ({:?} window)", name, self.settings.scan_timeout);

        let scanned = self
            .transport
            .scan(name, self.settings.scan_timeout, &self.cancel)
            .await;

        let discovered = {
            let mut inner = self.inner.lock().await;
            self.check_current(&mut inner, generation)?;

            match scanned {
                Ok(Some(discovered)) => {
                    tracing::info!("Found '{}' at {}", name, discovered.address);
                    inner.machine.process_event(LinkEvent::DeviceFound {
                        address: discovered.address.clone(),
                    });
                    discovered
                }
                Ok(None) => {
                    tracing::info!("Peripheral '{}' not found during scan", name);
                    inner.machine.process_event(LinkEvent::ScanTimedOut);
                    return Err(LinkError::DiscoveryTimeout);
                }
                Err(e) => {
                    tracing::warn!("Scan failed: {}", e);
                    inner.machine.process_event(LinkEvent::ScanFailed {
                        error: e.to_string(),
                    });
                    return Err(e.into());
                }
            }
        };

        let address = discovered.address;
        let opened = self.open_and_resolve(&address, discovered.device).await;

        let mut inner = self.inner.lock().await;
        if let Err(e) = self.check_current(&mut inner, generation) {
            if let Ok((session, _)) = opened {
                tracing::debug!("Discarding connection to {} after reset", address);
                session.close().await;
            }
            return Err(e);
        }

        match opened {
            Ok((session, characteristic)) => {
                inner.machine.process_event(LinkEvent::Resolved);
                inner.connection = Some(Connection {
                    address: address.clone(),
                    session,
                    characteristic,
                });
                tracing::info!("Found switch characteristic - connected to {}", address);
                Ok(())
            }
            Err(e) => {
                inner.machine.process_event(LinkEvent::ResolutionFailed {
                    error: e.to_string(),
                });
                Err(e)
            }
        }
    }

    /// Open the device and resolve the characteristic with bounded retries
    ///
    /// The open and every resolution attempt are bounded by the resolve
    /// timeout. The session is closed again on every failure path.
    async fn open_and_resolve(
        &self,
        address: &str,
        device: T::Device,
    ) -> Result<(T::Session, <T::Session as Session>::Characteristic), LinkError> {
        let limit = self.settings.resolve_timeout;

        tracing::info!("Connecting to {}", address);
        let session = match timeout(limit, self.transport.open(device)).await {
            Ok(Ok(session)) => session,
            Ok(Err(e)) => {
                tracing::warn!("Failed to open device: {}", e);
                return Err(LinkError::TransportFault(e));
            }
            Err(_) => {
                tracing::warn!("Opening {} timed out after {:?}", address, limit);
                return Err(TransportError::Timeout(limit).into());
            }
        };

        let uuid = self.settings.characteristic;
        let session_ref = &session;
        let resolved = retry_fixed(self.settings.resolve, "GATT resolution", move |_| async move {
            match timeout(limit, session_ref.resolve(uuid)).await {
                Ok(result) => result,
                Err(_) => Err(TransportError::Timeout(limit)),
            }
        })
        .await;

        let characteristic = match resolved {
            Ok(characteristic) => characteristic,
            Err(exhausted) => {
                session.close().await;
                return Err(LinkError::ResolutionFailure {
                    attempts: exhausted.attempts,
                    last_error: exhausted.last_error.to_string(),
                });
            }
        };

        if !timeout(limit, session.is_connected()).await.unwrap_or(false) {
            tracing::warn!("Device not connected after GATT access");
            session.close().await;
            return Err(TransportError::Disconnected.into());
        }

        Ok((session, characteristic))
    }

    /// Write the LED state as a single confirmed byte
    ///
    /// Re-validates the transport before writing; a stale or failed
    /// connection degrades to `Failed` and is torn down.
    pub async fn set_state(&self, on: bool) -> Result<(), LinkError> {
        let mut inner = self.inner.lock().await;
        self.apply_pending_disconnect(&mut inner).await;

        if inner.machine.phase() != LinkPhase::Connected {
            return Err(LinkError::NotConnected);
        }
        let Some(connection) = inner.connection.as_ref() else {
            return Err(LinkError::NotConnected);
        };
        let write_timeout = self.settings.write_timeout;

        let live = timeout(write_timeout, connection.session.is_connected())
            .await
            .unwrap_or(false);
        if !live {
            tracing::warn!("Device disconnected during LED operation");
            self.fail(&mut inner, LinkEvent::TransportDisconnected).await;
            return Err(TransportError::Disconnected.into());
        }

        let value = [u8::from(on)];
        let outcome = match timeout(
            write_timeout,
            connection.session.write(&connection.characteristic, &value),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(TransportError::Timeout(write_timeout)),
        };

        match outcome {
            Ok(()) => {
                tracing::info!("LED turned {}", if on { "ON" } else { "OFF" });
                Ok(())
            }
            Err(e) => {
                tracing::warn!("Failed to send LED command: {}", e);
                self.fail(
                    &mut inner,
                    LinkEvent::WriteFailed {
                        error: e.to_string(),
                    },
                )
                .await;
                Err(e.into())
            }
        }
    }

    /// Drop the connection or abort the running attempt
    ///
    /// A no-op on an idle link; the backoff timer is never touched.
    pub async fn disconnect(&self) {
        let mut inner = self.inner.lock().await;
        if inner.machine.phase() == LinkPhase::Idle && inner.connection.is_none() {
            return;
        }
        if inner.machine.phase().is_attempting() {
            self.generation.fetch_add(1, Ordering::SeqCst);
        }
        inner.machine.process_event(LinkEvent::DisconnectRequested);
        self.teardown(&mut inner).await;
    }

    /// Tear down unconditionally and make a new attempt eligible at once
    pub async fn force_reset(&self) {
        tracing::info!("Force reconnect requested");
        self.generation.fetch_add(1, Ordering::SeqCst);

        let mut inner = self.inner.lock().await;
        inner.machine.process_event(LinkEvent::DisconnectRequested);
        self.teardown(&mut inner).await;
        inner.backoff.reset();
    }

    /// Cancel any scan in progress and release all transport resources
    pub async fn shutdown(&self) {
        self.cancel.cancel();
        self.generation.fetch_add(1, Ordering::SeqCst);

        let mut inner = self.inner.lock().await;
        inner.machine.process_event(LinkEvent::DisconnectRequested);
        self.teardown(&mut inner).await;
        tracing::info!("Peripheral link shut down");
    }

    /// Discard a speculative result if a reset or shutdown happened since
    /// the attempt started
    fn check_current(
        &self,
        inner: &mut MutexGuard<'_, LinkInner<T::Session>>,
        generation: u64,
    ) -> Result<(), LinkError> {
        if self.generation.load(Ordering::SeqCst) == generation && !self.cancel.is_cancelled() {
            return Ok(());
        }

        inner.machine.process_event(LinkEvent::DisconnectRequested);
        if self.cancel.is_cancelled() {
            tracing::info!("Connection attempt cancelled by shutdown");
            Err(LinkError::Cancelled)
        } else {
            tracing::info!("Connection attempt superseded by reset");
            Err(LinkError::Superseded)
        }
    }

    async fn apply_pending_disconnect(&self, inner: &mut MutexGuard<'_, LinkInner<T::Session>>) {
        let notified = inner
            .connection
            .as_mut()
            .is_some_and(|connection| connection.session.take_disconnect());
        if notified {
            tracing::info!("Device disconnected - connection status changed event");
            self.fail(inner, LinkEvent::TransportDisconnected).await;
        }
    }

    async fn fail(&self, inner: &mut MutexGuard<'_, LinkInner<T::Session>>, event: LinkEvent) {
        inner.machine.process_event(event);
        self.teardown(inner).await;
    }

    /// Release the session, if any; close errors are logged by the session
    async fn teardown(&self, inner: &mut MutexGuard<'_, LinkInner<T::Session>>) {
        if let Some(connection) = inner.connection.take() {
            tracing::debug!("Releasing connection to {}", connection.address);
            connection.session.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::mock::MockTransport;

    fn settings() -> LinkSettings {
        LinkSettings::from_config(&PeripheralConfig::default()).unwrap()
    }

    fn link(transport: &MockTransport) -> PeripheralLink<MockTransport> {
        PeripheralLink::new(transport.clone(), settings(), CancellationToken::new())
    }

    #[test]
    fn test_settings_from_default_config() {
        let settings = settings();
        assert_eq!(settings.advertised_name, "LED");
        assert_eq!(settings.scan_timeout, Duration::from_secs(8));
        assert_eq!(settings.resolve.attempts, 3);
        assert_eq!(settings.resolve.delay, Duration::from_millis(500));
        assert_eq!(settings.resolve_timeout, Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_link_is_idle_and_eligible() {
        let transport = MockTransport::new();
        let link = link(&transport);

        assert_eq!(link.phase().await, LinkPhase::Idle);
        assert!(!link.status().await);
        assert!(link.reconnect_eligible().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_success() {
        let transport = MockTransport::advertising();
        let link = link(&transport);

        link.connect().await.unwrap();

        assert_eq!(link.phase().await, LinkPhase::Connected);
        assert!(link.status().await);
        assert!(!link.reconnect_eligible().await);
        assert_eq!(transport.open_sessions(), 1);

        let snapshot = link.snapshot().await;
        assert_eq!(snapshot.address.as_deref(), Some("C0:FF:EE:00:00:01"));
        assert!(!snapshot.attempt_in_flight);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_when_connected_is_noop() {
        let transport = MockTransport::advertising();
        let link = link(&transport);

        link.connect().await.unwrap();
        link.connect().await.unwrap();

        assert_eq!(transport.scan_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_timeout_waits_full_window() {
        let transport = MockTransport::new();
        let link = link(&transport);
        let start = Instant::now();

        let err = link.connect().await.unwrap_err();

        assert!(matches!(err, LinkError::DiscoveryTimeout));
        assert_eq!(start.elapsed(), Duration::from_secs(8));
        assert_eq!(link.phase().await, LinkPhase::Idle);
        assert_eq!(transport.open_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_name_must_match_exactly() {
        let transport = MockTransport::advertising();
        transport.set_advertised_name("LED-2");
        let link = link(&transport);

        let err = link.connect().await.unwrap_err();
        assert!(matches!(err, LinkError::DiscoveryTimeout));
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_error_is_transport_fault() {
        let transport = MockTransport::advertising();
        transport.set_scan_error(Some("adapter powered off"));
        let link = link(&transport);

        let err = link.connect().await.unwrap_err();

        assert!(matches!(err, LinkError::TransportFault(_)));
        assert_eq!(link.phase().await, LinkPhase::Idle);
        assert!(matches!(
            link.snapshot().await.last_failure,
            Some(TransitionReason::ScanFailure(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolution_retries_then_succeeds() {
        let transport = MockTransport::advertising();
        transport.fail_resolves(2);
        let link = link(&transport);

        link.connect().await.unwrap();

        assert_eq!(transport.resolve_count(), 3);
        assert_eq!(link.phase().await, LinkPhase::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resolution_failure_releases_session() {
        let transport = MockTransport::advertising();
        transport.fail_resolves(10);
        let link = link(&transport);

        let err = link.connect().await.unwrap_err();

        assert!(matches!(
            err,
            LinkError::ResolutionFailure { attempts: 3, .. }
        ));
        assert_eq!(transport.resolve_count(), 3);
        assert_eq!(transport.open_sessions(), 0);
        assert_eq!(link.phase().await, LinkPhase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_characteristic_fails_resolution() {
        let transport = MockTransport::advertising();
        transport.set_characteristic(Uuid::from_u128(0x1234));
        let link = link(&transport);

        let err = link.connect().await.unwrap_err();

        assert!(matches!(err, LinkError::ResolutionFailure { .. }));
        assert_eq!(transport.open_sessions(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_blocks_second_attempt() {
        let transport = MockTransport::new();
        let link = link(&transport);

        let _ = link.connect().await;
        // the 8 s scan already outlasted the 3 s backoff
        assert!(link.reconnect_eligible().await);

        let _ = link.connect().await;
        let starts = transport.scan_starts();
        assert_eq!(starts.len(), 2);
        assert!(starts[1] - starts[0] >= Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_reported_when_too_early() {
        let transport = MockTransport::advertising();
        let link = link(&transport);

        link.connect().await.unwrap();
        transport.drop_connection();
        assert!(!link.status().await);

        // connect took 200 ms; 2.8 s of backoff remain
        assert!(!link.reconnect_eligible().await);
        let err = link.connect().await.unwrap_err();
        assert!(matches!(err, LinkError::Backoff { .. }));
        assert_eq!(transport.scan_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_state_writes_single_byte() {
        let transport = MockTransport::advertising();
        let link = link(&transport);
        link.connect().await.unwrap();

        link.set_state(true).await.unwrap();
        link.set_state(false).await.unwrap();

        assert_eq!(transport.writes(), vec![1, 0]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_state_requires_connection() {
        let transport = MockTransport::advertising();
        let link = link(&transport);

        let err = link.set_state(true).await.unwrap_err();
        assert!(matches!(err, LinkError::NotConnected));
        assert!(transport.writes().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_handle_degrades_without_writing() {
        let transport = MockTransport::advertising();
        let link = link(&transport);
        link.connect().await.unwrap();

        transport.drop_connection_silently();
        let err = link.set_state(true).await.unwrap_err();

        assert!(matches!(
            err,
            LinkError::TransportFault(TransportError::Disconnected)
        ));
        assert!(transport.writes().is_empty());
        assert_eq!(link.phase().await, LinkPhase::Idle);
        assert_eq!(transport.open_sessions(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_write_degrades_to_failed() {
        let transport = MockTransport::advertising();
        let link = link(&transport);
        link.connect().await.unwrap();

        transport.fail_writes(1);
        let err = link.set_state(true).await.unwrap_err();

        assert!(matches!(err, LinkError::TransportFault(TransportError::Gatt(_))));
        assert!(!link.status().await);
        assert!(matches!(
            link.snapshot().await.last_failure,
            Some(TransitionReason::WriteFailure(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_notification_observed_by_status() {
        let transport = MockTransport::advertising();
        let link = link(&transport);
        link.connect().await.unwrap();

        transport.drop_connection();

        assert!(!link.status().await);
        assert_eq!(transport.open_sessions(), 0);
        assert!(matches!(
            link.snapshot().await.last_failure,
            Some(TransitionReason::TransportDisconnect)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_on_idle_keeps_backoff() {
        let transport = MockTransport::new();
        let link = link(&transport);

        let _ = link.connect().await;
        let before = link.inner.lock().await.backoff.last_attempt();

        link.disconnect().await;
        link.disconnect().await;

        assert_eq!(link.phase().await, LinkPhase::Idle);
        assert_eq!(link.inner.lock().await.backoff.last_attempt(), before);
    }

    #[tokio::test(start_paused = true)]
    async fn test_explicit_disconnect_releases_session() {
        let transport = MockTransport::advertising();
        let link = link(&transport);
        link.connect().await.unwrap();

        link.disconnect().await;

        assert_eq!(link.phase().await, LinkPhase::Idle);
        assert_eq!(transport.open_sessions(), 0);
        assert!(link.snapshot().await.last_failure.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_force_reset_makes_eligible_immediately() {
        let transport = MockTransport::advertising();
        let link = link(&transport);
        link.connect().await.unwrap();
        transport.drop_connection();
        assert!(!link.status().await);
        assert!(!link.reconnect_eligible().await);

        link.force_reset().await;

        assert!(link.reconnect_eligible().await);
        link.connect().await.unwrap();
        assert_eq!(transport.scan_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_interrupts_scan() {
        let transport = MockTransport::new();
        let link = Arc::new(link(&transport));
        let start = Instant::now();

        let attempt = tokio::spawn({
            let link = link.clone();
            async move { link.connect().await }
        });
        tokio::time::sleep(Duration::from_secs(1)).await;
        link.shutdown().await;

        let result = attempt.await.unwrap();
        assert!(matches!(result, Err(LinkError::Cancelled)));
        assert!(start.elapsed() < Duration::from_secs(8));
        assert_eq!(link.phase().await, LinkPhase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalidated_attempt_is_superseded() {
        let transport = MockTransport::advertising();
        transport.set_advertise_after(Duration::from_secs(2));
        let link = Arc::new(link(&transport));

        let attempt = tokio::spawn({
            let link = link.clone();
            async move { link.connect().await }
        });
        tokio::time::sleep(Duration::from_secs(1)).await;
        link.invalidator().invalidate();

        let result = attempt.await.unwrap();
        assert!(matches!(result, Err(LinkError::Superseded)));
        assert_eq!(link.phase().await, LinkPhase::Idle);
        assert_eq!(transport.open_count(), 0);
        assert!(!link.snapshot().await.attempt_in_flight);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_during_resolution_discards_session() {
        let transport = MockTransport::advertising();
        transport.fail_resolves(2);
        let link = Arc::new(link(&transport));

        let attempt = tokio::spawn({
            let link = link.clone();
            async move { link.connect().await }
        });
        // found at 200 ms; the first retry delay runs until 700 ms
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert_eq!(link.phase().await, LinkPhase::Resolving);
        link.invalidator().invalidate();

        let result = attempt.await.unwrap();
        assert!(matches!(result, Err(LinkError::Superseded)));
        assert_eq!(transport.resolve_count(), 3);
        assert_eq!(transport.open_count(), 1);
        assert_eq!(transport.open_sessions(), 0);
        assert_eq!(link.phase().await, LinkPhase::Idle);
        assert!(!link.status().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_resolution_times_out_each_attempt() {
        let transport = MockTransport::advertising();
        transport.hang_resolves(10);
        let link = link(&transport);
        let start = Instant::now();

        let err = link.connect().await.unwrap_err();

        match err {
            LinkError::ResolutionFailure {
                attempts,
                last_error,
            } => {
                assert_eq!(attempts, 3);
                assert!(last_error.contains("timed out"));
            }
            other => panic!("unexpected error: {}", other),
        }
        // 200 ms scan, three 5 s resolutions, two 500 ms delays
        assert_eq!(start.elapsed(), Duration::from_millis(16_200));
        assert_eq!(transport.resolve_count(), 3);
        assert_eq!(transport.open_sessions(), 0);
        assert_eq!(link.phase().await, LinkPhase::Idle);
        assert!(!link.snapshot().await.attempt_in_flight);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_resolution_recovers_on_retry() {
        let transport = MockTransport::advertising();
        transport.hang_resolves(1);
        let link = link(&transport);

        link.connect().await.unwrap();

        assert_eq!(transport.resolve_count(), 2);
        assert_eq!(link.phase().await, LinkPhase::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_hung_open_times_out() {
        let transport = MockTransport::advertising();
        transport.hang_opens(true);
        let link = link(&transport);
        let start = Instant::now();

        let err = link.connect().await.unwrap_err();

        assert!(matches!(
            err,
            LinkError::TransportFault(TransportError::Timeout(_))
        ));
        assert_eq!(start.elapsed(), Duration::from_millis(5_200));
        assert_eq!(transport.resolve_count(), 0);
        assert_eq!(transport.open_sessions(), 0);
        assert_eq!(link.phase().await, LinkPhase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_dropped_attempt_does_not_block_reconnect() {
        let transport = MockTransport::new();
        let link = Arc::new(link(&transport));

        let attempt = tokio::spawn({
            let link = link.clone();
            async move { link.connect().await }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        attempt.abort();
        assert!(attempt.await.unwrap_err().is_cancelled());

        assert!(!link.snapshot().await.attempt_in_flight);
        assert_eq!(link.phase().await, LinkPhase::Discovering);

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(link.reconnect_eligible().await);

        let err = link.connect().await.unwrap_err();
        assert!(matches!(err, LinkError::DiscoveryTimeout));
        assert_eq!(transport.scan_count(), 2);
        assert_eq!(link.phase().await, LinkPhase::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_attempt_while_in_flight() {
        let transport = MockTransport::new();
        let link = Arc::new(link(&transport));

        let attempt = tokio::spawn({
            let link = link.clone();
            async move { link.connect().await }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(matches!(link.connect().await, Err(LinkError::AlreadyInFlight)));
        assert!(!link.reconnect_eligible().await);
        assert_eq!(transport.scan_count(), 1);

        assert!(matches!(
            attempt.await.unwrap(),
            Err(LinkError::DiscoveryTimeout)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_releases_resources() {
        let transport = MockTransport::advertising();
        let link = link(&transport);
        link.connect().await.unwrap();

        link.shutdown().await;

        assert_eq!(transport.open_sessions(), 0);
        assert_eq!(link.phase().await, LinkPhase::Idle);
        assert!(matches!(link.connect().await, Err(LinkError::Cancelled)));
    }
}
