//! Transport seam between the peripheral link and a BLE stack.
//!
//! A [`Transport`] finds the peripheral and opens a [`Session`] to it; the
//! session resolves the switch characteristic, writes to it, and reports
//! asynchronous disconnects. The link owns exactly one session at a time and
//! always closes it before starting another attempt.

use std::fmt::Debug;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::TransportError;

/// A peripheral matched during discovery
#[derive(Debug, Clone)]
pub struct Discovered<D> {
    /// Printable device address (or platform identifier)
    pub address: String,
    /// Transport handle used to open the device
    pub device: D,
}

/// Bluetooth central able to scan for and open the LED peripheral
pub trait Transport: Send + Sync + 'static {
    /// Handle to a discovered, not yet opened, device
    type Device: Debug + Send + Sync + 'static;
    /// Open connection to one device
    type Session: Session;

    /// Scan until an advertisement with exactly `name` is seen, `window`
    /// elapses, or `cancel` fires
    ///
    /// Returns `Ok(None)` when the window elapses or the scan was cancelled.
    /// The scan is stopped before returning in every case.
    fn scan(
        &self,
        name: &str,
        window: Duration,
        cancel: &CancellationToken,
    ) -> impl Future<Output = Result<Option<Discovered<Self::Device>>, TransportError>> + Send;

    /// Open the device and subscribe to its disconnect notifications
    fn open(
        &self,
        device: Self::Device,
    ) -> impl Future<Output = Result<Self::Session, TransportError>> + Send;
}

/// Open connection to the peripheral
pub trait Session: Send + Sync + 'static {
    /// Resolved characteristic handle, valid while the session is open
    type Characteristic: Clone + Debug + Send + Sync + 'static;

    /// Enumerate services and find the characteristic with `uuid`
    fn resolve(
        &self,
        uuid: Uuid,
    ) -> impl Future<Output = Result<Self::Characteristic, TransportError>> + Send;

    /// Live connection status as reported by the transport
    fn is_connected(&self) -> impl Future<Output = bool> + Send;

    /// Drain pending disconnect notifications; true if any arrived
    fn take_disconnect(&mut self) -> bool;

    /// Confirmed (with-response) write
    fn write(
        &self,
        characteristic: &Self::Characteristic,
        value: &[u8],
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Release subscriptions and device handles
    ///
    /// Release failures are logged inside the session, never returned.
    fn close(self) -> impl Future<Output = ()> + Send;
}
