//! Scripted in-memory transport for exercising the link without a radio.
//!
//! A [`MockTransport`] stands in for the BLE adapter: tests decide whether
//! the peripheral is advertising, how many resolution or write attempts fail,
//! and when the connection drops. Every scan, open, close and write is
//! recorded for assertions.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::transport::{Discovered, Session, Transport};
use crate::config::{DEFAULT_ADVERTISED_NAME, DEFAULT_CHARACTERISTIC_UUID};
use crate::error::TransportError;

const DEFAULT_MOCK_ADDRESS: &str = "C0:FF:EE:00:00:01";

#[derive(Debug)]
struct MockState {
    advertising: bool,
    advertised_name: String,
    address: String,
    characteristic: Uuid,
    /// Time from scan start until the advertisement is seen
    advertise_after: Duration,
    scan_error: Option<String>,
    open_error: Option<String>,
    /// Opens never complete while set
    open_hangs: bool,
    resolve_failures: u32,
    /// Resolution attempts that never complete
    resolve_hangs: u32,
    write_failures: u32,
    /// Live link status of the open session
    connected: bool,
    disconnect_flag: Option<Arc<AtomicBool>>,
    scan_starts: Vec<Instant>,
    opens: u32,
    closes: u32,
    resolves: u32,
    writes: Vec<u8>,
}

/// Scripted transport; clones share the same peripheral
#[derive(Debug, Clone)]
pub struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl MockTransport {
    /// A transport whose peripheral is not advertising
    pub fn new() -> Self {
        let characteristic = Uuid::parse_str(DEFAULT_CHARACTERISTIC_UUID).unwrap_or_default();
        Self {
            state: Arc::new(Mutex::new(MockState {
                advertising: false,
                advertised_name: DEFAULT_ADVERTISED_NAME.to_string(),
                address: DEFAULT_MOCK_ADDRESS.to_string(),
                characteristic,
                advertise_after: Duration::from_millis(200),
                scan_error: None,
                open_error: None,
                open_hangs: false,
                resolve_failures: 0,
                resolve_hangs: 0,
                write_failures: 0,
                connected: false,
                disconnect_flag: None,
                scan_starts: Vec::new(),
                opens: 0,
                closes: 0,
                resolves: 0,
                writes: Vec::new(),
            })),
        }
    }

    /// A transport whose peripheral is advertising the default name
    pub fn advertising() -> Self {
        let transport = Self::new();
        transport.set_advertising(true);
        transport
    }

    pub fn set_advertising(&self, advertising: bool) {
        self.state.lock().advertising = advertising;
    }

    pub fn set_advertised_name(&self, name: &str) {
        self.state.lock().advertised_name = name.to_string();
    }

    pub fn set_characteristic(&self, uuid: Uuid) {
        self.state.lock().characteristic = uuid;
    }

    pub fn set_advertise_after(&self, delay: Duration) {
        self.state.lock().advertise_after = delay;
    }

    /// Make scans fail with a transport error until cleared
    pub fn set_scan_error(&self, error: Option<&str>) {
        self.state.lock().scan_error = error.map(str::to_string);
    }

    /// Make device opening fail until cleared
    pub fn set_open_error(&self, error: Option<&str>) {
        self.state.lock().open_error = error.map(str::to_string);
    }

    /// Make device opening stall forever until cleared
    pub fn hang_opens(&self, hang: bool) {
        self.state.lock().open_hangs = hang;
    }

    /// Stall the next `count` resolution attempts forever
    pub fn hang_resolves(&self, count: u32) {
        self.state.lock().resolve_hangs = count;
    }

    /// Fail the next `count` resolution attempts
    pub fn fail_resolves(&self, count: u32) {
        self.state.lock().resolve_failures = count;
    }

    /// Reject the next `count` writes
    pub fn fail_writes(&self, count: u32) {
        self.state.lock().write_failures = count;
    }

    /// Drop the link and push a disconnect notification to the session
    pub fn drop_connection(&self) {
        let mut state = self.state.lock();
        state.connected = false;
        if let Some(flag) = &state.disconnect_flag {
            flag.store(true, Ordering::SeqCst);
        }
    }

    /// Drop the link silently; only live status queries notice
    pub fn drop_connection_silently(&self) {
        self.state.lock().connected = false;
    }

    pub fn scan_count(&self) -> usize {
        self.state.lock().scan_starts.len()
    }

    pub fn scan_starts(&self) -> Vec<Instant> {
        self.state.lock().scan_starts.clone()
    }

    pub fn open_count(&self) -> u32 {
        self.state.lock().opens
    }

    pub fn close_count(&self) -> u32 {
        self.state.lock().closes
    }

    /// Sessions opened and not yet closed
    pub fn open_sessions(&self) -> u32 {
        let state = self.state.lock();
        state.opens - state.closes
    }

    pub fn resolve_count(&self) -> u32 {
        self.state.lock().resolves
    }

    /// Bytes written, oldest first
    pub fn writes(&self) -> Vec<u8> {
        self.state.lock().writes.clone()
    }
}

/// Device handle produced by a mock scan
#[derive(Debug, Clone)]
pub struct MockDevice {
    pub address: String,
}

impl Transport for MockTransport {
    type Device = MockDevice;
    type Session = MockSession;

    async fn scan(
        &self,
        name: &str,
        window: Duration,
        cancel: &CancellationToken,
    ) -> Result<Option<Discovered<MockDevice>>, TransportError> {
        let (found, wait, address) = {
            let mut state = self.state.lock();
            state.scan_starts.push(Instant::now());
            if let Some(error) = &state.scan_error {
                return Err(TransportError::AdapterUnavailable(error.clone()));
            }
            let found = state.advertising
                && state.advertised_name == name
                && state.advertise_after < window;
            let wait = if found { state.advertise_after } else { window };
            (found, wait, state.address.clone())
        };

        tokio::select! {
            _ = cancel.cancelled() => return Ok(None),
            _ = sleep(wait) => {}
        }

        Ok(found.then(|| Discovered {
            address: address.clone(),
            device: MockDevice { address },
        }))
    }

    async fn open(&self, _device: MockDevice) -> Result<MockSession, TransportError> {
        let hang = self.state.lock().open_hangs;
        if hang {
            std::future::pending::<()>().await;
        }

        let mut state = self.state.lock();
        if let Some(error) = &state.open_error {
            return Err(TransportError::Gatt(error.clone()));
        }
        state.opens += 1;
        state.connected = true;
        let flag = Arc::new(AtomicBool::new(false));
        state.disconnect_flag = Some(flag.clone());

        Ok(MockSession {
            state: self.state.clone(),
            disconnected: flag,
        })
    }
}

/// Session opened by [`MockTransport`]
#[derive(Debug)]
pub struct MockSession {
    state: Arc<Mutex<MockState>>,
    disconnected: Arc<AtomicBool>,
}

impl Session for MockSession {
    type Characteristic = Uuid;

    async fn resolve(&self, uuid: Uuid) -> Result<Uuid, TransportError> {
        let hang = {
            let mut state = self.state.lock();
            state.resolves += 1;
            let hang = state.resolve_hangs > 0;
            if hang {
                state.resolve_hangs -= 1;
            }
            hang
        };
        if hang {
            std::future::pending::<()>().await;
        }

        let mut state = self.state.lock();
        if state.resolve_failures > 0 {
            state.resolve_failures -= 1;
            return Err(TransportError::Gatt("services unreachable".to_string()));
        }
        if state.characteristic == uuid {
            Ok(uuid)
        } else {
            Err(TransportError::Gatt(format!(
                "characteristic {} not found",
                uuid
            )))
        }
    }

    async fn is_connected(&self) -> bool {
        self.state.lock().connected
    }

    fn take_disconnect(&mut self) -> bool {
        self.disconnected.swap(false, Ordering::SeqCst)
    }

    async fn write(&self, characteristic: &Uuid, value: &[u8]) -> Result<(), TransportError> {
        let mut state = self.state.lock();
        if !state.connected {
            return Err(TransportError::Disconnected);
        }
        if state.write_failures > 0 {
            state.write_failures -= 1;
            return Err(TransportError::Gatt(format!(
                "write to {} rejected",
                characteristic
            )));
        }
        state.writes.extend_from_slice(value);
        Ok(())
    }

    async fn close(self) {
        let mut state = self.state.lock();
        state.closes += 1;
        state.connected = false;
        state.disconnect_flag = None;
    }
}

/// Sensor whose reading is set by the test
#[derive(Debug, Clone, Default)]
pub struct MockSensor {
    active: Arc<AtomicBool>,
}

impl MockSensor {
    pub fn new(active: bool) -> Self {
        Self {
            active: Arc::new(AtomicBool::new(active)),
        }
    }

    pub fn set(&self, active: bool) {
        self.active.store(active, Ordering::SeqCst);
    }
}

impl crate::sensor::SensorPoll for MockSensor {
    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}
