//! btleplug-backed transport
//!
//! Uses the first Bluetooth adapter reported by the platform manager. The
//! adapter is acquired on first use so a missing radio surfaces as a failed
//! connection attempt rather than a startup error.

use btleplug::api::{Central, CentralEvent, Manager as _, Peripheral as _, ScanFilter, WriteType};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures_util::StreamExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, timeout, Instant};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::transport::{Discovered, Session, Transport};
use crate::error::TransportError;

/// Upper bound for releasing a peripheral during teardown
const DISCONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Transport over the platform BLE stack
#[derive(Default)]
pub struct BtleTransport {
    adapter: Mutex<Option<Adapter>>,
}

impl BtleTransport {
    pub fn new() -> Self {
        Self::default()
    }

    async fn adapter(&self) -> Result<Adapter, TransportError> {
        let mut slot = self.adapter.lock().await;
        if let Some(adapter) = slot.as_ref() {
            return Ok(adapter.clone());
        }

        let manager = Manager::new()
            .await
            .map_err(|e| TransportError::AdapterUnavailable(e.to_string()))?;
        let adapter = manager
            .adapters()
            .await
            .map_err(|e| TransportError::AdapterUnavailable(e.to_string()))?
            .into_iter()
            .next()
            .ok_or_else(|| {
                TransportError::AdapterUnavailable("no Bluetooth adapter found".to_string())
            })?;

        match adapter.adapter_info().await {
            Ok(info) => tracing::info!("Using Bluetooth adapter: {}", info),
            Err(e) => tracing::debug!("Adapter info unavailable: {}", e),
        }

        *slot = Some(adapter.clone());
        Ok(adapter)
    }
}

/// Whether `peripheral` currently advertises exactly `name`
async fn advertises(peripheral: &Peripheral, name: &str) -> bool {
    match peripheral.properties().await {
        Ok(Some(props)) => props.local_name.as_deref() == Some(name),
        Ok(None) => false,
        Err(e) => {
            tracing::debug!("Failed to read advertisement properties: {}", e);
            false
        }
    }
}

impl Transport for BtleTransport {
    type Device = Peripheral;
    type Session = BtleSession;

    async fn scan(
        &self,
        name: &str,
        window: Duration,
        cancel: &CancellationToken,
    ) -> Result<Option<Discovered<Peripheral>>, TransportError> {
        let adapter = self.adapter().await?;
        let mut events = adapter.events().await?;
        adapter.start_scan(ScanFilter::default()).await?;

        let deadline = Instant::now() + window;
        let mut found = None;

        loop {
            let event = tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!("Scan cancelled");
                    break;
                }
                _ = sleep_until(deadline) => break,
                event = events.next() => match event {
                    Some(event) => event,
                    None => break,
                },
            };

            let id = match event {
                CentralEvent::DeviceDiscovered(id) | CentralEvent::DeviceUpdated(id) => id,
                _ => continue,
            };
            let peripheral = match adapter.peripheral(&id).await {
                Ok(peripheral) => peripheral,
                Err(e) => {
                    tracing::debug!("Discovered device vanished: {}", e);
                    continue;
                }
            };
            // first match wins
            if advertises(&peripheral, name).await {
                found = Some(Discovered {
                    address: peripheral.address().to_string(),
                    device: peripheral,
                });
                break;
            }
        }

        if let Err(e) = adapter.stop_scan().await {
            tracing::warn!("Failed to stop scan: {}", e);
        }
        Ok(found)
    }

    async fn open(&self, device: Peripheral) -> Result<BtleSession, TransportError> {
        let adapter = self.adapter().await?;
        let mut events = adapter.events().await?;
        device.connect().await?;

        let disconnected = Arc::new(AtomicBool::new(false));
        let flag = disconnected.clone();
        let target = device.id();
        let listener = tokio::spawn(async move {
            while let Some(event) = events.next().await {
                if let CentralEvent::DeviceDisconnected(id) = event {
                    if id == target {
                        flag.store(true, Ordering::SeqCst);
                        break;
                    }
                }
            }
        });

        Ok(BtleSession {
            peripheral: device,
            listener,
            disconnected,
        })
    }
}

/// Open connection to a btleplug peripheral
pub struct BtleSession {
    peripheral: Peripheral,
    /// Forwards adapter disconnect events for this peripheral
    listener: JoinHandle<()>,
    disconnected: Arc<AtomicBool>,
}

impl Session for BtleSession {
    type Characteristic = btleplug::api::Characteristic;

    async fn resolve(&self, uuid: Uuid) -> Result<Self::Characteristic, TransportError> {
        self.peripheral.discover_services().await?;
        self.peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == uuid)
            .ok_or_else(|| TransportError::Gatt(format!("characteristic {} not found", uuid)))
    }

    async fn is_connected(&self) -> bool {
        self.peripheral.is_connected().await.unwrap_or(false)
    }

    fn take_disconnect(&mut self) -> bool {
        self.disconnected.swap(false, Ordering::SeqCst)
    }

    async fn write(
        &self,
        characteristic: &Self::Characteristic,
        value: &[u8],
    ) -> Result<(), TransportError> {
        self.peripheral
            .write(characteristic, value, WriteType::WithResponse)
            .await?;
        Ok(())
    }

    async fn close(self) {
        self.listener.abort();
        match timeout(DISCONNECT_TIMEOUT, self.peripheral.disconnect()).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => tracing::warn!("Failed to disconnect peripheral: {}", e),
            Err(_) => tracing::warn!(
                "Disconnect did not complete within {:?}",
                DISCONNECT_TIMEOUT
            ),
        }
    }
}
