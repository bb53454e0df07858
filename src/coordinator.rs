//! Monitoring loop
//!
//! Once per poll interval: re-validate the link, reconnect if allowed, read
//! the microphone sensor and mirror its value onto the LED. The steps of one
//! iteration always run in that order and iterations never overlap.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;

use crate::config::MonitorConfig;
use crate::error::LinkError;
use crate::link::{PeripheralLink, Transport};
use crate::notify::NotificationSink;
use crate::sensor::SensorPoll;

/// Requests from the console to the monitoring loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    /// Drop the connection and reconnect without waiting for the backoff
    ForceReconnect,
}

/// What happened during one iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TickReport {
    pub attempted_connect: bool,
    pub connected: bool,
    pub active: bool,
    /// Value written to the LED, if any
    pub wrote: Option<bool>,
}

pub struct Coordinator<T: Transport, S: SensorPoll, N: NotificationSink> {
    link: Arc<PeripheralLink<T>>,
    sensor: S,
    sink: Arc<N>,
    controls: mpsc::UnboundedReceiver<Control>,
    poll_interval: Duration,
    heartbeat_interval: Duration,
    connected: bool,
    /// Last value the peripheral acknowledged
    last_confirmed: bool,
    /// Write on the next connected iteration even if the value is unchanged
    force_update: bool,
    last_heartbeat: Instant,
}

impl<T: Transport, S: SensorPoll, N: NotificationSink> Coordinator<T, S, N> {
    pub fn new(
        link: Arc<PeripheralLink<T>>,
        sensor: S,
        sink: Arc<N>,
        controls: mpsc::UnboundedReceiver<Control>,
        config: &MonitorConfig,
    ) -> Self {
        Self {
            link,
            sensor,
            sink,
            controls,
            poll_interval: config.poll_interval(),
            heartbeat_interval: config.heartbeat_interval(),
            connected: false,
            last_confirmed: false,
            force_update: false,
            last_heartbeat: Instant::now(),
        }
    }

    pub fn last_confirmed(&self) -> bool {
        self.last_confirmed
    }

    /// Run until `cancel` fires, then release the link
    pub async fn run(mut self, cancel: CancellationToken) {
        tracing::info!(
            "Monitoring started (poll every {:?}, heartbeat every {:?})",
            self.poll_interval,
            self.heartbeat_interval
        );
        self.sink.log("Monitoring microphone activity");

        while !cancel.is_cancelled() {
            self.tick().await;

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = sleep(self.poll_interval) => {}
            }
        }

        self.link.shutdown().await;
        self.sink.log("Monitoring stopped");
    }

    /// One monitoring iteration
    pub async fn tick(&mut self) -> TickReport {
        let mut report = TickReport::default();
        let was_connected = self.connected;

        self.drain_controls().await;

        let mut connected = self.link.status().await;

        if !connected && self.link.reconnect_eligible().await {
            report.attempted_connect = true;
            connected = self.try_connect().await;
        }

        let active = self.sensor.is_active();
        report.active = active;

        if connected && (active != self.last_confirmed || self.force_update) {
            match self.link.set_state(active).await {
                Ok(()) => {
                    self.last_confirmed = active;
                    self.force_update = false;
                    report.wrote = Some(active);
                }
                Err(e) => {
                    tracing::warn!("LED write failed: {}", e);
                    self.sink
                        .log("Failed to update LED state - connection may be lost");
                    connected = false;
                }
            }
        }

        self.connected = connected;
        report.connected = connected;

        if connected != was_connected {
            self.sink.update_summary(connected, active);
            if connected {
                let status = self.link.snapshot().await;
                match status.address {
                    Some(address) => {
                        self.sink.log(&format!("LED peripheral connected ({})", address))
                    }
                    None => self.sink.log("LED peripheral connected"),
                }
            } else {
                self.sink
                    .log("LED peripheral disconnected - will attempt reconnection");
            }
        }

        if self.last_heartbeat.elapsed() >= self.heartbeat_interval {
            self.last_heartbeat = Instant::now();
            self.sink.update_summary(connected, active);
            self.sink.log(&format!(
                "Status: {}, Mic: {}",
                if connected { "Connected" } else { "Disconnected" },
                if active { "Active" } else { "Inactive" }
            ));
        }

        report
    }

    async fn drain_controls(&mut self) {
        while let Ok(control) = self.controls.try_recv() {
            match control {
                Control::ForceReconnect => {
                    self.link.force_reset().await;
                    self.sink.log("Manual reconnect requested");
                }
            }
        }
    }

    /// Returns whether the link came up
    async fn try_connect(&mut self) -> bool {
        self.sink.log("Attempting to reconnect...");

        match self.link.connect().await {
            Ok(()) => {
                // a fresh connection always receives the current value
                self.force_update = true;
                true
            }
            Err(LinkError::DiscoveryTimeout) => {
                self.sink.log(&format!(
                    "LED device '{}' not found - will retry",
                    self.link.settings().advertised_name
                ));
                false
            }
            Err(e) if e.is_expected() => {
                tracing::debug!("Connection attempt skipped: {}", e);
                false
            }
            Err(e) => {
                tracing::warn!("Connection attempt failed: {}", e);
                self.sink.log(&format!("Connection attempt failed: {}", e));
                false
            }
        }
    }
}
