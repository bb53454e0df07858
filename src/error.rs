//! Error types shared by the peripheral link and configuration loader.

use std::time::Duration;

/// Faults surfaced by the underlying Bluetooth transport.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("No Bluetooth adapter available: {0}")]
    AdapterUnavailable(String),

    #[error("Peripheral is not connected")]
    Disconnected,

    #[error("GATT operation failed: {0}")]
    Gatt(String),

    #[error("Transport operation timed out after {0:?}")]
    Timeout(Duration),

    #[cfg(feature = "bluetooth")]
    #[error("Bluetooth error: {0}")]
    Btle(#[from] btleplug::Error),
}

/// Outcome of a peripheral link operation that did not succeed.
///
/// Every variant is a definite outcome; none of them leave the link in an
/// undefined phase.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("No matching advertisement within the scan window")]
    DiscoveryTimeout,

    #[error("Characteristic resolution failed after {attempts} attempts: {last_error}")]
    ResolutionFailure { attempts: u32, last_error: String },

    #[error("Transport fault: {0}")]
    TransportFault(#[from] TransportError),

    #[error("A connection attempt is already in flight")]
    AlreadyInFlight,

    #[error("Peripheral is not connected")]
    NotConnected,

    #[error("Reconnect backoff active for another {remaining:?}")]
    Backoff { remaining: Duration },

    #[error("Connection attempt superseded by a reset")]
    Superseded,

    #[error("Connection attempt cancelled by shutdown")]
    Cancelled,
}

impl LinkError {
    /// Whether this outcome is part of normal operation and only worth an
    /// informational log line.
    pub fn is_expected(&self) -> bool {
        matches!(
            self,
            LinkError::DiscoveryTimeout
                | LinkError::AlreadyInFlight
                | LinkError::Backoff { .. }
                | LinkError::Superseded
                | LinkError::Cancelled
        )
    }
}

/// Configuration loading errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to access config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Unknown config version: {0}")]
    UnknownVersion(u32),

    #[error("Invalid characteristic UUID '{value}': {source}")]
    InvalidUuid {
        value: String,
        #[source]
        source: uuid::Error,
    },

    #[error("Invalid setting: {0}")]
    Invalid(String),
}
