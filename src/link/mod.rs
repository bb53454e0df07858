//! Bluetooth LE link to the LED peripheral
//!
//! Keeps one logical connection to a peripheral that advertises a fixed name
//! and exposes a single writable "switch" characteristic. Writing `1` turns
//! the LED on, `0` turns it off.
//!
//! ## Phases
//!
//! 1. **IDLE** - No connection and no attempt running
//! 2. **DISCOVERING** - Scanning for the advertised name
//! 3. **RESOLVING** - Device opened; enumerating services for the characteristic
//! 4. **CONNECTED** - Characteristic resolved; writes allowed
//! 5. **FAILED** - Reported for one transition, then settles to IDLE
//!
//! ## Transitions
//!
//! ```text
//! ┌──────┐  connect  ┌─────────────┐  found  ┌───────────┐ resolved ┌───────────┐
//! │ IDLE │──────────►│ DISCOVERING │────────►│ RESOLVING │─────────►│ CONNECTED │
//! └──────┘           └─────────────┘         └───────────┘          └───────────┘
//!    ▲                     │                       │                      │
//!    │                     │ timeout               │ retries              │ write error
//!    │                     │ scan error            │ exhausted            │ disconnect
//!    │                     ▼                       ▼                      ▼
//!    │                ┌────────────────────────────────────────────────────┐
//!    │◄───────────────│                      FAILED                        │
//!    │                └────────────────────────────────────────────────────┘
//!    │
//!    │            disconnect / reset / shutdown (from any phase)
//!    └──────────────────────────────────────────────────────────────────────
//! ```
//!
//! A new attempt is admitted only from IDLE, with no attempt in flight and
//! the reconnect backoff elapsed. A forced reset clears the backoff.

mod backoff;
#[cfg(feature = "bluetooth")]
pub mod btle;
mod manager;
pub mod mock;
mod state;
mod transport;

pub use backoff::BackoffTimer;
#[cfg(feature = "bluetooth")]
pub use btle::BtleTransport;
pub use manager::{LinkInvalidator, LinkSettings, LinkStatus, PeripheralLink};
pub use state::{LinkEvent, LinkPhase, LinkStateMachine, TransitionReason, TransitionResult};
pub use transport::{Discovered, Session, Transport};
