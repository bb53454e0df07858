//! Peripheral connection state machine
//!
//! Defines the phases and transitions of a single logical connection to the
//! LED peripheral. `Failed` is terminal for one attempt only: entering it is
//! reported to the caller, and the machine settles back to `Idle` at once.

/// Connection phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkPhase {
    /// No connection and no attempt in progress
    #[default]
    Idle,
    /// Scanning for a matching advertisement
    Discovering,
    /// Opening the device and resolving the characteristic
    Resolving,
    /// Characteristic resolved; writes allowed
    Connected,
    /// Attempt or connection lost; settles to Idle immediately
    Failed,
}

impl LinkPhase {
    /// Returns a human-readable description of the phase
    pub fn description(&self) -> &'static str {
        match self {
            LinkPhase::Idle => "Disconnected",
            LinkPhase::Discovering => "Scanning for peripheral",
            LinkPhase::Resolving => "Resolving characteristic",
            LinkPhase::Connected => "Connected",
            LinkPhase::Failed => "Connection failed",
        }
    }

    /// Returns whether a connection attempt is running in this phase
    pub fn is_attempting(&self) -> bool {
        matches!(self, LinkPhase::Discovering | LinkPhase::Resolving)
    }

    /// Returns whether the phase blocks a new attempt from starting
    pub fn blocks_reconnect(&self) -> bool {
        matches!(
            self,
            LinkPhase::Discovering | LinkPhase::Resolving | LinkPhase::Connected
        )
    }
}

/// Events that can trigger phase transitions
#[derive(Debug, Clone)]
pub enum LinkEvent {
    /// A new connection attempt was admitted
    AttemptStarted,
    /// A matching advertisement was seen
    DeviceFound { address: String },
    /// The scan window elapsed without a match
    ScanTimedOut,
    /// The transport could not scan (adapter missing or powered off)
    ScanFailed { error: String },
    /// Characteristic resolved on the opened device
    Resolved,
    /// Opening or resolution failed after bounded retries
    ResolutionFailed { error: String },
    /// A write failed or was rejected
    WriteFailed { error: String },
    /// The transport reported the peripheral as gone
    TransportDisconnected,
    /// Caller asked to drop the connection or abort the attempt
    DisconnectRequested,
}

/// Reason recorded for a transition
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransitionReason {
    AttemptStarted,
    DeviceFound,
    ScanTimeout,
    ScanFailure(String),
    Resolved,
    ResolutionFailure(String),
    WriteFailure(String),
    TransportDisconnect,
    Requested,
}

/// Result of a phase transition
#[derive(Debug, Clone)]
pub struct TransitionResult {
    pub previous: LinkPhase,
    /// Phase entered by this transition (may be `Failed`)
    pub new_phase: LinkPhase,
    pub reason: TransitionReason,
}

impl TransitionResult {
    pub fn is_failure(&self) -> bool {
        self.new_phase == LinkPhase::Failed
    }
}

/// Connection state machine
///
/// Not thread-safe on its own; the peripheral link keeps it behind the
/// link lock together with the backoff timer.
#[derive(Debug)]
pub struct LinkStateMachine {
    phase: LinkPhase,
    /// Address matched in the current attempt
    address: Option<String>,
    last_failure: Option<TransitionReason>,
}

impl LinkStateMachine {
    pub fn new() -> Self {
        Self {
            phase: LinkPhase::Idle,
            address: None,
            last_failure: None,
        }
    }

    pub fn phase(&self) -> LinkPhase {
        self.phase
    }

    /// Address of the peripheral matched by the current attempt or connection
    pub fn address(&self) -> Option<&str> {
        self.address.as_deref()
    }

    /// Reason for the most recent failed transition
    pub fn last_failure(&self) -> Option<&TransitionReason> {
        self.last_failure.as_ref()
    }

    /// Process an event and return the transition if one occurred
    ///
    /// Returns `None` if the event is not valid for the current phase.
    pub fn process_event(&mut self, event: LinkEvent) -> Option<TransitionResult> {
        use LinkPhase::*;

        let (new_phase, reason) = match (self.phase, event) {
            (Idle, LinkEvent::AttemptStarted) => (Discovering, TransitionReason::AttemptStarted),

            (Discovering, LinkEvent::DeviceFound { address }) => {
                self.address = Some(address);
                (Resolving, TransitionReason::DeviceFound)
            }
            (Discovering, LinkEvent::ScanTimedOut) => (Failed, TransitionReason::ScanTimeout),
            (Discovering, LinkEvent::ScanFailed { error }) => {
                (Failed, TransitionReason::ScanFailure(error))
            }
            (Discovering, LinkEvent::DisconnectRequested) => (Idle, TransitionReason::Requested),

            (Resolving, LinkEvent::Resolved) => (Connected, TransitionReason::Resolved),
            (Resolving, LinkEvent::ResolutionFailed { error }) => {
                (Failed, TransitionReason::ResolutionFailure(error))
            }
            (Resolving, LinkEvent::DisconnectRequested) => (Idle, TransitionReason::Requested),

            (Connected, LinkEvent::WriteFailed { error }) => {
                (Failed, TransitionReason::WriteFailure(error))
            }
            (Connected, LinkEvent::TransportDisconnected) => {
                (Failed, TransitionReason::TransportDisconnect)
            }
            (Connected, LinkEvent::DisconnectRequested) => (Idle, TransitionReason::Requested),

            _ => return None,
        };

        let result = TransitionResult {
            previous: self.phase,
            new_phase,
            reason,
        };
        self.apply_transition(&result);
        Some(result)
    }

    fn apply_transition(&mut self, result: &TransitionResult) {
        tracing::info!(
            "Link transition: {:?} -> {:?} (reason: {:?})",
            result.previous,
            result.new_phase,
            result.reason
        );

        match result.new_phase {
            LinkPhase::Failed => {
                self.last_failure = Some(result.reason.clone());
                self.settle();
            }
            LinkPhase::Idle => self.settle(),
            phase => self.phase = phase,
        }
    }

    /// Failed and Idle both end with no address and phase Idle
    fn settle(&mut self) {
        self.phase = LinkPhase::Idle;
        self.address = None;
    }
}

impl Default for LinkStateMachine {
    fn default() -> Self {
        Self::new()
    }
}
