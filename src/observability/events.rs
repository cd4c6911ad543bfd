//! Observable station events
//!
//! Every structured log line the core emits is named by one of these.

use std::fmt;

/// Observable events in a station
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    // Lifecycle
    /// Station startup begins
    StationStart,
    /// Station is processing taps
    StationReady,
    /// Shutdown initiated
    ShutdownStart,
    /// Shutdown complete
    ShutdownComplete,
    /// Configuration loaded
    ConfigLoaded,

    // Event store
    /// Store opened and log replayed
    StoreOpened,
    /// Tap event appended
    EventLogged,
    /// Tap rejected as a duplicate
    DuplicateRejected,
    /// Tap stored but flagged out of sequence
    OutOfOrderFlagged,
    /// Input rejected by validation
    ValidationRejected,
    /// Durable append failed
    StorageFailure,
    /// Log corruption detected at open (FATAL)
    StoreCorruption,
    /// Auto-init counter advanced
    AutoInitIssued,
    /// Auto-init degraded to a tagged fallback id
    AutoInitFallback,
    /// Operator correction stored
    ManualEventAdded,
    /// Event archived and removed
    EventRemoved,
    /// Anomaly pass complete
    AnomalyScan,

    // Peer monitor
    /// Peer monitor loop started
    PeerMonitorStart,
    /// Peer monitor loop stopped
    PeerMonitorStop,
    /// A single probe failed
    PeerProbeFailed,
    /// Peer declared down
    PeerDown,
    /// Peer recovered
    PeerRecovered,

    // Failover
    /// Station began covering the peer's stages
    FailoverEnabled,
    /// Station returned to its primary stage only
    FailoverDisabled,

    // Tap handling
    /// A physical tap was processed
    TapProcessed,

    // Health endpoint
    /// Health server bound and serving
    HealthServing,
}

impl Event {
    /// Returns the event name string
    pub fn as_str(&self) -> &'static str {
        match self {
            Event::StationStart => "STATION_START",
            Event::StationReady => "STATION_READY",
            Event::ShutdownStart => "SHUTDOWN_START",
            Event::ShutdownComplete => "SHUTDOWN_COMPLETE",
            Event::ConfigLoaded => "CONFIG_LOADED",
            Event::StoreOpened => "STORE_OPENED",
            Event::EventLogged => "EVENT_LOGGED",
            Event::DuplicateRejected => "DUPLICATE_REJECTED",
            Event::OutOfOrderFlagged => "OUT_OF_ORDER_FLAGGED",
            Event::ValidationRejected => "VALIDATION_REJECTED",
            Event::StorageFailure => "STORAGE_FAILURE",
            Event::StoreCorruption => "STORE_CORRUPTION",
            Event::AutoInitIssued => "AUTO_INIT_ISSUED",
            Event::AutoInitFallback => "AUTO_INIT_FALLBACK",
            Event::ManualEventAdded => "MANUAL_EVENT_ADDED",
            Event::EventRemoved => "EVENT_REMOVED",
            Event::AnomalyScan => "ANOMALY_SCAN",
            Event::PeerMonitorStart => "PEER_MONITOR_START",
            Event::PeerMonitorStop => "PEER_MONITOR_STOP",
            Event::PeerProbeFailed => "PEER_PROBE_FAILED",
            Event::PeerDown => "PEER_DOWN",
            Event::PeerRecovered => "PEER_RECOVERED",
            Event::FailoverEnabled => "FAILOVER_ENABLED",
            Event::FailoverDisabled => "FAILOVER_DISABLED",
            Event::TapProcessed => "TAP_PROCESSED",
            Event::HealthServing => "HEALTH_SERVING",
        }
    }

    /// Returns true if this event implies the process cannot continue
    pub fn is_fatal(&self) -> bool {
        matches!(self, Event::StoreCorruption)
    }

    /// Default severity for this event
    pub fn severity(&self) -> super::Severity {
        use super::Severity;
        match self {
            Event::StoreCorruption => Severity::Fatal,
            Event::StorageFailure => Severity::Error,
            Event::AutoInitFallback
            | Event::OutOfOrderFlagged
            | Event::PeerDown
            | Event::PeerProbeFailed
            | Event::FailoverEnabled => Severity::Warn,
            Event::DuplicateRejected | Event::ValidationRejected | Event::TapProcessed => {
                Severity::Trace
            }
            _ => Severity::Info,
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
