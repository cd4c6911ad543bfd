//! Event consistency store
//!
//! Holds every tap event of a station as an append-only, checksummed log
//! replayed into in-memory tables at open.
//!
//! # Design Principles
//!
//! - Append-only (removal archives, never rewrites)
//! - One durable record per mutation, fsync before visibility
//! - Checksum-verified on every read, refuse to open on corruption
//! - At most one event per (token, stage, session)
//! - Out-of-order taps are stored and flagged, never dropped

mod anomaly;
mod checksum;
mod errors;
mod event;
mod event_store;
mod export;
mod reader;
mod record;
mod tables;
mod writer;

pub use anomaly::{
    analyze, AnomalyConfig, AnomalyReport, AnomalySeverity, AnomalySummary, IncompleteJourney,
    LongServiceTime, RapidFireTap,
};
pub use checksum::compute_checksum;
pub use errors::{Severity, StoreError, StoreErrorCode, StoreResult};
pub use event::{
    format_token_id, AutoInitId, DeletedEvent, Event, EventError, EventOutcome, EventResult,
    ManualProvenance, RemovalResult, ValidationError, MANUAL_UID, MIN_TOKEN_ID_LEN,
};
pub use event_store::{EventStore, StoreOptions, FALLBACK_TOKEN_PREFIX};
pub use export::{write_csv, EXPORT_COLUMNS};
pub use reader::LogReader;
pub use record::{CounterState, LogRecord};
pub use writer::{LogBackend, LogWriter, MemoryBackend, LOG_FILE_NAME};
