//! The event consistency store
//!
//! All mutable state lives behind one mutex. Every mutation follows the
//! same shape inside a single critical section:
//!
//! 1. validate against the in-memory tables
//! 2. append one record to the backend (durable on success)
//! 3. apply the record to the tables
//!
//! A failed append leaves the tables untouched, so readers never see a
//! mutation that is not on disk.

use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rand::Rng;
use sha2::{Digest, Sha256};
use uuid::Uuid;

use super::anomaly::{self, AnomalyConfig, AnomalyReport};
use super::errors::{StoreError, StoreResult};
use super::event::{
    format_token_id, AutoInitId, DeletedEvent, Event, EventError, EventResult, ManualProvenance,
    RemovalResult, ValidationError, MANUAL_UID, MIN_TOKEN_ID_LEN,
};
use super::export;
use super::reader::LogReader;
use super::record::{CounterState, LogRecord};
use super::tables::Tables;
use super::writer::{LogBackend, LogWriter, MemoryBackend};
use crate::clock::{Clock, SystemClock};
use crate::observability::{
    log_event_with_fields, AuditAction, AuditLog, AuditOutcome, AuditRecord, Event as ObsEvent,
    MemoryAuditLog, MetricsRegistry,
};
use crate::workflow::StageWorkflow;

/// Prefix marking an auto-init id issued while storage was failing
pub const FALLBACK_TOKEN_PREFIX: &str = "FB";

struct Inner {
    backend: Box<dyn LogBackend>,
    tables: Tables,
}

/// Append-only, self-validating store of tap events.
pub struct EventStore {
    inner: Mutex<Inner>,
    workflow: StageWorkflow,
    anomaly_config: AnomalyConfig,
    clock: Arc<dyn Clock>,
    audit: Arc<dyn AuditLog>,
    metrics: Arc<MetricsRegistry>,
}

/// Optional collaborators for a store.
pub struct StoreOptions {
    pub clock: Arc<dyn Clock>,
    pub audit: Arc<dyn AuditLog>,
    pub metrics: Arc<MetricsRegistry>,
    pub anomaly_config: AnomalyConfig,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            clock: Arc::new(SystemClock),
            audit: Arc::new(MemoryAuditLog::new()),
            metrics: Arc::new(MetricsRegistry::new()),
            anomaly_config: AnomalyConfig::default(),
        }
    }
}

impl EventStore {
    /// Open the durable store under `data_dir`, replaying
    /// `<data_dir>/data/events.log` into memory.
    ///
    /// # Errors
    ///
    /// `TAP_STORE_CORRUPTION` if any record fails its checksum or the log is
    /// internally inconsistent; `TAP_STORE_LOCKED` if another store already
    /// holds the directory; IO errors if the directory cannot be used.
    pub fn open(
        data_dir: &Path,
        workflow: StageWorkflow,
        options: StoreOptions,
    ) -> StoreResult<Self> {
        // Lock first so nobody appends while we replay
        let writer = LogWriter::open(data_dir)?;
        let log_path = writer.path().to_path_buf();
        let mut tables = Tables::default();
        let mut replayed = 0usize;

        {
            let mut reader = LogReader::open(&log_path)?;
            loop {
                let offset = reader.current_offset();
                let Some(record) = reader.read_next().map_err(|e| {
                    if e.is_fatal() {
                        log_event_with_fields(
                            ObsEvent::StoreCorruption,
                            &[("error", &e.to_string())],
                        );
                    }
                    e
                })?
                else {
                    break;
                };
                tables
                    .apply(&record)
                    .map_err(|reason| StoreError::corruption_at_offset(offset, reason))?;
                replayed += 1;
            }
        }

        log_event_with_fields(
            ObsEvent::StoreOpened,
            &[
                ("path", &log_path.display().to_string()),
                ("records_replayed", &replayed.to_string()),
            ],
        );

        Ok(Self::from_parts(Box::new(writer), tables, workflow, options))
    }

    /// Volatile store with no durable backing.
    pub fn in_memory(workflow: StageWorkflow, options: StoreOptions) -> Self {
        Self::with_backend(Box::new(MemoryBackend::new()), workflow, options)
    }

    /// Empty store over a caller-provided backend.
    pub fn with_backend(
        backend: Box<dyn LogBackend>,
        workflow: StageWorkflow,
        options: StoreOptions,
    ) -> Self {
        Self::from_parts(backend, Tables::default(), workflow, options)
    }

    fn from_parts(
        backend: Box<dyn LogBackend>,
        tables: Tables,
        workflow: StageWorkflow,
        options: StoreOptions,
    ) -> Self {
        Self {
            inner: Mutex::new(Inner { backend, tables }),
            workflow,
            anomaly_config: options.anomaly_config,
            clock: options.clock,
            audit: options.audit,
            metrics: options.metrics,
        }
    }

    pub fn workflow(&self) -> &StageWorkflow {
        &self.workflow
    }

    pub fn metrics(&self) -> &Arc<MetricsRegistry> {
        &self.metrics
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A panic while holding the lock cannot leave the tables half-applied:
        // `Tables::apply` runs only after a successful append.
        self.inner.lock().unwrap_or_else(|p| p.into_inner())
    }

    // =========================================================================
    // Logging taps
    // =========================================================================

    /// Log one automatic tap.
    ///
    /// Rejects unknown stages and malformed fields, rejects a second event
    /// for the same `(token_id, stage, session_id)`, and stores but flags
    /// taps that do not follow the token's current stage.
    pub fn log_event(
        &self,
        token_id: &str,
        uid: &str,
        stage: &str,
        device_id: &str,
        session_id: &str,
        timestamp: Option<DateTime<Utc>>,
    ) -> EventResult {
        if let Err(e) = self.validate_tap(token_id, uid, stage, device_id, session_id) {
            return self.reject(e, token_id, stage);
        }
        let token_id = token_id.trim();
        let timestamp = timestamp.unwrap_or_else(|| self.clock.now());

        let mut inner = self.lock();

        if inner.tables.contains_triple(token_id, stage, session_id) {
            drop(inner);
            self.metrics.increment_duplicates();
            log_event_with_fields(
                ObsEvent::DuplicateRejected,
                &[
                    ("session_id", session_id),
                    ("stage", stage),
                    ("token_id", token_id),
                ],
            );
            return EventResult::rejected_duplicate(token_id, stage);
        }

        let sequence = self.check_sequence(&inner.tables, token_id, stage, session_id);

        let event = Event {
            id: inner.tables.next_event_id(),
            token_id: token_id.to_string(),
            uid: uid.to_string(),
            stage: stage.to_string(),
            timestamp,
            device_id: device_id.to_string(),
            session_id: session_id.to_string(),
            is_manual: false,
        };

        if let Err(e) = Self::commit(&mut inner, LogRecord::EventAppended(event.clone())) {
            drop(inner);
            return self.storage_failure(e, token_id, stage);
        }
        drop(inner);

        self.metrics.increment_events_logged();
        let id = event.id.to_string();
        match sequence {
            None => {
                log_event_with_fields(
                    ObsEvent::EventLogged,
                    &[("event_id", &id), ("stage", stage), ("token_id", token_id)],
                );
                EventResult::stored(event)
            }
            Some((warning, suggestion)) => {
                self.metrics.increment_out_of_order();
                log_event_with_fields(
                    ObsEvent::OutOfOrderFlagged,
                    &[
                        ("event_id", &id),
                        ("expected", &suggestion),
                        ("stage", stage),
                        ("token_id", token_id),
                    ],
                );
                EventResult::flagged(event, warning, suggestion)
            }
        }
    }

    /// Store an operator correction.
    ///
    /// Skips the duplicate and sequence checks; stage membership and
    /// operator/reason are still required. The correction is audited.
    pub fn add_manual_event(
        &self,
        token_id: &str,
        stage: &str,
        timestamp: DateTime<Utc>,
        session_id: &str,
        operator_id: &str,
        reason: &str,
    ) -> EventResult {
        let device_id = format!("manual:{}", operator_id.trim());
        let validation = self
            .validate_tap(token_id, MANUAL_UID, stage, &device_id, session_id)
            .and_then(|_| non_blank("operator_id", operator_id))
            .and_then(|_| non_blank("reason", reason));

        let audit = AuditRecord::new(
            AuditAction::ManualEventAdded,
            AuditOutcome::Success,
            operator_id,
            reason,
            self.clock.now(),
        )
        .with_token(token_id)
        .with_stage(stage)
        .with_session(session_id);

        if let Err(e) = validation {
            self.audit(AuditRecord {
                outcome: AuditOutcome::Rejected,
                ..audit.with_error(e.to_string())
            });
            return self.reject(e, token_id, stage);
        }
        let token_id = token_id.trim();

        let mut inner = self.lock();
        let event = Event {
            id: inner.tables.next_event_id(),
            token_id: token_id.to_string(),
            uid: MANUAL_UID.to_string(),
            stage: stage.to_string(),
            timestamp,
            device_id,
            session_id: session_id.to_string(),
            is_manual: true,
        };

        if let Err(e) = Self::commit(&mut inner, LogRecord::EventAppended(event.clone())) {
            drop(inner);
            self.audit(AuditRecord {
                outcome: AuditOutcome::Failed,
                ..audit.with_error(e.to_string())
            });
            return self.storage_failure(e, token_id, stage);
        }
        drop(inner);

        self.metrics.increment_manual_events();
        self.audit(audit.with_event_id(event.id));
        log_event_with_fields(
            ObsEvent::ManualEventAdded,
            &[
                ("event_id", &event.id.to_string()),
                ("operator_id", operator_id),
                ("reason", reason),
                ("stage", stage),
                ("token_id", token_id),
            ],
        );

        EventResult::stored(event).with_provenance(ManualProvenance {
            operator_id: operator_id.to_string(),
            reason: reason.to_string(),
        })
    }

    /// Archive and remove a live event in one durable step.
    pub fn remove_event(&self, event_id: u64, operator_id: &str, reason: &str) -> RemovalResult {
        let audit = AuditRecord::new(
            AuditAction::EventRemoved,
            AuditOutcome::Success,
            operator_id,
            reason,
            self.clock.now(),
        )
        .with_event_id(event_id);

        let checked = if operator_id.trim().is_empty() {
            Err(StoreError::invalid_request("operator_id", "must not be blank"))
        } else if reason.trim().is_empty() {
            Err(StoreError::invalid_request("reason", "must not be blank"))
        } else {
            Ok(())
        };
        if let Err(e) = checked {
            self.audit(AuditRecord {
                outcome: AuditOutcome::Rejected,
                ..audit.with_error(e.to_string())
            });
            return Err(e);
        }

        let mut inner = self.lock();
        let Some(event) = inner.tables.get(event_id).cloned() else {
            drop(inner);
            let err = StoreError::not_found(event_id);
            self.audit(AuditRecord {
                outcome: AuditOutcome::Rejected,
                ..audit.with_error(err.to_string())
            });
            return Err(err);
        };

        let deleted = DeletedEvent::from_event(&event, operator_id, reason, self.clock.now());
        if let Err(e) = Self::commit(&mut inner, LogRecord::EventRemoved(deleted.clone())) {
            drop(inner);
            self.metrics.increment_storage_failures();
            log_event_with_fields(
                ObsEvent::StorageFailure,
                &[("error", &e.to_string()), ("event_id", &event_id.to_string())],
            );
            self.audit(AuditRecord {
                outcome: AuditOutcome::Failed,
                ..audit.with_error(e.to_string())
            });
            return Err(e);
        }
        drop(inner);

        self.metrics.increment_events_removed();
        self.audit(
            audit
                .with_token(&event.token_id)
                .with_stage(&event.stage)
                .with_session(&event.session_id),
        );
        log_event_with_fields(
            ObsEvent::EventRemoved,
            &[
                ("event_id", &event_id.to_string()),
                ("operator_id", operator_id),
                ("reason", reason),
                ("token_id", &event.token_id),
            ],
        );
        Ok(deleted)
    }

    // =========================================================================
    // Auto-init
    // =========================================================================

    /// Hand out the session's next sequential token id.
    ///
    /// Never fails: if the counter cannot be persisted, a tagged random id
    /// is returned with `fallback = true` and the degradation is logged.
    pub fn get_next_auto_init_token_id(&self, session_id: &str, start_id: u64) -> AutoInitId {
        let mut inner = self.lock();
        let current = inner.tables.counter(session_id).unwrap_or(start_id);
        let record = LogRecord::CounterAdvanced(CounterState {
            session_id: session_id.to_string(),
            next_token_id: current + 1,
        });

        match Self::commit(&mut inner, record) {
            Ok(()) => {
                drop(inner);
                let token_id = format_token_id(current);
                self.metrics.increment_auto_init_issued();
                log_event_with_fields(
                    ObsEvent::AutoInitIssued,
                    &[("session_id", session_id), ("token_id", &token_id)],
                );
                AutoInitId {
                    numeric_id: current,
                    token_id,
                    fallback: false,
                }
            }
            Err(e) => {
                drop(inner);
                let fallback = fallback_token_id(session_id);
                self.metrics.increment_auto_init_fallbacks();
                log_event_with_fields(
                    ObsEvent::AutoInitFallback,
                    &[
                        ("error", &e.to_string()),
                        ("session_id", session_id),
                        ("token_id", &fallback.token_id),
                    ],
                );
                fallback
            }
        }
    }

    // =========================================================================
    // Queries
    // =========================================================================

    pub fn get_event(&self, event_id: u64) -> Option<Event> {
        self.lock().tables.get(event_id).cloned()
    }

    /// Number of live events in a session.
    pub fn get_event_count(&self, session_id: &str) -> usize {
        self.lock().tables.session_event_count(session_id)
    }

    /// A token's events in a session ordered by time.
    pub fn get_token_events(&self, token_id: &str, session_id: &str) -> Vec<Event> {
        self.lock()
            .tables
            .token_events(session_id, token_id)
            .into_iter()
            .cloned()
            .collect()
    }

    /// The most recent `limit` events of a session, newest first.
    pub fn get_recent_events(&self, session_id: &str, limit: usize) -> Vec<Event> {
        self.lock()
            .tables
            .session_events(session_id)
            .into_iter()
            .rev()
            .take(limit)
            .cloned()
            .collect()
    }

    /// Live event count per workflow stage, in workflow order.
    pub fn get_stage_counts(&self, session_id: &str) -> Vec<(String, usize)> {
        let inner = self.lock();
        let events = inner.tables.session_events(session_id);
        self.workflow
            .stage_names()
            .into_iter()
            .map(|stage| {
                let count = events.iter().filter(|e| e.stage == stage).count();
                (stage.to_string(), count)
            })
            .collect()
    }

    /// Archived events, optionally for one session.
    pub fn get_deleted_events(&self, session_id: Option<&str>) -> Vec<DeletedEvent> {
        self.lock()
            .tables
            .deleted()
            .iter()
            .filter(|d| session_id.map_or(true, |s| d.session_id == s))
            .cloned()
            .collect()
    }

    /// Token already bound to a physical uid in this session, if any.
    pub fn find_token_by_uid(&self, uid: &str, session_id: &str) -> Option<String> {
        if uid == MANUAL_UID {
            return None;
        }
        self.lock()
            .tables
            .session_events(session_id)
            .into_iter()
            .find(|e| e.uid == uid)
            .map(|e| e.token_id.clone())
    }

    /// How many of a token's events fall in `stages`.
    ///
    /// The failover alternation uses this plus one as the tap number.
    pub fn count_token_events_in_stages(
        &self,
        token_id: &str,
        stages: &[String],
        session_id: &str,
    ) -> usize {
        self.lock()
            .tables
            .token_events(session_id, token_id)
            .into_iter()
            .filter(|e| stages.iter().any(|s| *s == e.stage))
            .count()
    }

    /// Anomaly report over a consistent snapshot of the session.
    pub fn get_anomalies(&self, session_id: &str) -> AnomalyReport {
        let snapshot: Vec<Event> = {
            let inner = self.lock();
            inner
                .tables
                .session_events(session_id)
                .into_iter()
                .cloned()
                .collect()
        };
        let report = anomaly::analyze(
            session_id,
            &snapshot,
            &self.workflow,
            &self.anomaly_config,
            self.clock.now(),
        );
        log_event_with_fields(
            ObsEvent::AnomalyScan,
            &[
                ("session_id", session_id),
                ("total", &report.summary.total.to_string()),
            ],
        );
        report
    }

    /// Write live events as CSV, optionally for one session.
    pub fn export_csv<W: Write>(&self, writer: &mut W, session_id: Option<&str>) -> StoreResult<usize> {
        let events: Vec<Event> = {
            let inner = self.lock();
            inner
                .tables
                .all_events()
                .filter(|e| session_id.map_or(true, |s| e.session_id == s))
                .cloned()
                .collect()
        };
        export::write_csv(writer, &events)
            .map_err(|e| StoreError::io_error("Failed to write export", e))
    }

    // =========================================================================
    // Internals
    // =========================================================================

    fn commit(inner: &mut Inner, record: LogRecord) -> StoreResult<()> {
        inner.backend.append(&record)?;
        inner
            .tables
            .apply(&record)
            .map_err(|reason| StoreError::corruption(format!("apply after append: {}", reason)))
    }

    fn validate_tap(
        &self,
        token_id: &str,
        uid: &str,
        stage: &str,
        device_id: &str,
        session_id: &str,
    ) -> Result<(), ValidationError> {
        if !self.workflow.contains(stage) {
            return Err(ValidationError::UnknownStage(stage.to_string()));
        }
        if token_id.trim().chars().count() < MIN_TOKEN_ID_LEN {
            return Err(ValidationError::invalid(
                "token_id",
                format!("must be at least {} characters", MIN_TOKEN_ID_LEN),
            ));
        }
        non_blank("uid", uid)?;
        non_blank("device_id", device_id)?;
        non_blank("session_id", session_id)?;
        Ok(())
    }

    /// `Some((warning, suggestion))` if `stage` does not follow the token's
    /// current stage.
    fn check_sequence(
        &self,
        tables: &Tables,
        token_id: &str,
        stage: &str,
        session_id: &str,
    ) -> Option<(String, String)> {
        let current = tables.latest_token_event(session_id, token_id)?;
        let allowed = self.workflow.allowed_next_stages(&current.stage);
        if allowed.contains(&stage) {
            return None;
        }
        let suggestion = match self.workflow.next_stage(&current.stage) {
            Some(next) => next.to_string(),
            None => "none (journey complete)".to_string(),
        };
        let warning = format!(
            "token {} is at {}; {} is out of sequence (expected {})",
            token_id, current.stage, stage, suggestion
        );
        Some((warning, suggestion))
    }

    fn reject(&self, error: ValidationError, token_id: &str, stage: &str) -> EventResult {
        self.metrics.increment_validation_failures();
        log_event_with_fields(
            ObsEvent::ValidationRejected,
            &[
                ("error", &error.to_string()),
                ("field", error.field()),
                ("stage", stage),
                ("token_id", token_id),
            ],
        );
        EventResult::failed(EventError::Validation(error))
    }

    fn storage_failure(&self, error: StoreError, token_id: &str, stage: &str) -> EventResult {
        self.metrics.increment_storage_failures();
        log_event_with_fields(
            ObsEvent::StorageFailure,
            &[
                ("error", &error.to_string()),
                ("stage", stage),
                ("token_id", token_id),
            ],
        );
        EventResult::failed(EventError::Storage(error.to_string()))
    }

    fn audit(&self, record: AuditRecord) {
        if let Err(e) = self.audit.append(&record) {
            log_event_with_fields(
                ObsEvent::StorageFailure,
                &[("error", &e.to_string()), ("target", "audit")],
            );
        }
    }
}

fn non_blank(field: &'static str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        Err(ValidationError::invalid(field, "must not be blank"))
    } else {
        Ok(())
    }
}

/// Tagged id used when the counter cannot be persisted.
fn fallback_token_id(session_id: &str) -> AutoInitId {
    let nonce: u64 = rand::thread_rng().gen();
    let mut hasher = Sha256::new();
    hasher.update(Uuid::new_v4().as_bytes());
    hasher.update(session_id.as_bytes());
    hasher.update(nonce.to_le_bytes());
    let digest = hasher.finalize();

    let numeric_id = u64::from(digest[0]) << 16 | u64::from(digest[1]) << 8 | u64::from(digest[2]);
    AutoInitId {
        numeric_id,
        token_id: format!("{}{:06X}", FALLBACK_TOKEN_PREFIX, numeric_id),
        fallback: true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::EventOutcome;
    use crate::workflow::{Stage, EXIT, QUEUE_JOIN, SERVICE_START, SUBSTANCE_RETURNED};
    use chrono::{Duration, TimeZone};

    const SESSION: &str = "day-1";

    fn store() -> EventStore {
        EventStore::in_memory(StageWorkflow::standard(), StoreOptions::default())
    }

    fn tap(store: &EventStore, token: &str, stage: &str) -> EventResult {
        store.log_event(token, &format!("uid-{}", token), stage, "st-1", SESSION, None)
    }

    #[test]
    fn test_first_event_accepts_any_stage() {
        let store = store();
        let result = tap(&store, "001", SERVICE_START);
        assert_eq!(result.outcome, EventOutcome::Success);
        assert_eq!(result.event.unwrap().id, 1);
    }

    #[test]
    fn test_duplicate_rejected() {
        let store = store();
        assert!(tap(&store, "001", QUEUE_JOIN).success());
        let second = tap(&store, "001", QUEUE_JOIN);
        assert!(second.duplicate());
        assert!(!second.success());
        assert_eq!(store.get_event_count(SESSION), 1);
        assert_eq!(store.metrics().snapshot().duplicates_rejected, 1);
    }

    #[test]
    fn test_same_triple_in_other_session_is_not_duplicate() {
        let store = store();
        assert!(tap(&store, "001", QUEUE_JOIN).success());
        let other = store.log_event("001", "uid-001", QUEUE_JOIN, "st-1", "day-2", None);
        assert_eq!(other.outcome, EventOutcome::Success);
    }

    #[test]
    fn test_unknown_stage_names_field() {
        let store = store();
        let result = tap(&store, "001", "LUNCH");
        assert!(result.is_error());
        match result.error {
            Some(EventError::Validation(ref e)) => assert_eq!(e.field(), "stage"),
            ref other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(store.get_event_count(SESSION), 0);
    }

    #[test]
    fn test_short_token_rejected() {
        let store = store();
        let result = tap(&store, "01", QUEUE_JOIN);
        match result.error {
            Some(EventError::Validation(ref e)) => assert_eq!(e.field(), "token_id"),
            ref other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_skipping_mandatory_stage_is_flagged_and_stored() {
        let store = store();
        tap(&store, "001", QUEUE_JOIN);
        let result = tap(&store, "001", EXIT);
        assert!(result.success());
        assert!(result.out_of_order());
        assert_eq!(result.suggestion.as_deref(), Some(SERVICE_START));
        assert!(result.warning.unwrap().contains(QUEUE_JOIN));
        assert_eq!(store.get_event_count(SESSION), 2);
    }

    #[test]
    fn test_optional_stage_policy() {
        let store = store();
        tap(&store, "001", QUEUE_JOIN);
        tap(&store, "001", SERVICE_START);
        let result = tap(&store, "001", EXIT);
        assert_eq!(result.outcome, EventOutcome::Success);

        let strict = EventStore::in_memory(
            StageWorkflow::new(vec![
                Stage::new(QUEUE_JOIN, 1),
                Stage::new(SERVICE_START, 2),
                Stage::new(SUBSTANCE_RETURNED, 3),
                Stage::new(EXIT, 4),
            ])
            .unwrap(),
            StoreOptions::default(),
        );
        tap(&strict, "001", QUEUE_JOIN);
        tap(&strict, "001", SERVICE_START);
        let result = tap(&strict, "001", EXIT);
        assert!(result.out_of_order());
        assert_eq!(result.suggestion.as_deref(), Some(SUBSTANCE_RETURNED));
    }

    #[test]
    fn test_tap_after_final_stage_is_flagged() {
        let store = store();
        tap(&store, "001", SERVICE_START);
        tap(&store, "001", EXIT);
        let result = tap(&store, "001", QUEUE_JOIN);
        assert!(result.out_of_order());
        assert_eq!(result.suggestion.as_deref(), Some("none (journey complete)"));
    }

    #[test]
    fn test_manual_event_bypasses_duplicate_check() {
        let store = store();
        tap(&store, "001", QUEUE_JOIN);
        let result = store.add_manual_event(
            "001",
            QUEUE_JOIN,
            Utc::now(),
            SESSION,
            "admin",
            "missed tap",
        );
        assert!(result.success());
        let event = result.event.unwrap();
        assert!(event.is_manual);
        assert_eq!(event.uid, MANUAL_UID);
        assert_eq!(event.device_id, "manual:admin");
        assert_eq!(result.provenance.unwrap().operator_id, "admin");
        assert_eq!(store.get_event_count(SESSION), 2);
    }

    #[test]
    fn test_manual_event_requires_reason_and_stage() {
        let store = store();
        let result = store.add_manual_event("001", QUEUE_JOIN, Utc::now(), SESSION, "admin", " ");
        match result.error {
            Some(EventError::Validation(ref e)) => assert_eq!(e.field(), "reason"),
            ref other => panic!("unexpected error: {:?}", other),
        }
        let result = store.add_manual_event("001", "NOPE", Utc::now(), SESSION, "admin", "x");
        assert!(result.is_error());
        assert_eq!(store.get_event_count(SESSION), 0);
    }

    #[test]
    fn test_manual_events_are_audited() {
        let audit = MemoryAuditLog::new();
        let store = EventStore::in_memory(
            StageWorkflow::standard(),
            StoreOptions {
                audit: Arc::new(audit.clone()),
                ..StoreOptions::default()
            },
        );
        store.add_manual_event("001", QUEUE_JOIN, Utc::now(), SESSION, "admin", "fix");
        store.add_manual_event("001", "NOPE", Utc::now(), SESSION, "admin", "fix");

        let records = audit.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].outcome, AuditOutcome::Success);
        assert_eq!(records[0].event_id, Some(1));
        assert_eq!(records[1].outcome, AuditOutcome::Rejected);
    }

    #[test]
    fn test_remove_archives_event() {
        let store = store();
        let id = tap(&store, "001", QUEUE_JOIN).event.unwrap().id;

        let deleted = store.remove_event(id, "admin", "wrong card").unwrap();
        assert_eq!(deleted.token_id, "001");
        assert_eq!(deleted.deleted_by, "admin");
        assert_eq!(deleted.deletion_reason, "wrong card");
        assert_eq!(store.get_event_count(SESSION), 0);
        assert_eq!(store.get_deleted_events(Some(SESSION)).len(), 1);
        assert!(store.get_event(id).is_none());

        // the slot is free again for a real tap, with a fresh id
        let again = tap(&store, "001", QUEUE_JOIN);
        assert!(again.success());
        assert_eq!(again.event.unwrap().id, id + 1);
    }

    #[test]
    fn test_remove_missing_event() {
        let store = store();
        let err = store.remove_event(99, "admin", "cleanup").unwrap_err();
        assert!(err.is_not_found());
        assert!(store.get_deleted_events(None).is_empty());
    }

    #[test]
    fn test_remove_requires_operator() {
        let store = store();
        let id = tap(&store, "001", QUEUE_JOIN).event.unwrap().id;
        let err = store.remove_event(id, "", "cleanup").unwrap_err();
        assert_eq!(err.details(), Some("field: operator_id"));
        assert_eq!(store.get_event_count(SESSION), 1);
    }

    #[test]
    fn test_auto_init_sequences_are_per_session() {
        let store = store();
        let a1 = store.get_next_auto_init_token_id("A", 1);
        let a2 = store.get_next_auto_init_token_id("A", 1);
        let b1 = store.get_next_auto_init_token_id("B", 100);
        let b2 = store.get_next_auto_init_token_id("B", 100);

        assert_eq!(a1.token_id, "001");
        assert_eq!(a2.token_id, "002");
        assert_eq!(b1.token_id, "100");
        assert_eq!(b2.token_id, "101");
        assert!(!a1.fallback);
        // start_id only applies on first use
        assert_eq!(store.get_next_auto_init_token_id("A", 50).token_id, "003");
    }

    #[test]
    fn test_fallback_token_id_shape() {
        let id = fallback_token_id(SESSION);
        assert!(id.fallback);
        assert!(id.token_id.starts_with(FALLBACK_TOKEN_PREFIX));
        assert_eq!(id.token_id.len(), FALLBACK_TOKEN_PREFIX.len() + 6);
        assert!(id.numeric_id < 1 << 24);
    }

    #[test]
    fn test_queries() {
        let start = Utc.with_ymd_and_hms(2024, 7, 1, 9, 0, 0).unwrap();
        let clock = Arc::new(ManualClock::new(start));
        let store = EventStore::in_memory(
            StageWorkflow::standard(),
            StoreOptions {
                clock: clock.clone(),
                ..StoreOptions::default()
            },
        );
        tap(&store, "001", QUEUE_JOIN);
        clock.advance(Duration::minutes(1));
        tap(&store, "002", QUEUE_JOIN);
        clock.advance(Duration::minutes(1));
        tap(&store, "001", SERVICE_START);

        let recent = store.get_recent_events(SESSION, 2);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].stage, SERVICE_START);

        let counts = store.get_stage_counts(SESSION);
        assert_eq!(counts[0], (QUEUE_JOIN.to_string(), 2));
        assert_eq!(counts[1], (SERVICE_START.to_string(), 1));

        assert_eq!(store.find_token_by_uid("uid-002", SESSION).as_deref(), Some("002"));
        assert_eq!(store.find_token_by_uid("uid-999", SESSION), None);

        let stages = vec![QUEUE_JOIN.to_string(), EXIT.to_string()];
        assert_eq!(store.count_token_events_in_stages("001", &stages, SESSION), 1);
        assert_eq!(store.get_token_events("001", SESSION)[0].timestamp, start);
    }
}
