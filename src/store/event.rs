//! Event store data model and structured results

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// `uid` recorded on events entered by an operator rather than a tag read
pub const MANUAL_UID: &str = "MANUAL";

/// Minimum length of a token id after trimming
pub const MIN_TOKEN_ID_LEN: usize = 3;

/// One observed tap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: u64,
    pub token_id: String,
    pub uid: String,
    pub stage: String,
    pub timestamp: DateTime<Utc>,
    pub device_id: String,
    pub session_id: String,
    /// True only for operator corrections
    #[serde(default)]
    pub is_manual: bool,
}

/// Archive copy of a removed event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletedEvent {
    pub id: u64,
    pub token_id: String,
    pub uid: String,
    pub stage: String,
    pub timestamp: DateTime<Utc>,
    pub device_id: String,
    pub session_id: String,
    #[serde(default)]
    pub is_manual: bool,
    pub deleted_by: String,
    pub deletion_reason: String,
    pub deleted_at: DateTime<Utc>,
}

impl DeletedEvent {
    pub fn from_event(
        event: &Event,
        deleted_by: impl Into<String>,
        deletion_reason: impl Into<String>,
        deleted_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: event.id,
            token_id: event.token_id.clone(),
            uid: event.uid.clone(),
            stage: event.stage.clone(),
            timestamp: event.timestamp,
            device_id: event.device_id.clone(),
            session_id: event.session_id.clone(),
            is_manual: event.is_manual,
            deleted_by: deleted_by.into(),
            deletion_reason: deletion_reason.into(),
            deleted_at,
        }
    }
}

/// Result of `remove_event`
pub type RemovalResult = super::StoreResult<DeletedEvent>;

/// Input rejected before anything is stored. Each variant names the field.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("stage: '{0}' is not part of the workflow")]
    UnknownStage(String),

    #[error("{field}: {reason}")]
    InvalidField { field: &'static str, reason: String },
}

impl ValidationError {
    /// Name of the offending input field
    pub fn field(&self) -> &'static str {
        match self {
            ValidationError::UnknownStage(_) => "stage",
            ValidationError::InvalidField { field, .. } => field,
        }
    }

    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ValidationError::InvalidField {
            field,
            reason: reason.into(),
        }
    }
}

/// Why an `EventResult` carries `Error`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EventError {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("storage failure: {0}")]
    Storage(String),
}

/// Outcome tag of a log attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventOutcome {
    /// Stored, in sequence
    Success,
    /// Stored, but not the expected next stage
    OutOfOrder,
    /// Not stored: same token/stage/session already present
    Duplicate,
    /// Not stored: validation or storage failure
    Error,
}

impl EventOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventOutcome::Success => "success",
            EventOutcome::OutOfOrder => "out_of_order",
            EventOutcome::Duplicate => "duplicate",
            EventOutcome::Error => "error",
        }
    }
}

impl fmt::Display for EventOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Who made a manual correction and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManualProvenance {
    pub operator_id: String,
    pub reason: String,
}

/// Structured result of `log_event` and `add_manual_event`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventResult {
    pub outcome: EventOutcome,
    /// The stored event (Success / OutOfOrder only)
    pub event: Option<Event>,
    pub warning: Option<String>,
    /// Expected stage when out of order
    pub suggestion: Option<String>,
    pub error: Option<EventError>,
    pub provenance: Option<ManualProvenance>,
}

impl EventResult {
    pub(crate) fn stored(event: Event) -> Self {
        Self {
            outcome: EventOutcome::Success,
            event: Some(event),
            warning: None,
            suggestion: None,
            error: None,
            provenance: None,
        }
    }

    pub(crate) fn flagged(event: Event, warning: String, suggestion: String) -> Self {
        Self {
            outcome: EventOutcome::OutOfOrder,
            warning: Some(warning),
            suggestion: Some(suggestion),
            ..Self::stored(event)
        }
    }

    pub(crate) fn rejected_duplicate(token_id: &str, stage: &str) -> Self {
        Self {
            outcome: EventOutcome::Duplicate,
            event: None,
            warning: Some(format!(
                "token {} already recorded at {} in this session",
                token_id, stage
            )),
            suggestion: None,
            error: None,
            provenance: None,
        }
    }

    pub(crate) fn failed(error: EventError) -> Self {
        Self {
            outcome: EventOutcome::Error,
            event: None,
            warning: None,
            suggestion: None,
            error: Some(error),
            provenance: None,
        }
    }

    pub(crate) fn with_provenance(mut self, provenance: ManualProvenance) -> Self {
        self.provenance = Some(provenance);
        self
    }

    /// True if the event was stored (in or out of sequence)
    pub fn success(&self) -> bool {
        matches!(self.outcome, EventOutcome::Success | EventOutcome::OutOfOrder)
    }

    pub fn duplicate(&self) -> bool {
        self.outcome == EventOutcome::Duplicate
    }

    pub fn out_of_order(&self) -> bool {
        self.outcome == EventOutcome::OutOfOrder
    }

    pub fn is_error(&self) -> bool {
        self.outcome == EventOutcome::Error
    }
}

/// Token id handed out by the auto-init counter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AutoInitId {
    pub numeric_id: u64,
    pub token_id: String,
    /// True when storage failed and a tagged random id was issued instead
    pub fallback: bool,
}

/// Zero-pad to 3 digits; wider values keep their natural width.
pub fn format_token_id(numeric_id: u64) -> String {
    format!("{:03}", numeric_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_token_id() {
        assert_eq!(format_token_id(1), "001");
        assert_eq!(format_token_id(99), "099");
        assert_eq!(format_token_id(100), "100");
        assert_eq!(format_token_id(1234), "1234");
    }

    #[test]
    fn test_validation_error_names_field() {
        let err = ValidationError::UnknownStage("LUNCH".into());
        assert_eq!(err.field(), "stage");
        assert!(err.to_string().contains("LUNCH"));

        let err = ValidationError::invalid("token_id", "must be at least 3 characters");
        assert_eq!(err.field(), "token_id");
        assert!(err.to_string().starts_with("token_id:"));
    }

    #[test]
    fn test_outcome_flags() {
        let event = Event {
            id: 1,
            token_id: "001".into(),
            uid: "04:AA".into(),
            stage: "EXIT".into(),
            timestamp: Utc::now(),
            device_id: "st-1".into(),
            session_id: "s".into(),
            is_manual: false,
        };
        let r = EventResult::flagged(event, "w".into(), "SERVICE_START".into());
        assert!(r.success());
        assert!(r.out_of_order());
        assert!(!r.duplicate());

        let r = EventResult::rejected_duplicate("001", "EXIT");
        assert!(!r.success());
        assert!(r.duplicate());
    }
}
