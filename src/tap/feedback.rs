//! Operator feedback (buzzer/LED) boundary

use std::fmt;

use crate::observability::{Logger, Severity};
use crate::store::EventOutcome;

/// Signal shown to the person at the station after a tap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feedback {
    Success,
    Duplicate,
    OutOfOrder,
    Error,
}

impl Feedback {
    pub fn as_str(&self) -> &'static str {
        match self {
            Feedback::Success => "SUCCESS",
            Feedback::Duplicate => "DUPLICATE",
            Feedback::OutOfOrder => "OUT_OF_ORDER",
            Feedback::Error => "ERROR",
        }
    }
}

impl fmt::Display for Feedback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<EventOutcome> for Feedback {
    fn from(outcome: EventOutcome) -> Self {
        match outcome {
            EventOutcome::Success => Feedback::Success,
            EventOutcome::OutOfOrder => Feedback::OutOfOrder,
            EventOutcome::Duplicate => Feedback::Duplicate,
            EventOutcome::Error => Feedback::Error,
        }
    }
}

/// Destination for tap feedback. Implementations must not block for long.
pub trait FeedbackSink: Send + Sync {
    fn signal(&self, feedback: Feedback, token_id: &str);
}

/// Feedback written to the structured log, for headless stations.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogFeedback;

impl FeedbackSink for LogFeedback {
    fn signal(&self, feedback: Feedback, token_id: &str) {
        let severity = match feedback {
            Feedback::Success => Severity::Info,
            Feedback::Duplicate | Feedback::OutOfOrder => Severity::Warn,
            Feedback::Error => Severity::Error,
        };
        Logger::log(
            severity,
            "TAP_FEEDBACK",
            &[("feedback", feedback.as_str()), ("token_id", token_id)],
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_maps_to_feedback() {
        assert_eq!(Feedback::from(EventOutcome::Success), Feedback::Success);
        assert_eq!(Feedback::from(EventOutcome::OutOfOrder), Feedback::OutOfOrder);
        assert_eq!(Feedback::from(EventOutcome::Duplicate), Feedback::Duplicate);
        assert_eq!(Feedback::from(EventOutcome::Error), Feedback::Error);
    }
}
