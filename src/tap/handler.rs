//! Tap orchestration
//!
//! Per tap:
//! 1. resolve the token (tag, uid binding, or auto-init)
//! 2. pick the effective stage from the failover state
//! 3. log the event
//! 4. signal feedback

use std::sync::Arc;

use crate::failover::FailoverManager;
use crate::observability::{log_event_with_fields, Event, MetricsRegistry};
use crate::store::{AutoInitId, EventResult, EventStore};

use super::feedback::{Feedback, FeedbackSink};
use super::source::{TapRead, TapSource};

/// Station identity used for every tap.
#[derive(Debug, Clone)]
pub struct StationIdentity {
    pub device_id: String,
    pub session_id: String,
    /// First auto-init id of a session
    pub auto_init_start_id: u64,
}

/// Everything decided for one tap.
#[derive(Debug, Clone)]
pub struct TapOutcome {
    pub token_id: String,
    pub stage: String,
    pub tap_number: u64,
    /// Set when the token was freshly enrolled by this tap
    pub auto_init: Option<AutoInitId>,
    pub result: EventResult,
    pub feedback: Feedback,
}

pub struct TapHandler {
    store: Arc<EventStore>,
    failover: Arc<FailoverManager>,
    feedback: Box<dyn FeedbackSink>,
    identity: StationIdentity,
    metrics: Arc<MetricsRegistry>,
}

impl TapHandler {
    pub fn new(
        store: Arc<EventStore>,
        failover: Arc<FailoverManager>,
        feedback: Box<dyn FeedbackSink>,
        identity: StationIdentity,
    ) -> Self {
        let metrics = Arc::clone(store.metrics());
        Self {
            store,
            failover,
            feedback,
            identity,
            metrics,
        }
    }

    pub fn identity(&self) -> &StationIdentity {
        &self.identity
    }

    pub fn handle_tap(&self, read: &TapRead) -> TapOutcome {
        let session_id = self.identity.session_id.as_str();
        let (token_id, auto_init) = self.resolve_token(read);

        let active_stages = self.failover.active_stages();
        let tap_number = self
            .store
            .count_token_events_in_stages(&token_id, &active_stages, session_id)
            as u64
            + 1;
        let stage = self.failover.effective_stage_for_tap(tap_number);

        let result = self.store.log_event(
            &token_id,
            &read.uid,
            &stage,
            &self.identity.device_id,
            session_id,
            None,
        );
        if result.success() {
            self.failover.record_tap(&stage);
        }

        let feedback = Feedback::from(result.outcome);
        self.feedback.signal(feedback, &token_id);
        self.metrics.increment_taps();
        log_event_with_fields(
            Event::TapProcessed,
            &[
                ("outcome", result.outcome.as_str()),
                ("stage", &stage),
                ("tap_number", &tap_number.to_string()),
                ("token_id", &token_id),
                ("uid", &read.uid),
            ],
        );

        TapOutcome {
            token_id,
            stage,
            tap_number,
            auto_init,
            result,
            feedback,
        }
    }

    /// Drain a source, handling every tap. Returns the number handled.
    pub fn run<S: TapSource + ?Sized>(&self, source: &mut S) -> std::io::Result<u64> {
        let mut handled = 0;
        while let Some(read) = source.next_tap()? {
            self.handle_tap(&read);
            handled += 1;
        }
        Ok(handled)
    }

    fn resolve_token(&self, read: &TapRead) -> (String, Option<AutoInitId>) {
        if let Some(token) = read
            .token_id
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
        {
            return (token.to_string(), None);
        }
        let session_id = self.identity.session_id.as_str();
        if let Some(token) = self.store.find_token_by_uid(&read.uid, session_id) {
            return (token, None);
        }
        let issued = self
            .store
            .get_next_auto_init_token_id(session_id, self.identity.auto_init_start_id);
        (issued.token_id.clone(), Some(issued))
    }
}
