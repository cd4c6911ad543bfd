//! Failover stage alternation through the tap path

use std::sync::Arc;

use tapstation::failover::FailoverManager;
use tapstation::store::{EventStore, StoreOptions};
use tapstation::tap::{Feedback, FeedbackSink, StationIdentity, TapHandler, TapRead};
use tapstation::workflow::{StageWorkflow, EXIT, QUEUE_JOIN};

struct Silent;

impl FeedbackSink for Silent {
    fn signal(&self, _feedback: Feedback, _token_id: &str) {}
}

#[test]
fn test_alternation_sequence() {
    let failover = FailoverManager::new(QUEUE_JOIN, vec![EXIT.to_string()]);
    failover.enable_failover();

    let stages: Vec<String> = (1..=5).map(|n| failover.effective_stage_for_tap(n)).collect();
    assert_eq!(stages, vec![QUEUE_JOIN, EXIT, QUEUE_JOIN, EXIT, QUEUE_JOIN]);
}

#[test]
fn test_tap_number_follows_token_history() {
    let store = Arc::new(EventStore::in_memory(
        StageWorkflow::standard(),
        StoreOptions::default(),
    ));
    let failover = Arc::new(FailoverManager::new(QUEUE_JOIN, vec![EXIT.to_string()]));
    let handler = TapHandler::new(
        Arc::clone(&store),
        Arc::clone(&failover),
        Box::new(Silent),
        StationIdentity {
            device_id: "st-1".into(),
            session_id: "day-1".into(),
            auto_init_start_id: 1,
        },
    );

    // peer healthy: everything is the primary stage
    let first = handler.handle_tap(&TapRead::new("04:AA", Some("001".into())));
    assert_eq!(first.stage, QUEUE_JOIN);
    assert_eq!(first.tap_number, 1);

    failover.enable_failover();

    // token 001 already has one tap in the active stages: this is its second
    let second = handler.handle_tap(&TapRead::new("04:AA", Some("001".into())));
    assert_eq!(second.tap_number, 2);
    assert_eq!(second.stage, EXIT);
    assert_eq!(second.feedback, Feedback::OutOfOrder);

    // a fresh token starts at the primary stage
    let other = handler.handle_tap(&TapRead::new("04:BB", Some("002".into())));
    assert_eq!(other.tap_number, 1);
    assert_eq!(other.stage, QUEUE_JOIN);
    assert_eq!(other.feedback, Feedback::Success);

    let counts = failover.state().tap_counts.clone();
    assert_eq!(counts.get(EXIT), Some(&1));
    assert_eq!(counts.get(QUEUE_JOIN), Some(&1));

    failover.disable_failover();
    assert_eq!(failover.active_stages(), vec![QUEUE_JOIN.to_string()]);
}
