//! Tap handler orchestration tests

use std::io::Cursor;
use std::sync::{Arc, Mutex};

use tapstation::failover::FailoverManager;
use tapstation::store::{EventStore, StoreOptions};
use tapstation::tap::{
    Feedback, FeedbackSink, LineTapSource, StationIdentity, TapHandler, TapRead,
};
use tapstation::workflow::{StageWorkflow, QUEUE_JOIN};

#[derive(Clone, Default)]
struct Recorder {
    signals: Arc<Mutex<Vec<(Feedback, String)>>>,
}

impl FeedbackSink for Recorder {
    fn signal(&self, feedback: Feedback, token_id: &str) {
        self.signals
            .lock()
            .unwrap()
            .push((feedback, token_id.to_string()));
    }
}

fn station(start_id: u64) -> (TapHandler, Arc<EventStore>, Recorder) {
    let store = Arc::new(EventStore::in_memory(
        StageWorkflow::standard(),
        StoreOptions::default(),
    ));
    let failover = Arc::new(FailoverManager::new(QUEUE_JOIN, Vec::new()));
    let recorder = Recorder::default();
    let handler = TapHandler::new(
        Arc::clone(&store),
        failover,
        Box::new(recorder.clone()),
        StationIdentity {
            device_id: "st-1".into(),
            session_id: "day-1".into(),
            auto_init_start_id: start_id,
        },
    );
    (handler, store, recorder)
}

#[test]
fn test_unregistered_tag_is_enrolled_once() {
    let (handler, store, _) = station(1);

    let first = handler.handle_tap(&TapRead::new("04:AA", None));
    let issued = first.auto_init.clone().expect("enrolled");
    assert_eq!(issued.token_id, "001");
    assert_eq!(first.token_id, "001");
    assert_eq!(first.feedback, Feedback::Success);

    // same physical tag again: reuses its token, no new id
    let again = handler.handle_tap(&TapRead::new("04:AA", None));
    assert!(again.auto_init.is_none());
    assert_eq!(again.token_id, "001");
    assert_eq!(again.feedback, Feedback::Duplicate);

    let other = handler.handle_tap(&TapRead::new("04:BB", None));
    assert_eq!(other.token_id, "002");
    assert_eq!(store.get_event_count("day-1"), 2);
}

#[test]
fn test_registered_tag_uses_its_token() {
    let (handler, _, recorder) = station(100);
    let outcome = handler.handle_tap(&TapRead::new("04:AA", Some(" 042 ".into())));
    assert_eq!(outcome.token_id, "042");
    assert!(outcome.auto_init.is_none());
    assert_eq!(
        recorder.signals.lock().unwrap().as_slice(),
        &[(Feedback::Success, "042".to_string())]
    );
}

#[test]
fn test_invalid_token_signals_error() {
    let (handler, store, _) = station(1);
    let outcome = handler.handle_tap(&TapRead::new("04:AA", Some("7".into())));
    assert_eq!(outcome.feedback, Feedback::Error);
    assert!(outcome.result.is_error());
    assert_eq!(store.get_event_count("day-1"), 0);
}

#[test]
fn test_run_drains_line_source() {
    let (handler, store, recorder) = station(100);
    let input = "04:AA 001\n04:BB\n04:AA 001\n";
    let mut source = LineTapSource::new(Cursor::new(input));

    let handled = handler.run(&mut source).unwrap();
    assert_eq!(handled, 3);
    assert_eq!(store.get_event_count("day-1"), 2);

    let feedback: Vec<Feedback> = recorder
        .signals
        .lock()
        .unwrap()
        .iter()
        .map(|(f, _)| *f)
        .collect();
    assert_eq!(
        feedback,
        vec![Feedback::Success, Feedback::Success, Feedback::Duplicate]
    );
    assert_eq!(store.metrics().snapshot().taps_processed, 3);
}
