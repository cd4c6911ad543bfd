//! Tap handling: source → stage selection → store → feedback

mod feedback;
mod handler;
mod source;

pub use feedback::{Feedback, FeedbackSink, LogFeedback};
pub use handler::{StationIdentity, TapHandler, TapOutcome};
pub use source::{LineTapSource, TapRead, TapSource};
