//! Failover manager
//!
//! Owns the published `FailoverState`. Writers hold the lock only long
//! enough to swap the snapshot; callbacks run after the lock is released.

use std::sync::{Arc, RwLock};

use crate::clock::{Clock, SystemClock};
use crate::observability::{log_event_with_fields, Event, MetricsRegistry};

use super::state::FailoverState;

/// Callback invoked with the snapshot that was just published.
pub type FailoverCallback = Box<dyn Fn(&FailoverState) + Send + Sync>;

pub struct FailoverManager {
    state: RwLock<Arc<FailoverState>>,
    clock: Arc<dyn Clock>,
    metrics: Option<Arc<MetricsRegistry>>,
    on_enable: Option<FailoverCallback>,
    on_disable: Option<FailoverCallback>,
}

impl FailoverManager {
    pub fn new(primary_stage: impl Into<String>, fallback_stages: Vec<String>) -> Self {
        Self {
            state: RwLock::new(Arc::new(FailoverState::new(primary_stage, fallback_stages))),
            clock: Arc::new(SystemClock),
            metrics: None,
            on_enable: None,
            on_disable: None,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsRegistry>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn on_enable(mut self, callback: impl Fn(&FailoverState) + Send + Sync + 'static) -> Self {
        self.on_enable = Some(Box::new(callback));
        self
    }

    pub fn on_disable(mut self, callback: impl Fn(&FailoverState) + Send + Sync + 'static) -> Self {
        self.on_disable = Some(Box::new(callback));
        self
    }

    /// Current snapshot.
    pub fn state(&self) -> Arc<FailoverState> {
        Arc::clone(&self.state.read().unwrap_or_else(|p| p.into_inner()))
    }

    pub fn is_active(&self) -> bool {
        self.state().active
    }

    pub fn active_stages(&self) -> Vec<String> {
        self.state().active_stages()
    }

    pub fn effective_stage_for_tap(&self, tap_number: u64) -> String {
        self.state().effective_stage_for_tap(tap_number).to_string()
    }

    /// Start covering the fallback stages. Returns false if already active.
    pub fn enable_failover(&self) -> bool {
        let published = {
            let mut guard = self.state.write().unwrap_or_else(|p| p.into_inner());
            if guard.active {
                return false;
            }
            let next = Arc::new(guard.activated(self.clock.now()));
            *guard = Arc::clone(&next);
            next
        };

        if let Some(metrics) = &self.metrics {
            metrics.increment_failovers();
        }
        log_event_with_fields(
            Event::FailoverEnabled,
            &[
                ("active_stages", &published.active_stages().join(",")),
                ("primary_stage", &published.primary_stage),
            ],
        );
        if let Some(callback) = &self.on_enable {
            callback(&published);
        }
        true
    }

    /// Return to the primary stage only. Returns false if not active.
    pub fn disable_failover(&self) -> bool {
        let (published, previous) = {
            let mut guard = self.state.write().unwrap_or_else(|p| p.into_inner());
            if !guard.active {
                return false;
            }
            let previous = Arc::clone(&guard);
            let next = Arc::new(guard.deactivated());
            *guard = Arc::clone(&next);
            (next, previous)
        };

        let duration = previous
            .start_time
            .map(|start| (self.clock.now() - start).num_seconds())
            .unwrap_or(0);
        let taps: u64 = previous.tap_counts.values().sum();
        log_event_with_fields(
            Event::FailoverDisabled,
            &[
                ("duration_secs", &duration.to_string()),
                ("primary_stage", &published.primary_stage),
                ("taps_handled", &taps.to_string()),
            ],
        );
        if let Some(callback) = &self.on_disable {
            callback(&published);
        }
        true
    }

    /// Count a tap against `stage`.
    pub fn record_tap(&self, stage: &str) {
        let mut guard = self.state.write().unwrap_or_else(|p| p.into_inner());
        let next = Arc::new(guard.with_tap(stage));
        *guard = next;
    }
}
