//! Station metrics registry
//!
//! - Counters only
//! - Monotonic increase
//! - Reset only on process start

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

/// Operational counters shared by the store, the tap handler and the peer
/// monitor.
///
/// Relaxed ordering: counters are diagnostics, not synchronization.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
    taps_processed: AtomicU64,
    events_logged: AtomicU64,
    duplicates_rejected: AtomicU64,
    out_of_order_flagged: AtomicU64,
    validation_failures: AtomicU64,
    storage_failures: AtomicU64,
    auto_init_issued: AtomicU64,
    auto_init_fallbacks: AtomicU64,
    manual_events: AtomicU64,
    events_removed: AtomicU64,
    peer_probes: AtomicU64,
    peer_probe_failures: AtomicU64,
    failovers_activated: AtomicU64,
}

/// Point-in-time copy of every counter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub taps_processed: u64,
    pub events_logged: u64,
    pub duplicates_rejected: u64,
    pub out_of_order_flagged: u64,
    pub validation_failures: u64,
    pub storage_failures: u64,
    pub auto_init_issued: u64,
    pub auto_init_fallbacks: u64,
    pub manual_events: u64,
    pub events_removed: u64,
    pub peer_probes: u64,
    pub peer_probe_failures: u64,
    pub failovers_activated: u64,
}

macro_rules! counter {
    ($inc:ident, $field:ident) => {
        #[doc = concat!("Increment `", stringify!($field), "`")]
        pub fn $inc(&self) {
            self.$field.fetch_add(1, Ordering::Relaxed);
        }
    };
}

impl MetricsRegistry {
    /// Create a registry with all counters at zero
    pub fn new() -> Self {
        Self::default()
    }

    counter!(increment_taps, taps_processed);
    counter!(increment_events_logged, events_logged);
    counter!(increment_duplicates, duplicates_rejected);
    counter!(increment_out_of_order, out_of_order_flagged);
    counter!(increment_validation_failures, validation_failures);
    counter!(increment_storage_failures, storage_failures);
    counter!(increment_auto_init_issued, auto_init_issued);
    counter!(increment_auto_init_fallbacks, auto_init_fallbacks);
    counter!(increment_manual_events, manual_events);
    counter!(increment_events_removed, events_removed);
    counter!(increment_peer_probes, peer_probes);
    counter!(increment_peer_probe_failures, peer_probe_failures);
    counter!(increment_failovers, failovers_activated);

    /// Take a snapshot of all counters
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            taps_processed: self.taps_processed.load(Ordering::Relaxed),
            events_logged: self.events_logged.load(Ordering::Relaxed),
            duplicates_rejected: self.duplicates_rejected.load(Ordering::Relaxed),
            out_of_order_flagged: self.out_of_order_flagged.load(Ordering::Relaxed),
            validation_failures: self.validation_failures.load(Ordering::Relaxed),
            storage_failures: self.storage_failures.load(Ordering::Relaxed),
            auto_init_issued: self.auto_init_issued.load(Ordering::Relaxed),
            auto_init_fallbacks: self.auto_init_fallbacks.load(Ordering::Relaxed),
            manual_events: self.manual_events.load(Ordering::Relaxed),
            events_removed: self.events_removed.load(Ordering::Relaxed),
            peer_probes: self.peer_probes.load(Ordering::Relaxed),
            peer_probe_failures: self.peer_probe_failures.load(Ordering::Relaxed),
            failovers_activated: self.failovers_activated.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_new_registry_is_zero() {
        assert_eq!(MetricsRegistry::new().snapshot(), MetricsSnapshot::default());
    }

    #[test]
    fn test_counters_increment_independently() {
        let metrics = MetricsRegistry::new();
        metrics.increment_events_logged();
        metrics.increment_events_logged();
        metrics.increment_duplicates();

        let snap = metrics.snapshot();
        assert_eq!(snap.events_logged, 2);
        assert_eq!(snap.duplicates_rejected, 1);
        assert_eq!(snap.out_of_order_flagged, 0);
    }

    #[test]
    fn test_concurrent_increments_are_exact() {
        let metrics = Arc::new(MetricsRegistry::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let m = Arc::clone(&metrics);
                thread::spawn(move || {
                    for _ in 0..250 {
                        m.increment_taps();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(metrics.snapshot().taps_processed, 1000);
    }
}
