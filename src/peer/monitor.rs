//! Peer monitor
//!
//! Two states, Healthy and Down, driven by consecutive probe outcomes:
//!
//! - success resets the failure streak; Down → Healthy fires `on_recovered`
//! - failure extends the streak; reaching the threshold while Healthy
//!   fires `on_down`
//! - anything else is silent
//!
//! Callbacks run in order on a dispatcher task, never on the probe loop.

use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::clock::{Clock, SystemClock};
use crate::observability::{log_event_with_fields, Event, MetricsRegistry};

use super::config::PeerConfig;
use super::probe::HealthProbe;

/// Callback for a peer transition.
pub type PeerCallback = Arc<dyn Fn() + Send + Sync>;

/// Edge between Healthy and Down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerTransition {
    Down,
    Recovered,
}

/// Rebuilt on every start; the peer is assumed healthy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeerHealthState {
    pub healthy: bool,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub last_check_time: Option<DateTime<Utc>>,
    pub last_success_time: Option<DateTime<Utc>>,
    pub total_checks: u64,
    pub total_failures: u64,
}

impl Default for PeerHealthState {
    fn default() -> Self {
        Self {
            healthy: true,
            consecutive_failures: 0,
            consecutive_successes: 0,
            last_check_time: None,
            last_success_time: None,
            total_checks: 0,
            total_failures: 0,
        }
    }
}

impl PeerHealthState {
    /// Fold one probe outcome in, returning the transition it caused.
    pub fn record(
        &mut self,
        success: bool,
        at: DateTime<Utc>,
        failure_threshold: u32,
    ) -> Option<PeerTransition> {
        self.total_checks += 1;
        self.last_check_time = Some(at);

        if success {
            self.consecutive_failures = 0;
            self.consecutive_successes = self.consecutive_successes.saturating_add(1);
            self.last_success_time = Some(at);
            if !self.healthy {
                self.healthy = true;
                return Some(PeerTransition::Recovered);
            }
            return None;
        }

        self.total_failures += 1;
        self.consecutive_successes = 0;
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        if self.healthy && self.consecutive_failures >= failure_threshold.max(1) {
            self.healthy = false;
            return Some(PeerTransition::Down);
        }
        None
    }
}

struct Shared<P> {
    config: PeerConfig,
    probe: P,
    state: Mutex<PeerHealthState>,
    clock: Arc<dyn Clock>,
    metrics: Option<Arc<MetricsRegistry>>,
    transitions: mpsc::UnboundedSender<PeerTransition>,
}

impl<P: HealthProbe> Shared<P> {
    fn lock(&self) -> MutexGuard<'_, PeerHealthState> {
        self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    async fn check(&self) -> bool {
        let healthy = tokio::time::timeout(self.config.timeout(), self.probe.probe())
            .await
            .unwrap_or(false);

        let (transition, failures) = {
            let mut state = self.lock();
            let transition = state.record(healthy, self.clock.now(), self.config.failure_threshold);
            (transition, state.consecutive_failures)
        };

        if let Some(metrics) = &self.metrics {
            metrics.increment_peer_probes();
            if !healthy {
                metrics.increment_peer_probe_failures();
            }
        }

        let url = self.config.health_url();
        if !healthy {
            log_event_with_fields(
                Event::PeerProbeFailed,
                &[
                    ("consecutive_failures", &failures.to_string()),
                    ("peer", &url),
                ],
            );
        }

        if let Some(transition) = transition {
            let event = match transition {
                PeerTransition::Down => Event::PeerDown,
                PeerTransition::Recovered => Event::PeerRecovered,
            };
            log_event_with_fields(event, &[("peer", &url)]);
            // dispatcher gone only after the monitor itself is dropped
            let _ = self.transitions.send(transition);
        }

        healthy
    }

    async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                break;
            }
            self.check().await;
            tokio::select! {
                _ = tokio::time::sleep(self.config.check_interval()) => {}
                _ = shutdown.changed() => {}
            }
        }
    }
}

/// Builder for [`PeerMonitor`].
pub struct PeerMonitorBuilder<P> {
    config: PeerConfig,
    probe: P,
    clock: Arc<dyn Clock>,
    metrics: Option<Arc<MetricsRegistry>>,
    on_down: Option<PeerCallback>,
    on_recovered: Option<PeerCallback>,
}

impl<P: HealthProbe> PeerMonitorBuilder<P> {
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn metrics(mut self, metrics: Arc<MetricsRegistry>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn on_down(mut self, callback: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_down = Some(Arc::new(callback));
        self
    }

    pub fn on_recovered(mut self, callback: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_recovered = Some(Arc::new(callback));
        self
    }

    /// Build the monitor and spawn its callback dispatcher.
    ///
    /// Must be called from within a tokio runtime.
    pub fn build(self) -> PeerMonitor<P> {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(dispatch(rx, self.on_down, self.on_recovered));

        let (shutdown, _) = watch::channel(false);
        PeerMonitor {
            shared: Arc::new(Shared {
                config: self.config,
                probe: self.probe,
                state: Mutex::new(PeerHealthState::default()),
                clock: self.clock,
                metrics: self.metrics,
                transitions: tx,
            }),
            shutdown,
            task: Mutex::new(None),
        }
    }
}

async fn dispatch(
    mut rx: mpsc::UnboundedReceiver<PeerTransition>,
    on_down: Option<PeerCallback>,
    on_recovered: Option<PeerCallback>,
) {
    while let Some(transition) = rx.recv().await {
        let callback = match transition {
            PeerTransition::Down => on_down.clone(),
            PeerTransition::Recovered => on_recovered.clone(),
        };
        if let Some(callback) = callback {
            // a panicking callback must not stop later transitions
            let _ = tokio::task::spawn_blocking(move || callback()).await;
        }
    }
}

/// Periodic health monitor for the paired station.
pub struct PeerMonitor<P> {
    shared: Arc<Shared<P>>,
    shutdown: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl<P: HealthProbe> PeerMonitor<P> {
    pub fn builder(config: PeerConfig, probe: P) -> PeerMonitorBuilder<P> {
        PeerMonitorBuilder {
            config,
            probe,
            clock: Arc::new(SystemClock),
            metrics: None,
            on_down: None,
            on_recovered: None,
        }
    }

    /// Start the probe loop. No-op if already running.
    pub fn start(&self) {
        let mut task = self.task.lock().unwrap_or_else(|p| p.into_inner());
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            return;
        }
        self.shutdown.send_replace(false);
        let receiver = self.shutdown.subscribe();
        let shared = Arc::clone(&self.shared);
        *task = Some(tokio::spawn(async move { shared.run(receiver).await }));

        log_event_with_fields(
            Event::PeerMonitorStart,
            &[
                ("interval_ms", &self.shared.config.check_interval_ms.to_string()),
                ("peer", &self.shared.config.health_url()),
                ("threshold", &self.shared.config.failure_threshold.to_string()),
            ],
        );
    }

    /// Stop the loop and wait for it to exit. A probe already in flight
    /// completes first. Safe to call more than once.
    pub async fn stop(&self) {
        self.shutdown.send_replace(true);
        let task = self.task.lock().unwrap_or_else(|p| p.into_inner()).take();
        if let Some(task) = task {
            let _ = task.await;
            log_event_with_fields(
                Event::PeerMonitorStop,
                &[("peer", &self.shared.config.health_url())],
            );
        }
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .as_ref()
            .is_some_and(|t| !t.is_finished())
    }

    /// Probe once now, applying the usual transition rules.
    pub async fn force_check(&self) -> bool {
        self.shared.check().await
    }

    pub fn state(&self) -> PeerHealthState {
        self.shared.lock().clone()
    }

    pub fn is_healthy(&self) -> bool {
        self.shared.lock().healthy
    }

    pub fn config(&self) -> &PeerConfig {
        &self.shared.config
    }
}
