//! Anomaly detection over a session's events
//!
//! A pure pass over an ordered snapshot; the store takes the snapshot under
//! its lock and runs this outside it.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::event::Event;
use crate::workflow::StageWorkflow;

/// Tunable thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyConfig {
    /// Minutes without reaching the final stage before a journey is incomplete
    #[serde(default = "default_stale_after_minutes")]
    pub stale_after_minutes: u32,

    /// Consecutive related taps closer than this are rapid-fire
    #[serde(default = "default_rapid_fire_seconds")]
    pub rapid_fire_seconds: u32,

    /// Service time above `factor × median` is flagged
    #[serde(default = "default_long_service_factor")]
    pub long_service_factor: f64,

    /// Stage that starts service; defaults to the workflow's second stage
    #[serde(default)]
    pub service_start_stage: Option<String>,

    /// Stage that ends service; defaults to the workflow's final stage
    #[serde(default)]
    pub exit_stage: Option<String>,
}

fn default_stale_after_minutes() -> u32 {
    30
}
fn default_rapid_fire_seconds() -> u32 {
    120
}
fn default_long_service_factor() -> f64 {
    2.0
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            stale_after_minutes: default_stale_after_minutes(),
            rapid_fire_seconds: default_rapid_fire_seconds(),
            long_service_factor: default_long_service_factor(),
            service_start_stage: None,
            exit_stage: None,
        }
    }
}

impl AnomalyConfig {
    fn service_start<'a>(&'a self, workflow: &'a StageWorkflow) -> &'a str {
        match &self.service_start_stage {
            Some(stage) => stage,
            None => workflow
                .stages()
                .get(1)
                .map(|s| s.name.as_str())
                .unwrap_or_else(|| workflow.first_stage()),
        }
    }

    fn exit<'a>(&'a self, workflow: &'a StageWorkflow) -> &'a str {
        self.exit_stage
            .as_deref()
            .unwrap_or_else(|| workflow.final_stage())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnomalySeverity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncompleteJourney {
    pub token_id: String,
    /// Stages visited, in order
    pub journey: Vec<String>,
    pub last_stage: String,
    pub last_seen: DateTime<Utc>,
    pub minutes_since_last: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RapidFireTap {
    pub token_id: String,
    pub first_event_id: u64,
    pub second_event_id: u64,
    pub first_stage: String,
    pub second_stage: String,
    pub seconds_between: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LongServiceTime {
    pub token_id: String,
    pub service_minutes: f64,
    pub median_minutes: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalySummary {
    pub incomplete_journeys: usize,
    pub rapid_fire_taps: usize,
    pub long_service_times: usize,
    pub total: usize,
    pub incomplete_severity: AnomalySeverity,
    pub rapid_fire_severity: AnomalySeverity,
    pub long_service_severity: AnomalySeverity,
    /// Highest severity among non-empty categories
    pub highest_severity: Option<AnomalySeverity>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyReport {
    pub session_id: String,
    pub generated_at: DateTime<Utc>,
    pub events_scanned: usize,
    pub incomplete_journeys: Vec<IncompleteJourney>,
    pub rapid_fire_taps: Vec<RapidFireTap>,
    pub long_service_times: Vec<LongServiceTime>,
    pub summary: AnomalySummary,
}

/// Analyze `events`, which must all belong to `session_id` and be ordered
/// by `(timestamp, id)`.
pub fn analyze(
    session_id: &str,
    events: &[Event],
    workflow: &StageWorkflow,
    config: &AnomalyConfig,
    now: DateTime<Utc>,
) -> AnomalyReport {
    let mut by_token: BTreeMap<&str, Vec<&Event>> = BTreeMap::new();
    for event in events {
        by_token.entry(event.token_id.as_str()).or_default().push(event);
    }

    let incomplete_journeys = find_incomplete(&by_token, workflow, config, now);
    let rapid_fire_taps = find_rapid_fire(&by_token, workflow, config);
    let long_service_times = find_long_service(&by_token, workflow, config);

    let severities = [
        (!incomplete_journeys.is_empty(), AnomalySeverity::Medium),
        (!rapid_fire_taps.is_empty(), AnomalySeverity::Low),
        (!long_service_times.is_empty(), AnomalySeverity::Medium),
    ];
    let highest_severity = severities
        .iter()
        .filter(|(present, _)| *present)
        .map(|(_, s)| *s)
        .max();

    let summary = AnomalySummary {
        incomplete_journeys: incomplete_journeys.len(),
        rapid_fire_taps: rapid_fire_taps.len(),
        long_service_times: long_service_times.len(),
        total: incomplete_journeys.len() + rapid_fire_taps.len() + long_service_times.len(),
        incomplete_severity: AnomalySeverity::Medium,
        rapid_fire_severity: AnomalySeverity::Low,
        long_service_severity: AnomalySeverity::Medium,
        highest_severity,
    };

    AnomalyReport {
        session_id: session_id.to_string(),
        generated_at: now,
        events_scanned: events.len(),
        incomplete_journeys,
        rapid_fire_taps,
        long_service_times,
        summary,
    }
}

fn find_incomplete(
    by_token: &BTreeMap<&str, Vec<&Event>>,
    workflow: &StageWorkflow,
    config: &AnomalyConfig,
    now: DateTime<Utc>,
) -> Vec<IncompleteJourney> {
    let stale_after = i64::from(config.stale_after_minutes);
    let mut found = Vec::new();

    for (token_id, events) in by_token {
        let Some(last) = events.last() else { continue };
        if events.iter().any(|e| workflow.is_final(&e.stage)) {
            continue;
        }
        let minutes_since_last = (now - last.timestamp).num_minutes();
        if minutes_since_last >= stale_after {
            found.push(IncompleteJourney {
                token_id: token_id.to_string(),
                journey: events.iter().map(|e| e.stage.clone()).collect(),
                last_stage: last.stage.clone(),
                last_seen: last.timestamp,
                minutes_since_last,
            });
        }
    }
    found
}

fn find_rapid_fire(
    by_token: &BTreeMap<&str, Vec<&Event>>,
    workflow: &StageWorkflow,
    config: &AnomalyConfig,
) -> Vec<RapidFireTap> {
    let window = i64::from(config.rapid_fire_seconds);
    let mut found = Vec::new();

    for (token_id, events) in by_token {
        for pair in events.windows(2) {
            let (a, b) = (pair[0], pair[1]);
            let seconds_between = (b.timestamp - a.timestamp).num_seconds();
            if seconds_between < window && workflow.are_adjacent(&a.stage, &b.stage) {
                found.push(RapidFireTap {
                    token_id: token_id.to_string(),
                    first_event_id: a.id,
                    second_event_id: b.id,
                    first_stage: a.stage.clone(),
                    second_stage: b.stage.clone(),
                    seconds_between,
                });
            }
        }
    }
    found
}

fn find_long_service(
    by_token: &BTreeMap<&str, Vec<&Event>>,
    workflow: &StageWorkflow,
    config: &AnomalyConfig,
) -> Vec<LongServiceTime> {
    let start_stage = config.service_start(workflow);
    let exit_stage = config.exit(workflow);

    let durations: Vec<(&str, f64)> = by_token
        .iter()
        .filter_map(|(token_id, events)| {
            let start = events.iter().find(|e| e.stage == start_stage)?;
            let exit = events.iter().rev().find(|e| e.stage == exit_stage)?;
            let seconds = (exit.timestamp - start.timestamp).num_seconds();
            (seconds > 0).then(|| (*token_id, seconds as f64 / 60.0))
        })
        .collect();

    let Some(median_minutes) = median(durations.iter().map(|(_, m)| *m).collect()) else {
        return Vec::new();
    };
    if median_minutes <= 0.0 {
        return Vec::new();
    }

    durations
        .into_iter()
        .filter(|(_, minutes)| *minutes > config.long_service_factor * median_minutes)
        .map(|(token_id, service_minutes)| LongServiceTime {
            token_id: token_id.to_string(),
            service_minutes,
            median_minutes,
        })
        .collect()
}

fn median(mut values: Vec<f64>) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    Some(if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    })
}
