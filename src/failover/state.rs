//! Immutable failover snapshot
//!
//! A `FailoverState` is never mutated once published. The manager builds a
//! new value and swaps the `Arc`, so a reader always sees one consistent
//! combination of `active` and stage set.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailoverState {
    pub active: bool,
    /// When the current failover began; `None` while inactive
    pub start_time: Option<DateTime<Utc>>,
    pub primary_stage: String,
    pub fallback_stages: Vec<String>,
    /// Taps attributed per stage since start. Diagnostic only.
    pub tap_counts: BTreeMap<String, u64>,
}

impl FailoverState {
    pub fn new(primary_stage: impl Into<String>, fallback_stages: Vec<String>) -> Self {
        Self {
            active: false,
            start_time: None,
            primary_stage: primary_stage.into(),
            fallback_stages,
            tap_counts: BTreeMap::new(),
        }
    }

    /// `[primary]` when inactive, `[primary, fallbacks..]` when active.
    pub fn active_stages(&self) -> Vec<String> {
        let mut stages = vec![self.primary_stage.clone()];
        if self.active {
            stages.extend(self.fallback_stages.iter().cloned());
        }
        stages
    }

    /// Stage a tap is attributed to.
    ///
    /// Round-robin over the active stages by 1-based tap number, so with a
    /// single fallback odd taps go to the primary and even taps to the
    /// fallback. Tap number 0 counts as 1.
    pub fn effective_stage_for_tap(&self, tap_number: u64) -> &str {
        if !self.active || self.fallback_stages.is_empty() {
            return &self.primary_stage;
        }
        let len = self.fallback_stages.len() as u64 + 1;
        let slot = (tap_number.max(1) - 1) % len;
        if slot == 0 {
            &self.primary_stage
        } else {
            &self.fallback_stages[(slot - 1) as usize]
        }
    }

    pub(crate) fn activated(&self, at: DateTime<Utc>) -> Self {
        Self {
            active: true,
            start_time: Some(at),
            tap_counts: BTreeMap::new(),
            ..self.clone()
        }
    }

    pub(crate) fn deactivated(&self) -> Self {
        Self {
            active: false,
            start_time: None,
            ..self.clone()
        }
    }

    pub(crate) fn with_tap(&self, stage: &str) -> Self {
        let mut next = self.clone();
        *next.tap_counts.entry(stage.to_string()).or_insert(0) += 1;
        next
    }
}
