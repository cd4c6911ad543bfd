//! In-memory tables rebuilt from the log
//!
//! - `events`: live events by id
//! - `by_triple`: `(token_id, stage, session_id)` → ids
//! - `by_session_time`: `(session_id, timestamp, id)` ordered index
//! - `by_token`: `(session_id, token_id)` → ids
//! - `deleted`: archive, append-only
//! - `counters`: `session_id` → next auto-init id

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, Utc};

use super::event::{DeletedEvent, Event};
use super::record::LogRecord;

type Triple = (String, String, String);

#[derive(Debug, Default)]
pub(crate) struct Tables {
    events: BTreeMap<u64, Event>,
    by_triple: HashMap<Triple, BTreeSet<u64>>,
    by_session_time: BTreeSet<(String, DateTime<Utc>, u64)>,
    by_token: HashMap<(String, String), BTreeSet<u64>>,
    deleted: Vec<DeletedEvent>,
    counters: HashMap<String, u64>,
    /// Highest id ever assigned, live or archived
    max_event_id: u64,
}

impl Tables {
    /// Apply one record. Errors describe an inconsistent log.
    pub fn apply(&mut self, record: &LogRecord) -> Result<(), String> {
        match record {
            LogRecord::EventAppended(event) => {
                if event.id <= self.max_event_id {
                    return Err(format!(
                        "event id {} is not above previous maximum {}",
                        event.id, self.max_event_id
                    ));
                }
                self.insert(event.clone());
                Ok(())
            }
            LogRecord::EventRemoved(deleted) => {
                if self.remove(deleted.id).is_none() {
                    return Err(format!("removal of unknown event id {}", deleted.id));
                }
                self.deleted.push(deleted.clone());
                Ok(())
            }
            LogRecord::CounterAdvanced(counter) => {
                self.counters
                    .insert(counter.session_id.clone(), counter.next_token_id);
                Ok(())
            }
        }
    }

    fn insert(&mut self, event: Event) {
        let id = event.id;
        self.max_event_id = self.max_event_id.max(id);
        self.by_triple
            .entry((
                event.token_id.clone(),
                event.stage.clone(),
                event.session_id.clone(),
            ))
            .or_default()
            .insert(id);
        self.by_session_time
            .insert((event.session_id.clone(), event.timestamp, id));
        self.by_token
            .entry((event.session_id.clone(), event.token_id.clone()))
            .or_default()
            .insert(id);
        self.events.insert(id, event);
    }

    fn remove(&mut self, id: u64) -> Option<Event> {
        let event = self.events.remove(&id)?;
        let triple = (
            event.token_id.clone(),
            event.stage.clone(),
            event.session_id.clone(),
        );
        if let Some(ids) = self.by_triple.get_mut(&triple) {
            ids.remove(&id);
            if ids.is_empty() {
                self.by_triple.remove(&triple);
            }
        }
        self.by_session_time
            .remove(&(event.session_id.clone(), event.timestamp, id));
        let token_key = (event.session_id.clone(), event.token_id.clone());
        if let Some(ids) = self.by_token.get_mut(&token_key) {
            ids.remove(&id);
            if ids.is_empty() {
                self.by_token.remove(&token_key);
            }
        }
        Some(event)
    }

    pub fn next_event_id(&self) -> u64 {
        self.max_event_id + 1
    }

    pub fn get(&self, id: u64) -> Option<&Event> {
        self.events.get(&id)
    }

    pub fn contains_triple(&self, token_id: &str, stage: &str, session_id: &str) -> bool {
        self.by_triple
            .get(&(token_id.to_string(), stage.to_string(), session_id.to_string()))
            .map(|ids| !ids.is_empty())
            .unwrap_or(false)
    }

    /// A token's events in a session ordered by `(timestamp, id)`.
    pub fn token_events(&self, session_id: &str, token_id: &str) -> Vec<&Event> {
        let mut events: Vec<&Event> = self
            .by_token
            .get(&(session_id.to_string(), token_id.to_string()))
            .into_iter()
            .flatten()
            .filter_map(|id| self.events.get(id))
            .collect();
        events.sort_by(|a, b| (a.timestamp, a.id).cmp(&(b.timestamp, b.id)));
        events
    }

    pub fn latest_token_event(&self, session_id: &str, token_id: &str) -> Option<&Event> {
        self.token_events(session_id, token_id).pop()
    }

    /// All live events of a session ordered by `(timestamp, id)`.
    pub fn session_events(&self, session_id: &str) -> Vec<&Event> {
        self.by_session_time
            .iter()
            .filter(|(s, _, _)| s == session_id)
            .filter_map(|(_, _, id)| self.events.get(id))
            .collect()
    }

    pub fn all_events(&self) -> impl Iterator<Item = &Event> {
        self.events.values()
    }

    pub fn session_event_count(&self, session_id: &str) -> usize {
        self.by_session_time
            .iter()
            .filter(|(s, _, _)| s == session_id)
            .count()
    }

    pub fn deleted(&self) -> &[DeletedEvent] {
        &self.deleted
    }

    pub fn counter(&self, session_id: &str) -> Option<u64> {
        self.counters.get(session_id).copied()
    }
}
