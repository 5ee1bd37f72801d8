//! Event Timeline.
//!
//! Pending events are kept in a `BTreeMap` keyed by `(time, seq)`, so the
//! earliest event is always the first entry and equal-time events pop in
//! insertion order. A side index from [`EventId`] to key makes cancellation
//! O(log n).

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

use indexmap::IndexMap;
use serde::Serialize;

use crate::error::{Result, SimError};
use crate::value::Value;

/// Reserved event type of the watchdog.
pub const WATCHDOG_EVENT: &str = "__watchdog";

/// Reserved event type of the periodic tick.
pub const TICK_EVENT: &str = "__tick";

/// Whether an event type is reserved for the engine.
pub fn is_internal(event_type: &str) -> bool {
    event_type.starts_with("__")
}

/// Identifier of a scheduled event. A recurring event keeps its id across
/// firings, so cancelling it stops every future occurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct EventId(pub u64);

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "event {}", self.0)
    }
}

/// Simulation time with a total order (`f64::total_cmp`).
#[derive(Debug, Clone, Copy)]
struct SimTime(f64);

impl PartialEq for SimTime {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for SimTime {}

impl PartialOrd for SimTime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for SimTime {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.total_cmp(&other.0)
    }
}

type Key = (SimTime, u64);

/// An event waiting on (or popped from) the timeline.
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduledEvent {
    pub id: EventId,
    pub event_type: String,
    pub time: f64,
    /// Insertion sequence number, the tie-break for equal times.
    pub seq: u64,
    pub fields: IndexMap<String, Value>,
    /// Recurrence interval, if recurring.
    pub interval: Option<f64>,
}

impl ScheduledEvent {
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }
}

/// Time-ordered schedule of pending events.
#[derive(Debug, Default)]
pub struct Timeline {
    queue: BTreeMap<Key, ScheduledEvent>,
    keys: HashMap<EventId, Key>,
    now: f64,
    next_seq: u64,
    next_id: u64,
}

impl Timeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Time of the most recently popped event.
    pub fn now(&self) -> f64 {
        self.now
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn has_pending(&self) -> bool {
        !self.queue.is_empty()
    }

    /// Whether any event other than the engine's own is pending.
    pub fn has_pending_external(&self) -> bool {
        self.queue.values().any(|ev| !is_internal(&ev.event_type))
    }

    /// Time of the earliest pending event.
    pub fn next_time(&self) -> Option<f64> {
        self.queue.keys().next().map(|(time, _)| time.0)
    }

    pub fn contains(&self, id: EventId) -> bool {
        self.keys.contains_key(&id)
    }

    /// Schedule a one-shot event at `now + delay`.
    pub fn schedule(
        &mut self,
        event_type: impl Into<String>,
        delay: f64,
        fields: IndexMap<String, Value>,
    ) -> Result<EventId> {
        if !(delay >= 0.0) || delay.is_infinite() {
            return Err(SimError::InvalidArgument {
                function: "schedule".to_string(),
                message: format!("delay must be a finite number >= 0, got {delay}"),
            });
        }
        Ok(self.insert(event_type.into(), delay, fields, None))
    }

    /// Schedule an event that fires at `now + interval` and every `interval`
    /// thereafter until cancelled.
    pub fn schedule_recurring(
        &mut self,
        event_type: impl Into<String>,
        interval: f64,
        fields: IndexMap<String, Value>,
    ) -> Result<EventId> {
        if !(interval > 0.0) || interval.is_infinite() {
            return Err(SimError::InvalidArgument {
                function: "schedule_recurring".to_string(),
                message: format!("interval must be a finite number > 0, got {interval}"),
            });
        }
        Ok(self.insert(event_type.into(), interval, fields, Some(interval)))
    }

    fn insert(
        &mut self,
        event_type: String,
        delay: f64,
        fields: IndexMap<String, Value>,
        interval: Option<f64>,
    ) -> EventId {
        let id = EventId(self.next_id);
        self.next_id += 1;
        let event = ScheduledEvent {
            id,
            event_type,
            time: self.now + delay,
            seq: 0,
            fields,
            interval,
        };
        self.enqueue(event);
        id
    }

    fn enqueue(&mut self, mut event: ScheduledEvent) {
        event.seq = self.next_seq;
        self.next_seq += 1;
        let key = (SimTime(event.time), event.seq);
        self.keys.insert(event.id, key);
        self.queue.insert(key, event);
    }

    /// Remove a pending event, stopping any recurrence. Unknown or
    /// already-fired ids are a no-op; returns whether anything was removed.
    pub fn cancel(&mut self, id: EventId) -> bool {
        match self.keys.remove(&id) {
            Some(key) => self.queue.remove(&key).is_some(),
            None => false,
        }
    }

    /// Pop the earliest pending event and advance the clock to its time.
    ///
    /// A recurring event is re-inserted at `time + interval` (same id, fresh
    /// sequence number) before it is returned, so a rule handling it may
    /// cancel the next occurrence.
    pub fn pop_earliest(&mut self) -> Option<ScheduledEvent> {
        let (_, event) = self.queue.pop_first()?;
        self.keys.remove(&event.id);
        self.now = event.time;
        if let Some(interval) = event.interval {
            let mut next = event.clone();
            next.time = event.time + interval;
            self.enqueue(next);
        }
        Some(event)
    }

    /// Pending events in firing order.
    pub fn pending(&self) -> impl Iterator<Item = &ScheduledEvent> {
        self.queue.values()
    }
}
