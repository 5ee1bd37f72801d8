//! Tracker snapshot capture.

use indexmap::IndexMap;
use serde::Serialize;

use crate::components::EntityId;
use crate::program::{Program, Tracker};
use crate::store::Store;
use crate::value::Value;

/// One entity's tracked component at capture time.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntitySnapshot {
    pub entity_id: EntityId,
    pub fields: IndexMap<String, Value>,
}

/// Output of one tracker for one processed event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackerRecord {
    pub tracker_id: u32,
    pub event_type: String,
    pub time: f64,
    pub component: String,
    /// Every entity with the component, ascending id.
    pub entities: Vec<EntitySnapshot>,
}

impl TrackerRecord {
    pub fn entity(&self, id: EntityId) -> Option<&EntitySnapshot> {
        self.entities.iter().find(|e| e.entity_id == id)
    }
}

/// Snapshot the tracked component of every matching entity.
pub fn capture(tracker: &Tracker, store: &Store, event_type: &str, time: f64) -> TrackerRecord {
    let schema = store.schema();
    let entities = store
        .query(&[tracker.component])
        .into_iter()
        .filter_map(|id| {
            let instance = store.instance(id, tracker.component)?;
            Some(EntitySnapshot {
                entity_id: id,
                fields: schema.describe(tracker.component, instance),
            })
        })
        .collect();
    TrackerRecord {
        tracker_id: tracker.id,
        event_type: event_type.to_string(),
        time,
        component: schema.component(tracker.component).name.clone(),
        entities,
    }
}

/// Run every tracker registered for an event type, in declaration order.
pub fn capture_all(program: &Program, store: &Store, event_type: &str, time: f64) -> Vec<TrackerRecord> {
    program
        .trackers_for(event_type)
        .map(|tracker| capture(tracker, store, event_type, time))
        .collect()
}
