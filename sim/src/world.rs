//! Whole-world snapshot types.
//!
//! The `Snapshot` struct provides a serializable view of the simulation state
//! that hosts can render or log between steps.

use indexmap::IndexMap;
use serde::Serialize;

use crate::components::EntityId;
use crate::store::Store;
use crate::value::Value;

/// Snapshot of a single entity.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityRecord {
    pub id: EntityId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Component name -> field name -> value, in schema order.
    pub components: IndexMap<String, IndexMap<String, Value>>,
}

/// Complete simulation state snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Snapshot {
    /// Steps taken so far.
    pub step: u64,
    /// Current simulation time.
    pub time: f64,
    /// Events waiting on the timeline, engine events included.
    pub pending_events: usize,
    /// All live entities, ascending id.
    pub entities: Vec<EntityRecord>,
}

impl Snapshot {
    /// Create a snapshot from the store.
    pub fn from_store(store: &Store, pending_events: usize) -> Self {
        let clock = store.clock();
        let schema = store.schema();
        let entities = store
            .entity_ids()
            .map(|id| {
                let components = store
                    .component_set(id)
                    .map(|set| {
                        set.iter()
                            .map(|(component, instance)| {
                                (
                                    schema.component(component).name.clone(),
                                    schema.describe(component, instance),
                                )
                            })
                            .collect()
                    })
                    .unwrap_or_default();
                EntityRecord {
                    id,
                    name: store.name_of(id).map(str::to_string),
                    components,
                }
            })
            .collect();

        Self {
            step: clock.step,
            time: clock.time,
            pending_events,
            entities,
        }
    }

    pub fn entity(&self, id: EntityId) -> Option<&EntityRecord> {
        self.entities.iter().find(|e| e.id == id)
    }

    /// Serialize snapshot to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Serialize snapshot to pretty JSON string.
    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
