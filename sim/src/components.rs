//! ECS components and resources for the Blink engine.
//!
//! Every simulation entity is a `bevy_ecs` entity carrying an [`EntityId`]
//! and a [`ComponentSet`]. IR components are dynamic (declared by the loaded
//! module), so their instances live inside `ComponentSet` keyed by the
//! load-time [`ComponentId`] instead of as individual Rust types.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use bevy_ecs::prelude::*;
use serde::{Deserialize, Serialize};

use crate::program::Function;
use crate::value::Value;

// ============================================================================
// IDENTITY COMPONENTS
// ============================================================================

/// Engine-level entity identifier.
///
/// Allocated monotonically and never reused within a run, unlike the
/// generational `bevy_ecs::entity::Entity` that backs it.
#[derive(
    Component, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct EntityId(pub u64);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Designer-facing name of an initial-state entity.
#[derive(Component, Debug, Clone, PartialEq, Eq)]
pub struct EntityName(pub String);

// ============================================================================
// DATA COMPONENTS
// ============================================================================

/// Index of a component definition in the loaded schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ComponentId(pub u32);

/// Field values of one IR component on one entity, in declaration order.
#[derive(Debug, Clone, PartialEq)]
pub struct ComponentInstance {
    pub fields: Vec<Value>,
}

impl ComponentInstance {
    pub fn get(&self, field: usize) -> Option<&Value> {
        self.fields.get(field)
    }
}

/// All IR component instances attached to an entity.
#[derive(Component, Debug, Clone, Default)]
pub struct ComponentSet {
    instances: BTreeMap<ComponentId, ComponentInstance>,
}

impl ComponentSet {
    pub fn contains(&self, id: ComponentId) -> bool {
        self.instances.contains_key(&id)
    }

    pub fn contains_all(&self, ids: &[ComponentId]) -> bool {
        ids.iter().all(|id| self.contains(*id))
    }

    pub fn get(&self, id: ComponentId) -> Option<&ComponentInstance> {
        self.instances.get(&id)
    }

    pub fn get_mut(&mut self, id: ComponentId) -> Option<&mut ComponentInstance> {
        self.instances.get_mut(&id)
    }

    /// Attach or replace a component instance.
    pub fn insert(&mut self, id: ComponentId, instance: ComponentInstance) {
        self.instances.insert(id, instance);
    }

    pub fn remove(&mut self, id: ComponentId) -> Option<ComponentInstance> {
        self.instances.remove(&id)
    }

    /// Instances in ascending component id order.
    pub fn iter(&self) -> impl Iterator<Item = (ComponentId, &ComponentInstance)> {
        self.instances.iter().map(|(id, inst)| (*id, inst))
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}

/// Choice functions bound to an entity, looked up by name.
#[derive(Component, Debug, Clone, Default)]
pub struct ChoiceFunctions(pub BTreeMap<String, Arc<Function>>);

impl ChoiceFunctions {
    pub fn get(&self, name: &str) -> Option<&Arc<Function>> {
        self.0.get(name)
    }
}

// ============================================================================
// RESOURCES
// ============================================================================

/// Simulation clock, updated once per step.
#[derive(Resource, Debug, Clone, Copy, Default)]
pub struct SimClock {
    /// Simulation time of the event being (or last) processed.
    pub time: f64,
    /// Number of steps taken so far.
    pub step: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instance(values: &[f64]) -> ComponentInstance {
        ComponentInstance {
            fields: values.iter().map(|v| Value::Number(*v)).collect(),
        }
    }

    #[test]
    fn test_component_set_contains_all() {
        let mut set = ComponentSet::default();
        set.insert(ComponentId(0), instance(&[1.0]));
        set.insert(ComponentId(2), instance(&[2.0]));

        assert!(set.contains_all(&[ComponentId(0), ComponentId(2)]));
        assert!(!set.contains_all(&[ComponentId(0), ComponentId(1)]));
        assert!(set.contains_all(&[]));
    }

    #[test]
    fn test_component_set_iterates_in_id_order() {
        let mut set = ComponentSet::default();
        set.insert(ComponentId(3), instance(&[3.0]));
        set.insert(ComponentId(1), instance(&[1.0]));

        let ids: Vec<_> = set.iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec![ComponentId(1), ComponentId(3)]);
    }

    #[test]
    fn test_entity_id_display() {
        assert_eq!(EntityId(12).to_string(), "#12");
    }
}
