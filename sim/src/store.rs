//! Entity/Component Store.
//!
//! Owns all mutable entity state, backed by a `bevy_ecs::World`. Engine ids
//! ([`EntityId`]) are mapped to bevy entities through an ordered index, which
//! gives every query a stable ascending-id order.

use std::collections::BTreeMap;
use std::sync::Arc;

use bevy_ecs::prelude::*;
use indexmap::IndexMap;

use crate::components::{
    ChoiceFunctions, ComponentId, ComponentInstance, ComponentSet, EntityId, EntityName, SimClock,
};
use crate::error::{Result, SimError};
use crate::program::Function;
use crate::schema::Schema;
use crate::value::{FieldType, Value};

/// Field name -> value.
pub type ComponentPatch = IndexMap<String, Value>;

/// Component name -> field patch.
pub type EntityPatch = IndexMap<String, ComponentPatch>;

/// Field update operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModifyOp {
    Set,
    Add,
    Subtract,
    Multiply,
    Divide,
}

impl ModifyOp {
    pub fn parse(op: &str) -> Option<Self> {
        match op {
            "set" | "assign" => Some(Self::Set),
            "add" => Some(Self::Add),
            "subtract" => Some(Self::Subtract),
            "multiply" => Some(Self::Multiply),
            "divide" => Some(Self::Divide),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Set => "set",
            Self::Add => "add",
            Self::Subtract => "subtract",
            Self::Multiply => "multiply",
            Self::Divide => "divide",
        }
    }

    fn apply(self, current: &Value, operand: Value, ty: &FieldType, context: &str) -> Result<Value> {
        if self == Self::Set {
            let operand = operand.coerce_to(ty);
            if !operand.conforms_to(ty) {
                return Err(SimError::mismatch(context, ty.to_string(), operand.type_name()));
            }
            return Ok(operand);
        }
        match (current, &operand) {
            (Value::Number(a), Value::Number(b)) => match self {
                Self::Add => Ok(Value::Number(a + b)),
                Self::Subtract => Ok(Value::Number(a - b)),
                Self::Multiply => Ok(Value::Number(a * b)),
                Self::Divide if *b == 0.0 => Err(SimError::DivisionByZero),
                Self::Divide => Ok(Value::Number(a / b)),
                Self::Set => unreachable!("handled above"),
            },
            (Value::String(a), Value::String(b)) if self == Self::Add => {
                Ok(Value::String(format!("{a}{b}")))
            }
            _ => Err(SimError::mismatch(
                format!("{context} ({})", self.name()),
                ty.to_string(),
                operand.type_name(),
            )),
        }
    }
}

/// The entity/component store.
pub struct Store {
    world: World,
    schema: Arc<Schema>,
    entities: BTreeMap<EntityId, Entity>,
    names: BTreeMap<String, EntityId>,
    next_id: u64,
}

impl Store {
    /// Create an empty store over a schema.
    pub fn new(schema: Arc<Schema>) -> Self {
        let mut world = World::new();
        world.insert_resource(SimClock::default());
        Self {
            world,
            schema,
            entities: BTreeMap::new(),
            names: BTreeMap::new(),
            next_id: 0,
        }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Direct access to the ECS world (for advanced usage).
    pub fn world(&self) -> &World {
        &self.world
    }

    pub(crate) fn world_mut(&mut self) -> &mut World {
        &mut self.world
    }

    /// Despawn every entity and restart id allocation. Resources are kept.
    pub(crate) fn clear(&mut self) {
        for (_, entity) in std::mem::take(&mut self.entities) {
            self.world.despawn(entity);
        }
        self.names.clear();
        self.next_id = 0;
    }

    pub fn clock(&self) -> SimClock {
        *self.world.resource::<SimClock>()
    }

    pub(crate) fn set_clock(&mut self, clock: SimClock) {
        *self.world.resource_mut::<SimClock>() = clock;
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.entities.contains_key(&id)
    }

    /// Live entity ids in ascending order.
    pub fn entity_ids(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.entities.keys().copied()
    }

    pub fn entity_by_name(&self, name: &str) -> Option<EntityId> {
        self.names.get(name).copied()
    }

    pub fn name_of(&self, id: EntityId) -> Option<&str> {
        let entity = *self.entities.get(&id)?;
        self.world.get::<EntityName>(entity).map(|n| n.0.as_str())
    }

    // ------------------------------------------------------------------------
    // Creation / destruction
    // ------------------------------------------------------------------------

    /// Create an entity from name-keyed component values.
    ///
    /// Unspecified fields take their declared defaults. Fails with
    /// `InvalidComponent` for unknown components or fields and for values that
    /// violate a field's declared type; no id is consumed on failure.
    pub fn create_entity(&mut self, patch: &EntityPatch) -> Result<EntityId> {
        let inits = self.resolve_patch(patch)?;
        self.create_resolved(&inits)
    }

    /// Create an entity from resolved component initializers.
    pub fn create_resolved(&mut self, inits: &[(ComponentId, Vec<(usize, Value)>)]) -> Result<EntityId> {
        let mut set = ComponentSet::default();
        for (component, fields) in inits {
            set.insert(*component, self.schema.instantiate(*component, fields)?);
        }
        let id = EntityId(self.next_id);
        self.next_id += 1;
        self.spawn_set(id, set);
        Ok(id)
    }

    /// Insert an entity under a caller-chosen id (initial state).
    pub(crate) fn insert_with_id(
        &mut self,
        id: EntityId,
        name: Option<&str>,
        inits: &[(ComponentId, Vec<(usize, Value)>)],
    ) -> Result<()> {
        if self.contains(id) || id.0 < self.next_id {
            return Err(SimError::InvalidComponent {
                component: "<entity>".to_string(),
                message: format!("entity id {id} already allocated"),
            });
        }
        let mut set = ComponentSet::default();
        for (component, fields) in inits {
            set.insert(*component, self.schema.instantiate(*component, fields)?);
        }
        self.next_id = id.0 + 1;
        let entity = self.spawn_set(id, set);
        if let Some(name) = name {
            self.world.entity_mut(entity).insert(EntityName(name.to_string()));
            self.names.insert(name.to_string(), id);
        }
        Ok(())
    }

    fn spawn_set(&mut self, id: EntityId, set: ComponentSet) -> Entity {
        let entity = self.world.spawn((id, set)).id();
        self.entities.insert(id, entity);
        entity
    }

    /// Remove an entity and all its components. Returns false if it did not
    /// exist. The id is never handed out again.
    pub fn despawn_entity(&mut self, id: EntityId) -> bool {
        let Some(entity) = self.entities.remove(&id) else {
            return false;
        };
        self.names.retain(|_, named| *named != id);
        self.world.despawn(entity)
    }

    /// Copy a template's current components (and choice functions), then apply
    /// field overrides. Fields not overridden keep the template's values.
    pub fn clone_entity(&mut self, template: EntityId, overrides: &EntityPatch) -> Result<EntityId> {
        let entity = *self
            .entities
            .get(&template)
            .ok_or(SimError::UnknownEntity(template))?;
        let mut set = self
            .world
            .get::<ComponentSet>(entity)
            .cloned()
            .unwrap_or_default();
        let choices = self.world.get::<ChoiceFunctions>(entity).cloned();

        for (component, fields) in self.resolve_patch(overrides)? {
            let def = self.schema.component(component);
            let instance = set.get_mut(component).ok_or_else(|| SimError::InvalidComponent {
                component: def.name.clone(),
                message: format!("template {template} has no such component"),
            })?;
            for (index, value) in fields {
                let field = &def.fields[index];
                let value = value.coerce_to(&field.ty);
                if !value.conforms_to(&field.ty) {
                    return Err(SimError::InvalidComponent {
                        component: def.name.clone(),
                        message: format!(
                            "field {} expects {}, got {}",
                            field.name,
                            field.ty,
                            value.type_name()
                        ),
                    });
                }
                instance.fields[index] = value;
            }
        }

        let id = EntityId(self.next_id);
        self.next_id += 1;
        let spawned = self.spawn_set(id, set);
        if let Some(choices) = choices {
            self.world.entity_mut(spawned).insert(choices);
        }
        Ok(id)
    }

    // ------------------------------------------------------------------------
    // Component access
    // ------------------------------------------------------------------------

    pub fn component_set(&self, id: EntityId) -> Option<&ComponentSet> {
        let entity = *self.entities.get(&id)?;
        self.world.get::<ComponentSet>(entity)
    }

    pub fn instance(&self, id: EntityId, component: ComponentId) -> Option<&ComponentInstance> {
        self.component_set(id)?.get(component)
    }

    /// Name-keyed view of one component, or `None` if the entity or the
    /// component is absent.
    pub fn get_component(&self, id: EntityId, component: &str) -> Option<ComponentPatch> {
        let component = self.schema.component_id(component)?;
        let instance = self.instance(id, component)?;
        Some(self.schema.describe(component, instance))
    }

    /// Read one field by name.
    pub fn get_field(&self, id: EntityId, component: &str, field: &str) -> Result<Value> {
        let (component, index) = self.resolve_field(component, field)?;
        let set = self.component_set(id).ok_or(SimError::UnknownEntity(id))?;
        let instance = set.get(component).ok_or_else(|| self.missing(id, component))?;
        Ok(instance.fields[index].clone())
    }

    /// Overwrite one field by name.
    pub fn set_field(&mut self, id: EntityId, component: &str, field: &str, value: Value) -> Result<()> {
        self.update_field(id, component, field, ModifyOp::Set, value)
    }

    /// Apply an update operator to one field by name.
    pub fn update_field(
        &mut self,
        id: EntityId,
        component: &str,
        field: &str,
        op: ModifyOp,
        operand: Value,
    ) -> Result<()> {
        let (component, index) = self.resolve_field(component, field)?;
        self.modify_field(id, component, index, op, operand)
    }

    /// Apply an update operator to a resolved field.
    ///
    /// `TypeMismatch` if the operand disagrees with the declared type,
    /// `DivisionByZero` for a zero divisor. The field is untouched on error.
    pub fn modify_field(
        &mut self,
        id: EntityId,
        component: ComponentId,
        index: usize,
        op: ModifyOp,
        operand: Value,
    ) -> Result<()> {
        let entity = *self.entities.get(&id).ok_or(SimError::UnknownEntity(id))?;
        let def = self.schema.component(component);
        let field = &def.fields[index];
        let context = format!("{}.{}", def.name, field.name);

        let mut set = self
            .world
            .get_mut::<ComponentSet>(entity)
            .ok_or(SimError::UnknownEntity(id))?;
        let Some(instance) = set.get_mut(component) else {
            return Err(SimError::InvalidComponent {
                component: def.name.clone(),
                message: format!("entity {id} has no such component"),
            });
        };
        let updated = op.apply(&instance.fields[index], operand, &field.ty, &context)?;
        instance.fields[index] = updated;
        Ok(())
    }

    /// Attach (or replace) a component with defaults plus overrides.
    pub fn attach_component(
        &mut self,
        id: EntityId,
        component: ComponentId,
        overrides: &[(usize, Value)],
    ) -> Result<()> {
        let entity = *self.entities.get(&id).ok_or(SimError::UnknownEntity(id))?;
        let instance = self.schema.instantiate(component, overrides)?;
        if let Some(mut set) = self.world.get_mut::<ComponentSet>(entity) {
            set.insert(component, instance);
        }
        Ok(())
    }

    /// Detach a component. Returns whether it was present.
    pub fn detach_component(&mut self, id: EntityId, component: ComponentId) -> Result<bool> {
        let entity = *self.entities.get(&id).ok_or(SimError::UnknownEntity(id))?;
        Ok(self
            .world
            .get_mut::<ComponentSet>(entity)
            .map(|mut set| set.remove(component).is_some())
            .unwrap_or(false))
    }

    // ------------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------------

    /// Ids of entities possessing all of `components`, ascending.
    pub fn query(&self, components: &[ComponentId]) -> Vec<EntityId> {
        self.entities
            .iter()
            .filter(|(_, entity)| {
                self.world
                    .get::<ComponentSet>(**entity)
                    .is_some_and(|set| set.contains_all(components))
            })
            .map(|(id, _)| *id)
            .collect()
    }

    /// Query by component names. An unknown name matches nothing.
    pub fn query_names(&self, components: &[&str]) -> Vec<EntityId> {
        let resolved: Option<Vec<ComponentId>> = components
            .iter()
            .map(|name| self.schema.component_id(name))
            .collect();
        match resolved {
            Some(ids) => self.query(&ids),
            None => Vec::new(),
        }
    }

    // ------------------------------------------------------------------------
    // Choice functions
    // ------------------------------------------------------------------------

    pub fn set_choice_functions(&mut self, id: EntityId, table: ChoiceFunctions) -> Result<()> {
        let entity = *self.entities.get(&id).ok_or(SimError::UnknownEntity(id))?;
        self.world.entity_mut(entity).insert(table);
        Ok(())
    }

    pub fn choice_function(&self, id: EntityId, name: &str) -> Option<Arc<Function>> {
        let entity = *self.entities.get(&id)?;
        self.world.get::<ChoiceFunctions>(entity)?.get(name).cloned()
    }

    // ------------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------------

    fn resolve_patch(&self, patch: &EntityPatch) -> Result<Vec<(ComponentId, Vec<(usize, Value)>)>> {
        patch
            .iter()
            .map(|(component, fields)| self.schema.resolve_fields(component, fields))
            .collect()
    }

    fn resolve_field(&self, component: &str, field: &str) -> Result<(ComponentId, usize)> {
        let def = self
            .schema
            .by_name(component)
            .ok_or_else(|| SimError::InvalidComponent {
                component: component.to_string(),
                message: "unknown component".to_string(),
            })?;
        let index = def.field_index(field).ok_or_else(|| SimError::InvalidComponent {
            component: component.to_string(),
            message: format!("unknown field {field}"),
        })?;
        Ok((def.id, index))
    }

    fn missing(&self, id: EntityId, component: ComponentId) -> SimError {
        SimError::InvalidComponent {
            component: self.schema.component(component).name.clone(),
            message: format!("entity {id} has no such component"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::IrComponent;
    use serde_json::json;

    fn store() -> Store {
        let components: Vec<IrComponent> = serde_json::from_value(json!([
            {"name": "Health", "fields": [
                {"name": "current", "type": {"type": "number"}, "default": 100},
                {"name": "max", "type": {"type": "number"}, "default": 100}
            ]},
            {"name": "Attack", "fields": [
                {"name": "damage", "type": {"type": "number"}, "default": 1}
            ]},
            {"name": "Label", "fields": [
                {"name": "text", "type": {"type": "string"}}
            ]}
        ]))
        .unwrap();
        Store::new(Arc::new(Schema::from_ir(&components).unwrap()))
    }

    fn patch(entries: &[(&str, &[(&str, Value)])]) -> EntityPatch {
        entries
            .iter()
            .map(|(comp, fields)| {
                (
                    comp.to_string(),
                    fields.iter().map(|(f, v)| (f.to_string(), v.clone())).collect(),
                )
            })
            .collect()
    }

    #[test]
    fn test_create_applies_defaults() {
        let mut store = store();
        let id = store
            .create_entity(&patch(&[("Health", &[("current", 40.0.into())])]))
            .unwrap();
        assert_eq!(store.get_field(id, "Health", "current").unwrap(), Value::Number(40.0));
        assert_eq!(store.get_field(id, "Health", "max").unwrap(), Value::Number(100.0));
    }

    #[test]
    fn test_create_rejects_unknown_component_without_consuming_id() {
        let mut store = store();
        let err = store.create_entity(&patch(&[("Mana", &[])])).unwrap_err();
        assert!(matches!(err, SimError::InvalidComponent { .. }));
        let err = store
            .create_entity(&patch(&[("Health", &[("current", "full".into())])]))
            .unwrap_err();
        assert!(matches!(err, SimError::InvalidComponent { .. }));

        let id = store.create_entity(&patch(&[("Attack", &[])])).unwrap();
        assert_eq!(id, EntityId(0));
    }

    #[test]
    fn test_despawn_is_final_and_ids_are_not_reused() {
        let mut store = store();
        let a = store.create_entity(&patch(&[("Health", &[])])).unwrap();
        assert!(store.despawn_entity(a));
        assert!(store.get_component(a, "Health").is_none());
        assert!(!store.despawn_entity(a));

        let b = store.create_entity(&patch(&[("Health", &[])])).unwrap();
        assert_ne!(a, b);
        assert!(store.get_component(a, "Health").is_none());
    }

    #[test]
    fn test_absent_component_is_not_an_error() {
        let mut store = store();
        let id = store.create_entity(&patch(&[("Health", &[])])).unwrap();
        assert!(store.get_component(id, "Attack").is_none());
        assert!(store.get_component(id, "Nope").is_none());
    }

    #[test]
    fn test_update_ops() {
        let mut store = store();
        let id = store.create_entity(&patch(&[("Health", &[])])).unwrap();
        store.update_field(id, "Health", "current", ModifyOp::Subtract, 30.0.into()).unwrap();
        store.update_field(id, "Health", "current", ModifyOp::Multiply, 2.0.into()).unwrap();
        store.update_field(id, "Health", "current", ModifyOp::Divide, 7.0.into()).unwrap();
        store.update_field(id, "Health", "current", ModifyOp::Add, 5.0.into()).unwrap();
        assert_eq!(store.get_field(id, "Health", "current").unwrap(), Value::Number(25.0));
    }

    #[test]
    fn test_update_errors_leave_field_untouched() {
        let mut store = store();
        let id = store.create_entity(&patch(&[("Health", &[])])).unwrap();

        let err = store
            .update_field(id, "Health", "current", ModifyOp::Divide, 0.0.into())
            .unwrap_err();
        assert_eq!(err, SimError::DivisionByZero);

        let err = store
            .update_field(id, "Health", "current", ModifyOp::Add, "x".into())
            .unwrap_err();
        assert!(matches!(err, SimError::TypeMismatch { .. }));

        let err = store.set_field(id, "Health", "current", true.into()).unwrap_err();
        assert!(matches!(err, SimError::TypeMismatch { .. }));

        assert_eq!(store.get_field(id, "Health", "current").unwrap(), Value::Number(100.0));
    }

    #[test]
    fn test_string_add_concatenates() {
        let mut store = store();
        let id = store
            .create_entity(&patch(&[("Label", &[("text", "gob".into())])]))
            .unwrap();
        store.update_field(id, "Label", "text", ModifyOp::Add, "lin".into()).unwrap();
        assert_eq!(store.get_field(id, "Label", "text").unwrap(), Value::from("goblin"));
    }

    #[test]
    fn test_query_requires_all_components_in_id_order() {
        let mut store = store();
        let a = store.create_entity(&patch(&[("Health", &[]), ("Attack", &[])])).unwrap();
        let _b = store.create_entity(&patch(&[("Health", &[])])).unwrap();
        let c = store.create_entity(&patch(&[("Attack", &[]), ("Health", &[])])).unwrap();

        let first = store.query_names(&["Health", "Attack"]);
        assert_eq!(first, vec![a, c]);
        assert_eq!(store.query_names(&["Attack", "Health"]), first);
        assert!(store.query_names(&["Health", "Unknown"]).is_empty());
    }

    #[test]
    fn test_clone_keeps_template_current_values() {
        let mut store = store();
        let template = store
            .create_entity(&patch(&[("Health", &[]), ("Attack", &[("damage", 4.0.into())])]))
            .unwrap();
        // Template drifts away from declared defaults before cloning.
        store.set_field(template, "Health", "current", 60.0.into()).unwrap();

        let clone = store
            .clone_entity(template, &patch(&[("Attack", &[("damage", 9.0.into())])]))
            .unwrap();
        assert_ne!(clone, template);
        assert_eq!(store.get_field(clone, "Attack", "damage").unwrap(), Value::Number(9.0));
        assert_eq!(store.get_field(clone, "Health", "current").unwrap(), Value::Number(60.0));
        assert_eq!(store.get_field(clone, "Health", "max").unwrap(), Value::Number(100.0));
        assert_eq!(store.get_field(template, "Attack", "damage").unwrap(), Value::Number(4.0));
    }

    #[test]
    fn test_clone_rejects_component_missing_on_template() {
        let mut store = store();
        let template = store.create_entity(&patch(&[("Health", &[])])).unwrap();
        let err = store
            .clone_entity(template, &patch(&[("Attack", &[("damage", 2.0.into())])]))
            .unwrap_err();
        assert!(matches!(err, SimError::InvalidComponent { .. }));
    }

    #[test]
    fn test_attach_and_detach() {
        let mut store = store();
        let id = store.create_entity(&patch(&[("Health", &[])])).unwrap();
        let attack = store.schema().component_id("Attack").unwrap();

        store.attach_component(id, attack, &[(0, 3.0.into())]).unwrap();
        assert_eq!(store.query(&[attack]), vec![id]);
        assert!(store.detach_component(id, attack).unwrap());
        assert!(!store.detach_component(id, attack).unwrap());
        assert!(store.query(&[attack]).is_empty());
    }

    #[test]
    fn test_named_entities() {
        let mut store = store();
        let health = store.schema().component_id("Health").unwrap();
        store.insert_with_id(EntityId(5), Some("hero"), &[(health, vec![])]).unwrap();
        assert_eq!(store.entity_by_name("hero"), Some(EntityId(5)));
        assert_eq!(store.name_of(EntityId(5)), Some("hero"));

        // Later allocations continue past explicit ids.
        let next = store.create_entity(&patch(&[("Health", &[])])).unwrap();
        assert_eq!(next, EntityId(6));
        assert!(store.insert_with_id(EntityId(5), None, &[]).is_err());

        store.despawn_entity(EntityId(5));
        assert_eq!(store.entity_by_name("hero"), None);
    }
}
