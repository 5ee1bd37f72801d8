//! Shared fixtures for unit tests.

use indexmap::IndexMap;

use crate::components::EntityId;
use crate::ir::IrModule;
use crate::program::Program;
use crate::store::{EntityPatch, Store};
use crate::value::Value;

/// Two-combatant module: `DoAttack` subtracts the source's damage from its
/// target's health, and tracker 0 records `Health` on every `DoAttack`.
pub const COMBAT_IR: &str = include_str!("../tests/fixtures/combat.json");

pub fn combat_module() -> IrModule {
    IrModule::from_json(COMBAT_IR).unwrap()
}

pub fn combat_program() -> Program {
    Program::load(&combat_module()).unwrap()
}

/// Empty store over the combat schema.
pub fn combat_store() -> Store {
    combat_store_for(&combat_program())
}

pub fn combat_store_for(program: &Program) -> Store {
    Store::new(program.schema().clone())
}

/// Spawn an entity with `Health`, `Attack` and `Target`.
pub fn spawn_combatant(
    store: &mut Store,
    health: f64,
    damage: f64,
    target: Option<EntityId>,
) -> EntityId {
    let mut patch = EntityPatch::new();
    patch.insert(
        "Health".to_string(),
        IndexMap::from([("current".to_string(), Value::Number(health))]),
    );
    patch.insert(
        "Attack".to_string(),
        IndexMap::from([("damage".to_string(), Value::Number(damage))]),
    );
    patch.insert(
        "Target".to_string(),
        IndexMap::from([(
            "entity".to_string(),
            target.map(Value::Entity).unwrap_or_default(),
        )]),
    );
    store.create_entity(&patch).unwrap()
}
