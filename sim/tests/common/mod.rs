//! Fixtures shared by the integration tests.

#![allow(dead_code)]

use blink_sim::{EntityId, IrModule, SimConfig, Simulation, Value};
use indexmap::IndexMap;

pub const COMBAT_IR: &str = include_str!("../fixtures/combat.json");
pub const SKIRMISH_IR: &str = include_str!("../../demos/skirmish.json");

pub fn combat() -> Simulation {
    Simulation::from_json(COMBAT_IR).unwrap()
}

/// The three-way skirmish, started, with every combatant's opening attack
/// scheduled at t=0.
pub fn skirmish(seed: u64) -> Simulation {
    let module = IrModule::from_json(SKIRMISH_IR).unwrap();
    let mut sim = Simulation::load_with_config(&module, SimConfig::default().with_seed(seed)).unwrap();
    sim.start().unwrap();
    for name in ["knight", "orc", "archer"] {
        let id = sim.entity_by_name(name).unwrap();
        sim.schedule_event("DoAttack", 0.0, source(id)).unwrap();
    }
    sim
}

pub fn source(id: EntityId) -> IndexMap<String, Value> {
    IndexMap::from([("source".to_string(), Value::Entity(id))])
}

pub fn health(sim: &Simulation, name: &str) -> f64 {
    let id = sim.entity_by_name(name).unwrap();
    sim.get_field(id, "Health", "current")
        .unwrap()
        .as_number()
        .unwrap()
}
