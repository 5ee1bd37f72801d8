//! Blink - Simulation Core
//!
//! A deterministic discrete-event engine that executes compiled rule IR.
//! Entity state lives in a `bevy_ecs` world; events are processed one at a
//! time in `(time, insertion)` order, and every run with the same module,
//! configuration and seed produces identical state and tracker output.

pub mod api;
pub mod components;
pub mod config;
pub mod error;
pub mod eval;
pub mod ir;
pub mod program;
pub mod rules;
pub mod schema;
pub mod store;
pub mod timeline;
pub mod tracker;
pub mod value;
pub mod watchdog;
pub mod world;

#[cfg(test)]
mod testing;

pub use api::{RunOutcome, RunStats, RunSummary, SimState, Simulation, SimulationEvent, StepReport};
pub use components::{ComponentId, EntityId, SimClock};
pub use config::{SimConfig, WatchdogConfig};
pub use error::{Result, RuleFailure, SimError};
pub use ir::IrModule;
pub use program::Program;
pub use store::{ComponentPatch, EntityPatch, ModifyOp};
pub use timeline::EventId;
pub use tracker::{EntitySnapshot, TrackerRecord};
pub use value::{FieldType, Value};
pub use world::Snapshot;
