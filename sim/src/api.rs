//! Public API for the simulation.
//!
//! This module provides the main interface for a host (editor, test harness,
//! game client) to drive a loaded IR module.
//!
//! ## Stepping
//!
//! A step pops the earliest pending event, runs every rule triggered by it,
//! then runs the trackers registered for it. Hosts either call `step` in
//! their own loop (pacing with `pacing_delay`) or use the bounded run loops.
//!
//! ## Failures
//!
//! A runtime error inside a rule ends that rule invocation only. The failure
//! is returned in the `StepReport`, counted in `RunStats` and sent to every
//! subscriber; the step itself still succeeds.

use std::sync::mpsc::{self, Receiver, Sender};
use std::time::Duration;

use indexmap::IndexMap;
use rand::SeedableRng;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::components::{ChoiceFunctions, EntityId, SimClock};
use crate::config::SimConfig;
use crate::error::{Result, RuleFailure, SimError};
use crate::eval::{Evaluator, SimRng};
use crate::ir::{IrInitialState, IrModule};
use crate::program::{InitialEntity, Program};
use crate::rules::Executor;
use crate::store::{ComponentPatch, EntityPatch, Store};
use crate::timeline::{is_internal, EventId, Timeline, TICK_EVENT, WATCHDOG_EVENT};
use crate::tracker::{self, TrackerRecord};
use crate::value::Value;
use crate::watchdog::Watchdog;
use crate::world::Snapshot;

// ============================================================================
// HOST-FACING TYPES
// ============================================================================

/// Lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimState {
    Loaded,
    Running,
    Paused,
    Stopped,
    /// A run exhausted the timeline.
    Completed,
}

impl SimState {
    pub fn name(self) -> &'static str {
        match self {
            Self::Loaded => "loaded",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Stopped => "stopped",
            Self::Completed => "completed",
        }
    }
}

/// Notification sent to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum SimulationEvent {
    Started {
        time: f64,
    },
    EventProcessed {
        event_id: EventId,
        event_type: String,
        time: f64,
        rules_fired: usize,
    },
    TrackerOutput(TrackerRecord),
    Error(RuleFailure),
    Paused {
        time: f64,
    },
    Resumed {
        time: f64,
    },
    Stopped {
        time: f64,
    },
    Completed {
        time: f64,
        steps: u64,
    },
}

/// What one step did.
#[derive(Debug, Clone, PartialEq)]
pub struct StepReport {
    pub event_id: EventId,
    pub event_type: String,
    pub time: f64,
    pub rules_fired: usize,
    pub failures: Vec<RuleFailure>,
    pub records: Vec<TrackerRecord>,
    /// Entities the watchdog scheduled a recovery event for.
    pub recovered: Vec<EntityId>,
}

/// Counters over the lifetime of a simulation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunStats {
    pub events_processed: u64,
    pub rules_fired: u64,
    pub failures: u64,
    pub recoveries: u64,
    pub tracker_records: u64,
}

/// Why a run loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The timeline ran dry.
    Completed,
    /// The host predicate held.
    PredicateMet,
    /// The step cap was reached.
    StepLimit,
    /// The next event lies beyond `max_time`.
    TimeLimit,
    /// The simulation is paused.
    Paused,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RunSummary {
    pub outcome: RunOutcome,
    /// Steps taken by this run.
    pub steps: u64,
    /// Simulation time when the run returned.
    pub time: f64,
}

// ============================================================================
// SIMULATION
// ============================================================================

/// The main simulation container.
///
/// Owns every subsystem of one run:
/// - the validated program (rules, functions, trackers)
/// - the entity/component store and its ECS world
/// - the event timeline and the watchdog
/// - the seeded random generator
///
/// Dropping it tears the run down.
pub struct Simulation {
    program: Program,
    store: Store,
    timeline: Timeline,
    watchdog: Watchdog,
    rng: SimRng,
    state: SimState,
    tick: Option<EventId>,
    steps: u64,
    stats: RunStats,
    tracker_log: Vec<TrackerRecord>,
    subscribers: Vec<Sender<SimulationEvent>>,
}

impl Simulation {
    /// Load a module with the default configuration.
    pub fn load(module: &IrModule) -> Result<Self> {
        Self::load_with_config(module, SimConfig::default())
    }

    /// Load a module. Fails with `MalformedIr` on any unresolved reference;
    /// the module's initial state (if any) is instantiated immediately.
    pub fn load_with_config(module: &IrModule, config: SimConfig) -> Result<Self> {
        let program = Program::load(module)?;
        let mut store = Store::new(program.schema().clone());
        let watchdog = Watchdog::new(config.watchdog_interval, config.watchdog.clone());
        let rng = SimRng::seed_from_u64(config.seed);
        store.world_mut().insert_resource(config);

        let mut sim = Self {
            program,
            store,
            timeline: Timeline::new(),
            watchdog,
            rng,
            state: SimState::Loaded,
            tick: None,
            steps: 0,
            stats: RunStats::default(),
            tracker_log: Vec::new(),
            subscribers: Vec::new(),
        };
        let initial = sim.program.initial_state().to_vec();
        sim.populate(&initial)?;
        Ok(sim)
    }

    /// Parse and load a module from JSON text.
    pub fn from_json(json: &str) -> Result<Self> {
        Self::load(&IrModule::from_json(json)?)
    }

    /// Replace the initial entities. Only allowed before `start`.
    pub fn set_initial_state(&mut self, state: &IrInitialState) -> Result<()> {
        self.require(&[SimState::Loaded], "set_initial_state")?;
        let entities = self.program.compile_initial_state(state)?;
        self.store.clear();
        self.populate(&entities)
    }

    fn populate(&mut self, entities: &[InitialEntity]) -> Result<()> {
        // Ids are allocated monotonically, so insert in id order.
        let mut ordered: Vec<&InitialEntity> = entities.iter().collect();
        ordered.sort_by_key(|entity| entity.id);
        for entity in ordered {
            self.store
                .insert_with_id(entity.id, entity.name.as_deref(), &entity.components)?;
            if !entity.choices.is_empty() {
                self.store
                    .set_choice_functions(entity.id, ChoiceFunctions(entity.choices.clone()))?;
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Get the lifecycle state.
    pub fn state(&self) -> SimState {
        self.state
    }

    /// Arm the watchdog and the tick event, and enter `Running`.
    pub fn start(&mut self) -> Result<()> {
        self.require(&[SimState::Loaded], "start")?;
        self.watchdog.arm(&mut self.timeline)?;
        if self.program.has_tick_rules() {
            let interval = self.config().tick_interval;
            self.tick = Some(
                self.timeline
                    .schedule_recurring(TICK_EVENT, interval, IndexMap::new())?,
            );
        }
        self.state = SimState::Running;
        info!(
            module = %self.program.module_name(),
            entities = self.store.len(),
            pending = self.timeline.len(),
            "simulation started"
        );
        self.notify(SimulationEvent::Started {
            time: self.current_time(),
        });
        Ok(())
    }

    pub fn pause(&mut self) -> Result<()> {
        self.require(&[SimState::Running], "pause")?;
        self.state = SimState::Paused;
        self.notify(SimulationEvent::Paused {
            time: self.current_time(),
        });
        Ok(())
    }

    pub fn resume(&mut self) -> Result<()> {
        self.require(&[SimState::Paused], "resume")?;
        self.state = SimState::Running;
        self.notify(SimulationEvent::Resumed {
            time: self.current_time(),
        });
        Ok(())
    }

    /// Stop for good. Further steps are refused. Stopping twice is a no-op.
    pub fn stop(&mut self) {
        if self.state == SimState::Stopped {
            return;
        }
        self.watchdog.disarm(&mut self.timeline);
        if let Some(tick) = self.tick.take() {
            self.timeline.cancel(tick);
        }
        self.state = SimState::Stopped;
        info!(time = self.current_time(), steps = self.steps, "simulation stopped");
        self.notify(SimulationEvent::Stopped {
            time: self.current_time(),
        });
    }

    fn require(&self, allowed: &[SimState], operation: &'static str) -> Result<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(SimError::InvalidState {
                operation,
                state: self.state.name(),
            })
        }
    }

    // ------------------------------------------------------------------------
    // Stepping
    // ------------------------------------------------------------------------

    /// Process the earliest pending event.
    ///
    /// Returns `Ok(None)` when the timeline is empty; a running simulation
    /// then becomes `Completed`. Refused once stopped.
    pub fn step(&mut self) -> Result<Option<StepReport>> {
        if self.state == SimState::Stopped {
            return Err(SimError::InvalidState {
                operation: "step",
                state: self.state.name(),
            });
        }

        let Some(event) = self.timeline.pop_earliest() else {
            if self.state == SimState::Running {
                self.state = SimState::Completed;
                info!(time = self.current_time(), steps = self.steps, "simulation completed");
                self.notify(SimulationEvent::Completed {
                    time: self.current_time(),
                    steps: self.steps,
                });
            }
            return Ok(None);
        };

        self.steps += 1;
        self.store.set_clock(SimClock {
            time: event.time,
            step: self.steps,
        });

        let mut report = StepReport {
            event_id: event.id,
            event_type: event.event_type.clone(),
            time: event.time,
            rules_fired: 0,
            failures: Vec::new(),
            records: Vec::new(),
            recovered: Vec::new(),
        };

        if event.event_type == WATCHDOG_EVENT {
            report.recovered = self.watchdog.fire(&self.store, &mut self.timeline)?;
            self.stats.recoveries += report.recovered.len() as u64;
        } else {
            let dispatch =
                Executor::new(&self.program, &mut self.store, &mut self.timeline, &mut self.rng)
                    .dispatch(&event);
            report.rules_fired = dispatch.rules_fired;
            report.failures = dispatch.failures;
            if !is_internal(&event.event_type) {
                report.records =
                    tracker::capture_all(&self.program, &self.store, &event.event_type, event.time);
            }
        }

        self.stats.events_processed += 1;
        self.stats.rules_fired += report.rules_fired as u64;
        self.stats.failures += report.failures.len() as u64;
        self.stats.tracker_records += report.records.len() as u64;
        debug!(
            step = self.steps,
            time = event.time,
            event = %event.event_type,
            rules = report.rules_fired,
            failures = report.failures.len(),
            "processed event"
        );

        for failure in &report.failures {
            self.notify(SimulationEvent::Error(failure.clone()));
        }
        for record in &report.records {
            self.notify(SimulationEvent::TrackerOutput(record.clone()));
        }
        if !is_internal(&event.event_type) {
            self.notify(SimulationEvent::EventProcessed {
                event_id: event.id,
                event_type: event.event_type.clone(),
                time: event.time,
                rules_fired: report.rules_fired,
            });
        }
        self.tracker_log.extend(report.records.iter().cloned());

        // Rules may have scheduled work while the watchdog was dormant.
        if self.state != SimState::Loaded && self.timeline.has_pending_external() {
            self.watchdog.arm(&mut self.timeline)?;
        }

        Ok(Some(report))
    }

    /// Run until the timeline is empty, bounded by `max_steps` / `max_time`.
    pub fn run_until_complete(&mut self) -> Result<RunSummary> {
        self.run_until(|_| false)
    }

    /// Run until `predicate` holds (checked before each step), the timeline
    /// is empty, or a configured cap is hit. Starts a freshly loaded
    /// simulation.
    pub fn run_until<F>(&mut self, predicate: F) -> Result<RunSummary>
    where
        F: FnMut(&Simulation) -> bool,
    {
        let max_steps = self.config().max_steps;
        self.run_bounded(predicate, max_steps)
    }

    /// Take at most `steps` steps.
    pub fn run_steps(&mut self, steps: u64) -> Result<RunSummary> {
        self.run_bounded(|_| false, steps)
    }

    fn run_bounded<F>(&mut self, mut predicate: F, max_steps: u64) -> Result<RunSummary>
    where
        F: FnMut(&Simulation) -> bool,
    {
        if self.state == SimState::Loaded {
            self.start()?;
        }
        self.require(
            &[SimState::Running, SimState::Paused, SimState::Completed],
            "run",
        )?;

        let start = self.steps;
        let max_time = self.config().max_time;
        let outcome = loop {
            if self.state == SimState::Paused {
                break RunOutcome::Paused;
            }
            if predicate(&*self) {
                break RunOutcome::PredicateMet;
            }
            if self.steps - start >= max_steps {
                warn!(steps = max_steps, time = self.current_time(), "run hit step limit");
                break RunOutcome::StepLimit;
            }
            if let (Some(limit), Some(next)) = (max_time, self.timeline.next_time()) {
                if next > limit {
                    break RunOutcome::TimeLimit;
                }
            }
            if self.step()?.is_none() {
                break RunOutcome::Completed;
            }
        };

        Ok(RunSummary {
            outcome,
            steps: self.steps - start,
            time: self.current_time(),
        })
    }

    // ------------------------------------------------------------------------
    // Host access to entities
    // ------------------------------------------------------------------------

    /// Ids of entities having all named components, ascending.
    pub fn query(&self, components: &[&str]) -> Vec<EntityId> {
        self.store.query_names(components)
    }

    pub fn get_component(&self, id: EntityId, component: &str) -> Option<ComponentPatch> {
        self.store.get_component(id, component)
    }

    pub fn get_field(&self, id: EntityId, component: &str, field: &str) -> Result<Value> {
        self.store.get_field(id, component, field)
    }

    pub fn set_field(&mut self, id: EntityId, component: &str, field: &str, value: Value) -> Result<()> {
        self.store.set_field(id, component, field, value)
    }

    pub fn spawn_entity(&mut self, components: &EntityPatch) -> Result<EntityId> {
        self.store.create_entity(components)
    }

    pub fn clone_entity(&mut self, template: EntityId, overrides: &EntityPatch) -> Result<EntityId> {
        self.store.clone_entity(template, overrides)
    }

    pub fn despawn_entity(&mut self, id: EntityId) -> bool {
        self.store.despawn_entity(id)
    }

    pub fn entity_by_name(&self, name: &str) -> Option<EntityId> {
        self.store.entity_by_name(name)
    }

    /// Get the entity/component store (for advanced usage).
    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    // ------------------------------------------------------------------------
    // Host access to the timeline
    // ------------------------------------------------------------------------

    /// Schedule an event at `current_time + delay`. Wakes a dormant watchdog.
    pub fn schedule_event(
        &mut self,
        event_type: &str,
        delay: f64,
        fields: IndexMap<String, Value>,
    ) -> Result<EventId> {
        self.check_host_event(event_type)?;
        let id = self.timeline.schedule(event_type, delay, fields)?;
        self.wake()?;
        Ok(id)
    }

    /// Schedule an event every `interval` until cancelled.
    pub fn schedule_recurring(
        &mut self,
        event_type: &str,
        interval: f64,
        fields: IndexMap<String, Value>,
    ) -> Result<EventId> {
        self.check_host_event(event_type)?;
        let id = self.timeline.schedule_recurring(event_type, interval, fields)?;
        self.wake()?;
        Ok(id)
    }

    /// Cancel a pending event. Unknown or already-fired ids are a no-op.
    pub fn cancel_event(&mut self, id: EventId) -> bool {
        self.timeline.cancel(id)
    }

    pub fn has_pending_events(&self) -> bool {
        self.timeline.has_pending()
    }

    fn check_host_event(&self, event_type: &str) -> Result<()> {
        self.require(
            &[
                SimState::Loaded,
                SimState::Running,
                SimState::Paused,
                SimState::Completed,
            ],
            "schedule",
        )?;
        if is_internal(event_type) {
            return Err(SimError::InvalidArgument {
                function: "schedule_event".to_string(),
                message: format!("event type {event_type} is reserved"),
            });
        }
        Ok(())
    }

    fn wake(&mut self) -> Result<()> {
        if self.state == SimState::Completed {
            self.state = SimState::Running;
        }
        if self.state != SimState::Loaded {
            self.watchdog.arm(&mut self.timeline)?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------------
    // Functions
    // ------------------------------------------------------------------------

    /// Call a module function by name.
    pub fn call_function(&mut self, name: &str, args: Vec<Value>) -> Result<Value> {
        let function = self
            .program
            .function_by_name(name)
            .ok_or_else(|| SimError::UnknownFunction(name.to_string()))?
            .clone();
        let now = self.current_time();
        Evaluator::new(&self.program, &self.store, &mut self.rng, now).call(&function, args)
    }

    /// Call a choice function bound to an entity.
    pub fn call_choice(&mut self, entity: EntityId, name: &str, args: Vec<Value>) -> Result<Value> {
        let function = self.store.choice_function(entity, name).ok_or_else(|| {
            SimError::MissingChoiceFunction {
                entity,
                name: name.to_string(),
            }
        })?;
        let now = self.current_time();
        Evaluator::new(&self.program, &self.store, &mut self.rng, now).call(&function, args)
    }

    // ------------------------------------------------------------------------
    // Observation
    // ------------------------------------------------------------------------

    /// Subscribe to simulation notifications. Dropped receivers are pruned.
    pub fn subscribe(&mut self) -> Receiver<SimulationEvent> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.push(tx);
        rx
    }

    fn notify(&mut self, event: SimulationEvent) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Get the current simulation time.
    pub fn current_time(&self) -> f64 {
        self.timeline.now()
    }

    /// Get the number of steps taken.
    pub fn step_count(&self) -> u64 {
        self.steps
    }

    /// Tracker records produced so far, in emission order.
    pub fn tracker_output(&self) -> &[TrackerRecord] {
        &self.tracker_log
    }

    /// Drain the retained tracker records.
    pub fn take_tracker_output(&mut self) -> Vec<TrackerRecord> {
        std::mem::take(&mut self.tracker_log)
    }

    pub fn stats(&self) -> &RunStats {
        &self.stats
    }

    /// Get a snapshot of the current simulation state.
    pub fn snapshot(&self) -> Snapshot {
        Snapshot::from_store(&self.store, self.timeline.len())
    }

    /// Get the snapshot as a JSON string.
    pub fn snapshot_json(&self) -> Result<String> {
        Ok(self.snapshot().to_json()?)
    }

    // ------------------------------------------------------------------------
    // Configuration and pacing
    // ------------------------------------------------------------------------

    pub fn config(&self) -> &SimConfig {
        self.store.world().resource::<SimConfig>()
    }

    /// Wall-clock seconds per unit of simulation time. Never affects ordering.
    pub fn set_time_scale(&mut self, scale: f64) -> Result<()> {
        if !scale.is_finite() || scale <= 0.0 {
            return Err(SimError::InvalidArgument {
                function: "set_time_scale".to_string(),
                message: format!("scale must be a finite number > 0, got {scale}"),
            });
        }
        self.store.world_mut().resource_mut::<SimConfig>().time_scale = scale;
        Ok(())
    }

    /// Wall-clock delay a paced host should wait before the next step.
    pub fn pacing_delay(&self) -> Duration {
        let Some(next) = self.timeline.next_time() else {
            return Duration::ZERO;
        };
        let seconds = (next - self.current_time()) * self.config().time_scale;
        if seconds.is_finite() && seconds > 0.0 {
            Duration::from_secs_f64(seconds)
        } else {
            Duration::ZERO
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{combat_module, COMBAT_IR};
    use serde_json::json;

    fn fields(entries: &[(&str, Value)]) -> IndexMap<String, Value> {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn combat() -> (Simulation, EntityId, EntityId) {
        let sim = Simulation::from_json(COMBAT_IR).unwrap();
        let hero = sim.entity_by_name("hero").unwrap();
        let goblin = sim.entity_by_name("goblin").unwrap();
        (sim, hero, goblin)
    }

    fn health(sim: &Simulation, id: EntityId) -> f64 {
        sim.get_field(id, "Health", "current")
            .unwrap()
            .as_number()
            .unwrap()
    }

    #[test]
    fn test_single_attack_step() {
        let (mut sim, hero, goblin) = combat();
        sim.start().unwrap();
        sim.schedule_event("DoAttack", 0.0, fields(&[("source", hero.into())]))
            .unwrap();

        let report = sim.step().unwrap().unwrap();
        assert_eq!(report.event_type, "DoAttack");
        assert_eq!(report.rules_fired, 1);
        assert_eq!(health(&sim, goblin), 35.0);
        assert_eq!(health(&sim, hero), 100.0);

        assert_eq!(report.records.len(), 1);
        let record = &report.records[0];
        assert_eq!(record.time, 0.0);
        assert_eq!(record.component, "Health");
        let ids: Vec<_> = record.entities.iter().map(|e| e.entity_id).collect();
        assert_eq!(ids, vec![hero, goblin]);
        assert_eq!(sim.tracker_output(), &report.records[..]);
    }

    #[test]
    fn test_watchdog_drives_fight_to_completion() {
        let (mut sim, hero, goblin) = combat();
        sim.start().unwrap();
        sim.schedule_event("DoAttack", 0.0, fields(&[("source", hero.into())]))
            .unwrap();

        let summary = sim.run_until_complete().unwrap();
        assert_eq!(summary.outcome, RunOutcome::Completed);
        assert_eq!(sim.state(), SimState::Completed);

        // Hits at t=0 (hero only), then both at t=5, 10, 15.
        assert_eq!(health(&sim, goblin), -10.0);
        assert_eq!(health(&sim, hero), 76.0);
        assert_eq!(sim.stats().recoveries, 6);
        assert_eq!(sim.tracker_output().len(), 7);
        // The watchdog at t=20 finds nothing and goes dormant.
        assert_eq!(sim.current_time(), 20.0);
        assert!(!sim.has_pending_events());
    }

    #[test]
    fn test_lifecycle_transitions() {
        let (mut sim, _, _) = combat();
        assert_eq!(sim.state(), SimState::Loaded);
        assert!(sim.pause().is_err());
        assert!(sim.resume().is_err());

        sim.start().unwrap();
        assert!(sim.start().is_err());
        sim.pause().unwrap();
        assert_eq!(sim.state(), SimState::Paused);

        // Run loops do nothing while paused; single steps still work.
        let summary = sim.run_until_complete().unwrap();
        assert_eq!(summary.outcome, RunOutcome::Paused);
        assert_eq!(summary.steps, 0);
        assert!(sim.step().unwrap().is_some());

        sim.resume().unwrap();
        sim.stop();
        sim.stop();
        assert_eq!(sim.state(), SimState::Stopped);
        assert!(matches!(
            sim.step(),
            Err(SimError::InvalidState { operation: "step", .. })
        ));
        assert!(sim
            .schedule_event("DoAttack", 0.0, IndexMap::new())
            .is_err());
    }

    #[test]
    fn test_set_initial_state_only_before_start() {
        let (mut sim, _, _) = combat();
        let state: IrInitialState = serde_json::from_value(json!({"entities": [
            {"id": 3, "name": "troll", "components": {"Health": {"current": 300}}}
        ]}))
        .unwrap();
        sim.set_initial_state(&state).unwrap();
        assert_eq!(sim.query(&["Health"]), vec![EntityId(3)]);
        assert_eq!(sim.entity_by_name("hero"), None);
        assert_eq!(sim.entity_by_name("troll"), Some(EntityId(3)));

        sim.start().unwrap();
        assert!(matches!(
            sim.set_initial_state(&state),
            Err(SimError::InvalidState { .. })
        ));
    }

    #[test]
    fn test_initial_ids_in_any_order() {
        let (mut sim, _, _) = combat();
        let state: IrInitialState = serde_json::from_value(json!({"entities": [
            {"id": 5, "components": {"Health": {}}},
            {"id": 2, "components": {"Health": {}}}
        ]}))
        .unwrap();
        sim.set_initial_state(&state).unwrap();
        assert_eq!(sim.query(&["Health"]), vec![EntityId(2), EntityId(5)]);
        let spawned = sim.spawn_entity(&EntityPatch::new()).unwrap();
        assert_eq!(spawned, EntityId(6));
    }

    #[test]
    fn test_subscribers_see_ordered_notifications() {
        let (mut sim, hero, _) = combat();
        let rx = sim.subscribe();
        let dropped = sim.subscribe();
        drop(dropped);

        sim.start().unwrap();
        sim.schedule_event("DoAttack", 0.0, fields(&[("source", hero.into())]))
            .unwrap();
        sim.step().unwrap();

        let events: Vec<_> = rx.try_iter().collect();
        assert!(matches!(events[0], SimulationEvent::Started { time } if time == 0.0));
        assert!(matches!(events[1], SimulationEvent::TrackerOutput(_)));
        assert!(matches!(
            &events[2],
            SimulationEvent::EventProcessed { event_type, rules_fired: 1, .. } if event_type == "DoAttack"
        ));
        assert_eq!(sim.subscribers.len(), 1);
    }

    #[test]
    fn test_rule_failure_is_reported_not_fatal() {
        let mut module = combat_module();
        // Goblin loses its target: the attack rule reads a null entity.
        if let Some(state) = module.initial_state.as_mut() {
            state.entities[1]
                .components
                .get_mut("Target")
                .unwrap()
                .insert("entity".into(), crate::ir::IrValue::Null);
        }
        let mut sim = Simulation::load(&module).unwrap();
        let goblin = sim.entity_by_name("goblin").unwrap();
        let rx = sim.subscribe();
        sim.schedule_event("DoAttack", 0.0, fields(&[("source", goblin.into())]))
            .unwrap();

        let report = sim.step().unwrap().unwrap();
        assert_eq!(report.failures.len(), 1);
        assert!(matches!(
            report.failures[0].error,
            SimError::NullEntityReference { .. }
        ));
        assert_eq!(sim.stats().failures, 1);
        assert!(rx
            .try_iter()
            .any(|e| matches!(e, SimulationEvent::Error(ref f) if f.rule_id == 0)));
    }

    #[test]
    fn test_run_until_predicate_and_step_limit() {
        let (mut sim, hero, goblin) = combat();
        sim.schedule_recurring("DoAttack", 1.0, fields(&[("source", hero.into())]))
            .unwrap();

        let summary = sim
            .run_until(|s| s.get_field(goblin, "Health", "current").unwrap() == Value::Number(5.0))
            .unwrap();
        assert_eq!(summary.outcome, RunOutcome::PredicateMet);
        assert_eq!(sim.current_time(), 3.0);

        // The attack recurs forever; only the cap stops it.
        let summary = sim.run_steps(10).unwrap();
        assert_eq!(summary.outcome, RunOutcome::StepLimit);
        assert_eq!(summary.steps, 10);
    }

    #[test]
    fn test_max_time_bounds_runs() {
        let mut config = SimConfig::default().with_watchdog_interval(0.0);
        config.max_time = Some(4.5);
        let mut sim = Simulation::load_with_config(&combat_module(), config).unwrap();
        let hero = sim.entity_by_name("hero").unwrap();
        sim.schedule_recurring("DoAttack", 1.0, fields(&[("source", hero.into())]))
            .unwrap();

        let summary = sim.run_until_complete().unwrap();
        assert_eq!(summary.outcome, RunOutcome::TimeLimit);
        assert_eq!(summary.steps, 4);
        assert_eq!(sim.current_time(), 4.0);
    }

    #[test]
    fn test_cancel_recurring_from_host() {
        let (mut sim, hero, goblin) = combat();
        let id = sim
            .schedule_recurring("DoAttack", 1.0, fields(&[("source", hero.into())]))
            .unwrap();
        sim.step().unwrap();
        sim.step().unwrap();
        assert!(sim.cancel_event(id));
        assert!(!sim.cancel_event(id));
        assert!(sim.step().unwrap().is_none());
        assert_eq!(health(&sim, goblin), 20.0);
    }

    #[test]
    fn test_reserved_events_rejected_from_host() {
        let (mut sim, _, _) = combat();
        assert!(matches!(
            sim.schedule_event(WATCHDOG_EVENT, 0.0, IndexMap::new()),
            Err(SimError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn test_completed_simulation_wakes_on_new_event() {
        let (mut sim, hero, goblin) = combat();
        sim.set_field(goblin, "Health", "current", Value::Number(0.0)).unwrap();
        sim.run_until_complete().unwrap();
        assert_eq!(sim.state(), SimState::Completed);

        sim.schedule_event("DoAttack", 1.0, fields(&[("source", hero.into())]))
            .unwrap();
        assert_eq!(sim.state(), SimState::Running);
        sim.step().unwrap();
        assert_eq!(health(&sim, goblin), -15.0);
    }

    #[test]
    fn test_pacing_delay_scales_gap() {
        let (mut sim, hero, _) = combat();
        sim.schedule_event("DoAttack", 2.0, fields(&[("source", hero.into())]))
            .unwrap();
        assert_eq!(sim.pacing_delay(), Duration::from_secs(2));
        sim.set_time_scale(0.25).unwrap();
        assert_eq!(sim.pacing_delay(), Duration::from_millis(500));
        assert!(sim.set_time_scale(0.0).is_err());
    }

    #[test]
    fn test_host_entity_access() {
        let (mut sim, hero, goblin) = combat();
        let minion = sim
            .clone_entity(
                goblin,
                &IndexMap::from([(
                    "Attack".to_string(),
                    IndexMap::from([("damage".to_string(), Value::Number(2.0))]),
                )]),
            )
            .unwrap();
        assert_eq!(minion, EntityId(2));
        assert_eq!(sim.get_field(minion, "Target", "entity").unwrap(), Value::Entity(hero));
        assert_eq!(sim.query(&["Attack", "Target"]), vec![hero, goblin, minion]);

        assert!(sim.despawn_entity(goblin));
        assert!(sim.get_component(goblin, "Health").is_none());
        assert_eq!(sim.snapshot().entities.len(), 2);
    }

    #[test]
    fn test_tick_rules_fire_per_matching_entity() {
        let module = IrModule::from_value(json!({
            "components": [
                {"name": "Mana", "fields": [{"name": "value", "type": {"type": "number"}}]}
            ],
            "rules": [{
                "id": 0, "name": "regen",
                "trigger": {"type": "tick"},
                "filter": {"components": ["Mana"]},
                "actions": [{"type": "modify", "entity": {"type": "var", "name": "entity"},
                    "component": "Mana", "field": "value", "op": "add",
                    "value": {"type": "literal", "value": 2}}]
            }],
            "initial_state": {"entities": [
                {"id": 0, "components": {"Mana": {"value": 0}}},
                {"id": 1, "components": {"Mana": {"value": 10}}}
            ]}
        }))
        .unwrap();
        let mut sim = Simulation::load(&module).unwrap();
        let summary = sim.run_steps(3).unwrap();
        assert_eq!(summary.steps, 3);
        assert_eq!(sim.current_time(), 3.0);
        assert_eq!(sim.get_field(EntityId(0), "Mana", "value").unwrap(), Value::Number(6.0));
        assert_eq!(sim.get_field(EntityId(1), "Mana", "value").unwrap(), Value::Number(16.0));
        // Tick events never reach trackers.
        assert!(sim.tracker_output().is_empty());
    }

    #[test]
    fn test_internal_events_not_streamed() {
        let (mut sim, _, goblin) = combat();
        sim.set_field(goblin, "Health", "current", Value::Number(0.0)).unwrap();
        let rx = sim.subscribe();
        sim.start().unwrap();

        let report = sim.step().unwrap().unwrap();
        assert_eq!(report.event_type, WATCHDOG_EVENT);
        assert!(rx.try_iter().all(|e| !matches!(
            e,
            SimulationEvent::EventProcessed { ref event_type, .. } if is_internal(event_type)
        )));
        assert_eq!(sim.stats().events_processed, 1);
    }

    #[test]
    fn test_rule_scheduled_event_rearms_watchdog() {
        let mut module = combat_module();
        module.rules.push(
            serde_json::from_value(json!({
                "id": 1, "name": "ping",
                "trigger": {"type": "tick"},
                "condition": {"type": "binary", "op": "eq",
                    "left": {"type": "call", "function": "now", "args": []},
                    "right": {"type": "literal", "value": 7}},
                "actions": [{"type": "emit", "event": "Ping"}]
            }))
            .unwrap(),
        );
        let mut sim = Simulation::load(&module).unwrap();
        let goblin = sim.entity_by_name("goblin").unwrap();
        sim.set_field(goblin, "Health", "current", Value::Number(0.0)).unwrap();

        // The watchdog at t=5 has nothing to recover and goes dormant.
        sim.run_until(|s| s.current_time() >= 6.0).unwrap();
        assert!(!sim.watchdog.is_armed(&sim.timeline));

        let report = sim.step().unwrap().unwrap();
        assert_eq!(report.time, 7.0);
        assert_eq!(report.rules_fired, 1);
        assert!(sim.watchdog.is_armed(&sim.timeline));
    }

    #[test]
    fn test_filtered_attack_hits_once_for_its_source() {
        let mut module = combat_module();
        module.rules[0].filter = serde_json::from_value(json!({"components": ["Attack"]})).unwrap();
        let mut sim = Simulation::load(&module).unwrap();
        let hero = sim.entity_by_name("hero").unwrap();
        let goblin = sim.entity_by_name("goblin").unwrap();
        sim.start().unwrap();
        sim.schedule_event("DoAttack", 0.0, fields(&[("source", hero.into())]))
            .unwrap();

        let report = sim.step().unwrap().unwrap();
        assert_eq!(report.rules_fired, 1);
        assert_eq!(health(&sim, goblin), 35.0);
        assert_eq!(health(&sim, hero), 100.0);
    }

    #[test]
    fn test_call_functions_from_host() {
        let module = IrModule::from_value(json!({
            "components": [],
            "functions": [{
                "name": "scaled",
                "params": [{"name": "x", "type": {"type": "number"}}],
                "return_type": {"type": "number"},
                "body": {"type": "binary", "op": "multiply",
                    "left": {"type": "param", "name": "x"},
                    "right": {"type": "literal", "value": 3}}
            }],
            "initial_state": {"entities": [{
                "id": 0, "name": "ai", "components": {},
                "bound_functions": {"pick": {
                    "params": [],
                    "return_type": {"type": "entity"},
                    "body": {"type": "var", "name": "@ai"}
                }}
            }]}
        }))
        .unwrap();
        let mut sim = Simulation::load(&module).unwrap();
        assert_eq!(
            sim.call_function("scaled", vec![Value::Number(4.0)]).unwrap(),
            Value::Number(12.0)
        );
        assert_eq!(
            sim.call_function("missing", vec![]),
            Err(SimError::UnknownFunction("missing".into()))
        );
        assert_eq!(
            sim.call_choice(EntityId(0), "pick", vec![]).unwrap(),
            Value::Entity(EntityId(0))
        );
        assert!(matches!(
            sim.call_choice(EntityId(0), "flee", vec![]),
            Err(SimError::MissingChoiceFunction { .. })
        ));
    }

    #[test]
    fn test_stress_many_combatants() {
        use std::time::Instant;

        let mut sim = Simulation::from_json(COMBAT_IR).unwrap();
        let hero = sim.entity_by_name("hero").unwrap();
        let mut ids = Vec::new();
        for _ in 0..500 {
            ids.push(sim.clone_entity(hero, &EntityPatch::new()).unwrap());
        }
        // Pair clones off against each other.
        for pair in ids.chunks(2) {
            sim.set_field(pair[0], "Target", "entity", pair[1].into()).unwrap();
            sim.set_field(pair[1], "Target", "entity", pair[0].into()).unwrap();
        }
        sim.start().unwrap();

        let start = Instant::now();
        let summary = sim.run_until_complete().unwrap();
        let elapsed = start.elapsed();
        println!(
            "500 combatants, {} steps in {:?} ({:.3} ms/step)",
            summary.steps,
            elapsed,
            elapsed.as_secs_f64() * 1000.0 / summary.steps as f64
        );

        assert_eq!(summary.outcome, RunOutcome::Completed);
        assert!(elapsed.as_secs() < 30, "Simulation too slow: {:?}", elapsed);
    }
}
