//! Rule matching and action execution.
//!
//! For one popped event, every rule triggered by its type runs in ascending
//! id order. A rule invocation binds the event's fields and trigger bindings,
//! checks filter and condition, then runs its actions in order. The first
//! failing action ends that invocation only; the failure is recorded and the
//! next invocation proceeds.

use tracing::{trace, warn};

use crate::components::EntityId;
use crate::error::{Result, RuleFailure, SimError};
use crate::eval::{entity_ref, Evaluator, Scope, SimRng};
use crate::program::{Action, ComponentInit, Expr, Program, Rule, Trigger};
use crate::store::Store;
use crate::timeline::{EventId, ScheduledEvent, Timeline};
use crate::value::Value;

/// Variable bound to the id of the event being processed.
pub const EVENT_ID_VAR: &str = "event_id";

/// Variable bound to the entity a rule invocation runs for.
pub const ENTITY_VAR: &str = "entity";

pub const SOURCE_VAR: &str = "source";
pub const TARGET_VAR: &str = "target";

/// Result of dispatching one event.
#[derive(Debug, Default)]
pub struct Dispatch {
    /// Rule invocations whose condition held and whose actions all ran.
    pub rules_fired: usize,
    pub failures: Vec<RuleFailure>,
}

/// Runs rules against the store and timeline for one event.
pub struct Executor<'a> {
    program: &'a Program,
    store: &'a mut Store,
    timeline: &'a mut Timeline,
    rng: &'a mut SimRng,
}

impl<'a> Executor<'a> {
    pub fn new(
        program: &'a Program,
        store: &'a mut Store,
        timeline: &'a mut Timeline,
        rng: &'a mut SimRng,
    ) -> Self {
        Self {
            program,
            store,
            timeline,
            rng,
        }
    }

    pub fn dispatch(&mut self, event: &ScheduledEvent) -> Dispatch {
        let program = self.program;
        let mut dispatch = Dispatch::default();

        for rule in program.rules_for(&event.event_type) {
            let scope = bind_event(rule, event);
            for entity in self.targets(rule, &scope) {
                let mut scope = scope.clone();
                if let (Trigger::Tick, Some(id)) = (&rule.trigger, entity) {
                    if scope.get(ENTITY_VAR).is_none() {
                        scope.bind(ENTITY_VAR, Value::Entity(id));
                    }
                }
                match self.invoke(rule, entity, &mut scope) {
                    Ok(true) => {
                        trace!(rule = rule.id, event = %event.event_type, ?entity, "rule fired");
                        dispatch.rules_fired += 1;
                    }
                    Ok(false) => {}
                    Err(error) => {
                        let failure = RuleFailure {
                            rule_id: rule.id,
                            rule_name: rule.name.clone(),
                            event_id: event.id,
                            event_type: event.event_type.clone(),
                            time: event.time,
                            entity,
                            error,
                        };
                        warn!(%failure, "rule failed");
                        dispatch.failures.push(failure);
                    }
                }
            }
        }
        dispatch
    }

    /// Entities to run a rule for. `None` means one invocation without an
    /// entity of its own.
    ///
    /// Tick rules run once per entity passing the filter. Event rules run at
    /// most once, for their subject, and a filtered event rule whose subject
    /// is missing or lacks a filtered component is skipped.
    fn targets(&self, rule: &Rule, scope: &Scope) -> Vec<Option<EntityId>> {
        if rule.trigger == Trigger::Tick && scope.get(ENTITY_VAR).is_none() {
            return if rule.filter.is_empty() {
                vec![None]
            } else {
                self.store.query(&rule.filter).into_iter().map(Some).collect()
            };
        }
        let subject = subject(rule, scope);
        if rule.filter.is_empty() {
            return vec![subject];
        }
        match subject {
            Some(id) if self.matches(rule, id) => vec![Some(id)],
            _ => Vec::new(),
        }
    }

    fn matches(&self, rule: &Rule, id: EntityId) -> bool {
        self.store
            .component_set(id)
            .is_some_and(|set| set.contains_all(&rule.filter))
    }

    fn invoke(&mut self, rule: &Rule, entity: Option<EntityId>, scope: &mut Scope) -> Result<bool> {
        // An earlier invocation may have despawned or stripped this entity.
        if let Some(id) = entity {
            if !rule.filter.is_empty() && !self.matches(rule, id) {
                return Ok(false);
            }
        }
        if let Some(condition) = &rule.condition {
            if !self.evaluator().condition(condition, scope)? {
                return Ok(false);
            }
        }
        self.run(&rule.actions, scope)?;
        Ok(true)
    }

    fn evaluator(&mut self) -> Evaluator<'_> {
        let now = self.timeline.now();
        Evaluator::new(self.program, self.store, self.rng, now)
    }

    fn eval(&mut self, expr: &Expr, scope: &Scope) -> Result<Value> {
        self.evaluator().eval(expr, scope)
    }

    fn eval_entity(&mut self, expr: &Expr, scope: &Scope, context: &str) -> Result<EntityId> {
        let id = entity_ref(&self.eval(expr, scope)?, context)?;
        if !self.store.contains(id) {
            return Err(SimError::NullEntityReference {
                context: format!("{context} on despawned entity {id}"),
            });
        }
        Ok(id)
    }

    fn eval_number(&mut self, expr: &Expr, scope: &Scope, context: &str) -> Result<f64> {
        let value = self.eval(expr, scope)?;
        value
            .as_number()
            .ok_or_else(|| SimError::mismatch(context, "number", value.type_name()))
    }

    fn eval_fields(
        &mut self,
        fields: &[(String, Expr)],
        scope: &Scope,
    ) -> Result<indexmap::IndexMap<String, Value>> {
        fields
            .iter()
            .map(|(name, expr)| Ok((name.clone(), self.eval(expr, scope)?)))
            .collect()
    }

    fn eval_init(&mut self, init: &ComponentInit, scope: &Scope) -> Result<Vec<(usize, Value)>> {
        init.fields
            .iter()
            .map(|(index, expr)| Ok((*index, self.eval(expr, scope)?)))
            .collect()
    }

    fn run(&mut self, actions: &[Action], scope: &mut Scope) -> Result<()> {
        for action in actions {
            self.apply(action, scope)?;
        }
        Ok(())
    }

    /// Run a nested block; its `let` bindings end with it.
    fn run_block(&mut self, actions: &[Action], scope: &mut Scope) -> Result<()> {
        let mark = scope.mark();
        let result = self.run(actions, scope);
        scope.truncate(mark);
        result
    }

    fn apply(&mut self, action: &Action, scope: &mut Scope) -> Result<()> {
        match action {
            Action::Modify {
                entity,
                component,
                field,
                op,
                value,
            } => {
                let id = self.eval_entity(entity, scope, "modify")?;
                let operand = self.eval(value, scope)?;
                self.store.modify_field(id, *component, *field, *op, operand)
            }
            Action::Schedule {
                event,
                delay,
                fields,
                recurring,
            } => {
                let delay = match delay {
                    Some(expr) => self.eval_number(expr, scope, "schedule delay")?,
                    None => 0.0,
                };
                let fields = self.eval_fields(fields, scope)?;
                if *recurring {
                    self.timeline.schedule_recurring(event.as_str(), delay, fields)?;
                } else {
                    self.timeline.schedule(event.as_str(), delay, fields)?;
                }
                Ok(())
            }
            Action::Emit { event, fields } => {
                let fields = self.eval_fields(fields, scope)?;
                self.timeline.schedule(event.as_str(), 0.0, fields)?;
                Ok(())
            }
            Action::Spawn { components } => {
                let mut inits = Vec::with_capacity(components.len());
                for init in components {
                    inits.push((init.component, self.eval_init(init, scope)?));
                }
                let id = self.store.create_resolved(&inits)?;
                trace!(%id, "spawned entity");
                Ok(())
            }
            Action::Despawn { entity } => {
                let value = self.eval(entity, scope)?;
                let id = entity_ref(&value, "despawn")?;
                self.store.despawn_entity(id);
                Ok(())
            }
            Action::AddComponent { entity, component } => {
                let id = self.eval_entity(entity, scope, "add_component")?;
                let fields = self.eval_init(component, scope)?;
                self.store.attach_component(id, component.component, &fields)
            }
            Action::RemoveComponent { entity, component } => {
                let id = self.eval_entity(entity, scope, "remove_component")?;
                self.store.detach_component(id, *component)?;
                Ok(())
            }
            Action::Conditional {
                condition,
                then_actions,
                else_actions,
            } => {
                if self.evaluator().condition(condition, scope)? {
                    self.run_block(then_actions, scope)
                } else {
                    self.run_block(else_actions, scope)
                }
            }
            Action::Loop {
                variable,
                iterable,
                body,
            } => {
                let items = match self.eval(iterable, scope)? {
                    Value::List(items) => items,
                    other => return Err(SimError::mismatch("loop", "list", other.type_name())),
                };
                for item in items {
                    let mark = scope.mark();
                    scope.bind(variable.as_str(), item);
                    let result = self.run(body, scope);
                    scope.truncate(mark);
                    result?;
                }
                Ok(())
            }
            Action::Let { name, value } => {
                let value = self.eval(value, scope)?;
                scope.bind(name.as_str(), value);
                Ok(())
            }
            Action::Cancel { event } => {
                let id = match self.eval(event, scope)? {
                    Value::Number(n) if n >= 0.0 && n.fract() == 0.0 => EventId(n as u64),
                    other => {
                        return Err(SimError::mismatch("cancel", "event id", other.type_name()))
                    }
                };
                self.timeline.cancel(id);
                Ok(())
            }
        }
    }
}

/// The entity an event rule runs for: the first of `entity`, `source`,
/// `target` or the rule's first binding that is in scope.
fn subject(rule: &Rule, scope: &Scope) -> Option<EntityId> {
    let value = [ENTITY_VAR, SOURCE_VAR, TARGET_VAR]
        .into_iter()
        .chain(rule.bindings.first().map(|(var, _)| var.as_str()))
        .find_map(|name| scope.get(name))?;
    entity_ref(value, "rule subject").ok()
}

/// Scope holding the event's fields, the rule's trigger bindings and the
/// event id. Bindings to fields the event lacks are `null`.
fn bind_event(rule: &Rule, event: &ScheduledEvent) -> Scope {
    let mut scope = Scope::new();
    for (name, value) in &event.fields {
        scope.bind(name.as_str(), value.clone());
    }
    for (var, field) in &rule.bindings {
        let value = event.field(field).cloned().unwrap_or_default();
        scope.bind(var.as_str(), value);
    }
    scope.bind(EVENT_ID_VAR, Value::Number(event.id.0 as f64));
    scope
}
