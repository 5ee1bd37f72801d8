//! Stall detection and recovery.
//!
//! The watchdog is a reserved event that re-schedules itself. When it fires
//! on an otherwise empty timeline, every live combatant that still has a live
//! target gets one recovery event, which restarts the exchange of attacks.

use indexmap::IndexMap;
use tracing::{debug, info};

use crate::components::EntityId;
use crate::config::WatchdogConfig;
use crate::error::Result;
use crate::store::Store;
use crate::timeline::{EventId, Timeline, WATCHDOG_EVENT};
use crate::value::Value;

#[derive(Debug, Clone)]
pub struct Watchdog {
    interval: f64,
    config: WatchdogConfig,
    pending: Option<EventId>,
}

impl Watchdog {
    pub fn new(interval: f64, config: WatchdogConfig) -> Self {
        Self {
            interval,
            config,
            pending: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.interval > 0.0
    }

    pub fn is_armed(&self, timeline: &Timeline) -> bool {
        self.pending.is_some_and(|id| timeline.contains(id))
    }

    /// Schedule the next check at `now + interval`, unless one is pending or
    /// the watchdog is disabled.
    pub fn arm(&mut self, timeline: &mut Timeline) -> Result<()> {
        if !self.is_enabled() || self.is_armed(timeline) {
            return Ok(());
        }
        self.pending = Some(timeline.schedule(WATCHDOG_EVENT, self.interval, IndexMap::new())?);
        Ok(())
    }

    pub fn disarm(&mut self, timeline: &mut Timeline) {
        if let Some(id) = self.pending.take() {
            timeline.cancel(id);
        }
    }

    /// Handle a popped watchdog event. Returns the entities a recovery event
    /// was scheduled for.
    ///
    /// With nothing to recover the watchdog goes dormant instead of
    /// re-scheduling, so a finished fight lets the timeline drain. Any later
    /// external event, from the host or from a rule, wakes it again.
    pub fn fire(&mut self, store: &Store, timeline: &mut Timeline) -> Result<Vec<EntityId>> {
        self.pending = None;
        if timeline.has_pending_external() {
            self.arm(timeline)?;
            return Ok(Vec::new());
        }

        let stalled = self.idle_combatants(store);
        if stalled.is_empty() {
            debug!(time = timeline.now(), "watchdog: nothing to recover");
            return Ok(Vec::new());
        }

        for &(source, target) in &stalled {
            let mut fields = IndexMap::new();
            fields.insert("source".to_string(), Value::Entity(source));
            fields.insert("target".to_string(), Value::Entity(target));
            timeline.schedule(self.config.recovery_event.as_str(), 0.0, fields)?;
        }
        info!(
            time = timeline.now(),
            count = stalled.len(),
            event = %self.config.recovery_event,
            "watchdog: recovering stalled simulation"
        );
        self.arm(timeline)?;
        Ok(stalled.into_iter().map(|(source, _)| source).collect())
    }

    /// Entities with attack capability, positive health and a target whose
    /// health is also positive, ascending id.
    pub fn idle_combatants(&self, store: &Store) -> Vec<(EntityId, EntityId)> {
        let schema = store.schema();
        let lookup = |component: &str, field: Option<&str>| {
            let def = schema.by_name(component)?;
            let index = match field {
                Some(field) => def.field_index(field)?,
                None => 0,
            };
            Some((def.id, index))
        };
        let (
            Some((attack, _)),
            Some((target, target_field)),
            Some((health, health_field)),
        ) = (
            lookup(&self.config.attack_component, None),
            lookup(&self.config.target_component, Some(self.config.target_field.as_str())),
            lookup(&self.config.health_component, Some(self.config.health_field.as_str())),
        )
        else {
            return Vec::new();
        };

        let alive = |id: EntityId| {
            store
                .instance(id, health)
                .and_then(|instance| instance.get(health_field))
                .and_then(Value::as_number)
                .is_some_and(|hp| hp > 0.0)
        };

        store
            .query(&[attack, target, health])
            .into_iter()
            .filter(|&id| alive(id))
            .filter_map(|id| {
                let victim = store
                    .instance(id, target)?
                    .get(target_field)?
                    .as_entity()?;
                alive(victim).then_some((id, victim))
            })
            .collect()
    }
}
