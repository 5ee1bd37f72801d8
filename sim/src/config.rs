//! Run configuration.

use bevy_ecs::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Configuration of one simulation run.
#[derive(Resource, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Seed of the generator behind `random` / `random_range`.
    pub seed: u64,
    /// Simulation time between watchdog checks. `<= 0` disables the watchdog.
    pub watchdog_interval: f64,
    /// Period of the tick event driving tick-triggered rules.
    pub tick_interval: f64,
    /// Step cap for `run_until_complete` / `run_until`.
    pub max_steps: u64,
    /// Optional simulation-time cap for the run loops.
    pub max_time: Option<f64>,
    /// Wall-clock seconds per unit of simulation time. Host pacing only.
    pub time_scale: f64,
    /// Component names the watchdog inspects.
    pub watchdog: WatchdogConfig,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            watchdog_interval: 5.0,
            tick_interval: 1.0,
            max_steps: 100_000,
            max_time: None,
            time_scale: 1.0,
            watchdog: WatchdogConfig::default(),
        }
    }
}

impl SimConfig {
    /// Parse a config document. Missing keys take their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_watchdog_interval(mut self, interval: f64) -> Self {
        self.watchdog_interval = interval;
        self
    }

    pub fn with_max_steps(mut self, max_steps: u64) -> Self {
        self.max_steps = max_steps;
        self
    }
}

/// Combat shape the watchdog looks for when the timeline stalls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchdogConfig {
    pub attack_component: String,
    pub target_component: String,
    /// Entity-typed field of the target component.
    pub target_field: String,
    pub health_component: String,
    pub health_field: String,
    /// Event scheduled once per idle combatant.
    pub recovery_event: String,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            attack_component: "Attack".to_string(),
            target_component: "Target".to_string(),
            target_field: "entity".to_string(),
            health_component: "Health".to_string(),
            health_field: "current".to_string(),
            recovery_event: "DoAttack".to_string(),
        }
    }
}
