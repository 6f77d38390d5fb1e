//! Simulation configuration with documented constants
//!
//! All magic numbers are collected here with explanations of their purpose
//! and how they interact with each other.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::core::error::{Result, SwarmError};

/// Maximum (and starting) health of every agent
pub const MAX_HEALTH: u8 = 100;

/// Configuration for the simulation systems
///
/// Loadable from TOML; every field has a default so a partial file works.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    // === CLOCKS ===
    /// Tick engine period in milliseconds
    ///
    /// Movement and damage are expressed per tick, so this sets the pace
    /// of the whole battle. At 100ms an agent crosses 10 units per second.
    pub tick_period_ms: u64,

    /// Guiding principle rotation period in milliseconds
    pub principle_period_ms: u64,

    /// Lower bound of the delay between two think cycles of one agent
    pub think_min_ms: u64,

    /// Upper bound (exclusive) of the delay between two think cycles
    ///
    /// With 5-10s and ten agents, the oracle sees roughly 1-2 calls per
    /// second. Lowering this is the fastest way into rate limits.
    pub think_max_ms: u64,

    /// First think cycle of each agent starts after a random delay below this
    pub initial_stagger_ms: u64,

    // === COMBAT ===
    /// Distance at which an attacker starts dealing damage (world units)
    pub attack_range: f32,

    /// Distance an agent covers per tick (world units)
    pub drone_speed: f32,

    /// Health removed from the target per tick while in range
    pub attack_damage: u8,

    /// Probability that a damaging tick writes a combat log line
    ///
    /// Every in-range attacker hits every tick; logging all of them would
    /// flush the 100-entry log within a second.
    pub combat_log_sample_rate: f64,

    // === LOG ===
    /// Number of entries retained by the event log
    pub log_capacity: usize,

    /// Number of most recent log entries handed to the oracle as context
    pub context_entries: usize,

    // === ARENA ===
    /// Agents spawned per swarm on reset
    pub swarm_size: u32,

    pub arena_width: f32,
    pub arena_height: f32,

    /// Seed for spawn jitter and combat log sampling; random when absent
    pub seed: Option<u64>,

    // === BACKENDS ===
    /// Self-hosted chat endpoint
    pub local_endpoint: String,

    /// Base URL of the cloud completion API
    pub cloud_base_url: String,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            tick_period_ms: 100,
            principle_period_ms: 25_000,
            think_min_ms: 5_000,
            think_max_ms: 10_000,
            initial_stagger_ms: 1_000,

            attack_range: 75.0,
            drone_speed: 1.0,
            attack_damage: 5,
            combat_log_sample_rate: 0.10,

            log_capacity: 100,
            context_entries: 5,

            swarm_size: 5,
            arena_width: 800.0,
            arena_height: 600.0,
            seed: None,

            local_endpoint: "http://localhost:11434/api/chat".into(),
            cloud_base_url: "https://generativelanguage.googleapis.com/v1beta".into(),
        }
    }
}

impl SimulationConfig {
    /// Load a config from a TOML file and validate it
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&raw)?;
        config.validate().map_err(SwarmError::Config)?;
        Ok(config)
    }

    pub fn tick_period(&self) -> Duration {
        Duration::from_millis(self.tick_period_ms)
    }

    pub fn principle_period(&self) -> Duration {
        Duration::from_millis(self.principle_period_ms)
    }

    /// Validate configuration for internal consistency
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.tick_period_ms == 0 || self.principle_period_ms == 0 {
            return Err("clock periods must be positive".into());
        }

        if self.think_min_ms >= self.think_max_ms {
            return Err(format!(
                "think_min_ms ({}) should be < think_max_ms ({})",
                self.think_min_ms, self.think_max_ms
            ));
        }

        if self.drone_speed <= 0.0 || self.attack_range <= 0.0 {
            return Err("drone_speed and attack_range must be positive".into());
        }

        if !(0.0..=1.0).contains(&self.combat_log_sample_rate) {
            return Err(format!(
                "combat_log_sample_rate ({}) must be within [0, 1]",
                self.combat_log_sample_rate
            ));
        }

        if self.log_capacity == 0 || self.context_entries > self.log_capacity {
            return Err(format!(
                "context_entries ({}) must fit in a non-empty log of capacity {}",
                self.context_entries, self.log_capacity
            ));
        }

        if self.swarm_size == 0 {
            return Err("swarm_size must be at least 1".into());
        }

        if self.arena_width <= 0.0 || self.arena_height <= 0.0 {
            return Err("arena dimensions must be positive".into());
        }

        Ok(())
    }
}
