//! Process-wide simulation state
//!
//! `World` is plain data. `SharedState` owns the live world together with the
//! run phase, the current guiding principle and the event log, and exposes
//! the only write paths into them:
//!
//! - tick engine: read-and-replace of the whole world (`with_world_mut`)
//! - scheduler: point update of one agent (`update_agent`)
//! - principle clock: replace the principle text (`set_principle`)
//!
//! Locks are short and never held across an `.await`, so async tasks always
//! read the freshest committed world on demand.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, RwLock};

use crate::core::config::SimulationConfig;
use crate::core::types::{AgentId, Swarm, Tick, Vec2};
use crate::events::EventLog;
use crate::world::agent::Agent;

/// How the battle ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BattleOutcome {
    Victory(Swarm),
    /// Both swarms lost their last agent in the same tick
    Draw,
}

impl fmt::Display for BattleOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BattleOutcome::Victory(swarm) => write!(f, "{} swarm victorious", swarm),
            BattleOutcome::Draw => f.write_str("draw: both swarms eliminated"),
        }
    }
}

/// The full roster at one point in time
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct World {
    /// Red agents first, then blue, each by number. Tick order follows this.
    pub agents: Vec<Agent>,
    pub tick: Tick,
}

impl World {
    pub fn new(agents: Vec<Agent>) -> Self {
        Self { agents, tick: 0 }
    }

    /// Lay out `swarm_size` agents per side facing each other across the arena
    pub fn spawn<R: Rng>(config: &SimulationConfig, rng: &mut R) -> Self {
        let mut agents = Vec::with_capacity(config.swarm_size as usize * 2);
        let spacing = config.arena_height / (config.swarm_size as f32 + 1.0);
        for swarm in Swarm::ALL {
            let x = match swarm {
                Swarm::Red => config.arena_width * 0.1,
                Swarm::Blue => config.arena_width * 0.9,
            };
            for number in 1..=config.swarm_size {
                let jitter = Vec2::new(rng.gen_range(-20.0..20.0), rng.gen_range(-10.0..10.0));
                let position = (Vec2::new(x, spacing * number as f32) + jitter)
                    .clamp_to(config.arena_width, config.arena_height);
                agents.push(Agent::new(AgentId::new(swarm, number), position));
            }
        }
        Self::new(agents)
    }

    pub fn index_of(&self, id: AgentId) -> Option<usize> {
        self.agents.iter().position(|a| a.id == id)
    }

    pub fn get(&self, id: AgentId) -> Option<&Agent> {
        self.agents.iter().find(|a| a.id == id)
    }

    pub fn get_mut(&mut self, id: AgentId) -> Option<&mut Agent> {
        self.agents.iter_mut().find(|a| a.id == id)
    }

    pub fn swarm(&self, swarm: Swarm) -> impl Iterator<Item = &Agent> {
        self.agents.iter().filter(move |a| a.swarm() == swarm)
    }

    pub fn active_count(&self, swarm: Swarm) -> usize {
        self.swarm(swarm).filter(|a| a.is_active()).count()
    }

    /// `Some` once at least one swarm has no active agents left
    pub fn outcome(&self) -> Option<BattleOutcome> {
        match (self.active_count(Swarm::Red), self.active_count(Swarm::Blue)) {
            (0, 0) => Some(BattleOutcome::Draw),
            (0, _) => Some(BattleOutcome::Victory(Swarm::Blue)),
            (_, 0) => Some(BattleOutcome::Victory(Swarm::Red)),
            _ => None,
        }
    }
}

/// Lifecycle of one simulation run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SimPhase {
    /// Freshly reset, never started
    Ready,
    Running,
    Paused,
    /// Finished by an outcome or by the operator; only `reset` leaves this
    Stopped,
}

/// Cancellation token handed to every spawned task
///
/// Captures the run epoch at spawn time. Pausing, stopping or resetting bumps
/// the epoch, which invalidates every outstanding token at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunToken {
    epoch: u64,
}

pub struct SharedState {
    config: SimulationConfig,
    world: RwLock<World>,
    phase: Mutex<SimPhase>,
    principle: RwLock<String>,
    outcome: Mutex<Option<BattleOutcome>>,
    epoch: AtomicU64,
    log: EventLog,
}

impl SharedState {
    pub fn new(config: SimulationConfig, world: World, principle: impl Into<String>) -> Self {
        let log = EventLog::new(config.log_capacity);
        Self {
            config,
            world: RwLock::new(world),
            phase: Mutex::new(SimPhase::Ready),
            principle: RwLock::new(principle.into()),
            outcome: Mutex::new(None),
            epoch: AtomicU64::new(0),
            log,
        }
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn log(&self) -> &EventLog {
        &self.log
    }

    // === WORLD ===

    /// Deep copy of the latest committed world
    pub fn snapshot(&self) -> World {
        self.world.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn agent(&self, id: AgentId) -> Option<Agent> {
        self.world
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(id)
            .cloned()
    }

    /// Point write to a single agent. Returns `None` if the id is unknown.
    pub fn update_agent<R>(&self, id: AgentId, f: impl FnOnce(&mut Agent) -> R) -> Option<R> {
        let mut world = self.world.write().unwrap_or_else(|e| e.into_inner());
        world.get_mut(id).map(f)
    }

    /// Exclusive access to the whole world for an atomic read-and-replace
    pub fn with_world_mut<R>(&self, f: impl FnOnce(&mut World) -> R) -> R {
        let mut world = self.world.write().unwrap_or_else(|e| e.into_inner());
        f(&mut world)
    }

    pub fn replace_world(&self, world: World) {
        *self.world.write().unwrap_or_else(|e| e.into_inner()) = world;
    }

    // === PRINCIPLE ===

    pub fn principle(&self) -> String {
        self.principle.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn set_principle(&self, principle: impl Into<String>) {
        *self.principle.write().unwrap_or_else(|e| e.into_inner()) = principle.into();
    }

    // === LIFECYCLE ===

    pub fn phase(&self) -> SimPhase {
        *self.phase.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_phase(&self, phase: SimPhase) {
        *self.phase.lock().unwrap_or_else(|e| e.into_inner()) = phase;
    }

    pub fn is_running(&self) -> bool {
        self.phase() == SimPhase::Running
    }

    pub fn outcome(&self) -> Option<BattleOutcome> {
        *self.outcome.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Token for tasks spawned in the current run
    pub fn token(&self) -> RunToken {
        RunToken {
            epoch: self.epoch.load(Ordering::SeqCst),
        }
    }

    /// Revoke every outstanding token
    pub fn invalidate(&self) -> RunToken {
        let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
        RunToken { epoch }
    }

    /// True while the token's run is still the current one and is running
    pub fn is_live(&self, token: &RunToken) -> bool {
        self.epoch.load(Ordering::SeqCst) == token.epoch && self.is_running()
    }

    /// Move Running -> Stopped and record the outcome
    ///
    /// Returns false if the run was not running, so callers racing to
    /// announce the end of the battle get exactly one winner.
    pub fn finish(&self, outcome: BattleOutcome) -> bool {
        let mut phase = self.phase.lock().unwrap_or_else(|e| e.into_inner());
        if *phase != SimPhase::Running {
            return false;
        }
        *phase = SimPhase::Stopped;
        *self.outcome.lock().unwrap_or_else(|e| e.into_inner()) = Some(outcome);
        true
    }

    /// Install a fresh world and forget the previous run entirely
    pub fn reset(&self, world: World, principle: impl Into<String>) {
        self.invalidate();
        self.replace_world(world);
        self.set_principle(principle);
        *self.outcome.lock().unwrap_or_else(|e| e.into_inner()) = None;
        self.log.clear();
        self.set_phase(SimPhase::Ready);
    }
}
