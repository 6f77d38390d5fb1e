//! Simulation lifecycle: start, pause, stop, reset
//!
//! A running simulation owns three kinds of tasks: the tick clock, the
//! principle clock and one think loop per agent. They all carry the same
//! `RunToken`; leaving `Running` revokes it and aborts the handles.

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;

use crate::core::config::SimulationConfig;
use crate::core::error::{Result, SwarmError};
use crate::core::types::{Swarm, Tick};
use crate::events::LogCategory;
use crate::llm::OracleSet;
use crate::simulation::principle::{run_principle_loop, PRINCIPLES};
use crate::simulation::scheduler::DecisionScheduler;
use crate::simulation::tick::run_tick_loop;
use crate::world::{AgentStatus, BattleOutcome, SharedState, SimPhase, World};

/// Point-in-time summary for operators
#[derive(Debug, Clone, Serialize)]
pub struct SimulationStatus {
    pub phase: SimPhase,
    pub tick: Tick,
    pub principle: String,
    pub red_active: usize,
    pub blue_active: usize,
    pub thinking: usize,
    pub outcome: Option<BattleOutcome>,
}

impl fmt::Display for SimulationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?} | tick {} | red {} / blue {} active | {} thinking",
            self.phase, self.tick, self.red_active, self.blue_active, self.thinking
        )?;
        if let Some(outcome) = self.outcome {
            write!(f, " | {}", outcome)?;
        }
        Ok(())
    }
}

pub struct Simulation {
    state: Arc<SharedState>,
    scheduler: Arc<DecisionScheduler>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
    seed: u64,
    runs: Mutex<u64>,
}

impl Simulation {
    /// Validate the config and lay out a fresh battle
    pub fn new(config: SimulationConfig, oracles: OracleSet) -> Result<Self> {
        config.validate().map_err(SwarmError::Config)?;
        let seed = config.seed.unwrap_or_else(rand::random);
        let world = World::spawn(&config, &mut ChaCha8Rng::seed_from_u64(seed));

        let state = Arc::new(SharedState::new(config, world, PRINCIPLES[0]));
        let scheduler = Arc::new(DecisionScheduler::new(Arc::clone(&state), oracles));
        state
            .log()
            .info(LogCategory::System, format!("Battle ready (seed {})", seed));

        Ok(Self {
            state,
            scheduler,
            tasks: Mutex::new(Vec::new()),
            seed,
            runs: Mutex::new(0),
        })
    }

    pub fn state(&self) -> &Arc<SharedState> {
        &self.state
    }

    pub fn scheduler(&self) -> &Arc<DecisionScheduler> {
        &self.scheduler
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Begin or resume the run. Must be called inside a tokio runtime.
    pub fn start(&self) -> Result<()> {
        match self.state.phase() {
            SimPhase::Running => return Ok(()),
            SimPhase::Stopped => {
                return Err(SwarmError::Config(
                    "simulation has stopped; reset it before starting again".into(),
                ))
            }
            SimPhase::Ready | SimPhase::Paused => {}
        }

        self.cancel_tasks();
        let token = self.state.invalidate();
        self.state.set_phase(SimPhase::Running);

        // Each (re)start gets its own deterministic tick stream
        let run = {
            let mut runs = self.runs.lock().unwrap_or_else(|e| e.into_inner());
            *runs += 1;
            *runs
        };
        let tick_rng = ChaCha8Rng::seed_from_u64(self.seed.wrapping_add(run));

        let mut handles = Vec::new();
        handles.push(tokio::spawn(run_tick_loop(
            Arc::clone(&self.state),
            token,
            tick_rng,
        )));
        handles.push(tokio::spawn(run_principle_loop(
            Arc::clone(&self.state),
            token,
        )));

        let roster: Vec<_> = self
            .state
            .snapshot()
            .agents
            .iter()
            .filter(|a| a.is_active())
            .map(|a| a.id)
            .collect();
        for id in &roster {
            handles.push(tokio::spawn(
                Arc::clone(&self.scheduler).run_agent_loop(*id, token),
            ));
        }

        self.tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend(handles);

        tracing::info!(agents = roster.len(), "simulation started");
        self.state.log().info(
            LogCategory::System,
            format!("Simulation started with {} active drones", roster.len()),
        );
        Ok(())
    }

    /// Suspend every clock; in-flight decisions are discarded when they land
    pub fn pause(&self) {
        if self.state.phase() != SimPhase::Running {
            return;
        }
        self.halt(SimPhase::Paused);
        self.state.log().info(LogCategory::System, "Simulation paused");
    }

    /// End the run without an outcome; only `reset` can follow
    pub fn stop(&self) {
        match self.state.phase() {
            SimPhase::Stopped => {
                // The battle may have ended on its own; tasks can still be winding down
                self.cancel_tasks();
            }
            _ => {
                self.halt(SimPhase::Stopped);
                self.state.log().info(LogCategory::System, "Simulation stopped");
            }
        }
    }

    /// Discard the current battle and lay out a fresh one
    pub fn reset(&self) {
        self.state.invalidate();
        self.cancel_tasks();

        let seed = self.state.config().seed.unwrap_or_else(rand::random);
        let world = World::spawn(self.state.config(), &mut ChaCha8Rng::seed_from_u64(seed));
        self.state.reset(world, PRINCIPLES[0]);
        *self.runs.lock().unwrap_or_else(|e| e.into_inner()) = 0;

        tracing::info!(seed, "simulation reset");
        self.state
            .log()
            .info(LogCategory::System, format!("Battle reset (seed {})", seed));
    }

    pub fn status(&self) -> SimulationStatus {
        let world = self.state.snapshot();
        SimulationStatus {
            phase: self.state.phase(),
            tick: world.tick,
            principle: self.state.principle(),
            red_active: world.active_count(Swarm::Red),
            blue_active: world.active_count(Swarm::Blue),
            thinking: self.scheduler.thinking_count(),
            outcome: self.state.outcome(),
        }
    }

    fn halt(&self, phase: SimPhase) {
        self.state.set_phase(phase);
        self.state.invalidate();
        self.cancel_tasks();
        // Aborted think cycles never got to write their result back
        self.state.with_world_mut(|world| {
            for agent in &mut world.agents {
                if agent.status == AgentStatus::Assessing {
                    agent.status = AgentStatus::Idle;
                }
            }
        });
    }

    fn cancel_tasks(&self) {
        let handles: Vec<_> = self
            .tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect();
        for handle in handles {
            handle.abort();
        }
    }
}

impl Drop for Simulation {
    fn drop(&mut self) {
        self.state.invalidate();
        self.cancel_tasks();
    }
}
