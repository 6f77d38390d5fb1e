//! Tick engine - deterministic movement and combat resolution
//!
//! Each tick works on a deep copy of the roster and replaces the live world
//! with the result in one step. Agents are processed in roster order; an
//! agent disabled earlier in the tick does not act later in it.
//!
//! Decisions from the scheduler land between ticks as point writes and are
//! simply picked up by the next tick.

use rand::Rng;
use rand_chacha::ChaCha8Rng;
use std::sync::Arc;
use tokio::time::MissedTickBehavior;

use crate::core::config::SimulationConfig;
use crate::core::types::{AgentId, Tick};
use crate::events::LogCategory;
use crate::world::{AgentStatus, BattleOutcome, RunToken, SharedState, World};

/// What happened during one tick, for logging outside the world lock
#[derive(Debug, Clone, Default)]
pub struct TickReport {
    pub tick: Tick,
    /// Sampled combat lines, by attacker
    pub combat_lines: Vec<(AgentId, String)>,
    /// (attacker, victim) pairs for every agent disabled this tick
    pub disabled: Vec<(AgentId, AgentId)>,
    /// Attackers reverted to Idle because their target was gone
    pub demoted: Vec<AgentId>,
    pub outcome: Option<BattleOutcome>,
}

/// Advance the world by one tick
pub fn resolve_tick<R: Rng>(
    world: &World,
    config: &SimulationConfig,
    rng: &mut R,
) -> (World, TickReport) {
    let mut next = world.clone();
    next.tick += 1;
    let mut report = TickReport {
        tick: next.tick,
        ..Default::default()
    };

    for i in 0..next.agents.len() {
        match next.agents[i].status {
            AgentStatus::Attacking => resolve_attack(&mut next, i, config, rng, &mut report),
            AgentStatus::Moving => resolve_move(&mut next, i, config),
            _ => {}
        }
    }

    // Attackers processed before their target fell still point at it
    demote_stale_attackers(&mut next, &mut report);

    report.outcome = next.outcome();
    (next, report)
}

/// Index of the attacker's target if it is an active enemy
fn resolve_target(world: &World, attacker: usize) -> Option<usize> {
    let agent = &world.agents[attacker];
    let target = world.index_of(agent.target_id?)?;
    let candidate = &world.agents[target];
    (candidate.is_active() && candidate.swarm() != agent.swarm()).then_some(target)
}

fn resolve_attack<R: Rng>(
    world: &mut World,
    i: usize,
    config: &SimulationConfig,
    rng: &mut R,
    report: &mut TickReport,
) {
    let Some(t) = resolve_target(world, i) else {
        world.agents[i].go_idle();
        report.demoted.push(world.agents[i].id);
        return;
    };

    let to_target = world.agents[t].position - world.agents[i].position;
    if to_target.length() > config.attack_range {
        // Out of range: close in, no damage this tick
        let step = to_target.normalize() * config.drone_speed;
        world.agents[i].position = world.agents[i].position + step;
        return;
    }

    let attacker_id = world.agents[i].id;
    let target_id = world.agents[t].id;
    let disabled = world.agents[t].take_damage(config.attack_damage);

    if rng.gen_bool(config.combat_log_sample_rate) {
        report.combat_lines.push((
            attacker_id,
            format!(
                "{} hits {} for {} damage ({} health left)",
                attacker_id, target_id, config.attack_damage, world.agents[t].health
            ),
        ));
    }

    if disabled {
        world.agents[i].go_idle();
        report.disabled.push((attacker_id, target_id));
    }
}

fn resolve_move(world: &mut World, i: usize, config: &SimulationConfig) {
    let agent = &mut world.agents[i];
    let Some(target) = agent.target_position else {
        agent.go_idle();
        return;
    };

    let to_target = target - agent.position;
    if to_target.length() < config.drone_speed {
        agent.position = target;
        agent.go_idle();
    } else {
        agent.position = agent.position + to_target.normalize() * config.drone_speed;
    }
}

fn demote_stale_attackers(world: &mut World, report: &mut TickReport) {
    for i in 0..world.agents.len() {
        if world.agents[i].status == AgentStatus::Attacking && resolve_target(world, i).is_none() {
            world.agents[i].go_idle();
            report.demoted.push(world.agents[i].id);
        }
    }
}

/// Run one tick against the shared state and publish its events
///
/// The read-and-replace happens under a single world write lock so a
/// decision landing concurrently is never lost.
pub fn step<R: Rng>(state: &SharedState, rng: &mut R) -> TickReport {
    let report = state.with_world_mut(|world| {
        let (next, report) = resolve_tick(world, state.config(), rng);
        *world = next;
        report
    });

    let log = state.log();
    for (author, line) in &report.combat_lines {
        log.agent(LogCategory::Combat, *author, line.clone());
    }
    for (attacker, victim) in &report.disabled {
        log.agent(
            LogCategory::Combat,
            *attacker,
            format!("{} disabled {}", attacker, victim),
        );
    }

    if let Some(outcome) = report.outcome {
        if state.finish(outcome) {
            let message = match outcome {
                BattleOutcome::Victory(winner) => format!(
                    "{} swarm is victorious: every {} drone is disabled",
                    winner,
                    winner.opponent()
                ),
                BattleOutcome::Draw => "Draw: both swarms were eliminated in the same tick".into(),
            };
            log.info(LogCategory::Victory, message);
        }
    }

    report
}

/// Fixed-period tick clock; exits when the token is revoked or the battle ends
pub async fn run_tick_loop(state: Arc<SharedState>, token: RunToken, mut rng: ChaCha8Rng) {
    let mut interval = tokio::time::interval(state.config().tick_period());
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // The first tick fires immediately
    interval.tick().await;

    tracing::info!(period = ?state.config().tick_period(), "tick engine started");
    loop {
        interval.tick().await;
        if !state.is_live(&token) {
            break;
        }
        let report = step(&state, &mut rng);
        if report.outcome.is_some() {
            break;
        }
    }
    tracing::info!("tick engine stopped");
}
