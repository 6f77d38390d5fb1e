//! Per-agent decision scheduler
//!
//! Every agent thinks on its own jittered timer. A think cycle snapshots the
//! latest world, asks the swarm's oracle for a stratagem, then folds the
//! result back into the agent's intent with a single point write.
//!
//! At most one decision per agent is in flight: the in-flight set is checked
//! and updated atomically, and the entry is released on every exit path,
//! including task cancellation.

use ahash::AHashSet;
use rand::Rng;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::core::error::{Result, SwarmError};
use crate::core::types::AgentId;
use crate::events::LogCategory;
use crate::llm::{DecisionContext, OracleSet, Stratagem, StratagemAction};
use crate::world::{AgentStatus, RunToken, SharedState, World};

/// Result of one `trigger` call
#[derive(Debug, Clone, PartialEq)]
pub enum ThinkOutcome {
    /// Not running, agent disabled or unknown, or a decision already in flight
    Skipped,
    Applied(StratagemAction),
    /// Stratagem named a dead, unknown or friendly target; agent went idle
    Rejected(String),
    /// Oracle error or unparseable reply; agent went idle
    Failed(String),
    /// Run stopped or agent disabled while the call was in flight
    Discarded,
}

type InFlightSet = Arc<Mutex<AHashSet<AgentId>>>;

/// Membership in the in-flight set, released on drop
pub struct InFlightGuard {
    set: InFlightSet,
    id: AgentId,
}

impl InFlightGuard {
    /// Claim `id`, or `None` if it is already claimed
    fn acquire(set: &InFlightSet, id: AgentId) -> Option<Self> {
        let inserted = set.lock().unwrap_or_else(|e| e.into_inner()).insert(id);
        inserted.then(|| Self {
            set: Arc::clone(set),
            id,
        })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.set
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.id);
    }
}

pub struct DecisionScheduler {
    state: Arc<SharedState>,
    oracles: OracleSet,
    thinking: InFlightSet,
}

impl DecisionScheduler {
    pub fn new(state: Arc<SharedState>, oracles: OracleSet) -> Self {
        Self {
            state,
            oracles,
            thinking: Arc::new(Mutex::new(AHashSet::new())),
        }
    }

    pub fn is_thinking(&self, id: AgentId) -> bool {
        self.thinking
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&id)
    }

    pub fn thinking_count(&self) -> usize {
        self.thinking.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Run one think cycle for `id`
    pub async fn trigger(&self, id: AgentId, token: RunToken) -> ThinkOutcome {
        if !self.state.is_live(&token) {
            return ThinkOutcome::Skipped;
        }
        if self.state.agent(id).map_or(true, |a| a.is_disabled()) {
            return ThinkOutcome::Skipped;
        }
        let Some(_guard) = InFlightGuard::acquire(&self.thinking, id) else {
            return ThinkOutcome::Skipped;
        };

        if !self.begin_assessment(id, &token) {
            return ThinkOutcome::Skipped;
        }

        let config = self.state.config();
        let context = DecisionContext::from_world(
            &self.state.snapshot(),
            id,
            self.state.principle(),
            self.state.log().recent(config.context_entries),
            config,
        );
        let result = match context {
            Some(context) => {
                let oracle = self.oracles.for_swarm(id.swarm);
                oracle.get_action(&context, self.state.log()).await
            }
            None => Err(SwarmError::InvalidTarget(format!("{} left the roster", id))),
        };

        let rationale = result
            .as_ref()
            .ok()
            .map(|s| (s.name.clone(), s.justification.clone()));

        let outcome = self.state.with_world_mut(|world| {
            // The run or the agent may have changed while the call was out
            if !self.state.is_live(&token) {
                return ThinkOutcome::Discarded;
            }
            apply_decision(world, id, result, config.arena_width, config.arena_height)
        });

        self.record(id, &outcome, rationale);
        outcome
    }

    /// Mark `id` as Assessing, unless the run ended or the agent fell meanwhile
    ///
    /// The token is checked under the world lock, so a concurrent halt either
    /// sees this write and reverts it, or this write never happens.
    fn begin_assessment(&self, id: AgentId, token: &RunToken) -> bool {
        self.state.with_world_mut(|world| {
            if !self.state.is_live(token) {
                return false;
            }
            match world.get_mut(id) {
                Some(agent) if !agent.is_disabled() => {
                    agent.status = AgentStatus::Assessing;
                    true
                }
                _ => false,
            }
        })
    }

    fn record(&self, id: AgentId, outcome: &ThinkOutcome, rationale: Option<(String, String)>) {
        let log = self.state.log();
        match outcome {
            ThinkOutcome::Applied(action) => {
                let (name, justification) = rationale.unwrap_or_default();
                log.agent(
                    LogCategory::Decision,
                    id,
                    format!(
                        "{}: {} ({})",
                        name,
                        describe_action(action),
                        justification
                    ),
                );
            }
            ThinkOutcome::Rejected(reason) => log.agent(LogCategory::Error, id, reason.clone()),
            ThinkOutcome::Failed(reason) => {
                log.agent(LogCategory::Error, id, format!("Decision failed: {}", reason))
            }
            ThinkOutcome::Discarded => {
                tracing::debug!(agent = %id, "stale decision discarded");
            }
            ThinkOutcome::Skipped => {}
        }
    }

    /// Think on a jittered timer until the token is revoked or the agent is disabled
    pub async fn run_agent_loop(self: Arc<Self>, id: AgentId, token: RunToken) {
        let config = self.state.config().clone();
        let stagger = random_delay(0, config.initial_stagger_ms);
        tokio::time::sleep(stagger).await;

        loop {
            if !self.state.is_live(&token) {
                break;
            }
            if self.state.agent(id).map_or(true, |a| a.is_disabled()) {
                tracing::debug!(agent = %id, "agent disabled; think loop ends");
                break;
            }

            let outcome = self.trigger(id, token).await;
            tracing::debug!(agent = %id, outcome = ?outcome, "think cycle complete");

            let delay = random_delay(config.think_min_ms, config.think_max_ms);
            tokio::time::sleep(delay).await;
        }
    }
}

/// Fold an oracle result into the agent's intent
///
/// Attack targets are checked against the world as it is now, not as it was
/// when the oracle was asked.
pub fn apply_decision(
    world: &mut World,
    id: AgentId,
    result: Result<Stratagem>,
    arena_width: f32,
    arena_height: f32,
) -> ThinkOutcome {
    let enemy_ok = |world: &World, target: AgentId| {
        target.swarm == id.swarm.opponent() && world.get(target).is_some_and(|a| a.is_active())
    };

    let target = match &result {
        Ok(Stratagem {
            action: StratagemAction::Attack { target_id },
            ..
        }) => Some(
            target_id
                .parse::<AgentId>()
                .ok()
                .filter(|t| enemy_ok(world, *t))
                .ok_or_else(|| target_id.clone()),
        ),
        _ => None,
    };

    let Some(agent) = world.get_mut(id) else {
        return ThinkOutcome::Discarded;
    };
    if agent.is_disabled() {
        return ThinkOutcome::Discarded;
    }

    let stratagem = match result {
        Ok(stratagem) => stratagem,
        Err(err) => {
            agent.go_idle();
            return ThinkOutcome::Failed(err.to_string());
        }
    };

    match stratagem.action {
        StratagemAction::Move { position } => {
            let position = position.clamp_to(arena_width, arena_height);
            agent.status = AgentStatus::Moving;
            agent.target_position = Some(position);
            agent.target_id = None;
            agent.last_stratagem = Some(stratagem.name);
            ThinkOutcome::Applied(StratagemAction::Move { position })
        }
        StratagemAction::Attack { target_id } => match target {
            Some(Ok(resolved)) => {
                agent.status = AgentStatus::Attacking;
                agent.target_id = Some(resolved);
                agent.target_position = None;
                agent.last_stratagem = Some(stratagem.name);
                ThinkOutcome::Applied(StratagemAction::Attack { target_id })
            }
            _ => {
                agent.go_idle();
                ThinkOutcome::Rejected(format!(
                    "Invalid target '{}': not an active enemy",
                    target_id
                ))
            }
        },
        StratagemAction::Hold => {
            agent.go_idle();
            agent.last_stratagem = Some(stratagem.name);
            ThinkOutcome::Applied(StratagemAction::Hold)
        }
    }
}

fn describe_action(action: &StratagemAction) -> String {
    match action {
        StratagemAction::Move { position } => format!("{} to {}", action.label(), position),
        StratagemAction::Attack { target_id } => format!("{} {}", action.label(), target_id),
        StratagemAction::Hold => action.label().into(),
    }
}

/// Uniform delay in `[min_ms, max_ms)`
fn random_delay(min_ms: u64, max_ms: u64) -> Duration {
    if max_ms <= min_ms {
        return Duration::from_millis(min_ms);
    }
    Duration::from_millis(rand::thread_rng().gen_range(min_ms..max_ms))
}
