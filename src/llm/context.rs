//! Gather situational context for oracle prompts
//!
//! The prompt is role-separated: the system role carries the agent's own
//! identity, state, the guiding principle and the exact reply schema; the
//! user role carries the situation (both rosters and recent events).

use std::fmt::Write;

use crate::core::config::SimulationConfig;
use crate::core::types::AgentId;
use crate::events::LogEntry;
use crate::world::{Agent, World};

/// Everything one agent knows when it asks for a stratagem
#[derive(Debug, Clone)]
pub struct DecisionContext {
    pub agent: Agent,
    /// Other members of the agent's swarm, disabled ones included
    pub friendlies: Vec<Agent>,
    /// Enemy agents that are still active
    pub enemies: Vec<Agent>,
    pub principle: String,
    pub recent_events: Vec<LogEntry>,
    pub arena_width: f32,
    pub arena_height: f32,
}

/// System and user messages for one oracle call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptPair {
    pub system: String,
    pub user: String,
}

impl PromptPair {
    /// Single-prompt form for backends without message roles
    pub fn concatenated(&self) -> String {
        format!("{}\n\n{}", self.system, self.user)
    }
}

impl DecisionContext {
    /// Build the context for `id` from a world snapshot
    ///
    /// Returns `None` if the agent is not in the roster.
    pub fn from_world(
        world: &World,
        id: AgentId,
        principle: impl Into<String>,
        recent_events: Vec<LogEntry>,
        config: &SimulationConfig,
    ) -> Option<Self> {
        let agent = world.get(id)?.clone();
        let friendlies = world
            .swarm(id.swarm)
            .filter(|a| a.id != id)
            .cloned()
            .collect();
        let enemies = world
            .swarm(id.swarm.opponent())
            .filter(|a| a.is_active())
            .cloned()
            .collect();

        Some(Self {
            agent,
            friendlies,
            enemies,
            principle: principle.into(),
            recent_events,
            arena_width: config.arena_width,
            arena_height: config.arena_height,
        })
    }

    pub fn prompt(&self) -> PromptPair {
        PromptPair {
            system: self.system_prompt(),
            user: self.user_prompt(),
        }
    }

    pub fn system_prompt(&self) -> String {
        let a = &self.agent;
        format!(
            "You are drone {id} of the {swarm} swarm in a two-swarm battle on a {w:.0}x{h:.0} arena.\n\
             Your position: {pos}. Your health: {health}/100. Your status: {status}.\n\
             Current guiding principle for all drones: \"{principle}\"\n\
             \n\
             Decide your next tactical action. Reply with JSON only, exactly in this schema:\n\
             {schema}\n\
             \n\
             Rules:\n\
             - MOVE position must lie inside the arena.\n\
             - ATTACK targetId must be the id of an enemy listed in the situation, e.g. \"{example}\".\n\
             - Attacks only deal damage within 75 units; farther targets are approached first.\n\
             - HOLD keeps you in place.",
            id = a.id,
            swarm = a.swarm(),
            w = self.arena_width,
            h = self.arena_height,
            pos = a.position,
            health = a.health,
            status = a.status,
            principle = self.principle,
            schema = STRATAGEM_SCHEMA,
            example = self
                .enemies
                .first()
                .map(|e| e.id.to_string())
                .unwrap_or_else(|| AgentId::new(a.swarm().opponent(), 1).to_string()),
        )
    }

    pub fn user_prompt(&self) -> String {
        let mut out = String::from("SITUATION\n\nFriendly drones:\n");
        write_roster(&mut out, &self.friendlies, &self.agent);
        out.push_str("\nEnemy drones (active):\n");
        write_roster(&mut out, &self.enemies, &self.agent);

        out.push_str("\nRecent events:\n");
        if self.recent_events.is_empty() {
            out.push_str("- none\n");
        }
        for event in &self.recent_events {
            let _ = writeln!(out, "- {}", event);
        }
        out.push_str("\nWhat is your stratagem?");
        out
    }
}

fn write_roster(out: &mut String, agents: &[Agent], me: &Agent) {
    if agents.is_empty() {
        out.push_str("- none\n");
        return;
    }
    for agent in agents {
        let _ = writeln!(
            out,
            "- id={} health={} position={} status={} distance={:.0}",
            agent.id,
            agent.health,
            agent.position,
            agent.status,
            me.position.distance(&agent.position),
        );
    }
}

const STRATAGEM_SCHEMA: &str = r#"{
  "stratagem_name": "short name of the tactic",
  "justification": "one sentence explaining why",
  "action": {"type": "MOVE", "position": {"x": 0.0, "y": 0.0}}
         | {"type": "ATTACK", "targetId": "<enemy id>"}
         | {"type": "HOLD"}
}"#;
