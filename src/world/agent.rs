//! Agents and their tactical status

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::core::config::MAX_HEALTH;
use crate::core::types::{AgentId, Swarm, Vec2};

/// What an agent is currently doing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AgentStatus {
    Idle,
    Moving,
    /// Waiting on the decision oracle
    Assessing,
    Attacking,
    /// Health reached zero; permanent
    Disabled,
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A single drone in one of the two swarms
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    pub position: Vec2,
    pub health: u8,
    pub status: AgentStatus,
    pub target_position: Option<Vec2>,
    /// Lookup key into the roster, never ownership
    pub target_id: Option<AgentId>,
    /// Name of the last stratagem applied to this agent
    pub last_stratagem: Option<String>,
}

impl Agent {
    pub fn new(id: AgentId, position: Vec2) -> Self {
        Self {
            id,
            position,
            health: MAX_HEALTH,
            status: AgentStatus::Idle,
            target_position: None,
            target_id: None,
            last_stratagem: None,
        }
    }

    pub fn swarm(&self) -> Swarm {
        self.id.swarm
    }

    pub fn is_disabled(&self) -> bool {
        self.status == AgentStatus::Disabled
    }

    pub fn is_active(&self) -> bool {
        !self.is_disabled()
    }

    /// Drop any intent and go idle
    pub fn go_idle(&mut self) {
        self.status = AgentStatus::Idle;
        self.target_id = None;
        self.target_position = None;
    }

    /// Subtract damage, saturating at zero. Returns true if this hit disabled the agent.
    pub fn take_damage(&mut self, amount: u8) -> bool {
        if self.is_disabled() {
            return false;
        }
        self.health = self.health.saturating_sub(amount);
        if self.health == 0 {
            self.status = AgentStatus::Disabled;
            self.target_id = None;
            self.target_position = None;
            true
        } else {
            false
        }
    }
}
