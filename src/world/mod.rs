//! Agents, the roster they live in, and the shared state holder

pub mod agent;
pub mod state;

pub use agent::{Agent, AgentStatus};
pub use state::{BattleOutcome, RunToken, SharedState, SimPhase, World};
