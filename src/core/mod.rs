pub mod config;
pub mod error;
pub mod types;

pub use config::{SimulationConfig, MAX_HEALTH};
pub use error::{Result, SwarmError};
pub use types::{AgentId, Swarm, Tick, Vec2};
