//! Swarm Skirmish - two drone swarms steered by language-model stratagems

pub mod core;
pub mod events;
pub mod llm;
pub mod simulation;
pub mod world;
