pub mod principle;
pub mod runtime;
pub mod scheduler;
pub mod tick;

pub use principle::{rotate, PrincipleClock, PRINCIPLES};
pub use runtime::{Simulation, SimulationStatus};
pub use scheduler::{apply_decision, DecisionScheduler, InFlightGuard, ThinkOutcome};
pub use tick::{resolve_tick, step, TickReport};
