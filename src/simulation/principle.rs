//! Guiding principle rotation
//!
//! A shared doctrine string that every agent's prompt quotes. It advances one
//! step per period and wraps around.

use std::sync::Arc;
use tokio::time::MissedTickBehavior;

use crate::events::LogCategory;
use crate::world::{RunToken, SharedState};

pub const PRINCIPLES: &[&str] = &[
    "Concentrate force: several drones on one target beat scattered duels.",
    "Preserve the swarm: damaged drones should withdraw behind healthy ones.",
    "Seize the initiative: strike before the enemy closes the distance.",
    "Hold the center: control the middle of the arena and let the enemy come.",
    "Envelop the flanks: approach from the edges, not head on.",
    "Hunt the weak: finish damaged enemies before engaging fresh ones.",
    "Stay mobile: never stand still within enemy attack range.",
    "Mutual support: stay within reach of at least one friendly drone.",
];

/// Cursor into a fixed, ordered list of principles
#[derive(Debug, Clone)]
pub struct PrincipleClock {
    principles: &'static [&'static str],
    index: usize,
}

impl Default for PrincipleClock {
    fn default() -> Self {
        Self::new(PRINCIPLES)
    }
}

impl PrincipleClock {
    pub fn new(principles: &'static [&'static str]) -> Self {
        Self {
            principles,
            index: 0,
        }
    }

    /// Resume from the principle currently in effect (start of list if unknown)
    pub fn resume_at(principles: &'static [&'static str], current: &str) -> Self {
        let index = principles.iter().position(|p| *p == current).unwrap_or(0);
        Self { principles, index }
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn current(&self) -> &'static str {
        self.principles.get(self.index).copied().unwrap_or_default()
    }

    /// Step to the next principle, wrapping after the last
    pub fn advance(&mut self) -> &'static str {
        if !self.principles.is_empty() {
            self.index = (self.index + 1) % self.principles.len();
        }
        self.current()
    }
}

/// Commit the next principle to shared state and announce it
pub fn rotate(state: &SharedState, clock: &mut PrincipleClock) {
    let principle = clock.advance();
    state.set_principle(principle);
    state
        .log()
        .info(LogCategory::Principle, format!("New guiding principle: {}", principle));
}

/// Fixed-period rotation clock; exits when the token is revoked
pub async fn run_principle_loop(state: Arc<SharedState>, token: RunToken) {
    let mut clock = PrincipleClock::resume_at(PRINCIPLES, &state.principle());
    let mut interval = tokio::time::interval(state.config().principle_period());
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval.tick().await;

    loop {
        interval.tick().await;
        if !state.is_live(&token) {
            break;
        }
        rotate(&state, &mut clock);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_advance_wraps_after_last() {
        let mut clock = PrincipleClock::default();
        assert_eq!(clock.current(), PRINCIPLES[0]);
        for i in 1..PRINCIPLES.len() {
            assert_eq!(clock.advance(), PRINCIPLES[i]);
            assert_eq!(clock.index(), i);
        }
        assert_eq!(clock.advance(), PRINCIPLES[0]);
        assert_eq!(clock.index(), 0);
    }

    #[test]
    fn test_resume_at_known_and_unknown() {
        let clock = PrincipleClock::resume_at(PRINCIPLES, PRINCIPLES[3]);
        assert_eq!(clock.index(), 3);
        let clock = PrincipleClock::resume_at(PRINCIPLES, "something else");
        assert_eq!(clock.index(), 0);
    }

    #[test]
    fn test_empty_list_is_harmless() {
        let mut clock = PrincipleClock::new(&[]);
        assert_eq!(clock.advance(), "");
    }
}
