//! Tick engine driven through the shared state

use proptest::prelude::*;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use swarm_skirmish::core::config::{SimulationConfig, MAX_HEALTH};
use swarm_skirmish::core::types::{AgentId, Swarm, Vec2};
use swarm_skirmish::events::LogCategory;
use swarm_skirmish::simulation::{resolve_tick, step};
use swarm_skirmish::world::{Agent, AgentStatus, BattleOutcome, SharedState, SimPhase, World};

fn red(n: u32) -> AgentId {
    AgentId::new(Swarm::Red, n)
}

fn blue(n: u32) -> AgentId {
    AgentId::new(Swarm::Blue, n)
}

fn attacker(id: AgentId, pos: Vec2, target: AgentId) -> Agent {
    let mut agent = Agent::new(id, pos);
    agent.status = AgentStatus::Attacking;
    agent.target_id = Some(target);
    agent
}

fn running(world: World) -> SharedState {
    let state = SharedState::new(SimulationConfig::default(), world, "Hold fast");
    state.set_phase(SimPhase::Running);
    state
}

fn victory_entries(state: &SharedState) -> Vec<String> {
    state
        .log()
        .entries()
        .into_iter()
        .filter(|e| e.category == LogCategory::Victory)
        .map(|e| e.message)
        .collect()
}

#[test]
fn test_out_of_range_attacker_approaches() {
    let state = running(World::new(vec![
        attacker(red(1), Vec2::new(100.0, 100.0), blue(1)),
        Agent::new(blue(1), Vec2::new(100.0, 300.0)),
    ]));
    let mut rng = ChaCha8Rng::seed_from_u64(1);

    step(&state, &mut rng);

    let agent = state.agent(red(1)).unwrap();
    assert_eq!(agent.position, Vec2::new(100.0, 101.0));
    assert_eq!(agent.status, AgentStatus::Attacking);
    assert_eq!(state.agent(blue(1)).unwrap().health, MAX_HEALTH);
}

#[test]
fn test_in_range_target_disabled_after_twenty_ticks() {
    let state = running(World::new(vec![
        attacker(red(1), Vec2::new(100.0, 100.0), blue(1)),
        Agent::new(blue(1), Vec2::new(100.0, 150.0)),
        Agent::new(blue(2), Vec2::new(700.0, 500.0)),
    ]));
    let mut rng = ChaCha8Rng::seed_from_u64(2);

    for tick in 1..=19u64 {
        step(&state, &mut rng);
        let target = state.agent(blue(1)).unwrap();
        assert_eq!(target.health as u64, 100 - 5 * tick);
        assert_eq!(target.status, AgentStatus::Idle);
    }

    let report = step(&state, &mut rng);
    let target = state.agent(blue(1)).unwrap();
    assert_eq!(target.health, 0);
    assert_eq!(target.status, AgentStatus::Disabled);

    let agent = state.agent(red(1)).unwrap();
    assert_eq!(agent.status, AgentStatus::Idle);
    assert_eq!(agent.target_id, None);
    assert_eq!(report.disabled, vec![(red(1), blue(1))]);
    // blue-2 is still up
    assert_eq!(report.outcome, None);
    assert_eq!(state.phase(), SimPhase::Running);
}

#[test]
fn test_elimination_stops_run_with_single_victory_entry() {
    let mut weak = Agent::new(blue(1), Vec2::new(10.0, 0.0));
    weak.health = 5;
    let state = running(World::new(vec![
        attacker(red(1), Vec2::new(0.0, 0.0), blue(1)),
        attacker(red(2), Vec2::new(0.0, 20.0), blue(1)),
        weak,
    ]));
    let mut rng = ChaCha8Rng::seed_from_u64(3);

    let report = step(&state, &mut rng);
    assert_eq!(report.outcome, Some(BattleOutcome::Victory(Swarm::Red)));
    assert_eq!(state.phase(), SimPhase::Stopped);
    assert_eq!(state.outcome(), Some(BattleOutcome::Victory(Swarm::Red)));

    // Further steps must not announce again
    step(&state, &mut rng);
    step(&state, &mut rng);

    let victories = victory_entries(&state);
    assert_eq!(victories.len(), 1);
    assert!(victories[0].starts_with("red swarm is victorious"));
}

#[test]
fn test_second_attacker_on_same_victim_is_demoted() {
    let mut weak = Agent::new(blue(1), Vec2::new(10.0, 0.0));
    weak.health = 5;
    let state = running(World::new(vec![
        attacker(red(1), Vec2::new(0.0, 0.0), blue(1)),
        attacker(red(2), Vec2::new(0.0, 20.0), blue(1)),
        weak,
        Agent::new(blue(2), Vec2::new(700.0, 500.0)),
    ]));
    let report = step(&state, &mut ChaCha8Rng::seed_from_u64(4));

    assert_eq!(state.agent(blue(1)).unwrap().health, 0);
    assert_eq!(report.demoted, vec![red(2)]);
    assert_eq!(state.agent(red(2)).unwrap().status, AgentStatus::Idle);
}

#[test]
fn test_both_swarms_empty_is_a_draw() {
    let mut world = World::new(vec![
        Agent::new(red(1), Vec2::default()),
        Agent::new(blue(1), Vec2::default()),
    ]);
    for agent in &mut world.agents {
        agent.health = 0;
        agent.status = AgentStatus::Disabled;
    }
    let state = running(world);
    let report = step(&state, &mut ChaCha8Rng::seed_from_u64(7));

    assert_eq!(report.outcome, Some(BattleOutcome::Draw));
    assert_eq!(state.outcome(), Some(BattleOutcome::Draw));
    let victories = victory_entries(&state);
    assert_eq!(victories.len(), 1);
    assert!(victories[0].starts_with("Draw"));
}

#[test]
fn test_roster_order_decides_mutual_duel() {
    let mut red1 = attacker(red(1), Vec2::new(0.0, 0.0), blue(1));
    red1.health = 5;
    let mut blue1 = attacker(blue(1), Vec2::new(10.0, 0.0), red(1));
    blue1.health = 5;
    let state = running(World::new(vec![red1, blue1]));

    let report = step(&state, &mut ChaCha8Rng::seed_from_u64(6));
    assert_eq!(report.outcome, Some(BattleOutcome::Victory(Swarm::Red)));
    assert_eq!(state.agent(red(1)).unwrap().health, 5);
}

fn arb_world() -> impl Strategy<Value = World> {
    let agent = (0.0f32..800.0, 0.0f32..600.0, 0u8..=100, 0usize..4, 1u32..=4, 0.0f32..800.0, 0.0f32..600.0);
    (
        prop::collection::vec(agent.clone(), 4),
        prop::collection::vec(agent, 4),
    )
        .prop_map(|(reds, blues)| {
            let mut agents = Vec::new();
            for (swarm, specs) in [(Swarm::Red, reds), (Swarm::Blue, blues)] {
                for (n, (x, y, health, mode, target, tx, ty)) in specs.into_iter().enumerate() {
                    let mut agent = Agent::new(AgentId::new(swarm, n as u32 + 1), Vec2::new(x, y));
                    agent.health = health;
                    match mode {
                        _ if health == 0 => agent.status = AgentStatus::Disabled,
                        1 => {
                            agent.status = AgentStatus::Moving;
                            agent.target_position = Some(Vec2::new(tx, ty));
                        }
                        2 => {
                            agent.status = AgentStatus::Attacking;
                            agent.target_id = Some(AgentId::new(swarm.opponent(), target));
                        }
                        3 => agent.status = AgentStatus::Assessing,
                        _ => {}
                    }
                    agents.push(agent);
                }
            }
            World::new(agents)
        })
}

proptest! {
    #[test]
    fn prop_tick_preserves_invariants(world in arb_world(), seed in any::<u64>()) {
        let config = SimulationConfig::default();
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let (next, report) = resolve_tick(&world, &config, &mut rng);

        prop_assert_eq!(next.tick, world.tick + 1);
        prop_assert_eq!(next.agents.len(), world.agents.len());
        for (before, after) in world.agents.iter().zip(&next.agents) {
            prop_assert_eq!(before.id, after.id);
            prop_assert!(after.health <= MAX_HEALTH);
            prop_assert!(after.health <= before.health);
            prop_assert_eq!(after.health == 0, after.status == AgentStatus::Disabled);
            if before.is_disabled() {
                // Disabled drones never move, heal or take further damage
                prop_assert_eq!(after.position, before.position);
                prop_assert_eq!(after.health, 0);
            }
            if after.status == AgentStatus::Attacking {
                let target = after.target_id.and_then(|t| next.get(t));
                prop_assert!(target.is_some_and(|t| t.is_active() && t.swarm() != after.swarm()));
            }
        }
        prop_assert_eq!(report.outcome, next.outcome());
    }
}
