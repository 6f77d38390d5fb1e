//! Swarm Skirmish - Headless Runner
//!
//! Sets up the async runtime, wires one decision oracle per swarm, runs the
//! battle until a swarm is eliminated (or the time limit / Ctrl-C), then
//! prints the retained event log.

use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;

use swarm_skirmish::core::config::SimulationConfig;
use swarm_skirmish::core::error::Result;
use swarm_skirmish::llm::{BackendSpec, DecisionOracle, LlmOracle, OracleSet};
use swarm_skirmish::simulation::Simulation;
use swarm_skirmish::world::SimPhase;

/// Headless Swarm Skirmish - LLM-driven drone swarms fight it out
#[derive(Parser, Debug)]
#[command(name = "swarm-skirmish")]
#[command(about = "Run a red vs blue drone battle with one language model per swarm")]
struct Args {
    /// Red swarm backend, `cloud:<model>` or `local:<model>`
    #[arg(long, default_value = "cloud:gemini-2.0-flash")]
    red: String,

    /// Blue swarm backend, `cloud:<model>` or `local:<model>`
    #[arg(long, default_value = "local:llama3.1")]
    blue: String,

    /// TOML file overriding simulation defaults
    #[arg(long)]
    config: Option<PathBuf>,

    /// Drones per swarm
    #[arg(long)]
    swarm_size: Option<u32>,

    /// Random seed for a reproducible layout
    #[arg(long)]
    seed: Option<u64>,

    /// Stop after this many seconds even without a winner
    #[arg(long, default_value_t = 300)]
    duration: u64,

    /// Seconds between status lines
    #[arg(long, default_value_t = 5)]
    status_every: u64,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "swarm_skirmish=info".into()),
        )
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => SimulationConfig::from_toml_file(path)?,
        None => SimulationConfig::default(),
    };
    if let Some(size) = args.swarm_size {
        config.swarm_size = size;
    }
    if args.seed.is_some() {
        config.seed = args.seed;
    }

    let red: BackendSpec = args.red.parse()?;
    let blue: BackendSpec = args.blue.parse()?;

    let oracles = OracleSet::new(oracle_for(&red, &config), oracle_for(&blue, &config));
    for (swarm, label) in oracles.unavailable() {
        tracing::warn!(%swarm, backend = %label, "oracle unavailable; its drones will idle");
    }

    let rt = Runtime::new()?;
    rt.block_on(run(config, oracles, &args))
}

fn oracle_for(spec: &BackendSpec, config: &SimulationConfig) -> Arc<dyn DecisionOracle> {
    Arc::new(LlmOracle::new(spec.build(config), spec.to_string()))
}

async fn run(config: SimulationConfig, oracles: OracleSet, args: &Args) -> Result<()> {
    let sim = Simulation::new(config, oracles)?;
    println!("\n=== SWARM SKIRMISH ===");
    println!("red: {}  blue: {}  seed: {}", args.red, args.blue, sim.seed());
    println!();

    sim.start()?;

    let deadline = tokio::time::sleep(Duration::from_secs(args.duration));
    tokio::pin!(deadline);
    let mut status = tokio::time::interval(Duration::from_secs(args.status_every.max(1)));
    // Outcome polling is independent of how often status is printed
    let mut poll = tokio::time::interval(Duration::from_millis(250));

    loop {
        tokio::select! {
            _ = &mut deadline => {
                tracing::info!("time limit reached");
                break;
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted");
                break;
            }
            _ = status.tick() => {
                println!("{}", sim.status());
            }
            _ = poll.tick() => {
                if sim.state().phase() == SimPhase::Stopped {
                    break;
                }
            }
        }
    }
    sim.stop();

    let final_status = sim.status();
    println!();
    println!("=== EVENT LOG ===");
    for entry in sim.state().log().entries() {
        println!("{}", entry);
    }
    println!();
    match final_status.outcome {
        Some(outcome) => println!("Result: {} after {} ticks", outcome, final_status.tick),
        None => println!(
            "No winner after {} ticks (red {} / blue {} active)",
            final_status.tick, final_status.red_active, final_status.blue_active
        ),
    }
    Ok(())
}
