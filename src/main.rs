//! Meridian Simulation Engine CLI
//!
//! Runs the same synthetic datacenter scenario under each requested
//! placement strategy and compares cost, completion and energy outcomes.

use std::fs;
use std::rc::Rc;

use anyhow::{Context, bail};
use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use meridian_simulation_engine::{
    cpu::{ScalingDriver, ScalingGovernor},
    fragment::{BoundaryPolicy, FragmentSequence},
    scheduler::{PredictiveConfig, PredictiveScheduler, Scheduler, cost_efficient, lowest_cost},
    simulation::{HostSpec, Simulation, SimulationResult, Task},
    traces::{CostPattern, CostTraceGenerator, carbon_samples},
    HostCapacity,
};

const HOUR_MS: i64 = 3_600_000;

#[derive(Parser, Debug)]
#[command(name = "meridian-sim")]
#[command(about = "Simulate datacenter placement strategies over cost traces", long_about = None)]
struct Args {
    /// Simulation duration in hours
    #[arg(short, long, default_value_t = 48.0)]
    duration: f64,

    /// Number of hosts in the topology
    #[arg(long, default_value_t = 6)]
    hosts: usize,

    /// Number of tasks to simulate
    #[arg(short, long, default_value_t = 100)]
    tasks: usize,

    /// Cost pattern (stable, volatile, diurnal, spike)
    #[arg(short, long, default_value = "diurnal")]
    pattern: String,

    /// Strategies to compare (comma-separated: lowest-cost,cost-efficient,predictive)
    #[arg(short, long, default_value = "lowest-cost,cost-efficient,predictive")]
    strategies: String,

    /// Base cost per host-hour
    #[arg(long, default_value_t = 500.0)]
    base_cost: f64,

    /// Cost ceiling for the cost-efficient strategy
    #[arg(long, default_value_t = 600.0)]
    cost_ceiling: f64,

    /// RNG seed for trace and workload generation
    #[arg(long, default_value_t = 42)]
    seed: u64,

    /// Output JSON file path (optional)
    #[arg(short, long)]
    output: Option<String>,
}

fn parse_pattern(name: &str) -> anyhow::Result<CostPattern> {
    match name {
        "stable" => Ok(CostPattern::Stable),
        "volatile" => Ok(CostPattern::Volatile),
        "diurnal" => Ok(CostPattern::Diurnal),
        "spike" => Ok(CostPattern::Spike),
        other => bail!("unknown cost pattern: {other}"),
    }
}

fn build_scheduler(name: &str, args: &Args) -> anyhow::Result<Box<dyn Scheduler>> {
    match name {
        "lowest-cost" => Ok(Box::new(lowest_cost())),
        "cost-efficient" => Ok(Box::new(cost_efficient(args.cost_ceiling))),
        "predictive" => Ok(Box::new(PredictiveScheduler::new(PredictiveConfig {
            max_cost: args.cost_ceiling * 1.5,
            ..PredictiveConfig::default()
        }))),
        other => bail!("unknown strategy: {other}"),
    }
}

/// Inputs shared by every strategy run: per-host cost and carbon traces
/// plus the task workload, all derived from one seed.
struct Scenario {
    cost_traces: Vec<Rc<FragmentSequence>>,
    carbon_trace: Rc<FragmentSequence>,
    tasks: Vec<Task>,
}

fn generate_scenario(args: &Args, pattern: CostPattern, horizon: i64) -> anyhow::Result<Scenario> {
    let mut rng = StdRng::seed_from_u64(args.seed);

    let cost_traces = (0..args.hosts)
        .map(|_| {
            // Each host gets a different but similar curve
            let variation = rng.gen_range(0.8..1.2);
            let generator =
                CostTraceGenerator::new(pattern, args.base_cost).with_variation(variation);
            let records = (args.duration.ceil() as usize).max(1);
            Rc::new(generator.generate_sequence(0, horizon, records, &mut rng))
        })
        .collect();

    let samples = carbon_samples(0, horizon, 15 * 60 * 1000, 300.0, &mut rng);
    let carbon_trace = Rc::new(FragmentSequence::from_samples(samples, BoundaryPolicy::Extend)?);

    let tasks = (0..args.tasks)
        .map(|i| {
            let arrival = (rng.gen_range(0.0..args.duration * 0.8) * HOUR_MS as f64) as i64;
            let duration = (rng.gen_range(1.0..20.0) * HOUR_MS as f64) as i64;
            let vcpus = rng.gen_range(1..=4);
            Task::new(
                i as u64,
                arrival,
                duration,
                vcpus,
                1_024 * vcpus as i64,
                rng.gen_range(200.0..1_500.0),
            )
        })
        .collect();

    Ok(Scenario {
        cost_traces,
        carbon_trace,
        tasks,
    })
}

fn run_strategy(
    name: &str,
    args: &Args,
    scenario: &Scenario,
    horizon: i64,
) -> anyhow::Result<SimulationResult> {
    let mut sim = Simulation::new(0, build_scheduler(name, args)?);

    for (i, trace) in scenario.cost_traces.iter().enumerate() {
        sim.add_host(HostSpec {
            name: format!("host{}", i + 1),
            capacity: HostCapacity {
                vcpus: 16,
                cpu_mhz: 3_200.0 * 16.0,
                memory_mb: 65_536,
            },
            governor: ScalingGovernor::OnDemand { up_threshold: 0.8 },
            driver: ScalingDriver {
                min_freq_mhz: 800.0,
                max_freq_mhz: 3_200.0 * 16.0,
                idle_power_w: 100.0,
                max_power_w: 400.0,
            },
            cost_trace: Some(Rc::clone(trace)),
            carbon_trace: Some(Rc::clone(&scenario.carbon_trace)),
        })
        .with_context(|| format!("adding host{} for strategy {name}", i + 1))?;
    }

    for task in scenario.tasks.iter().cloned() {
        sim.add_task(task);
    }

    Ok(sim.run(horizon))
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let pattern = parse_pattern(&args.pattern)?;
    let horizon = (args.duration * HOUR_MS as f64) as i64;

    println!("Meridian Simulation Engine");
    println!("  Duration: {} hours", args.duration);
    println!("  Hosts: {}", args.hosts);
    println!("  Tasks: {}", args.tasks);
    println!("  Pattern: {}", args.pattern);
    println!("  Seed: {}\n", args.seed);

    let scenario = generate_scenario(&args, pattern, horizon)?;

    let strategy_names: Vec<&str> = args.strategies.split(',').map(|s| s.trim()).collect();
    let mut results = Vec::new();
    for name in &strategy_names {
        let result = run_strategy(name, &args, &scenario, horizon)?;
        results.push(result);
    }

    println!(
        "{:<16} {:>14} {:>12} {:>10} {:>12} {:>14}",
        "Strategy", "Cost", "Completed", "Pending", "Deferrals", "Energy (kWh)"
    );
    println!("{}", "-".repeat(82));
    for result in &results {
        println!(
            "{:<16} {:>14.2} {:>9}/{:<2} {:>10} {:>12} {:>14.2}",
            result.scheduler,
            result.total_cost,
            result.completed_tasks,
            result.total_tasks,
            result.pending_tasks,
            result.deferred_placements,
            result.total_energy_joules / 3_600_000.0,
        );
    }

    if results.len() > 1 {
        let baseline = results
            .iter()
            .max_by(|a, b| a.total_cost.total_cmp(&b.total_cost))
            .unwrap();
        println!("\nCost savings vs {} baseline:", baseline.scheduler);
        for result in &results {
            if result.scheduler != baseline.scheduler {
                let savings = baseline.total_cost - result.total_cost;
                let pct = if baseline.total_cost > 0.0 {
                    savings / baseline.total_cost * 100.0
                } else {
                    0.0
                };
                println!("  {:<16} {:>12.2} ({pct:>5.1}%)", result.scheduler, savings);
            }
        }
    }

    if let Some(path) = &args.output {
        let json = serde_json::to_string_pretty(&results)?;
        fs::write(path, json).with_context(|| format!("writing results to {path}"))?;
        println!("\nResults written to {path}");
    }

    Ok(())
}
