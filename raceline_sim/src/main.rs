//! Raceline Simulation CLI
//!
//! Runs deterministic race scenarios against the engine.
//!
//! Usage:
//!   raceline-sim --seed 42 --scenario sprint
//!   raceline-sim --seeds 100  # CI mode

use clap::Parser;
use raceline_core::EngineConfig;
use raceline_sim::scenarios::ScenarioId;
use raceline_sim::{ScenarioResult, ScenarioRunner};
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

/// Raceline Deterministic Simulation CLI
#[derive(Parser, Debug)]
#[command(name = "raceline-sim")]
#[command(about = "Run deterministic race scenarios against the Raceline engine", long_about = None)]
struct Args {
    /// Master seed for determinism (0 = random from time)
    #[arg(short, long, default_value = "42")]
    seed: u64,

    /// Scenario to run (sprint, fail_overlap, loop_laps, skipped_checkpoint, mounted, debounce_burst, all)
    #[arg(short = 'S', long, default_value = "all")]
    scenario: String,

    /// Number of consecutive seeds to test (for CI mode)
    #[arg(long, default_value = "1")]
    seeds: usize,

    /// Simulation duration in seconds (default: each scenario's own)
    #[arg(short, long)]
    duration: Option<f64>,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// JSON output for CI parsing
    #[arg(long)]
    json: bool,

    /// Export per-tick positions and events to a JSON file
    #[arg(long)]
    export: Option<String>,

    /// Engine config JSON (missing fields take defaults)
    #[arg(long)]
    config: Option<String>,
}

fn load_engine_config(path: Option<&str>) -> Result<EngineConfig, String> {
    let Some(path) = path else {
        return Ok(EngineConfig::default());
    };
    let text = std::fs::read_to_string(path).map_err(|e| format!("{}: {}", path, e))?;
    EngineConfig::from_json(&text).map_err(|e| format!("{}: {}", path, e))
}

fn runner_for(args: &Args, seed: u64, engine_config: &EngineConfig) -> ScenarioRunner {
    let runner = ScenarioRunner::new(seed).with_engine_config(engine_config.clone());
    match args.duration {
        Some(secs) => runner.with_duration(secs),
        None => runner,
    }
}

fn main() {
    let args = Args::parse();

    // Initialize logging
    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }

    if !args.json {
        info!("Raceline Simulator v{}", env!("CARGO_PKG_VERSION"));
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    }

    let engine_config = load_engine_config(args.config.as_deref()).unwrap_or_else(|e| {
        eprintln!("Error: bad engine config: {}", e);
        std::process::exit(1);
    });

    // Parse scenarios
    let scenarios: Vec<ScenarioId> = if args.scenario == "all" {
        ScenarioId::all()
    } else {
        vec![args.scenario.parse().unwrap_or_else(|e| {
            eprintln!("Error: {}", e);
            let names: Vec<&str> = ScenarioId::all().iter().map(|s| s.name()).collect();
            eprintln!("Available scenarios: {}, all", names.join(", "));
            std::process::exit(1);
        })]
    };

    // Determine base seed
    let base_seed = if args.seed == 0 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(42)
    } else {
        args.seed
    };

    // Handle --export mode
    if let Some(export_path) = &args.export {
        if scenarios.len() > 1 {
            eprintln!("Error: --export only supports a single scenario, not 'all'");
            std::process::exit(1);
        }

        info!("Running with export to: {}", export_path);
        let scenario = scenarios[0];
        let (result, export) = runner_for(&args, base_seed, &engine_config).run_with_export(scenario);

        if let Err(e) = export.write_to_file(export_path) {
            error!("Failed to write export: {:?}", e);
        } else {
            info!("Exported {} frames to {}", export.frames.len(), export_path);
        }

        if result.passed {
            info!("✓ {} (seed={}) PASSED", scenario.name(), base_seed);
        } else {
            error!(
                "✗ {} FAILED: {}",
                scenario.name(),
                result.failure_reason.as_deref().unwrap_or("unknown")
            );
            std::process::exit(1);
        }
        return;
    }

    // Run simulations
    let mut all_results: Vec<ScenarioResult> = Vec::new();
    let mut failed_count = 0;

    for seed_offset in 0..args.seeds {
        let seed = base_seed.wrapping_add(seed_offset as u64);
        let runner = runner_for(&args, seed, &engine_config);

        for scenario in &scenarios {
            let result = runner.run(*scenario);

            if !args.json {
                if result.passed {
                    info!("✓ {} (seed={}) PASSED", scenario.name(), seed);
                } else {
                    error!(
                        "✗ {} (seed={}) FAILED: {}",
                        scenario.name(),
                        seed,
                        result.failure_reason.as_deref().unwrap_or("unknown")
                    );
                }
            }

            if !result.passed {
                failed_count += 1;
            }
            all_results.push(result);
        }
    }

    // Summary
    let total = all_results.len();
    let passed = total - failed_count;

    if args.json {
        let summary = serde_json::json!({
            "total": total,
            "passed": passed,
            "failed": failed_count,
            "results": all_results.iter().map(|r| {
                serde_json::json!({
                    "scenario": r.scenario.name(),
                    "seed": r.seed,
                    "passed": r.passed,
                    "ticks": r.total_ticks,
                    "time_secs": r.final_time_secs,
                    "finished": r.events.finished,
                    "failed": r.events.failed,
                    "records": r.records,
                    "failure_reason": r.failure_reason,
                })
            }).collect::<Vec<_>>(),
        });
        match serde_json::to_string_pretty(&summary) {
            Ok(text) => println!("{}", text),
            Err(e) => eprintln!("Error: {}", e),
        }
    } else {
        info!("");
        info!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

        if failed_count == 0 {
            info!("✅ All {} scenario runs passed!", total);
        } else {
            error!("❌ {}/{} scenario runs failed!", failed_count, total);
            for result in all_results.iter().filter(|r| !r.passed) {
                error!(
                    "  - {} seed={}: {}",
                    result.scenario.name(),
                    result.seed,
                    result.failure_reason.as_deref().unwrap_or("unknown")
                );
            }
        }
    }

    // Exit with proper code for CI
    if failed_count > 0 {
        std::process::exit(1);
    }
}
