//! End-to-end scenario runs through the public harness API.

use raceline_sim::scenarios::ScenarioId;
use raceline_sim::{ScenarioRunner, SimConfig};

#[test]
fn test_every_scenario_passes() {
    let runner = ScenarioRunner::new(42);
    for scenario in ScenarioId::all() {
        let result = runner.run(scenario);
        assert!(
            result.passed,
            "{} failed: {:?}",
            scenario,
            result.failure_reason
        );
    }
}

#[test]
fn test_same_seed_same_results() {
    let first = ScenarioRunner::new(7).run(ScenarioId::Sprint);
    let second = ScenarioRunner::new(7).run(ScenarioId::Sprint);

    assert_eq!(first.events, second.events);
    assert_eq!(first.records, second.records);
}

#[test]
fn test_loop_laps_hold_across_seeds() {
    for seed in 1..=3 {
        let result = ScenarioRunner::new(seed).run(ScenarioId::LoopLaps);
        assert!(result.passed, "seed {}: {:?}", seed, result.failure_reason);
        assert_eq!(result.events.finished, 3);
    }
}

#[test]
fn test_noise_free_mounted_run() {
    let config = SimConfig {
        seed: 5,
        position_noise: 0.0,
        ..Default::default()
    };
    let result = ScenarioRunner::new(5)
        .with_config(config)
        .run(ScenarioId::Mounted);

    assert!(result.passed, "{:?}", result.failure_reason);
    assert_eq!(result.records.len(), 1);
    assert_eq!(result.records[0].actor_name, "Walker");
}

#[test]
fn test_export_captures_every_tick() {
    let runner = ScenarioRunner::new(42).with_tick_rate(20);
    let (result, export) = runner.run_with_export(ScenarioId::FailOverlap);

    assert!(result.passed, "{:?}", result.failure_reason);
    assert_eq!(export.frames.len() as u64, result.total_ticks);
    assert!(export.passed);

    let kinds: Vec<&str> = export
        .frames
        .iter()
        .flat_map(|f| f.events.iter().map(|e| e.kind.as_str()))
        .collect();
    assert_eq!(kinds, vec!["started", "checkpoint", "failed"]);
}
