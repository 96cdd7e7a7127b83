//! Scenario runner - drives a race engine through scripted scenarios.

use crate::context::SimContext;
use crate::exporter::{ActorPosition, RecordSummary, SimEvent, SimExport, SimFrame};
use crate::scenarios::{ScenarioId, LOOP_LAP_LENGTH, LOOP_SPEED};
use crate::world::{SimConfig, SimWorld};

use raceline_core::{
    EngineConfig, FailReason, MemoryStorage, RaceEngine, RaceError, RaceEvent, RaceStorage, Record,
    RecordId, Route, RouteId, WorkHandle,
};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// Race events seen during a run, by kind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventCounts {
    pub started: usize,
    pub checkpoints: usize,
    pub finished: usize,
    pub failed: usize,
    pub notices: usize,
}

impl EventCounts {
    fn observe(&mut self, event: &RaceEvent) {
        match event {
            RaceEvent::Started { .. } => self.started += 1,
            RaceEvent::Checkpoint { .. } => self.checkpoints += 1,
            RaceEvent::Finished { .. } => self.finished += 1,
            RaceEvent::Failed { .. } => self.failed += 1,
            RaceEvent::Notice { .. } => self.notices += 1,
        }
    }
}

/// Results from running a scenario.
#[derive(Debug, Clone)]
pub struct ScenarioResult {
    /// Scenario that was run
    pub scenario: ScenarioId,

    /// Seed used
    pub seed: u64,

    /// Whether scenario passed all assertions
    pub passed: bool,

    /// Total ticks executed
    pub total_ticks: u64,

    /// Final simulation time in seconds
    pub final_time_secs: f64,

    pub events: EventCounts,

    /// Records held by the routes at the end, fastest first per route
    pub records: Vec<RecordSummary>,

    /// Ticks whose world snapshot failed
    pub snapshot_errors: u64,

    /// Route checks skipped under back-pressure
    pub skipped_checks: usize,

    /// Failure message if any
    pub failure_reason: Option<String>,
}

impl ScenarioResult {
    fn aborted(scenario: ScenarioId, seed: u64, reason: String) -> Self {
        Self {
            scenario,
            seed,
            passed: false,
            total_ticks: 0,
            final_time_secs: 0.0,
            events: EventCounts::default(),
            records: Vec::new(),
            snapshot_errors: 0,
            skipped_checks: 0,
            failure_reason: Some(reason),
        }
    }
}

/// Everything a scenario verdict looks at.
#[derive(Debug, Default)]
struct Outcome {
    events: EventCounts,
    fail_reasons: Vec<FailReason>,
    records: Vec<Record>,
    snapshot_errors: u64,
    still_racing: usize,
    storage_writes: usize,
    stored_names: Vec<String>,

    /// Export/import of the best record into a fresh engine
    transfer: Option<Result<usize, String>>,
}

/// Runs race scenarios.
pub struct ScenarioRunner {
    config: SimConfig,
    engine_config: EngineConfig,
}

impl ScenarioRunner {
    /// Creates a new scenario runner.
    pub fn new(seed: u64) -> Self {
        Self {
            config: SimConfig {
                seed,
                ..Default::default()
            },
            engine_config: EngineConfig::default(),
        }
    }

    /// Replaces the simulation config.
    pub fn with_config(mut self, config: SimConfig) -> Self {
        self.config = config;
        self
    }

    /// Replaces the engine config.
    pub fn with_engine_config(mut self, config: EngineConfig) -> Self {
        self.engine_config = config;
        self
    }

    /// Sets the tick rate.
    pub fn with_tick_rate(mut self, hz: u32) -> Self {
        self.config.tick_rate_hz = hz;
        self
    }

    /// Overrides the scenario's own duration.
    pub fn with_duration(mut self, secs: f64) -> Self {
        self.config.duration_secs = Some(secs);
        self
    }

    /// Runs a scenario and returns the result.
    pub fn run(&self, scenario: ScenarioId) -> ScenarioResult {
        self.execute(scenario, None)
    }

    /// Runs a scenario and records every tick into an export.
    pub fn run_with_export(&self, scenario: ScenarioId) -> (ScenarioResult, SimExport) {
        let mut export = SimExport::new(scenario.name(), self.config.seed);
        let result = self.execute(scenario, Some(&mut export));
        (result, export)
    }

    /// Each run gets its own single-threaded runtime with a paused clock,
    /// so persistence timers fire in a fixed order regardless of host speed.
    fn execute(&self, scenario: ScenarioId, export: Option<&mut SimExport>) -> ScenarioResult {
        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .start_paused(true)
            .build()
        {
            Ok(runtime) => runtime,
            Err(e) => {
                return ScenarioResult::aborted(scenario, self.config.seed, format!("runtime: {}", e))
            }
        };
        runtime.block_on(self.run_async(scenario, export))
    }

    /// Runs a scenario on the current runtime.
    pub async fn run_async(
        &self,
        scenario: ScenarioId,
        mut export: Option<&mut SimExport>,
    ) -> ScenarioResult {
        info!("Starting scenario: {} (seed={})", scenario.name(), self.config.seed);
        let seed = self.config.seed;
        let plan = scenario.plan();
        let duration = self
            .config
            .duration_secs
            .unwrap_or_else(|| scenario.default_duration_secs());
        let target_ticks = (duration * f64::from(self.config.tick_rate_hz)) as u64;

        let mut world = SimWorld::new(self.config.clone());
        for runner in plan.runners {
            world.oracle.spawn_runner(runner);
        }

        let mut engine = RaceEngine::new(
            world.context.clone(),
            MemoryStorage::new(),
            self.engine_config.clone(),
        );

        let route_ids: Vec<RouteId> = plan.routes.iter().map(Route::id).collect();
        let mut receivers = Vec::new();
        for route in plan.routes {
            let id = route.id();
            let saved = match engine.add_route(route) {
                Ok(handle) => handle.await.map_err(RaceError::from),
                Err(e) => Err(e),
            };
            if let Err(e) = saved {
                return ScenarioResult::aborted(scenario, seed, format!("add route: {}", e));
            }
            match engine.subscribe(id) {
                Ok(rx) => receivers.push(rx),
                Err(e) => return ScenarioResult::aborted(scenario, seed, format!("subscribe: {}", e)),
            }
        }

        let mut outcome = Outcome::default();
        let mut edits: Vec<WorkHandle<()>> = Vec::new();
        let mut skipped_checks = 0;

        for tick in 0..target_ticks {
            world.step();
            world.oracle.set_available(!plan.blackout_ticks.contains(&tick));

            if let (Some((at, count)), Some(&first)) = (plan.rename_burst, route_ids.first()) {
                if tick == at {
                    edits.extend(rename_burst(&mut engine, first, count));
                }
            }

            match engine.tick(&world.oracle) {
                Ok(report) => skipped_checks += report.skipped,
                Err(e) => {
                    debug!(tick, "Tick without snapshot: {}", e);
                    outcome.snapshot_errors += 1;
                }
            }
            engine.settle().await;

            let mut frame_events = Vec::new();
            for rx in &mut receivers {
                drain(rx, &mut outcome, &mut frame_events);
            }

            if let Some(export) = export.as_deref_mut() {
                export.add_frame(SimFrame {
                    time_sec: world.time_secs(),
                    actors: world.oracle.observed().iter().map(ActorPosition::from).collect(),
                    events: frame_events,
                });
            }

            if tick % 30 == 0 {
                debug!(
                    "  t={:.1}s | started={} | finished={} | failed={}",
                    world.time_secs(),
                    outcome.events.started,
                    outcome.events.finished,
                    outcome.events.failed
                );
            }
        }

        for edit in edits {
            if let Err(e) = edit.await {
                warn!("Route edit failed: {}", e);
            }
        }
        engine.settle().await;

        for id in &route_ids {
            outcome.records.extend(engine.records(*id).unwrap_or_default());
            outcome.still_racing += engine.with_route(*id, |r| r.racer_count()).unwrap_or(0);
        }

        let stored = engine
            .queue()
            .submit(|s: &mut MemoryStorage| {
                let names: Vec<String> = s.query_all_routes()?.into_iter().map(|doc| doc.name).collect();
                Ok((s.writes(), names))
            })
            .await;
        match stored {
            Ok((writes, names)) => {
                outcome.storage_writes = writes;
                outcome.stored_names = names;
            }
            Err(e) => warn!("Storage query failed: {}", e),
        }

        if scenario == ScenarioId::Sprint {
            if let (Some(&route), Some(best)) = (route_ids.first(), fastest(&outcome.records)) {
                let transfer = self
                    .transfer(&engine, route, best.id)
                    .await
                    .map_err(|e| e.to_string());
                outcome.transfer = Some(transfer);
            }
        }

        engine.shutdown().await;

        let verdict = verdict(scenario, &outcome);
        let passed = verdict.is_ok();
        let records: Vec<RecordSummary> = outcome.records.iter().map(RecordSummary::from).collect();

        if let Some(export) = export {
            export.finalize(passed, &outcome.records);
        }

        info!(
            "{} complete: {} started, {} finished, {} failed, {} records",
            scenario.name(),
            outcome.events.started,
            outcome.events.finished,
            outcome.events.failed,
            records.len()
        );

        ScenarioResult {
            scenario,
            seed,
            passed,
            total_ticks: target_ticks,
            final_time_secs: world.time_secs(),
            events: outcome.events,
            records,
            snapshot_errors: outcome.snapshot_errors,
            skipped_checks,
            failure_reason: verdict.err(),
        }
    }

    /// Share a route and one of its records with a fresh engine.
    ///
    /// Returns how many records the receiving route holds afterwards.
    async fn transfer(
        &self,
        source: &RaceEngine<SimContext, MemoryStorage>,
        route: RouteId,
        record: RecordId,
    ) -> raceline_core::Result<usize> {
        let route_text = source.export_route(route)?;
        let record_text = source.export_record(route, record)?;

        let mut replica = RaceEngine::new(
            SimContext::shared(),
            MemoryStorage::new(),
            self.engine_config.clone(),
        );
        let (imported, handle) = replica.import_route(&route_text)?;
        handle.await?;
        replica.import_record(&record_text)?.await?;

        let held = replica.records(imported)?.len();
        replica.shutdown().await;
        Ok(held)
    }
}

fn rename_burst(
    engine: &mut RaceEngine<SimContext, MemoryStorage>,
    route: RouteId,
    count: usize,
) -> Vec<WorkHandle<()>> {
    let mut handles = Vec::with_capacity(count);
    for i in 0..count {
        let name = format!("Editable v{}", i);
        match engine.update_route(route, move |r| r.set_name(name)) {
            Ok(handle) => handles.push(handle),
            Err(e) => warn!("Route edit rejected: {}", e),
        }
    }
    handles
}

fn drain(rx: &mut broadcast::Receiver<RaceEvent>, outcome: &mut Outcome, frame: &mut Vec<SimEvent>) {
    loop {
        match rx.try_recv() {
            Ok(event) => {
                outcome.events.observe(&event);
                if let RaceEvent::Failed { reason, .. } = &event {
                    outcome.fail_reasons.push(*reason);
                }
                frame.push(SimEvent::from(&event));
            }
            Err(broadcast::error::TryRecvError::Lagged(missed)) => {
                warn!(missed, "Event subscriber lagged");
            }
            Err(_) => break,
        }
    }
}

fn fastest(records: &[Record]) -> Option<&Record> {
    records.iter().min_by_key(|r| (r.elapsed_ms, r.timestamp_ms))
}

fn ensure(condition: bool, message: impl FnOnce() -> String) -> Result<(), String> {
    if condition {
        Ok(())
    } else {
        Err(message())
    }
}

fn verdict(scenario: ScenarioId, o: &Outcome) -> Result<(), String> {
    let e = &o.events;
    match scenario {
        ScenarioId::Sprint => {
            ensure(e.started == 2 && e.finished == 2 && e.failed == 0, || {
                format!("expected 2 clean finishes, saw {:?}", e)
            })?;
            ensure(e.checkpoints == 2, || format!("expected 2 checkpoint splits, saw {}", e.checkpoints))?;
            ensure(o.records.len() == 2, || format!("expected 2 records, found {}", o.records.len()))?;
            ensure(o.snapshot_errors == 2, || {
                format!("expected 2 blacked-out ticks, saw {}", o.snapshot_errors)
            })?;

            let best = fastest(&o.records).ok_or("no best record")?;
            ensure(best.actor_name == "Swift", || format!("{} beat Swift", best.actor_name))?;
            // Leave start at x~1, turn at x=80, enter finish at z~49
            let expected_ms = 128.0 / 12.0 * 1000.0;
            ensure((best.elapsed_ms as f64 - expected_ms).abs() < 400.0, || {
                format!("Swift took {}ms, expected ~{:.0}ms", best.elapsed_ms, expected_ms)
            })?;
            for record in &o.records {
                ensure((record.distance - 128.0).abs() < 5.0, || {
                    format!("{} ran {:.1} units", record.actor_name, record.distance)
                })?;
                ensure(record.splits.len() == 1 && record.line.len() >= 2, || {
                    format!("{} record is incomplete", record.actor_name)
                })?;
            }

            match &o.transfer {
                Some(Ok(1)) => Ok(()),
                Some(Ok(n)) => Err(format!("replica holds {} records after import", n)),
                Some(Err(err)) => Err(format!("transfer failed: {}", err)),
                None => Err("transfer not attempted".to_string()),
            }
        }
        ScenarioId::FailOverlap => {
            ensure(e.started == 1 && e.failed == 1 && e.finished == 0, || {
                format!("expected the fail to win, saw {:?}", e)
            })?;
            ensure(matches!(o.fail_reasons.as_slice(), [FailReason::FailTrigger(_)]), || {
                format!("unexpected fail reasons {:?}", o.fail_reasons)
            })?;
            ensure(o.records.is_empty(), || "a failed run left a record".to_string())
        }
        ScenarioId::LoopLaps => {
            ensure(e.finished >= 2 && e.failed == 0, || format!("expected 2+ laps, saw {:?}", e))?;
            ensure(o.records.len() == e.finished, || {
                format!("{} laps but {} records", e.finished, o.records.len())
            })?;
            // Leave the gate at x~1, re-enter at x~-1 one lap later
            let lap_ms = (LOOP_LAP_LENGTH - 2.0) / LOOP_SPEED * 1000.0;
            for record in &o.records {
                ensure((record.elapsed_ms as f64 - lap_ms).abs() < 150.0, || {
                    format!("lap took {}ms, expected ~{:.0}ms", record.elapsed_ms, lap_ms)
                })?;
            }
            Ok(())
        }
        ScenarioId::SkippedCheckpoint => {
            ensure(e.started == 1 && e.checkpoints == 0 && e.finished == 0, || {
                format!("expected a refused finish, saw {:?}", e)
            })?;
            ensure(e.notices >= 1, || "finish refusal raised no notice".to_string())?;
            ensure(o.still_racing == 1, || {
                format!("expected the runner still mid-race, found {}", o.still_racing)
            })
        }
        ScenarioId::Mounted => {
            ensure(e.started == 2 && e.failed == 1 && e.finished == 1, || {
                format!("expected one mounted fail and one finish, saw {:?}", e)
            })?;
            ensure(o.fail_reasons == [FailReason::Mounted], || {
                format!("unexpected fail reasons {:?}", o.fail_reasons)
            })?;
            ensure(
                o.records.len() == 1 && o.records[0].actor_name == "Walker",
                || "only the walker should hold a record".to_string(),
            )
        }
        ScenarioId::DebounceBurst => {
            ensure(e.finished == 1 && o.records.len() == 1, || {
                format!("expected one finish, saw {:?}", e)
            })?;
            // Route insert, one coalesced edit, one record
            ensure(o.storage_writes == 3, || {
                format!("expected 3 storage writes, saw {}", o.storage_writes)
            })?;
            ensure(o.stored_names == ["Editable v24"], || {
                format!("stored names {:?}", o.stored_names)
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sprint_scenario() {
        let result = ScenarioRunner::new(42).run(ScenarioId::Sprint);
        assert!(result.passed, "Sprint failed: {:?}", result.failure_reason);
        assert_eq!(result.records[0].actor_name, "Swift");
    }

    #[test]
    fn test_fail_overlap_scenario() {
        let result = ScenarioRunner::new(42).run(ScenarioId::FailOverlap);
        assert!(result.passed, "FailOverlap failed: {:?}", result.failure_reason);
    }

    #[test]
    fn test_too_short_run_fails_verdict() {
        let result = ScenarioRunner::new(42)
            .with_duration(2.0)
            .run(ScenarioId::Sprint);
        assert!(!result.passed);
        assert_eq!(result.total_ticks, 60);
        assert!(result.failure_reason.is_some());
    }

    #[test]
    fn test_counts_observe_every_kind() {
        let mut counts = EventCounts::default();
        let route = RouteId::from_seed(1);
        let actor = raceline_env::ActorId::from_seed(1);
        counts.observe(&RaceEvent::Started { route, actor });
        counts.observe(&RaceEvent::Failed {
            route,
            actor,
            reason: FailReason::Restarted,
        });
        counts.observe(&RaceEvent::Notice {
            route,
            actor,
            message: "missed".into(),
        });

        assert_eq!(
            counts,
            EventCounts {
                started: 1,
                failed: 1,
                notices: 1,
                ..Default::default()
            }
        );
    }
}
