//! Race scenarios for deterministic simulation.
//!
//! Each scenario is a set of routes plus scripted runners. The runner
//! module drives them through a `RaceEngine` and checks the outcome.

use crate::oracle::{ScriptedRunner, Waypoint};
use nalgebra::Vector3;
use raceline_core::{OrientedBox, Route, RouteFlags, TriggerTag};
use std::f64::consts::FRAC_PI_2;

/// Scenario identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScenarioId {
    /// Two runners on a start/checkpoint/finish sprint with a turn
    Sprint,

    /// A fail volume overlapping the finish
    FailOverlap,

    /// Laps through a single loop gate
    LoopLaps,

    /// Finish reached without passing the required checkpoint
    SkippedCheckpoint,

    /// One runner mounts mid-race on a no-mount route
    Mounted,

    /// A burst of route edits collapses into one save
    DebounceBurst,
}

impl ScenarioId {
    /// Returns a list of all scenarios.
    pub fn all() -> Vec<ScenarioId> {
        vec![
            ScenarioId::Sprint,
            ScenarioId::FailOverlap,
            ScenarioId::LoopLaps,
            ScenarioId::SkippedCheckpoint,
            ScenarioId::Mounted,
            ScenarioId::DebounceBurst,
        ]
    }

    /// Returns the scenario name.
    pub fn name(&self) -> &'static str {
        match self {
            ScenarioId::Sprint => "sprint",
            ScenarioId::FailOverlap => "fail_overlap",
            ScenarioId::LoopLaps => "loop_laps",
            ScenarioId::SkippedCheckpoint => "skipped_checkpoint",
            ScenarioId::Mounted => "mounted",
            ScenarioId::DebounceBurst => "debounce_burst",
        }
    }

    /// Returns a description of the scenario.
    pub fn description(&self) -> &'static str {
        match self {
            ScenarioId::Sprint => "Two runners, one checkpoint, rotated finish gate; fastest record wins",
            ScenarioId::FailOverlap => "Fail volume on top of the finish: the fail wins, no record",
            ScenarioId::LoopLaps => "Circuit through one loop gate: one record per completed lap",
            ScenarioId::SkippedCheckpoint => "Checkpoint bypassed on a strict route: finish refused",
            ScenarioId::Mounted => "Mounting mid-race fails the rider; the walker still finishes",
            ScenarioId::DebounceBurst => "25 rapid route edits persist as a single write",
        }
    }

    /// Simulated seconds needed for every runner to finish its course.
    pub fn default_duration_secs(&self) -> f64 {
        match self {
            ScenarioId::LoopLaps => 45.0,
            _ => 22.0,
        }
    }

    /// Build the routes and runners for this scenario.
    pub fn plan(&self) -> ScenarioPlan {
        match self {
            ScenarioId::Sprint => sprint_plan(),
            ScenarioId::FailOverlap => fail_overlap_plan(),
            ScenarioId::LoopLaps => loop_laps_plan(),
            ScenarioId::SkippedCheckpoint => skipped_checkpoint_plan(),
            ScenarioId::Mounted => mounted_plan(),
            ScenarioId::DebounceBurst => debounce_burst_plan(),
        }
    }
}

impl std::fmt::Display for ScenarioId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for ScenarioId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sprint" => Ok(ScenarioId::Sprint),
            "fail_overlap" | "failoverlap" => Ok(ScenarioId::FailOverlap),
            "loop_laps" | "looplaps" | "loop" => Ok(ScenarioId::LoopLaps),
            "skipped_checkpoint" | "skippedcheckpoint" => Ok(ScenarioId::SkippedCheckpoint),
            "mounted" => Ok(ScenarioId::Mounted),
            "debounce_burst" | "debounceburst" => Ok(ScenarioId::DebounceBurst),
            _ => Err(format!("Unknown scenario: {}", s)),
        }
    }
}

/// Routes, runners and scripted interventions for one run.
pub struct ScenarioPlan {
    pub routes: Vec<Route>,
    pub runners: Vec<ScriptedRunner>,

    /// Ticks on which the world snapshot is unavailable
    pub blackout_ticks: Vec<u64>,

    /// Rename the first route this many times on the given tick
    pub rename_burst: Option<(u64, usize)>,
}

impl ScenarioPlan {
    fn new(routes: Vec<Route>, runners: Vec<ScriptedRunner>) -> Self {
        Self {
            routes,
            runners,
            blackout_ticks: Vec::new(),
            rename_burst: None,
        }
    }
}

// ============================================================================
// COURSES
// ============================================================================

/// Thin gate across the x axis; `yaw` turns it about Y.
fn gate(x: f64, z: f64, yaw: f64) -> OrientedBox {
    OrientedBox::new(
        Vector3::new(x, 1.0, z),
        Vector3::new(1.0, 2.0, 4.0),
        Vector3::new(yaw, 0.0, 0.0),
    )
}

/// Start at x=0, checkpoint at x=60, then a right-angle turn to a finish
/// gate at z=50 that faces the new direction.
fn harbor_sprint() -> Route {
    let mut route = Route::new("Harbor Sprint", "Harbor");
    let triggers = [
        (TriggerTag::Start, gate(0.0, 0.0, 0.0)),
        (TriggerTag::Checkpoint, gate(60.0, 0.0, 0.0)),
        (TriggerTag::Finish, gate(80.0, 50.0, FRAC_PI_2)),
    ];
    for (tag, volume) in triggers {
        // A fresh route has no start yet, so this cannot collide
        let _ = route.add_trigger(tag, volume);
    }
    route
}

fn harbor_course() -> Vec<Waypoint> {
    vec![
        Waypoint::at(-5.0, 0.0, 0.0),
        Waypoint::at(80.0, 0.0, 0.0),
        Waypoint::at(80.0, 0.0, 60.0),
    ]
}

/// Start at x=0, checkpoint at x=50, finish at x=100, all on one line.
fn straight_route(name: &str, flags: RouteFlags) -> Route {
    let mut route = Route::new(name, "Plaza");
    route.set_flags(flags);
    let triggers = [
        (TriggerTag::Start, gate(0.0, 0.0, 0.0)),
        (TriggerTag::Checkpoint, gate(50.0, 0.0, 0.0)),
        (TriggerTag::Finish, gate(100.0, 0.0, 0.0)),
    ];
    for (tag, volume) in triggers {
        let _ = route.add_trigger(tag, volume);
    }
    route
}

fn sprint_plan() -> ScenarioPlan {
    let mut plan = ScenarioPlan::new(
        vec![harbor_sprint()],
        vec![
            ScriptedRunner::new(1, "Swift", 12.0, harbor_course()),
            ScriptedRunner::new(2, "Steady", 8.0, harbor_course()),
        ],
    );
    // A loading hitch mid-race must not break either run
    plan.blackout_ticks = vec![120, 121];
    plan
}

fn fail_overlap_plan() -> ScenarioPlan {
    let mut route = harbor_sprint();
    let _ = route.add_trigger(TriggerTag::Fail, gate(80.0, 50.0, FRAC_PI_2));
    ScenarioPlan::new(
        vec![route],
        vec![ScriptedRunner::new(1, "Swift", 12.0, harbor_course())],
    )
}

/// A 40 x 40 square circuit whose bottom edge crosses the loop gate at x=0.
pub const LOOP_LAP_LENGTH: f64 = 160.0;
pub const LOOP_SPEED: f64 = 16.0;

fn loop_laps_plan() -> ScenarioPlan {
    let mut route = Route::new("Dockside Circuit", "Harbor");
    let _ = route.add_trigger(TriggerTag::Loop, gate(0.0, 0.0, 0.0));

    let circuit = vec![
        Waypoint::at(20.0, 0.0, 0.0),
        Waypoint::at(20.0, 0.0, 40.0),
        Waypoint::at(-20.0, 0.0, 40.0),
        Waypoint::at(-20.0, 0.0, 0.0),
    ];
    ScenarioPlan::new(
        vec![route],
        vec![ScriptedRunner::new(1, "Lapper", LOOP_SPEED, circuit).looped()],
    )
}

fn skipped_checkpoint_plan() -> ScenarioPlan {
    let route = straight_route(
        "Strict Line",
        RouteFlags {
            all_checkpoints_required: true,
            ..Default::default()
        },
    );
    // Swings wide around the checkpoint at x=50
    let detour = vec![
        Waypoint::at(-5.0, 0.0, 0.0),
        Waypoint::at(30.0, 0.0, 0.0),
        Waypoint::at(50.0, 0.0, 20.0),
        Waypoint::at(70.0, 0.0, 0.0),
        Waypoint::at(105.0, 0.0, 0.0),
    ];
    ScenarioPlan::new(
        vec![route],
        vec![ScriptedRunner::new(1, "Cutter", 10.0, detour)],
    )
}

fn mounted_plan() -> ScenarioPlan {
    let route = straight_route(
        "Foot Race",
        RouteFlags {
            mount_allowed: false,
            ..Default::default()
        },
    );
    let rider = vec![
        Waypoint::at(-5.0, 0.0, 0.0),
        Waypoint::at(30.0, 0.0, 0.0),
        Waypoint::at(105.0, 0.0, 0.0).mounted(),
    ];
    let walker = vec![Waypoint::at(-5.0, 0.0, 0.0), Waypoint::at(105.0, 0.0, 0.0)];
    ScenarioPlan::new(
        vec![route],
        vec![
            ScriptedRunner::new(1, "Rider", 10.0, rider),
            ScriptedRunner::new(2, "Walker", 8.0, walker),
        ],
    )
}

fn debounce_burst_plan() -> ScenarioPlan {
    let mut plan = ScenarioPlan::new(
        vec![straight_route("Editable", RouteFlags::default())],
        vec![ScriptedRunner::new(
            1,
            "Editor",
            10.0,
            vec![Waypoint::at(-5.0, 0.0, 0.0), Waypoint::at(105.0, 0.0, 0.0)],
        )],
    );
    plan.rename_burst = Some((30, 25));
    plan
}
