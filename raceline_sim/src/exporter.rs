//! JSON exporter for replaying simulation runs.
//!
//! Exports per-tick runner positions and race events, plus the records the
//! run produced.

use raceline_core::{FailReason, RaceEvent, Record};
use raceline_env::ActorState;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;

/// A single frame of simulation data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimFrame {
    /// Simulation time in seconds
    pub time_sec: f64,

    /// Observed runner positions
    pub actors: Vec<ActorPosition>,

    /// Race events raised this tick
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub events: Vec<SimEvent>,
}

/// Position of a runner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActorPosition {
    pub name: String,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub grounded: bool,
    pub mounted: bool,
}

impl From<&ActorState> for ActorPosition {
    fn from(actor: &ActorState) -> Self {
        Self {
            name: actor.name.clone(),
            x: actor.position.x,
            y: actor.position.y,
            z: actor.position.z,
            grounded: actor.grounded,
            mounted: actor.mounted,
        }
    }
}

/// Simulation event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimEvent {
    pub kind: String,
    pub route: String,
    pub actor: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl From<&RaceEvent> for SimEvent {
    fn from(event: &RaceEvent) -> Self {
        let detail = match event {
            RaceEvent::Checkpoint { index, offset_ms, .. } => {
                Some(format!("split {} at {}ms", index, offset_ms))
            }
            RaceEvent::Finished { record, .. } => {
                Some(format!("{}ms", record.draft().elapsed_ms))
            }
            RaceEvent::Failed { reason, .. } => Some(match reason {
                FailReason::FailTrigger(trigger) => format!("fail trigger {}", trigger),
                FailReason::Mounted => "mounted".to_string(),
                FailReason::Restarted => "restarted".to_string(),
            }),
            RaceEvent::Notice { message, .. } => Some(message.clone()),
            RaceEvent::Started { .. } => None,
        };
        Self {
            kind: event.label().to_string(),
            route: event.route().to_string(),
            actor: event.actor().to_string(),
            detail,
        }
    }
}

/// Summary of a completion record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordSummary {
    pub actor_name: String,
    pub elapsed_ms: u64,
    pub distance: f64,
    pub splits: usize,
    pub line_points: usize,
}

impl From<&Record> for RecordSummary {
    fn from(record: &Record) -> Self {
        Self {
            actor_name: record.actor_name.clone(),
            elapsed_ms: record.elapsed_ms,
            distance: record.distance,
            splits: record.splits.len(),
            line_points: record.line.len(),
        }
    }
}

/// Complete simulation export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimExport {
    /// Scenario name
    pub scenario: String,

    /// Seed used
    pub seed: u64,

    /// Duration in seconds
    pub duration_sec: f64,

    /// All frames
    pub frames: Vec<SimFrame>,

    /// Records kept by the routes at the end of the run
    pub records: Vec<RecordSummary>,

    /// Final results
    pub passed: bool,
}

impl SimExport {
    /// Creates a new export container.
    pub fn new(scenario: &str, seed: u64) -> Self {
        Self {
            scenario: scenario.to_string(),
            seed,
            duration_sec: 0.0,
            frames: Vec::new(),
            records: Vec::new(),
            passed: false,
        }
    }

    /// Adds a frame.
    pub fn add_frame(&mut self, frame: SimFrame) {
        self.duration_sec = frame.time_sec;
        self.frames.push(frame);
    }

    /// Finalizes the export.
    pub fn finalize(&mut self, passed: bool, records: &[Record]) {
        self.passed = passed;
        self.records = records.iter().map(RecordSummary::from).collect();
    }

    /// Writes to a JSON file.
    pub fn write_to_file(&self, path: &str) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        let mut file = File::create(path)?;
        file.write_all(json.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::Vector3;
    use raceline_core::{RouteId, TriggerId};
    use raceline_env::ActorId;

    #[test]
    fn test_frame_serializes_events_only_when_present() {
        let actor = ActorState::new(ActorId::from_seed(1), "A", Vector3::new(1.0, 2.0, 3.0));
        let mut frame = SimFrame {
            time_sec: 0.5,
            actors: vec![ActorPosition::from(&actor)],
            events: Vec::new(),
        };
        let quiet = serde_json::to_string(&frame).unwrap();
        assert!(!quiet.contains("events"));

        frame.events.push(SimEvent::from(&RaceEvent::Checkpoint {
            route: RouteId::from_seed(1),
            actor: actor.id,
            trigger: TriggerId::from_seed(2),
            index: 0,
            offset_ms: 1200,
        }));
        let json = serde_json::to_string(&frame).unwrap();
        assert!(json.contains("\"kind\":\"checkpoint\""));
        assert!(json.contains("split 0 at 1200ms"));
    }

    #[test]
    fn test_export_tracks_duration() {
        let mut export = SimExport::new("sprint", 42);
        for i in 1..=3 {
            export.add_frame(SimFrame {
                time_sec: i as f64 * 0.5,
                actors: Vec::new(),
                events: Vec::new(),
            });
        }
        export.finalize(true, &[]);

        assert_eq!(export.frames.len(), 3);
        assert_eq!(export.duration_sec, 1.5);
        assert!(export.passed);
    }
}
