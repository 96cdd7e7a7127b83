//! Race routes: ordered triggers, mid-race membership and records.
//!
//! `Route::check_collision` is the per-actor dispatch entry point. It is
//! synchronous and returns the events it raised; the engine decides where
//! they go.

use crate::error::{RaceError, Result};
use crate::events::{FailReason, RaceEvent};
use crate::geometry::OrientedBox;
use crate::ids::{RecordId, RouteId, TriggerId};
use crate::path::{PathTracker, TimedPoint};
use crate::record::{Record, RecordHandle, RetentionPolicy, Split};
use crate::trigger::{Trigger, TriggerDocument, TriggerTag};
use raceline_env::{ActorId, ActorState};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Behavior switches for a route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouteFlags {
    /// Racing on a mount is allowed (default: true)
    pub mount_allowed: bool,

    /// Leaving the start gate airborne is rejected
    pub grounded_start: bool,

    /// Finishing waits for the first grounded tick inside the finish
    pub grounded_finish: bool,

    /// A finish with fewer splits than checkpoints is rejected
    pub all_checkpoints_required: bool,
}

impl Default for RouteFlags {
    fn default() -> Self {
        Self {
            mount_allowed: true,
            grounded_start: false,
            grounded_finish: false,
            all_checkpoints_required: false,
        }
    }
}

/// Engine-wide tunables a route needs while racing.
#[derive(Debug, Clone, PartialEq)]
pub struct RaceSettings {
    /// Raw-point and segment cap per racer
    pub path_capacity: usize,

    /// Re-entry window after a finish
    pub finish_cooldown: Duration,
}

impl Default for RaceSettings {
    fn default() -> Self {
        Self {
            path_capacity: PathTracker::DEFAULT_CAPACITY,
            finish_cooldown: Duration::from_millis(3000),
        }
    }
}

/// A racer's state between start and finish.
#[derive(Debug, Clone)]
pub struct RaceProgress {
    /// Race clock at the start edge
    pub started_at: Duration,
    pub splits: Vec<Split>,
    pub path: PathTracker,
}

impl RaceProgress {
    pub fn new(started_at: Duration, path_capacity: usize) -> Self {
        Self {
            started_at,
            splits: Vec::new(),
            path: PathTracker::new(path_capacity),
        }
    }

    pub fn elapsed_ms(&self, now: Duration) -> u64 {
        now.saturating_sub(self.started_at).as_millis() as u64
    }
}

/// Borrowed view of a route's race state handed to triggers.
pub struct RaceScope<'a> {
    pub route: RouteId,
    pub flags: &'a RouteFlags,
    pub settings: &'a RaceSettings,

    /// Number of checkpoint triggers on the route
    pub checkpoints: usize,
    pub geometry_hash: &'a str,
    pub racers: &'a mut HashMap<ActorId, RaceProgress>,
    pub events: &'a mut Vec<RaceEvent>,

    /// Actors that left the mid-race list during this evaluation
    pub released: &'a mut Vec<ActorId>,

    /// Race clock
    pub now: Duration,

    /// Wall clock, Unix milliseconds
    pub unix_ms: u64,
}

impl RaceScope<'_> {
    pub fn is_racing(&self, actor: ActorId) -> bool {
        self.racers.contains_key(&actor)
    }

    pub fn splits_passed(&self, actor: ActorId) -> usize {
        self.racers.get(&actor).map_or(0, |p| p.splits.len())
    }

    /// Tell the acting actor why something did not happen.
    pub fn notice(&mut self, actor: ActorId, message: impl Into<String>) {
        let message = message.into();
        warn!(route = %self.route, actor = %actor, "{}", message);
        self.events.push(RaceEvent::Notice {
            route: self.route,
            actor,
            message,
        });
    }

    /// Start (or restart) the race clock for an actor.
    pub fn begin_race(&mut self, actor: &ActorState) -> bool {
        if self.flags.grounded_start && !actor.grounded {
            self.notice(actor.id, "You must be on the ground to start");
            return false;
        }
        if !self.flags.mount_allowed && actor.mounted {
            self.notice(actor.id, "Mounts are not allowed on this route");
            return false;
        }

        let mut progress = RaceProgress::new(self.now, self.settings.path_capacity);
        progress.path.add_point(actor.position, 0);
        self.racers.insert(actor.id, progress);

        info!(route = %self.route, actor = %actor.id, "Race started");
        self.events.push(RaceEvent::Started {
            route: self.route,
            actor: actor.id,
        });
        true
    }

    /// Drop an actor from the mid-race list without an event.
    fn abandon(&mut self, actor: ActorId) -> Option<RaceProgress> {
        let progress = self.racers.remove(&actor)?;
        self.released.push(actor);
        Some(progress)
    }

    /// End a race without a record. Returns false if the actor was not racing.
    pub fn fail(&mut self, actor: ActorId, reason: FailReason) -> bool {
        if self.abandon(actor).is_none() {
            return false;
        }
        info!(route = %self.route, actor = %actor, ?reason, "Race failed");
        self.events.push(RaceEvent::Failed {
            route: self.route,
            actor,
            reason,
        });
        true
    }

    /// Count a checkpoint, once per race.
    pub fn record_split(&mut self, actor: ActorId, trigger: TriggerId) {
        let now = self.now;
        let Some(progress) = self.racers.get_mut(&actor) else {
            return;
        };
        if progress.splits.iter().any(|s| s.trigger == trigger) {
            return;
        }

        let offset_ms = progress.elapsed_ms(now);
        let index = progress.splits.len();
        progress.splits.push(Split { trigger, offset_ms });

        debug!(route = %self.route, actor = %actor, index, offset_ms, "Checkpoint");
        self.events.push(RaceEvent::Checkpoint {
            route: self.route,
            actor,
            trigger,
            index,
            offset_ms,
        });
    }

    /// Stop the clock and build the record. The race line is still raw.
    pub fn finish(&mut self, actor: &ActorState) -> Option<RecordHandle> {
        let progress = self.abandon(actor.id)?;
        let elapsed_ms = progress.elapsed_ms(self.now);

        let record = Record {
            id: RecordId::new(),
            route: self.route,
            timestamp_ms: self.unix_ms,
            actor_name: actor.name.clone(),
            actor_world: actor.world.clone(),
            elapsed_ms,
            distance: progress.path.distance_traveled(),
            splits: progress.splits,
            line: progress.path.snapshot_for_drawing(None),
            geometry_hash: self.geometry_hash.to_string(),
        };

        info!(
            route = %self.route,
            actor = %actor.id,
            elapsed_ms,
            distance = record.distance,
            "Race finished"
        );

        let handle = RecordHandle::new(record);
        self.events.push(RaceEvent::Finished {
            route: self.route,
            actor: actor.id,
            record: handle.clone(),
        });
        Some(handle)
    }
}

/// Persisted form of a route (records are stored separately).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteDocument {
    pub id: RouteId,
    pub name: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub flags: RouteFlags,
    #[serde(default)]
    pub retention: RetentionPolicy,
    pub triggers: Vec<TriggerDocument>,
}

/// One race: ordered triggers, racers and completion records.
#[derive(Debug)]
pub struct Route {
    id: RouteId,
    name: String,
    location: String,
    flags: RouteFlags,
    retention: RetentionPolicy,
    settings: RaceSettings,
    triggers: Vec<Trigger>,
    records: Vec<Record>,
    racers: HashMap<ActorId, RaceProgress>,
    geometry_hash: String,
}

impl Route {
    pub fn new(name: impl Into<String>, location: impl Into<String>) -> Self {
        Self::with_id(RouteId::new(), name, location)
    }

    pub fn with_id(id: RouteId, name: impl Into<String>, location: impl Into<String>) -> Self {
        let mut route = Self {
            id,
            name: name.into(),
            location: location.into(),
            flags: RouteFlags::default(),
            retention: RetentionPolicy::default(),
            settings: RaceSettings::default(),
            triggers: Vec::new(),
            records: Vec::new(),
            racers: HashMap::new(),
            geometry_hash: String::new(),
        };
        route.rehash();
        route
    }

    /// Rebuild a route from storage.
    ///
    /// Triggers with an unknown kind are skipped with a warning; the rest
    /// of the route loads.
    pub fn from_document(doc: RouteDocument) -> Self {
        let mut route = Self::with_id(doc.id, doc.name, doc.location);
        route.flags = doc.flags;
        route.retention = doc.retention;

        for trigger_doc in doc.triggers {
            let trigger_id = trigger_doc.id;
            let rebuilt = Trigger::from_document(doc.id, trigger_doc)
                .and_then(|trigger| route.push_trigger(trigger));
            if let Err(e) = rebuilt {
                warn!(route = %doc.id, trigger = %trigger_id, "Dropping trigger: {}", e);
            }
        }
        route
    }

    pub fn to_document(&self) -> RouteDocument {
        RouteDocument {
            id: self.id,
            name: self.name.clone(),
            location: self.location.clone(),
            flags: self.flags.clone(),
            retention: self.retention.clone(),
            triggers: self.triggers.iter().map(Trigger::to_document).collect(),
        }
    }

    pub fn id(&self) -> RouteId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn flags(&self) -> &RouteFlags {
        &self.flags
    }

    pub fn set_flags(&mut self, flags: RouteFlags) {
        self.flags = flags;
    }

    pub fn retention(&self) -> &RetentionPolicy {
        &self.retention
    }

    pub fn set_retention(&mut self, retention: RetentionPolicy) {
        self.retention = retention;
    }

    pub fn settings(&self) -> &RaceSettings {
        &self.settings
    }

    pub fn set_settings(&mut self, settings: RaceSettings) {
        self.settings = settings;
    }

    // ========================================================================
    // TRIGGERS
    // ========================================================================

    /// Append a trigger of the given kind. A route holds at most one Start.
    pub fn add_trigger(&mut self, tag: TriggerTag, volume: OrientedBox) -> Result<TriggerId> {
        let trigger = Trigger::new(self.id, tag, volume);
        let id = trigger.id();
        self.push_trigger(trigger)?;
        Ok(id)
    }

    fn push_trigger(&mut self, trigger: Trigger) -> Result<()> {
        if trigger.tag() == TriggerTag::Start && self.start_trigger().is_some() {
            return Err(RaceError::DuplicateStart(self.id));
        }
        self.triggers.push(trigger);
        self.rehash();
        Ok(())
    }

    pub fn remove_trigger(&mut self, id: TriggerId) -> bool {
        let before = self.triggers.len();
        self.triggers.retain(|t| t.id() != id);
        let removed = self.triggers.len() != before;
        if removed {
            self.rehash();
        }
        removed
    }

    /// Replace a trigger's volume (editor move/resize/rotate).
    pub fn set_trigger_volume(&mut self, id: TriggerId, volume: OrientedBox) -> bool {
        let Some(trigger) = self.triggers.iter_mut().find(|t| t.id() == id) else {
            return false;
        };
        trigger.set_volume(volume);
        self.rehash();
        true
    }

    pub fn triggers(&self) -> &[Trigger] {
        &self.triggers
    }

    pub fn trigger(&self, id: TriggerId) -> Option<&Trigger> {
        self.triggers.iter().find(|t| t.id() == id)
    }

    pub fn start_trigger(&self) -> Option<&Trigger> {
        self.triggers.iter().find(|t| t.tag() == TriggerTag::Start)
    }

    pub fn checkpoint_count(&self) -> usize {
        self.triggers
            .iter()
            .filter(|t| t.tag() == TriggerTag::Checkpoint)
            .count()
    }

    /// SHA-256 fingerprint of trigger kinds and geometry, in stored order.
    pub fn geometry_hash(&self) -> &str {
        &self.geometry_hash
    }

    fn rehash(&mut self) {
        let mut hasher = Sha256::new();
        for trigger in &self.triggers {
            hasher.update(trigger.tag().as_str().as_bytes());
            let volume = trigger.volume();
            for v in [volume.position(), volume.scale(), volume.rotation()] {
                for c in v.iter() {
                    hasher.update(c.to_le_bytes());
                }
            }
        }
        self.geometry_hash = hasher
            .finalize()
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect();
    }

    // ========================================================================
    // RACING
    // ========================================================================

    /// Evaluate one actor's tick against this route.
    ///
    /// Not racing: only Start and Loop triggers are evaluated. Racing: Fail
    /// triggers go first and a failure ends evaluation; then Finish,
    /// Checkpoint and Loop in stored order; Start goes last, where entering
    /// it cancels the race so that leaving again restarts it.
    pub fn check_collision(&mut self, actor: &ActorState, now: Duration, unix_ms: u64) -> Vec<RaceEvent> {
        let mut events = Vec::new();
        if self.triggers.is_empty() {
            return events;
        }

        if let Some(progress) = self.racers.get_mut(&actor.id) {
            let offset = progress.elapsed_ms(now);
            progress.path.add_point(actor.position, offset);
        }

        let checkpoints = self.checkpoint_count();
        let mut released = Vec::new();
        let mut scope = RaceScope {
            route: self.id,
            flags: &self.flags,
            settings: &self.settings,
            checkpoints,
            geometry_hash: &self.geometry_hash,
            racers: &mut self.racers,
            events: &mut events,
            released: &mut released,
            now,
            unix_ms,
        };

        if !scope.is_racing(actor.id) {
            for trigger in self
                .triggers
                .iter_mut()
                .filter(|t| matches!(t.tag(), TriggerTag::Start | TriggerTag::Loop))
            {
                trigger.check_collision(&mut scope, actor);
            }
        } else if !scope.flags.mount_allowed && actor.mounted {
            scope.fail(actor.id, FailReason::Mounted);
        } else {
            for trigger in self.triggers.iter_mut().filter(|t| t.tag() == TriggerTag::Fail) {
                trigger.check_collision(&mut scope, actor);
                if !scope.is_racing(actor.id) {
                    break;
                }
            }
            if scope.is_racing(actor.id) {
                for trigger in self.triggers.iter_mut().filter(|t| {
                    matches!(
                        t.tag(),
                        TriggerTag::Finish | TriggerTag::Checkpoint | TriggerTag::Loop
                    )
                }) {
                    trigger.check_collision(&mut scope, actor);
                }
            }
            if scope.is_racing(actor.id) {
                for trigger in self.triggers.iter_mut().filter(|t| t.tag() == TriggerTag::Start) {
                    trigger.check_collision(&mut scope, actor);
                }
            }
        }

        for actor_id in released {
            for trigger in self.triggers.iter_mut().filter(|t| {
                matches!(
                    t.tag(),
                    TriggerTag::Checkpoint | TriggerTag::Fail | TriggerTag::Finish
                )
            }) {
                trigger.release(actor_id);
            }
        }

        events
    }

    pub fn is_racing(&self, actor: ActorId) -> bool {
        self.racers.contains_key(&actor)
    }

    pub fn racer_count(&self) -> usize {
        self.racers.len()
    }

    pub fn progress(&self, actor: ActorId) -> Option<&RaceProgress> {
        self.racers.get(&actor)
    }

    /// Path drawn so far for a racer, ending at their live position.
    pub fn racer_line(&self, actor: &ActorState, now: Duration) -> Option<Vec<TimedPoint>> {
        let progress = self.racers.get(&actor.id)?;
        let live = TimedPoint::new(actor.position, progress.elapsed_ms(now));
        Some(progress.path.snapshot_for_drawing(Some(live)))
    }

    /// Drop all racers and trigger state (zone change, route edit).
    pub fn reset_racing(&mut self) {
        self.racers.clear();
        for trigger in &mut self.triggers {
            trigger.clear();
        }
    }

    // ========================================================================
    // RECORDS
    // ========================================================================

    /// Add a finished record and apply retention.
    ///
    /// Returns whether the record survived retention.
    pub fn add_record(&mut self, record: Record, now_ms: u64) -> bool {
        let id = record.id;
        self.records.push(record);
        let dropped = self.retention.apply(&mut self.records, now_ms);
        if dropped > 0 {
            debug!(route = %self.id, dropped, "Retention trimmed records");
        }
        self.records.iter().any(|r| r.id == id)
    }

    /// Replace all records (load from storage) and apply retention.
    pub fn restore_records(&mut self, records: Vec<Record>, now_ms: u64) {
        self.records = records;
        self.retention.apply(&mut self.records, now_ms);
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn has_record(&self, id: RecordId) -> bool {
        self.records.iter().any(|r| r.id == id)
    }

    /// Fastest record on this route.
    pub fn best_record(&self) -> Option<&Record> {
        self.records.iter().min_by_key(|r| r.elapsed_ms)
    }

    /// Fastest record by a given actor name.
    pub fn personal_best(&self, actor_name: &str) -> Option<&Record> {
        self.records
            .iter()
            .filter(|r| r.actor_name == actor_name)
            .min_by_key(|r| r.elapsed_ms)
    }
}
