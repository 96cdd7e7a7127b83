//! Trigger volumes and their enter/exit reactions.
//!
//! A [`Trigger`] owns an [`OrientedBox`] and a touch set. Each evaluation
//! compares containment against the touch set and fires at most one edge:
//!
//! | Kind       | on_left                          | on_entered                              |
//! |------------|----------------------------------|-----------------------------------------|
//! | Start      | begin the race                   | cancel a running race                   |
//! | Checkpoint | -                                | record a split                          |
//! | Fail       | -                                | fail the race, force an exit            |
//! | Finish     | drop a deferred finish           | finish the race (cool-down, policies)   |
//! | Loop       | arm and begin a lap              | finish the armed lap, disarm            |

use crate::error::RaceError;
use crate::events::FailReason;
use crate::geometry::{BoxShape, OrientedBox};
use crate::ids::{RouteId, TriggerId};
use crate::route::RaceScope;
use raceline_env::{ActorId, ActorState};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Stateless trigger kind, used for persistence and hashing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TriggerTag {
    Start,
    Checkpoint,
    Fail,
    Finish,
    Loop,
}

impl TriggerTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerTag::Start => "start",
            TriggerTag::Checkpoint => "checkpoint",
            TriggerTag::Fail => "fail",
            TriggerTag::Finish => "finish",
            TriggerTag::Loop => "loop",
        }
    }
}

impl fmt::Display for TriggerTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TriggerTag {
    type Err = RaceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "start" => Ok(TriggerTag::Start),
            "checkpoint" => Ok(TriggerTag::Checkpoint),
            "fail" => Ok(TriggerTag::Fail),
            "finish" => Ok(TriggerTag::Finish),
            "loop" => Ok(TriggerTag::Loop),
            other => Err(RaceError::UnknownTriggerKind(other.to_string())),
        }
    }
}

/// Edge produced by one evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    Entered,
    Left,
}

/// Per-actor finish bookkeeping shared by Finish and Loop.
#[derive(Debug, Clone, Default)]
pub struct FinishState {
    /// Race-clock deadline before which re-entry is ignored
    cooldown_until: HashMap<ActorId, Duration>,

    /// Airborne arrivals waiting for a grounded tick
    deferred: HashSet<ActorId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FinishOutcome {
    NotRacing,
    Suppressed,
    Rejected,
    Deferred,
    Completed,
}

impl FinishState {
    fn cooling_down(&self, actor: ActorId, now: Duration) -> bool {
        self.cooldown_until
            .get(&actor)
            .is_some_and(|until| now < *until)
    }

    fn try_finish(&mut self, scope: &mut RaceScope<'_>, actor: &ActorState) -> FinishOutcome {
        let now = scope.now;
        self.cooldown_until.retain(|_, until| *until > now);

        if !scope.is_racing(actor.id) {
            self.deferred.remove(&actor.id);
            return FinishOutcome::NotRacing;
        }

        if self.cooling_down(actor.id, now) {
            tracing::debug!(route = %scope.route, actor = %actor.id, "Finish re-entry inside cool-down ignored");
            return FinishOutcome::Suppressed;
        }

        if scope.flags.all_checkpoints_required {
            let passed = scope.splits_passed(actor.id);
            if passed < scope.checkpoints {
                scope.notice(
                    actor.id,
                    format!("Missed checkpoints ({}/{})", passed, scope.checkpoints),
                );
                return FinishOutcome::Rejected;
            }
        }

        if scope.flags.grounded_finish && !actor.grounded {
            self.deferred.insert(actor.id);
            return FinishOutcome::Deferred;
        }

        self.deferred.remove(&actor.id);
        if scope.finish(actor).is_some() {
            self.cooldown_until
                .insert(actor.id, now + scope.settings.finish_cooldown);
            FinishOutcome::Completed
        } else {
            FinishOutcome::NotRacing
        }
    }

    fn while_inside(&mut self, scope: &mut RaceScope<'_>, actor: &ActorState) -> Option<FinishOutcome> {
        if !self.deferred.contains(&actor.id) {
            return None;
        }
        if !actor.grounded {
            return Some(FinishOutcome::Deferred);
        }
        Some(self.try_finish(scope, actor))
    }
}

/// Per-actor lap bookkeeping for Loop triggers.
#[derive(Debug, Clone, Default)]
pub struct LoopState {
    /// Race clock at which each armed actor left the gate
    armed_at: HashMap<ActorId, Duration>,
    finish: FinishState,
}

impl LoopState {
    pub fn is_armed(&self, actor: ActorId) -> bool {
        self.armed_at.contains_key(&actor)
    }
}

/// Trigger kind with its per-kind runtime state.
#[derive(Debug, Clone)]
pub enum TriggerKind {
    Start,
    Checkpoint,
    Fail,
    Finish(FinishState),
    Loop(LoopState),
}

impl TriggerKind {
    pub fn from_tag(tag: TriggerTag) -> Self {
        match tag {
            TriggerTag::Start => TriggerKind::Start,
            TriggerTag::Checkpoint => TriggerKind::Checkpoint,
            TriggerTag::Fail => TriggerKind::Fail,
            TriggerTag::Finish => TriggerKind::Finish(FinishState::default()),
            TriggerTag::Loop => TriggerKind::Loop(LoopState::default()),
        }
    }

    pub fn tag(&self) -> TriggerTag {
        match self {
            TriggerKind::Start => TriggerTag::Start,
            TriggerKind::Checkpoint => TriggerTag::Checkpoint,
            TriggerKind::Fail => TriggerTag::Fail,
            TriggerKind::Finish(_) => TriggerTag::Finish,
            TriggerKind::Loop(_) => TriggerTag::Loop,
        }
    }
}

/// Persisted form of a trigger.
///
/// `kind` is free text so that an unknown tag fails only this trigger's
/// reconstruction, not the whole route.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerDocument {
    pub id: TriggerId,
    pub kind: String,
    #[serde(default)]
    pub name: String,
    pub shape: BoxShape,
}

/// A named oriented volume with enter/exit reactions.
#[derive(Debug, Clone)]
pub struct Trigger {
    id: TriggerId,
    route: RouteId,
    name: String,
    volume: OrientedBox,
    kind: TriggerKind,
    touching: HashSet<ActorId>,
}

impl Trigger {
    pub fn new(route: RouteId, tag: TriggerTag, volume: OrientedBox) -> Self {
        Self::with_id(TriggerId::new(), route, tag, volume)
    }

    pub fn with_id(id: TriggerId, route: RouteId, tag: TriggerTag, volume: OrientedBox) -> Self {
        Self {
            id,
            route,
            name: tag.as_str().to_string(),
            volume,
            kind: TriggerKind::from_tag(tag),
            touching: HashSet::new(),
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Rebuild a trigger from storage.
    pub fn from_document(route: RouteId, doc: TriggerDocument) -> Result<Self, RaceError> {
        let tag: TriggerTag = doc.kind.parse()?;
        let mut trigger = Self::with_id(doc.id, route, tag, OrientedBox::from(doc.shape));
        if !doc.name.is_empty() {
            trigger.name = doc.name;
        }
        Ok(trigger)
    }

    pub fn to_document(&self) -> TriggerDocument {
        TriggerDocument {
            id: self.id,
            kind: self.tag().as_str().to_string(),
            name: self.name.clone(),
            shape: BoxShape::from(self.volume.clone()),
        }
    }

    pub fn id(&self) -> TriggerId {
        self.id
    }

    pub fn route(&self) -> RouteId {
        self.route
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tag(&self) -> TriggerTag {
        self.kind.tag()
    }

    pub fn kind(&self) -> &TriggerKind {
        &self.kind
    }

    pub fn volume(&self) -> &OrientedBox {
        &self.volume
    }

    pub(crate) fn set_volume(&mut self, volume: OrientedBox) {
        self.volume = volume;
    }

    pub fn is_touching(&self, actor: ActorId) -> bool {
        self.touching.contains(&actor)
    }

    pub fn occupancy(&self) -> usize {
        self.touching.len()
    }

    /// Forget an actor's membership so their next evaluation starts clean.
    pub fn release(&mut self, actor: ActorId) {
        self.touching.remove(&actor);
        if let TriggerKind::Finish(state) = &mut self.kind {
            state.deferred.remove(&actor);
        }
    }

    pub fn clear(&mut self) {
        self.touching.clear();
        self.kind = TriggerKind::from_tag(self.tag());
    }

    /// Highlight color (RGBA), brighter while anyone is inside.
    pub fn color(&self) -> [f32; 4] {
        let base = match self.tag() {
            TriggerTag::Start => [0.20, 0.80, 0.30, 0.35],
            TriggerTag::Checkpoint => [0.95, 0.80, 0.20, 0.35],
            TriggerTag::Fail => [0.90, 0.20, 0.20, 0.35],
            TriggerTag::Finish => [0.90, 0.90, 0.90, 0.35],
            TriggerTag::Loop => [0.60, 0.30, 0.90, 0.35],
        };
        if self.touching.is_empty() {
            return base;
        }
        [
            (base[0] * 1.25).min(1.0),
            (base[1] * 1.25).min(1.0),
            (base[2] * 1.25).min(1.0),
            0.6,
        ]
    }

    /// Evaluate containment for one actor and react to any edge.
    pub fn check_collision(&mut self, scope: &mut RaceScope<'_>, actor: &ActorState) -> Option<Edge> {
        let inside = self.volume.contains(&actor.position);
        let was_inside = self.touching.contains(&actor.id);

        match (was_inside, inside) {
            (false, true) => {
                self.touching.insert(actor.id);
                self.on_entered(scope, actor);
                Some(Edge::Entered)
            }
            (true, false) => {
                self.touching.remove(&actor.id);
                self.on_left(scope, actor);
                Some(Edge::Left)
            }
            (true, true) => {
                self.while_inside(scope, actor);
                None
            }
            (false, false) => None,
        }
    }

    fn on_entered(&mut self, scope: &mut RaceScope<'_>, actor: &ActorState) {
        match &mut self.kind {
            TriggerKind::Start => {
                scope.fail(actor.id, FailReason::Restarted);
            }
            TriggerKind::Checkpoint => {
                scope.record_split(actor.id, self.id);
            }
            TriggerKind::Fail => {
                if scope.fail(actor.id, FailReason::FailTrigger(self.id)) {
                    // Self-resetting: the next tick inside sees a fresh entry
                    self.touching.remove(&actor.id);
                }
            }
            TriggerKind::Finish(state) => {
                if state.try_finish(scope, actor) == FinishOutcome::Completed {
                    self.touching.remove(&actor.id);
                }
            }
            TriggerKind::Loop(state) => {
                let Some(armed_at) = state.armed_at.get(&actor.id).copied() else {
                    return;
                };
                if !scope.is_racing(actor.id) {
                    state.armed_at.remove(&actor.id);
                    return;
                }
                if scope.now.saturating_sub(armed_at) < scope.settings.finish_cooldown {
                    // Boundary jitter right after arming: the lap stays armed
                    return;
                }
                if state.finish.try_finish(scope, actor) == FinishOutcome::Completed {
                    state.armed_at.remove(&actor.id);
                }
            }
        }
    }

    fn on_left(&mut self, scope: &mut RaceScope<'_>, actor: &ActorState) {
        match &mut self.kind {
            TriggerKind::Start => {
                scope.begin_race(actor);
            }
            TriggerKind::Checkpoint | TriggerKind::Fail => {}
            TriggerKind::Finish(state) => {
                state.deferred.remove(&actor.id);
            }
            TriggerKind::Loop(state) => {
                state.finish.deferred.remove(&actor.id);
                if scope.is_racing(actor.id) {
                    return;
                }
                if scope.begin_race(actor) {
                    state.armed_at.insert(actor.id, scope.now);
                }
            }
        }
    }

    fn while_inside(&mut self, scope: &mut RaceScope<'_>, actor: &ActorState) {
        match &mut self.kind {
            TriggerKind::Finish(state) => {
                if state.while_inside(scope, actor) == Some(FinishOutcome::Completed) {
                    self.touching.remove(&actor.id);
                }
            }
            TriggerKind::Loop(state) => {
                if state.finish.while_inside(scope, actor) == Some(FinishOutcome::Completed) {
                    state.armed_at.remove(&actor.id);
                }
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::route::{RaceProgress, RaceSettings, RouteFlags};
    use crate::events::RaceEvent;
    use nalgebra::Vector3;

    struct Harness {
        flags: RouteFlags,
        settings: RaceSettings,
        racers: HashMap<ActorId, RaceProgress>,
        events: Vec<RaceEvent>,
        released: Vec<ActorId>,
    }

    impl Harness {
        fn new() -> Self {
            Self {
                flags: RouteFlags::default(),
                settings: RaceSettings::default(),
                racers: HashMap::new(),
                events: Vec::new(),
                released: Vec::new(),
            }
        }

        fn scope(&mut self, now_ms: u64) -> RaceScope<'_> {
            RaceScope {
                route: RouteId::from_seed(1),
                flags: &self.flags,
                settings: &self.settings,
                checkpoints: 0,
                geometry_hash: "",
                racers: &mut self.racers,
                events: &mut self.events,
                released: &mut self.released,
                now: Duration::from_millis(now_ms),
                unix_ms: 0,
            }
        }
    }

    fn unit_box() -> OrientedBox {
        OrientedBox::axis_aligned(Vector3::zeros(), Vector3::new(1.0, 1.0, 1.0))
    }

    fn runner() -> ActorState {
        ActorState::new(ActorId::from_seed(1), "Runner", Vector3::new(5.0, 0.0, 0.0))
    }

    #[test]
    fn test_edges_fire_once_per_transition() {
        let mut h = Harness::new();
        let mut trigger = Trigger::new(RouteId::from_seed(1), TriggerTag::Checkpoint, unit_box());
        let outside = runner();
        let inside = outside.at(Vector3::zeros());

        assert_eq!(trigger.check_collision(&mut h.scope(0), &outside), None);
        assert_eq!(trigger.check_collision(&mut h.scope(1), &inside), Some(Edge::Entered));
        // Staying inside never re-fires
        assert_eq!(trigger.check_collision(&mut h.scope(2), &inside), None);
        assert_eq!(trigger.check_collision(&mut h.scope(3), &inside), None);
        assert_eq!(trigger.check_collision(&mut h.scope(4), &outside), Some(Edge::Left));
        assert_eq!(trigger.check_collision(&mut h.scope(5), &inside), Some(Edge::Entered));
        assert!(trigger.is_touching(inside.id));
    }

    #[test]
    fn test_start_begins_race_on_exit() {
        let mut h = Harness::new();
        let mut start = Trigger::new(RouteId::from_seed(1), TriggerTag::Start, unit_box());
        let inside = runner().at(Vector3::zeros());

        start.check_collision(&mut h.scope(0), &inside);
        assert!(h.racers.is_empty());

        start.check_collision(&mut h.scope(100), &runner());
        assert!(h.racers.contains_key(&inside.id));
        assert!(matches!(h.events.last(), Some(RaceEvent::Started { .. })));
    }

    #[test]
    fn test_start_reentry_cancels_running_race() {
        let mut h = Harness::new();
        let actor = runner();
        h.racers.insert(actor.id, RaceProgress::new(Duration::ZERO, 100));
        let mut start = Trigger::new(RouteId::from_seed(1), TriggerTag::Start, unit_box());

        start.check_collision(&mut h.scope(2_000), &actor.at(Vector3::zeros()));

        assert!(h.racers.is_empty());
        assert!(start.is_touching(actor.id));
        assert!(matches!(
            h.events.last(),
            Some(RaceEvent::Failed { reason: FailReason::Restarted, .. })
        ));

        // Leaving again starts over
        start.check_collision(&mut h.scope(2_100), &actor);
        assert!(h.racers.contains_key(&actor.id));
        assert!(matches!(h.events.last(), Some(RaceEvent::Started { .. })));
    }

    #[test]
    fn test_airborne_start_rejected() {
        let mut h = Harness::new();
        h.flags.grounded_start = true;
        let mut start = Trigger::new(RouteId::from_seed(1), TriggerTag::Start, unit_box());
        let inside = runner().at(Vector3::zeros());

        start.check_collision(&mut h.scope(0), &inside);
        start.check_collision(&mut h.scope(100), &runner().with_grounded(false));

        assert!(h.racers.is_empty());
        assert!(matches!(h.events.last(), Some(RaceEvent::Notice { .. })));
    }

    #[test]
    fn test_fail_is_self_resetting() {
        let mut h = Harness::new();
        let actor = runner();
        h.racers
            .insert(actor.id, RaceProgress::new(Duration::ZERO, 100));
        let mut fail = Trigger::new(RouteId::from_seed(1), TriggerTag::Fail, unit_box());
        let inside = actor.at(Vector3::zeros());

        fail.check_collision(&mut h.scope(10), &inside);

        assert!(h.racers.is_empty());
        assert!(!fail.is_touching(actor.id));
        assert_eq!(h.released, vec![actor.id]);
        assert!(matches!(
            h.events.last(),
            Some(RaceEvent::Failed { reason: FailReason::FailTrigger(_), .. })
        ));
    }

    #[test]
    fn test_finish_cooldown_suppresses_reentry() {
        let mut h = Harness::new();
        let actor = runner();
        let inside = actor.at(Vector3::zeros());
        let mut finish = Trigger::new(RouteId::from_seed(1), TriggerTag::Finish, unit_box());

        h.racers.insert(actor.id, RaceProgress::new(Duration::ZERO, 100));
        finish.check_collision(&mut h.scope(5_000), &inside);
        assert!(h.racers.is_empty());
        let finished = h.events.iter().filter(|e| matches!(e, RaceEvent::Finished { .. })).count();
        assert_eq!(finished, 1);

        // A new race that re-enters within the cool-down is ignored
        h.racers.insert(actor.id, RaceProgress::new(Duration::from_millis(5_500), 100));
        finish.check_collision(&mut h.scope(6_000), &actor);
        finish.check_collision(&mut h.scope(6_500), &inside);
        assert!(h.racers.contains_key(&actor.id));

        // After the cool-down it counts
        finish.check_collision(&mut h.scope(9_000), &actor);
        finish.check_collision(&mut h.scope(9_500), &inside);
        assert!(h.racers.is_empty());
    }

    #[test]
    fn test_grounded_finish_deferred_until_landing() {
        let mut h = Harness::new();
        h.flags.grounded_finish = true;
        let actor = runner();
        let mut finish = Trigger::new(RouteId::from_seed(1), TriggerTag::Finish, unit_box());
        h.racers.insert(actor.id, RaceProgress::new(Duration::ZERO, 100));

        let airborne = actor.at(Vector3::zeros()).with_grounded(false);
        finish.check_collision(&mut h.scope(1_000), &airborne);
        finish.check_collision(&mut h.scope(1_100), &airborne);
        assert!(h.racers.contains_key(&actor.id));

        finish.check_collision(&mut h.scope(1_200), &airborne.clone().with_grounded(true));
        assert!(h.racers.is_empty());
        match h.events.last() {
            Some(RaceEvent::Finished { record, .. }) => assert_eq!(record.draft().elapsed_ms, 1_200),
            other => panic!("expected Finished, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_tag_is_an_error() {
        let doc = TriggerDocument {
            id: TriggerId::new(),
            kind: "teleport".into(),
            name: String::new(),
            shape: BoxShape::from(unit_box()),
        };
        assert!(matches!(
            Trigger::from_document(RouteId::new(), doc),
            Err(RaceError::UnknownTriggerKind(_))
        ));
    }

    #[test]
    fn test_color_brightens_when_occupied() {
        let mut h = Harness::new();
        let mut trigger = Trigger::new(RouteId::from_seed(1), TriggerTag::Fail, unit_box());
        let idle = trigger.color();

        trigger.check_collision(&mut h.scope(0), &runner().at(Vector3::zeros()));

        assert!(trigger.color()[3] > idle[3]);
    }
}
