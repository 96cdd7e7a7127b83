//! World snapshot abstraction: the only way actor observations reach the engine.

use crate::error::EnvError;
use crate::types::{ActorId, ActorState};

/// Source of per-tick actor observations.
///
/// # Implementations
///
/// - **Production**: adapter over the host game's object table
/// - **Simulation**: scripted runners moving along waypoint courses
///
/// The engine never queries the world; it only reacts to the values
/// returned here.
pub trait WorldSnapshot: Send + Sync {
    /// Returns the state of every tracked actor for the current tick.
    ///
    /// # Returns
    /// * `Ok(actors)` - Observations for this tick (may be empty)
    /// * `Err(EnvError::SnapshotUnavailable)` - The world could not be read
    ///   this tick (loading screen, zone transition)
    fn snapshot(&self) -> Result<Vec<ActorState>, EnvError>;

    /// Returns the state of a single actor.
    fn actor(&self, id: ActorId) -> Result<ActorState, EnvError> {
        self.snapshot()?
            .into_iter()
            .find(|a| a.id == id)
            .ok_or_else(|| EnvError::untracked(id))
    }
}

/// A fixed snapshot, useful for replaying recorded ticks.
#[derive(Debug, Clone, Default)]
pub struct StaticSnapshot {
    actors: Vec<ActorState>,
}

impl StaticSnapshot {
    /// Creates a snapshot from a list of actors.
    pub fn new(actors: Vec<ActorState>) -> Self {
        Self { actors }
    }

    /// Replaces or inserts an actor's state.
    pub fn upsert(&mut self, state: ActorState) {
        match self.actors.iter_mut().find(|a| a.id == state.id) {
            Some(existing) => *existing = state,
            None => self.actors.push(state),
        }
    }
}

impl WorldSnapshot for StaticSnapshot {
    fn snapshot(&self) -> Result<Vec<ActorState>, EnvError> {
        Ok(self.actors.clone())
    }
}
