//! Common types for the race environment abstraction.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for a tracked actor (a player observed in the world).
///
/// Uses UUID v4 for global uniqueness without coordination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ActorId(pub Uuid);

impl ActorId {
    /// Creates a new random ActorId.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates an ActorId from a UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Creates a deterministic ActorId from a seed (for simulation).
    pub fn from_seed(seed: u64) -> Self {
        let mut bytes = [0u8; 16];
        bytes[0..8].copy_from_slice(&seed.to_le_bytes());
        bytes[8..16].copy_from_slice(&seed.wrapping_mul(0x517cc1b727220a95).to_le_bytes());
        Self(Uuid::from_bytes(bytes))
    }

    /// Returns the inner UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ActorId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ActorId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Show first 8 chars for readability
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

/// One tick's observation of a tracked actor.
///
/// This is everything the race engine learns about a player: who they are,
/// where they stand, and whether they are on the ground or on a mount.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActorState {
    /// Stable identity across ticks
    pub id: ActorId,

    /// Display name (copied into completion records)
    pub name: String,

    /// Home world / shard name (copied into completion records)
    pub world: String,

    /// World position in game units
    pub position: Vector3<f64>,

    /// Standing on solid ground this tick
    pub grounded: bool,

    /// Riding a mount this tick
    pub mounted: bool,
}

impl ActorState {
    /// Creates a grounded, unmounted actor at a position.
    pub fn new(id: ActorId, name: impl Into<String>, position: Vector3<f64>) -> Self {
        Self {
            id,
            name: name.into(),
            world: String::new(),
            position,
            grounded: true,
            mounted: false,
        }
    }

    /// Returns a copy moved to a new position, keeping identity and flags.
    pub fn at(&self, position: Vector3<f64>) -> Self {
        Self {
            position,
            ..self.clone()
        }
    }

    /// Sets the home world.
    pub fn with_world(mut self, world: impl Into<String>) -> Self {
        self.world = world.into();
        self
    }

    /// Sets the grounded flag.
    pub fn with_grounded(mut self, grounded: bool) -> Self {
        self.grounded = grounded;
        self
    }

    /// Sets the mounted flag.
    pub fn with_mounted(mut self, mounted: bool) -> Self {
        self.mounted = mounted;
        self
    }
}
