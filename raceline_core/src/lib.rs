//! Raceline Core - Real-time race tracking over oriented trigger volumes
//!
//! This library turns raw per-tick actor positions into verified race results:
//! 1. **Geometry**: oriented boxes with rotation-aware point containment
//! 2. **Race state machine**: Start / Checkpoint / Fail / Finish / Loop triggers
//!    dispatched per route with Fail-first priority
//! 3. **Race lines**: bounded path recording and adaptive Douglas-Peucker
//!    simplification
//! 4. **Persistence**: a batching, debouncing write queue in front of sled
//!
//! The engine never blocks the tick on storage; see [`engine::RaceEngine`].

pub mod engine;
pub mod error;
pub mod events;
pub mod export;
pub mod geometry;
pub mod ids;
pub mod path;
pub mod persistence;
pub mod record;
pub mod route;
pub mod simplify;
pub mod storage;
pub mod trigger;

// Re-export key types for convenience
pub use engine::{EngineConfig, RaceEngine, TickReport};
pub use error::{PersistError, RaceError, Result};
pub use events::{EventBus, FailReason, RaceEvent};
pub use geometry::{BoxShape, OrientedBox};
pub use ids::{RecordId, RouteId, TriggerId};
pub use path::{LineSegment, PathTracker, TimedPoint};
pub use persistence::{PersistenceQueue, QueueConfig, WorkHandle};
pub use record::{Record, RecordHandle, RetentionPolicy, Split};
pub use route::{RaceProgress, RaceSettings, Route, RouteDocument, RouteFlags};
pub use simplify::{simplify, SimplifyConfig};
pub use storage::{MemoryStorage, RaceStorage, SledStorage};
pub use trigger::{Edge, Trigger, TriggerKind, TriggerTag};
