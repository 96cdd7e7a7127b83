//! Error types for the race engine.

use crate::ids::{RecordId, RouteId};
use raceline_env::EnvError;
use thiserror::Error;

/// Errors raised by route management, trigger reconstruction and import.
///
/// Race-integrity problems (a skipped checkpoint, an airborne start) are not
/// errors; they surface as `RaceEvent::Notice` instead.
#[derive(Debug, Clone, Error)]
pub enum RaceError {
    #[error("Route not found: {0}")]
    RouteNotFound(RouteId),

    #[error("Route already loaded: {0}")]
    DuplicateRoute(RouteId),

    #[error("Unknown trigger kind: {0}")]
    UnknownTriggerKind(String),

    #[error("Route {0} already has a start trigger")]
    DuplicateStart(RouteId),

    #[error("Record not found: {0}")]
    RecordNotFound(RecordId),

    #[error("Record {0} already exists on this route")]
    DuplicateRecord(RecordId),

    #[error("Geometry hash mismatch: record has {record}, route has {route}")]
    HashMismatch { record: String, route: String },

    #[error("Import failed: {0}")]
    Import(String),

    #[error("Export failed: {0}")]
    Export(String),

    #[error("World snapshot failed: {0}")]
    Snapshot(String),

    #[error(transparent)]
    Persist(#[from] PersistError),
}

impl From<EnvError> for RaceError {
    fn from(err: EnvError) -> Self {
        RaceError::Snapshot(err.to_string())
    }
}

/// Errors from the persistence queue and storage backends.
///
/// `Clone` so one debounced outcome can be handed to every waiter.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PersistError {
    #[error("Persistence queue is closed")]
    QueueClosed,

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("Work item panicked: {0}")]
    Panicked(String),
}

pub type Result<T> = std::result::Result<T, RaceError>;
