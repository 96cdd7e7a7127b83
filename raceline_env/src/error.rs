//! Error types for the race environment abstraction.

use thiserror::Error;

/// Errors that can occur in the environment abstraction layer.
#[derive(Debug, Error)]
pub enum EnvError {
    /// The world snapshot provider could not produce a snapshot
    #[error("Snapshot unavailable: {0}")]
    SnapshotUnavailable(String),

    /// A tracked actor disappeared between ticks
    #[error("Actor not tracked: {0}")]
    ActorNotTracked(String),
}

impl EnvError {
    /// Creates a snapshot error.
    pub fn snapshot(msg: impl Into<String>) -> Self {
        Self::SnapshotUnavailable(msg.into())
    }

    /// Creates an untracked-actor error.
    pub fn untracked(actor: impl std::fmt::Display) -> Self {
        Self::ActorNotTracked(actor.to_string())
    }
}
