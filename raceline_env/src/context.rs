//! Core environment context trait for the race engine.

use async_trait::async_trait;
use std::future::Future;
use std::time::{Duration, SystemTime};

/// The central interface for Environment Interaction.
///
/// This trait abstracts the "real world" so that the race engine can run
/// in both production (tokio) and simulation (virtual clock) environments.
///
/// # Implementations
///
/// - **Production**: `TokioContext` - wraps `tokio::time` and the system clock
/// - **Simulation**: `SimContext` - a manually advanced virtual clock
///
/// # Determinism
///
/// Race clocks, cool-downs and record timestamps all read time through this
/// trait, so a simulation that controls `now()` controls every timing
/// decision the engine makes.
#[async_trait]
pub trait RaceContext: Send + Sync + 'static {
    /// Returns the current monotonic time since context creation.
    ///
    /// Drives race stopwatches and finish cool-downs.
    /// In simulation, this is the virtual clock time.
    fn now(&self) -> Duration;

    /// Returns the wall-clock time used for record timestamps.
    ///
    /// In simulation, this is derived from virtual clock + epoch offset.
    fn system_time(&self) -> SystemTime;

    /// Suspends execution for the given duration.
    ///
    /// In production: wraps `tokio::time::sleep`
    /// In simulation: advances virtual clock
    async fn sleep(&self, duration: Duration);

    /// Spawns a background task.
    ///
    /// Route collision checks and race-line simplification run through here.
    fn spawn<F>(&self, name: &str, future: F)
    where
        F: Future<Output = ()> + Send + 'static;

    /// Returns the wall-clock time as Unix milliseconds.
    fn unix_millis(&self) -> u64 {
        self.system_time()
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }
}
