//! Production race context on the Tokio runtime.

use crate::RaceContext;
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::time::Instant;
use tracing::Instrument;

/// Race clock backed by `tokio::time`.
///
/// The clock reads `tokio::time::Instant`, so a runtime started with
/// `start_paused = true` freezes race time along with every timer.
/// Record timestamps still come from the system clock.
#[derive(Debug, Clone, Copy)]
pub struct TokioContext {
    origin: Instant,
}

impl TokioContext {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    /// Context for handing to an engine and its background tasks.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }
}

impl Default for TokioContext {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RaceContext for TokioContext {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn system_time(&self) -> SystemTime {
        SystemTime::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }

    fn spawn<F>(&self, name: &str, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let span = tracing::trace_span!("race_task", task = name);
        tokio::spawn(future.instrument(span));
    }
}
