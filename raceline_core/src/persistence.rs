//! Write-coalescing persistence queue.
//!
//! All storage access goes through one consumer task that drains work in
//! small batches under a storage lock, so the tick loop never waits on I/O.
//!
//! # Write paths
//!
//! - [`PersistenceQueue::submit`]: queued, applied in submission order
//! - [`PersistenceQueue::debounced_write`]: per-key quiet window; only the
//!   last submission in a burst runs, and every waiter in the burst gets
//!   its outcome
//!
//! Both paths take the same storage lock, so they never interleave.

use crate::error::PersistError;
use crate::storage::RaceStorage;
use std::collections::HashMap;
use std::future::Future;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Tuning for the persistence queue.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Items applied per lock acquisition (default: 5)
    pub batch_size: usize,

    /// Consumer sleep when the queue is empty (default: 50ms)
    pub poll_interval: Duration,

    /// Quiet window for debounced writes (default: 1s)
    pub debounce_delay: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            batch_size: 5,
            poll_interval: Duration::from_millis(50),
            debounce_delay: Duration::from_millis(1000),
        }
    }
}

type Job<S> = Box<dyn FnOnce(&mut S) + Send>;
type Work<S> = Box<dyn FnOnce(&mut S) -> Result<(), PersistError> + Send>;

/// Completion handle for one unit of work.
///
/// Resolves to the work's result, or `QueueClosed` if the queue shut down
/// before the work ran.
#[derive(Debug)]
pub struct WorkHandle<T> {
    rx: oneshot::Receiver<Result<T, PersistError>>,
}

impl<T> WorkHandle<T> {
    fn resolved(result: Result<T, PersistError>) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(result);
        Self { rx }
    }

    /// Take the result if the work has completed, without waiting.
    pub fn try_take(&mut self) -> Option<Result<T, PersistError>> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(PersistError::QueueClosed)),
        }
    }
}

impl<T> Future for WorkHandle<T> {
    type Output = Result<T, PersistError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(PersistError::QueueClosed)))
    }
}

struct DebounceSlot {
    generation: u64,
    waiters: Vec<oneshot::Sender<Result<(), PersistError>>>,
}

type DebounceMap = Arc<std::sync::Mutex<HashMap<String, DebounceSlot>>>;

/// Single-consumer persistence queue over a storage backend.
pub struct PersistenceQueue<S: RaceStorage> {
    config: QueueConfig,
    jobs: mpsc::UnboundedSender<Job<S>>,
    storage: Arc<Mutex<S>>,
    debounce: DebounceMap,
    pending: Arc<AtomicUsize>,
    shutdown: watch::Sender<bool>,
    consumer: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl<S: RaceStorage> PersistenceQueue<S> {
    /// Create the queue and start its consumer. Must run inside a Tokio runtime.
    pub fn new(storage: S, config: QueueConfig) -> Self {
        let (jobs, rx) = mpsc::unbounded_channel();
        let (shutdown, shutdown_rx) = watch::channel(false);
        let storage = Arc::new(Mutex::new(storage));
        let pending = Arc::new(AtomicUsize::new(0));

        let consumer = tokio::spawn(run_consumer(
            rx,
            storage.clone(),
            shutdown_rx,
            config.batch_size.max(1),
            config.poll_interval,
            pending.clone(),
        ));

        Self {
            config,
            jobs,
            storage,
            debounce: Arc::new(std::sync::Mutex::new(HashMap::new())),
            pending,
            shutdown,
            consumer: std::sync::Mutex::new(Some(consumer)),
        }
    }

    pub fn is_closed(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Queued items not yet applied.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Keys with a debounce window still open.
    pub fn pending_debounced(&self) -> usize {
        self.debounce
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Queue a unit of work. Never blocks.
    pub fn submit<T, F>(&self, work: F) -> WorkHandle<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut S) -> Result<T, PersistError> + Send + 'static,
    {
        if self.is_closed() {
            return WorkHandle::resolved(Err(PersistError::QueueClosed));
        }

        let (tx, rx) = oneshot::channel();
        let job: Job<S> = Box::new(move |storage: &mut S| {
            let _ = tx.send(run_guarded(storage, work));
        });

        self.pending.fetch_add(1, Ordering::SeqCst);
        if self.jobs.send(job).is_err() {
            // Dropping the job drops its sender; the handle sees QueueClosed
            self.pending.fetch_sub(1, Ordering::SeqCst);
        }
        WorkHandle { rx }
    }

    /// Coalesce rapid writes to the same key.
    ///
    /// Each call restarts the key's quiet window. When the window elapses
    /// without another call, the latest work runs and every handle issued
    /// during the burst resolves with its result.
    pub fn debounced_write<F>(&self, key: impl Into<String>, work: F) -> WorkHandle<()>
    where
        F: FnOnce(&mut S) -> Result<(), PersistError> + Send + 'static,
    {
        if self.is_closed() {
            return WorkHandle::resolved(Err(PersistError::QueueClosed));
        }

        let key = key.into();
        let (tx, rx) = oneshot::channel();
        let generation = {
            let mut slots = self.debounce.lock().unwrap_or_else(PoisonError::into_inner);
            let slot = slots.entry(key.clone()).or_insert_with(|| DebounceSlot {
                generation: 0,
                waiters: Vec::new(),
            });
            slot.generation += 1;
            slot.waiters.push(tx);
            slot.generation
        };

        let work: Work<S> = Box::new(work);
        tokio::spawn(run_debounced(
            key,
            generation,
            work,
            self.debounce.clone(),
            self.storage.clone(),
            self.shutdown.subscribe(),
            self.config.debounce_delay,
        ));

        WorkHandle { rx }
    }

    /// Stop the consumer and every debounce timer.
    ///
    /// A batch already being applied finishes; queued work and open
    /// debounce windows resolve with `QueueClosed`.
    pub async fn shutdown(&self) {
        if self.shutdown.send_replace(true) {
            return;
        }
        let consumer = self
            .consumer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = consumer {
            if let Err(e) = handle.await {
                warn!("Persistence consumer ended abnormally: {}", e);
            }
        }
        info!("Persistence queue shut down");
    }
}

/// Run one unit of work, capturing a panic as an error.
fn run_guarded<S, T, F>(storage: &mut S, work: F) -> Result<T, PersistError>
where
    F: FnOnce(&mut S) -> Result<T, PersistError>,
{
    catch_unwind(AssertUnwindSafe(|| work(storage))).unwrap_or_else(|payload| {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        Err(PersistError::Panicked(message))
    })
}

async fn run_consumer<S: RaceStorage>(
    mut rx: mpsc::UnboundedReceiver<Job<S>>,
    storage: Arc<Mutex<S>>,
    mut shutdown: watch::Receiver<bool>,
    batch_size: usize,
    poll_interval: Duration,
    pending: Arc<AtomicUsize>,
) {
    debug!(batch_size, "Persistence consumer started");

    loop {
        if *shutdown.borrow() {
            break;
        }

        let mut batch = Vec::with_capacity(batch_size);
        let mut disconnected = false;
        while batch.len() < batch_size {
            match rx.try_recv() {
                Ok(job) => batch.push(job),
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    disconnected = true;
                    break;
                }
            }
        }

        if batch.is_empty() {
            if disconnected {
                break;
            }
            tokio::select! {
                _ = tokio::time::sleep(poll_interval) => {}
                _ = shutdown.changed() => {}
            }
            continue;
        }

        let mut guard = storage.lock().await;
        for job in batch {
            job(&mut *guard);
            pending.fetch_sub(1, Ordering::SeqCst);
        }
    }

    rx.close();
    let mut dropped = 0;
    while rx.try_recv().is_ok() {
        pending.fetch_sub(1, Ordering::SeqCst);
        dropped += 1;
    }
    if dropped > 0 {
        warn!(dropped, "Persistence queue closed with work outstanding");
    }
}

async fn run_debounced<S: RaceStorage>(
    key: String,
    generation: u64,
    work: Work<S>,
    slots: DebounceMap,
    storage: Arc<Mutex<S>>,
    mut shutdown: watch::Receiver<bool>,
    delay: Duration,
) {
    let elapsed = tokio::select! {
        _ = tokio::time::sleep(delay) => true,
        _ = shutdown.changed() => false,
    };
    let cancelled = !elapsed || *shutdown.borrow();

    let waiters = {
        let mut map = slots.lock().unwrap_or_else(PoisonError::into_inner);
        match map.get(&key) {
            Some(slot) if slot.generation == generation => {
                map.remove(&key).map(|slot| slot.waiters).unwrap_or_default()
            }
            // Superseded by a later submission
            _ => return,
        }
    };

    let outcome = if cancelled {
        Err(PersistError::QueueClosed)
    } else {
        let mut guard = storage.lock().await;
        run_guarded(&mut *guard, work)
    };

    debug!(key = %key, coalesced = waiters.len(), ok = outcome.is_ok(), "Debounced write applied");
    for waiter in waiters {
        let _ = waiter.send(outcome.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    fn queue() -> PersistenceQueue<MemoryStorage> {
        PersistenceQueue::new(MemoryStorage::new(), QueueConfig::default())
    }

    #[tokio::test]
    async fn test_submit_returns_result() {
        let q = queue();
        let handle = q.submit(|s: &mut MemoryStorage| Ok(s.writes() + 41));
        assert_eq!(handle.await, Ok(41));
    }

    #[tokio::test]
    async fn test_failure_is_isolated_per_item() {
        let q = queue();
        let ok_before = q.submit(|_: &mut MemoryStorage| Ok(1));
        let failing = q.submit(|_: &mut MemoryStorage| -> Result<u32, PersistError> {
            Err(PersistError::Storage("disk full".into()))
        });
        let panicking = q.submit(|_: &mut MemoryStorage| -> Result<u32, PersistError> {
            panic!("boom")
        });
        let ok_after = q.submit(|_: &mut MemoryStorage| Ok(2));

        assert_eq!(ok_before.await, Ok(1));
        assert_eq!(failing.await, Err(PersistError::Storage("disk full".into())));
        assert_eq!(panicking.await, Err(PersistError::Panicked("boom".into())));
        assert_eq!(ok_after.await, Ok(2));
    }

    #[tokio::test]
    async fn test_applies_in_submission_order() {
        let q = queue();
        let handles: Vec<_> = (0..12)
            .map(|i| {
                q.submit(move |s: &mut MemoryStorage| {
                    let route = crate::route::Route::new(format!("r{}", i), "");
                    s.insert_or_update_route(&route.to_document())?;
                    Ok(s.writes())
                })
            })
            .collect();

        let mut seen = Vec::new();
        for h in handles {
            seen.push(h.await.unwrap());
        }
        assert_eq!(seen, (1..=12).collect::<Vec<_>>());
        assert_eq!(q.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounce_burst_applies_last_write_once() {
        let q = queue();
        let mut handles = Vec::new();

        for i in 0..10u32 {
            handles.push(q.debounced_write("route-a", move |s: &mut MemoryStorage| {
                let route = crate::route::Route::with_id(
                    crate::ids::RouteId::from_seed(1),
                    format!("v{}", i),
                    "",
                );
                s.insert_or_update_route(&route.to_document())
            }));
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        for h in handles {
            assert_eq!(h.await, Ok(()));
        }

        let check = q.submit(|s: &mut MemoryStorage| {
            let name = s
                .route(crate::ids::RouteId::from_seed(1))
                .map(|r| r.name.clone());
            Ok((s.writes(), name))
        });
        assert_eq!(check.await, Ok((1, Some("v9".to_string()))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_debounce_keys_are_independent() {
        let q = queue();
        let a = q.debounced_write("a", |_: &mut MemoryStorage| Ok(()));
        let b = q.debounced_write("b", |_: &mut MemoryStorage| {
            Err(PersistError::Storage("b failed".into()))
        });

        assert_eq!(a.await, Ok(()));
        assert!(b.await.is_err());
        assert_eq!(q.pending_debounced(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_shutdown_lets_running_batch_finish() {
        let q = Arc::new(queue());
        let (started_tx, started_rx) = oneshot::channel();
        let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();

        let running = q.submit(move |s: &mut MemoryStorage| {
            let _ = started_tx.send(());
            let _ = release_rx.recv();
            let route = crate::route::Route::new("held", "");
            s.insert_or_update_route(&route.to_document())?;
            Ok(s.writes())
        });
        started_rx.await.unwrap();
        let queued = q.submit(|s: &mut MemoryStorage| Ok(s.writes()));

        let closing = tokio::spawn({
            let q = q.clone();
            async move { q.shutdown().await }
        });
        while !q.is_closed() {
            tokio::task::yield_now().await;
        }
        release_tx.send(()).unwrap();
        closing.await.unwrap();

        assert_eq!(running.await, Ok(1));
        assert_eq!(queued.await, Err(PersistError::QueueClosed));
        assert_eq!(q.pending(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_cancels_debounce_and_rejects_new_work() {
        let q = queue();
        let waiting = q.debounced_write("k", |_: &mut MemoryStorage| Ok(()));

        q.shutdown().await;

        assert_eq!(waiting.await, Err(PersistError::QueueClosed));
        let late = q.submit(|_: &mut MemoryStorage| Ok(()));
        assert_eq!(late.await, Err(PersistError::QueueClosed));
        assert!(q.is_closed());
    }
}
