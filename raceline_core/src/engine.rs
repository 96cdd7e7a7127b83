//! Race Engine - drives routes from world snapshots.
//!
//! The engine owns the route cache, the per-route event bus, the
//! persistence queue and a bounded pool for route checks.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        RaceEngine                            │
//! │   tick(world) ──► apply mutations ──► dispatch route checks  │
//! │                                          │ (≤ N permits)     │
//! │        ┌─────────────────────────────────┘                   │
//! │        ▼                                                     │
//! │   Route::check_collision ──► EventBus (broadcast per route)  │
//! │        │ Finished                                            │
//! │        ▼                                                     │
//! │   finalize_line (background) ──► mutation channel ──┐        │
//! │                                                     ▼        │
//! │                 next tick: add record ──► PersistenceQueue   │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! The route cache has a single writer: the engine itself. Background
//! work never edits a route's record list directly; it sends a mutation
//! request that the next tick applies.

use crate::error::{RaceError, Result};
use crate::events::{EventBus, RaceEvent};
use crate::export;
use crate::ids::{RecordId, RouteId};
use crate::persistence::{PersistenceQueue, QueueConfig, WorkHandle};
use crate::record::Record;
use crate::route::{RaceSettings, Route};
use crate::simplify::SimplifyConfig;
use crate::storage::RaceStorage;
use raceline_env::{ActorState, RaceContext, WorldSnapshot};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Notify, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

/// Configuration for a race engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Raw-point and segment cap per racer (default: 2000)
    pub path_capacity: usize,

    /// Finish re-entry window in ms (default: 3000)
    pub finish_cooldown_ms: u64,

    /// Quiet window for route edits in ms (default: 1000)
    pub debounce_delay_ms: u64,

    /// Persistence items per lock acquisition (default: 5)
    pub batch_size: usize,

    /// Persistence consumer idle sleep in ms (default: 50)
    pub poll_interval_ms: u64,

    /// Route checks in flight at once (default: 8)
    pub max_concurrent_checks: usize,

    /// Buffered events per route channel (default: 256)
    pub event_capacity: usize,

    /// Race-line simplification
    pub simplify: SimplifyConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            path_capacity: 2000,
            finish_cooldown_ms: 3000,
            debounce_delay_ms: 1000,
            batch_size: 5,
            poll_interval_ms: 50,
            max_concurrent_checks: 8,
            event_capacity: 256,
            simplify: SimplifyConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Parse a JSON config; missing fields take their defaults.
    pub fn from_json(text: &str) -> std::result::Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn race_settings(&self) -> RaceSettings {
        RaceSettings {
            path_capacity: self.path_capacity,
            finish_cooldown: Duration::from_millis(self.finish_cooldown_ms),
        }
    }

    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig {
            batch_size: self.batch_size,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            debounce_delay: Duration::from_millis(self.debounce_delay_ms),
        }
    }
}

/// What one tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub tick: u64,
    pub actors: usize,

    /// Route checks started this tick
    pub dispatched: usize,

    /// Routes skipped under back-pressure (still busy or no permit)
    pub skipped: usize,

    /// Mutation requests applied at the start of the tick
    pub applied: usize,
}

/// Requests from background work to the route cache.
enum Mutation {
    RecordReady { route: RouteId, record: Record },
}

struct RouteSlot {
    route: Arc<Mutex<Route>>,
    busy: Arc<AtomicBool>,
}

/// Count of background units still running, with a wake-up for `settle`.
#[derive(Default)]
struct Inflight {
    count: AtomicUsize,
    idle: Notify,
}

struct InflightGuard(Arc<Inflight>);

impl InflightGuard {
    fn enter(inflight: &Arc<Inflight>) -> Self {
        inflight.count.fetch_add(1, Ordering::SeqCst);
        Self(inflight.clone())
    }
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        self.0.count.fetch_sub(1, Ordering::SeqCst);
        self.0.idle.notify_one();
    }
}

fn lock(route: &Mutex<Route>) -> std::sync::MutexGuard<'_, Route> {
    route.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The race engine.
///
/// Generic over the context (clock and spawner) and the storage backend,
/// so the same engine runs against tokio and sled in production or a
/// virtual clock and in-memory storage in simulation.
pub struct RaceEngine<Ctx, S>
where
    Ctx: RaceContext,
    S: RaceStorage,
{
    context: Arc<Ctx>,
    config: EngineConfig,

    /// Only routes whose location matches are loaded (None: all)
    zone: Option<String>,

    routes: HashMap<RouteId, RouteSlot>,
    bus: EventBus,
    queue: PersistenceQueue<S>,
    checks: Arc<Semaphore>,
    mutations_tx: mpsc::UnboundedSender<Mutation>,
    mutations_rx: mpsc::UnboundedReceiver<Mutation>,
    inflight: Arc<Inflight>,

    /// Record writes not yet confirmed
    writes: Vec<WorkHandle<()>>,
    tick_count: u64,
}

impl<Ctx, S> RaceEngine<Ctx, S>
where
    Ctx: RaceContext,
    S: RaceStorage,
{
    /// Creates an engine. Must run inside a Tokio runtime.
    pub fn new(context: Arc<Ctx>, storage: S, config: EngineConfig) -> Self {
        let (mutations_tx, mutations_rx) = mpsc::unbounded_channel();
        Self {
            queue: PersistenceQueue::new(storage, config.queue_config()),
            checks: Arc::new(Semaphore::new(config.max_concurrent_checks.max(1))),
            bus: EventBus::new(config.event_capacity),
            context,
            config,
            zone: None,
            routes: HashMap::new(),
            mutations_tx,
            mutations_rx,
            inflight: Arc::new(Inflight::default()),
            writes: Vec::new(),
            tick_count: 0,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    pub fn zone(&self) -> Option<&str> {
        self.zone.as_deref()
    }

    pub fn queue(&self) -> &PersistenceQueue<S> {
        &self.queue
    }

    pub fn route_ids(&self) -> Vec<RouteId> {
        let mut ids: Vec<RouteId> = self.routes.keys().copied().collect();
        ids.sort();
        ids
    }

    /// Read a cached route.
    pub fn with_route<R>(&self, id: RouteId, f: impl FnOnce(&Route) -> R) -> Result<R> {
        let slot = self.routes.get(&id).ok_or(RaceError::RouteNotFound(id))?;
        let route = lock(&slot.route);
        Ok(f(&route))
    }

    // ========================================================================
    // ROUTE MANAGEMENT
    // ========================================================================

    /// Load stored routes for the current zone into the cache.
    ///
    /// Routes already cached are left alone. Returns how many were added.
    pub async fn load_routes(&mut self) -> Result<usize> {
        let docs = self.queue.submit(|s: &mut S| s.query_all_routes()).await?;
        let now_ms = self.context.unix_millis();
        let mut loaded = 0;

        for doc in docs {
            if self.zone.as_ref().is_some_and(|zone| *zone != doc.location) {
                continue;
            }
            if self.routes.contains_key(&doc.id) {
                continue;
            }

            let id = doc.id;
            let records = self.queue.submit(move |s: &mut S| s.query_records(id)).await?;
            let mut route = Route::from_document(doc);
            route.restore_records(records, now_ms);
            self.insert_slot(route);
            loaded += 1;
        }

        info!(loaded, zone = ?self.zone, "Routes loaded");
        Ok(loaded)
    }

    /// Add a new route and persist it immediately.
    pub fn add_route(&mut self, route: Route) -> Result<WorkHandle<()>> {
        let id = route.id();
        if self.routes.contains_key(&id) {
            return Err(RaceError::DuplicateRoute(id));
        }

        let doc = route.to_document();
        self.insert_slot(route);
        info!(route = %id, "Route added");
        Ok(self.queue.submit(move |s: &mut S| s.insert_or_update_route(&doc)))
    }

    /// Edit a route in place; the save is debounced per route.
    pub fn update_route(&mut self, id: RouteId, edit: impl FnOnce(&mut Route)) -> Result<WorkHandle<()>> {
        let slot = self.routes.get(&id).ok_or(RaceError::RouteNotFound(id))?;
        let doc = {
            let mut route = lock(&slot.route);
            edit(&mut route);
            route.to_document()
        };
        debug!(route = %id, "Route edited");
        Ok(self
            .queue
            .debounced_write(format!("route:{}", id.0), move |s: &mut S| {
                s.insert_or_update_route(&doc)
            }))
    }

    /// Drop a route from the cache and storage.
    pub fn remove_route(&mut self, id: RouteId) -> Result<WorkHandle<()>> {
        if self.routes.remove(&id).is_none() {
            return Err(RaceError::RouteNotFound(id));
        }
        self.bus.remove(id);
        info!(route = %id, "Route removed");
        Ok(self.queue.submit(move |s: &mut S| s.delete_route(id)))
    }

    fn insert_slot(&mut self, mut route: Route) {
        route.set_settings(self.config.race_settings());
        let id = route.id();
        self.bus.sender(id);
        self.routes.insert(
            id,
            RouteSlot {
                route: Arc::new(Mutex::new(route)),
                busy: Arc::new(AtomicBool::new(false)),
            },
        );
    }

    /// Subscribe to a loaded route's events.
    pub fn subscribe(&mut self, id: RouteId) -> Result<broadcast::Receiver<RaceEvent>> {
        if !self.routes.contains_key(&id) {
            return Err(RaceError::RouteNotFound(id));
        }
        Ok(self.bus.subscribe(id))
    }

    /// Switch zones: flush pending work, drop every route and event
    /// channel, then load the new zone's routes.
    pub async fn change_zone(&mut self, zone: impl Into<String>) -> Result<usize> {
        self.settle().await;
        self.routes.clear();
        self.bus.clear();
        self.zone = Some(zone.into());
        info!(zone = ?self.zone, "Zone changed");
        self.load_routes().await
    }

    // ========================================================================
    // TICK
    // ========================================================================

    /// Run one tick against a world snapshot.
    ///
    /// Applies queued mutations, then dispatches one background check per
    /// route. A route whose previous check is still running, or that cannot
    /// get a permit from the pool, is skipped and retried next tick.
    pub fn tick<W>(&mut self, world: &W) -> Result<TickReport>
    where
        W: WorldSnapshot + ?Sized,
    {
        self.tick_count += 1;
        let applied = self.apply_mutations();
        self.reap_writes();

        let actors: Arc<Vec<ActorState>> = Arc::new(world.snapshot()?);
        let now = self.context.now();
        let unix_ms = self.context.unix_millis();

        let mut report = TickReport {
            tick: self.tick_count,
            actors: actors.len(),
            applied,
            ..Default::default()
        };

        for (id, slot) in &self.routes {
            if slot.busy.load(Ordering::SeqCst) {
                debug!(route = %id, "Route check still running, skipping");
                report.skipped += 1;
                continue;
            }
            let Ok(permit) = self.checks.clone().try_acquire_owned() else {
                debug!(route = %id, "Route check pool exhausted, skipping");
                report.skipped += 1;
                continue;
            };

            slot.busy.store(true, Ordering::SeqCst);
            let check = RouteCheck {
                context: self.context.clone(),
                route: slot.route.clone(),
                busy: slot.busy.clone(),
                actors: actors.clone(),
                now,
                unix_ms,
                events: self.bus.sender(*id),
                mutations: self.mutations_tx.clone(),
                simplify: self.config.simplify.clone(),
                inflight: self.inflight.clone(),
                _guard: InflightGuard::enter(&self.inflight),
                _permit: permit,
            };
            self.context.spawn("route-check", check.run());
            report.dispatched += 1;
        }

        Ok(report)
    }

    /// Wait for every route check and line simplification to finish,
    /// apply their results, and confirm outstanding record writes.
    pub async fn settle(&mut self) {
        loop {
            self.apply_mutations();
            if self.inflight.count.load(Ordering::SeqCst) == 0 {
                // A unit may have queued a mutation just before it finished
                if self.apply_mutations() == 0 {
                    break;
                }
                continue;
            }
            self.inflight.idle.notified().await;
        }

        for handle in std::mem::take(&mut self.writes) {
            if let Err(e) = handle.await {
                warn!("Record write failed: {}", e);
            }
        }
    }

    fn apply_mutations(&mut self) -> usize {
        let now_ms = self.context.unix_millis();
        let mut applied = 0;

        while let Ok(mutation) = self.mutations_rx.try_recv() {
            match mutation {
                Mutation::RecordReady { route, record } => {
                    let Some(slot) = self.routes.get(&route) else {
                        debug!(route = %route, record = %record.id, "Record for unloaded route dropped");
                        continue;
                    };
                    let kept = lock(&slot.route).add_record(record.clone(), now_ms);
                    if kept {
                        self.writes
                            .push(self.queue.submit(move |s: &mut S| s.insert_record(&record)));
                    } else {
                        debug!(route = %route, record = %record.id, "Record rejected by retention");
                    }
                    applied += 1;
                }
            }
        }
        applied
    }

    fn reap_writes(&mut self) {
        self.writes.retain_mut(|handle| match handle.try_take() {
            None => true,
            Some(Ok(())) => false,
            Some(Err(e)) => {
                warn!("Record write failed: {}", e);
                false
            }
        });
    }

    // ========================================================================
    // RECORDS, EXPORT, IMPORT
    // ========================================================================

    pub fn records(&self, id: RouteId) -> Result<Vec<Record>> {
        self.with_route(id, |route| route.records().to_vec())
    }

    pub fn export_route(&self, id: RouteId) -> Result<String> {
        self.with_route(id, export::export_route)?
    }

    /// Import a shared route and persist it.
    pub fn import_route(&mut self, text: &str) -> Result<(RouteId, WorkHandle<()>)> {
        let doc = export::import_route(text)?;
        let route = Route::from_document(doc);
        let id = route.id();
        let handle = self.add_route(route)?;
        Ok((id, handle))
    }

    pub fn export_record(&self, route: RouteId, record: RecordId) -> Result<String> {
        self.with_route(route, |r| {
            r.records()
                .iter()
                .find(|rec| rec.id == record)
                .ok_or(RaceError::RecordNotFound(record))
                .and_then(export::export_record)
        })?
    }

    /// Import a shared record onto its (loaded) route.
    ///
    /// Rejects a record whose geometry hash no longer matches the route,
    /// a record the route already holds, and one its retention drops.
    /// Nothing is persisted on rejection.
    pub fn import_record(&mut self, text: &str) -> Result<WorkHandle<()>> {
        let record = export::import_record(text)?;
        let slot = self
            .routes
            .get(&record.route)
            .ok_or(RaceError::RouteNotFound(record.route))?;

        {
            let mut route = lock(&slot.route);
            export::verify_record(&route, &record)?;
            if !route.add_record(record.clone(), self.context.unix_millis()) {
                debug!(route = %record.route, record = %record.id, "Imported record dropped by retention");
                return Err(RaceError::Import("rejected by retention".into()));
            }
        }

        info!(route = %record.route, record = %record.id, "Record imported");
        Ok(self.queue.submit(move |s: &mut S| s.insert_record(&record)))
    }

    /// Settle outstanding work, then stop the persistence queue.
    pub async fn shutdown(&mut self) {
        self.settle().await;
        self.queue.shutdown().await;
        info!(ticks = self.tick_count, "Race engine stopped");
    }
}

/// One route's evaluation for one tick, run in the background.
struct RouteCheck<Ctx: RaceContext> {
    context: Arc<Ctx>,
    route: Arc<Mutex<Route>>,
    busy: Arc<AtomicBool>,
    actors: Arc<Vec<ActorState>>,
    now: Duration,
    unix_ms: u64,
    events: broadcast::Sender<RaceEvent>,
    mutations: mpsc::UnboundedSender<Mutation>,
    simplify: SimplifyConfig,
    inflight: Arc<Inflight>,
    _guard: InflightGuard,
    _permit: OwnedSemaphorePermit,
}

impl<Ctx: RaceContext> RouteCheck<Ctx> {
    async fn run(self) {
        let events = {
            let mut route = lock(&self.route);
            let mut events = Vec::new();
            for actor in self.actors.iter() {
                events.extend(route.check_collision(actor, self.now, self.unix_ms));
            }
            events
        };

        for event in events {
            if let RaceEvent::Finished { route, record, .. } = &event {
                let (route, record) = (*route, record.clone());
                let simplify = self.simplify.clone();
                let mutations = self.mutations.clone();
                let guard = InflightGuard::enter(&self.inflight);
                self.context.spawn("finalize-line", async move {
                    let _guard = guard;
                    let record = record.finalize_line(&simplify).await;
                    let _ = mutations.send(Mutation::RecordReady { route, record });
                });
            }
            // No subscribers is fine
            let _ = self.events.send(event);
        }

        self.busy.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::OrientedBox;
    use crate::record::RetentionPolicy;
    use crate::storage::MemoryStorage;
    use crate::trigger::TriggerTag;
    use nalgebra::Vector3;
    use raceline_env::{ActorId, StaticSnapshot, TokioContext};

    type Engine = RaceEngine<TokioContext, MemoryStorage>;

    fn gate(x: f64) -> OrientedBox {
        OrientedBox::axis_aligned(Vector3::new(x, 0.0, 0.0), Vector3::new(1.0, 2.0, 4.0))
    }

    fn sprint(location: &str) -> Route {
        let mut route = Route::new("Sprint", location);
        route.add_trigger(TriggerTag::Start, gate(0.0)).unwrap();
        route.add_trigger(TriggerTag::Checkpoint, gate(20.0)).unwrap();
        route.add_trigger(TriggerTag::Finish, gate(40.0)).unwrap();
        route
    }

    fn engine(storage: MemoryStorage) -> Engine {
        RaceEngine::new(TokioContext::shared(), storage, EngineConfig::default())
    }

    /// Walk one actor along +x, one unit per 100 ms tick.
    async fn walk(engine: &mut Engine, xs: impl IntoIterator<Item = f64>) {
        let runner = ActorState::new(ActorId::from_seed(1), "Runner", Vector3::zeros());
        let mut world = StaticSnapshot::default();
        for x in xs {
            world.upsert(runner.at(Vector3::new(x, 0.0, 0.0)));
            engine.tick(&world).unwrap();
            engine.settle().await;
            tokio::time::advance(Duration::from_millis(100)).await;
        }
    }

    #[test]
    fn test_engine_config_defaults_and_json() {
        let config = EngineConfig::default();
        assert_eq!(config.path_capacity, 2000);
        assert_eq!(config.batch_size, 5);
        assert_eq!(config.race_settings().finish_cooldown, Duration::from_secs(3));

        let parsed = EngineConfig::from_json(r#"{ "max_concurrent_checks": 2 }"#).unwrap();
        assert_eq!(parsed.max_concurrent_checks, 2);
        assert_eq!(parsed.debounce_delay_ms, 1000);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sprint_produces_record_and_events() {
        let mut engine = engine(MemoryStorage::new());
        engine.add_route(sprint("Plaza")).unwrap().await.unwrap();
        let route = engine.route_ids()[0];
        let mut rx = engine.subscribe(route).unwrap();

        walk(&mut engine, (0..=41).map(f64::from)).await;

        let mut labels = Vec::new();
        while let Ok(event) = rx.try_recv() {
            labels.push(event.label());
        }
        assert_eq!(labels, vec!["started", "checkpoint", "finished"]);

        let records = engine.records(route).unwrap();
        assert_eq!(records.len(), 1);
        // Straight run: the line collapses to its endpoints
        assert_eq!(records[0].line.len(), 2);
        assert_eq!(records[0].actor_name, "Runner");

        let stored = engine
            .queue()
            .submit(move |s: &mut MemoryStorage| s.query_records(route))
            .await
            .unwrap();
        assert_eq!(stored.len(), 1);
    }

    #[tokio::test]
    async fn test_busy_route_is_skipped() {
        let mut engine = engine(MemoryStorage::new());
        engine.add_route(sprint("Plaza")).unwrap();
        let world = StaticSnapshot::default();

        let first = engine.tick(&world).unwrap();
        // The first check has not had a chance to run yet
        let second = engine.tick(&world).unwrap();

        assert_eq!(first.dispatched, 1);
        assert_eq!(second.dispatched, 0);
        assert_eq!(second.skipped, 1);

        engine.settle().await;
        assert_eq!(engine.tick(&world).unwrap().dispatched, 1);
    }

    #[tokio::test]
    async fn test_pool_caps_concurrent_checks() {
        let config = EngineConfig {
            max_concurrent_checks: 1,
            ..Default::default()
        };
        let mut engine: Engine = RaceEngine::new(TokioContext::shared(), MemoryStorage::new(), config);
        engine.add_route(sprint("Plaza")).unwrap();
        engine.add_route(sprint("Plaza")).unwrap();

        let report = engine.tick(&StaticSnapshot::default()).unwrap();

        assert_eq!(report.dispatched, 1);
        assert_eq!(report.skipped, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_route_is_debounced() {
        let mut engine = engine(MemoryStorage::new());
        let route = sprint("Plaza");
        let id = route.id();
        engine.add_route(route).unwrap().await.unwrap();

        let mut handles = Vec::new();
        for i in 0..10 {
            handles.push(
                engine
                    .update_route(id, |r| r.set_name(format!("Sprint v{}", i)))
                    .unwrap(),
            );
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let (writes, name) = engine
            .queue()
            .submit(move |s: &mut MemoryStorage| {
                Ok((s.writes(), s.route(id).map(|r| r.name.clone())))
            })
            .await
            .unwrap();
        assert_eq!(writes, 2);
        assert_eq!(name.as_deref(), Some("Sprint v9"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_record_import_checks_geometry() {
        let mut engine = engine(MemoryStorage::new());
        let route = sprint("Plaza");
        let id = route.id();
        engine.add_route(route).unwrap();
        walk(&mut engine, (0..=41).map(f64::from)).await;

        let record = engine.records(id).unwrap()[0].id;
        let text = engine.export_record(id, record).unwrap();

        // Same record again is a duplicate
        assert!(matches!(
            engine.import_record(&text),
            Err(RaceError::DuplicateRecord(_))
        ));

        // Moving the finish changes the geometry hash
        engine
            .update_route(id, |r| {
                let finish = r.triggers()[2].id();
                r.set_trigger_volume(finish, gate(45.0));
            })
            .unwrap();
        assert!(matches!(
            engine.import_record(&text),
            Err(RaceError::HashMismatch { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_record_import_respects_retention() {
        let mut source = engine(MemoryStorage::new());
        let route = sprint("Plaza");
        let id = route.id();
        source.add_route(route).unwrap();
        walk(&mut source, (0..=41).map(f64::from)).await;
        let record = source.records(id).unwrap()[0].clone();
        assert!(record.elapsed_ms > 1_000);
        let route_text = source.export_route(id).unwrap();
        let record_text = source.export_record(id, record.id).unwrap();

        let mut target = engine(MemoryStorage::new());
        let (_, handle) = target.import_route(&route_text).unwrap();
        handle.await.unwrap();
        target
            .update_route(id, |r| {
                r.set_retention(RetentionPolicy {
                    max_elapsed_ms: Some(1_000),
                    ..Default::default()
                })
            })
            .unwrap()
            .await
            .unwrap();

        assert!(matches!(
            target.import_record(&record_text),
            Err(RaceError::Import(_))
        ));
        assert!(target.records(id).unwrap().is_empty());
        let stored = target
            .queue()
            .submit(|s: &mut MemoryStorage| Ok(s.record_count()))
            .await
            .unwrap();
        assert_eq!(stored, 0);
    }

    #[tokio::test]
    async fn test_route_export_import_roundtrip() {
        let mut source = engine(MemoryStorage::new());
        let route = sprint("Plaza");
        let id = route.id();
        source.add_route(route).unwrap();
        let text = source.export_route(id).unwrap();

        let mut target = engine(MemoryStorage::new());
        let (imported, handle) = target.import_route(&text).unwrap();
        handle.await.unwrap();

        assert_eq!(imported, id);
        assert!(matches!(target.import_route(&text), Err(RaceError::DuplicateRoute(_))));
    }

    #[tokio::test]
    async fn test_load_routes_filters_by_zone() {
        let mut storage = MemoryStorage::new();
        storage.insert_or_update_route(&sprint("Plaza").to_document()).unwrap();
        storage.insert_or_update_route(&sprint("Harbor").to_document()).unwrap();
        let mut engine = engine(storage);

        assert_eq!(engine.change_zone("Harbor").await.unwrap(), 1);
        let only = engine.route_ids()[0];
        assert_eq!(engine.with_route(only, |r| r.location().to_string()).unwrap(), "Harbor");
    }

    #[tokio::test]
    async fn test_zone_change_closes_subscriptions() {
        let mut engine = engine(MemoryStorage::new());
        let route = sprint("Plaza");
        let id = route.id();
        engine.add_route(route).unwrap().await.unwrap();
        let mut rx = engine.subscribe(id).unwrap();

        engine.change_zone("Harbor").await.unwrap();

        assert!(matches!(rx.recv().await, Err(broadcast::error::RecvError::Closed)));
        assert!(matches!(engine.subscribe(id), Err(RaceError::RouteNotFound(_))));
    }

    #[tokio::test]
    async fn test_remove_and_shutdown() {
        let mut engine = engine(MemoryStorage::new());
        let route = sprint("Plaza");
        let id = route.id();
        engine.add_route(route).unwrap().await.unwrap();

        engine.remove_route(id).unwrap().await.unwrap();
        assert!(engine.route_ids().is_empty());
        assert!(matches!(engine.remove_route(id), Err(RaceError::RouteNotFound(_))));

        engine.shutdown().await;
        let late = engine.add_route(sprint("Plaza")).unwrap();
        assert_eq!(late.await, Err(crate::error::PersistError::QueueClosed));
    }
}
