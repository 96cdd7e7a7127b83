//! Route and record storage.
//!
//! The engine never touches storage directly; every call runs inside the
//! persistence queue under its lock.

use crate::error::PersistError;
use crate::ids::{RecordId, RouteId};
use crate::record::Record;
use crate::route::RouteDocument;
use std::collections::BTreeMap;
use std::path::Path;

// ============================================================================
// STORAGE TRAIT
// ============================================================================

/// Key-value backend for routes and their records.
pub trait RaceStorage: Send + 'static {
    /// Insert a route or replace the stored copy
    fn insert_or_update_route(&mut self, route: &RouteDocument) -> Result<(), PersistError>;

    /// Store a completion record under its route
    fn insert_record(&mut self, record: &Record) -> Result<(), PersistError>;

    /// Load every stored route
    fn query_all_routes(&mut self) -> Result<Vec<RouteDocument>, PersistError>;

    /// Load every record of one route
    fn query_records(&mut self, route: RouteId) -> Result<Vec<Record>, PersistError>;

    /// Remove a route and all of its records
    fn delete_route(&mut self, route: RouteId) -> Result<(), PersistError>;
}

fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, PersistError> {
    rmp_serde::to_vec_named(value).map_err(|e| PersistError::Encoding(e.to_string()))
}

fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T, PersistError> {
    rmp_serde::from_slice(bytes).map_err(|e| PersistError::Encoding(e.to_string()))
}

fn record_key(route: RouteId, record: RecordId) -> [u8; 32] {
    let mut key = [0u8; 32];
    key[..16].copy_from_slice(route.as_bytes());
    key[16..].copy_from_slice(record.as_bytes());
    key
}

// ============================================================================
// SLED STORE
// ============================================================================

/// Sled-backed storage.
///
/// Routes live in the `routes` tree keyed by route id; records live in the
/// `records` tree keyed by route id followed by record id, so one route's
/// records are a prefix scan.
pub struct SledStorage {
    db: sled::Db,
    routes: sled::Tree,
    records: sled::Tree,
}

impl SledStorage {
    /// Open a persistent store at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, PersistError> {
        let db = sled::open(path)
            .map_err(|e| PersistError::Storage(format!("Failed to open sled DB: {}", e)))?;
        Self::from_db(db)
    }

    /// Create a temporary store, removed on drop
    pub fn open_temp() -> Result<Self, PersistError> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(|e| PersistError::Storage(format!("Failed to open temp DB: {}", e)))?;
        Self::from_db(db)
    }

    fn from_db(db: sled::Db) -> Result<Self, PersistError> {
        let routes = db
            .open_tree("routes")
            .map_err(|e| PersistError::Storage(format!("Failed to open routes tree: {}", e)))?;
        let records = db
            .open_tree("records")
            .map_err(|e| PersistError::Storage(format!("Failed to open records tree: {}", e)))?;
        Ok(Self { db, routes, records })
    }

    fn flush(&self) -> Result<(), PersistError> {
        self.db
            .flush()
            .map_err(|e| PersistError::Storage(format!("Flush failed: {}", e)))?;
        Ok(())
    }
}

impl RaceStorage for SledStorage {
    fn insert_or_update_route(&mut self, route: &RouteDocument) -> Result<(), PersistError> {
        self.routes
            .insert(route.id.as_bytes(), encode(route)?)
            .map_err(|e| PersistError::Storage(format!("Route insert failed: {}", e)))?;
        self.flush()
    }

    fn insert_record(&mut self, record: &Record) -> Result<(), PersistError> {
        self.records
            .insert(record_key(record.route, record.id), encode(record)?)
            .map_err(|e| PersistError::Storage(format!("Record insert failed: {}", e)))?;
        self.flush()
    }

    fn query_all_routes(&mut self) -> Result<Vec<RouteDocument>, PersistError> {
        let mut routes = Vec::new();
        for entry in self.routes.iter() {
            let (_, value) = entry
                .map_err(|e| PersistError::Storage(format!("Iteration failed: {}", e)))?;
            routes.push(decode(&value)?);
        }
        Ok(routes)
    }

    fn query_records(&mut self, route: RouteId) -> Result<Vec<Record>, PersistError> {
        let mut records = Vec::new();
        for entry in self.records.scan_prefix(route.as_bytes()) {
            let (_, value) = entry
                .map_err(|e| PersistError::Storage(format!("Iteration failed: {}", e)))?;
            records.push(decode(&value)?);
        }
        Ok(records)
    }

    fn delete_route(&mut self, route: RouteId) -> Result<(), PersistError> {
        self.routes
            .remove(route.as_bytes())
            .map_err(|e| PersistError::Storage(format!("Route delete failed: {}", e)))?;

        let mut batch = sled::Batch::default();
        for key in self.records.scan_prefix(route.as_bytes()).keys() {
            let key = key.map_err(|e| PersistError::Storage(format!("Iteration failed: {}", e)))?;
            batch.remove(key);
        }
        self.records
            .apply_batch(batch)
            .map_err(|e| PersistError::Storage(format!("Record delete failed: {}", e)))?;
        self.flush()
    }
}

// ============================================================================
// IN-MEMORY STORE
// ============================================================================

/// In-memory storage for tests and simulation.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    routes: BTreeMap<RouteId, RouteDocument>,
    records: BTreeMap<(RouteId, RecordId), Record>,
    writes: usize,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of mutating calls applied so far.
    pub fn writes(&self) -> usize {
        self.writes
    }

    pub fn route(&self, id: RouteId) -> Option<&RouteDocument> {
        self.routes.get(&id)
    }

    pub fn record_count(&self) -> usize {
        self.records.len()
    }
}

impl RaceStorage for MemoryStorage {
    fn insert_or_update_route(&mut self, route: &RouteDocument) -> Result<(), PersistError> {
        self.routes.insert(route.id, route.clone());
        self.writes += 1;
        Ok(())
    }

    fn insert_record(&mut self, record: &Record) -> Result<(), PersistError> {
        self.records
            .insert((record.route, record.id), record.clone());
        self.writes += 1;
        Ok(())
    }

    fn query_all_routes(&mut self) -> Result<Vec<RouteDocument>, PersistError> {
        Ok(self.routes.values().cloned().collect())
    }

    fn query_records(&mut self, route: RouteId) -> Result<Vec<Record>, PersistError> {
        Ok(self
            .records
            .iter()
            .filter(|((r, _), _)| *r == route)
            .map(|(_, record)| record.clone())
            .collect())
    }

    fn delete_route(&mut self, route: RouteId) -> Result<(), PersistError> {
        self.routes.remove(&route);
        self.records.retain(|(r, _), _| *r != route);
        self.writes += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::OrientedBox;
    use crate::record::sample_record;
    use crate::route::Route;
    use crate::trigger::TriggerTag;
    use nalgebra::Vector3;

    fn sample_route() -> Route {
        let mut route = Route::new("Stairs", "Market");
        route
            .add_trigger(
                TriggerTag::Start,
                OrientedBox::axis_aligned(Vector3::zeros(), Vector3::new(1.0, 1.0, 1.0)),
            )
            .unwrap();
        route
    }

    fn roundtrip(storage: &mut dyn RaceStorage) {
        let route = sample_route();
        let mut record = sample_record("A", 10_000, 0);
        record.route = route.id();
        let mut other = sample_record("B", 11_000, 0);
        other.route = RouteId::new();

        storage.insert_or_update_route(&route.to_document()).unwrap();
        storage.insert_record(&record).unwrap();
        storage.insert_record(&other).unwrap();

        let routes = storage.query_all_routes().unwrap();
        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].triggers.len(), 1);
        assert_eq!(Route::from_document(routes[0].clone()).geometry_hash(), route.geometry_hash());

        let records = storage.query_records(route.id()).unwrap();
        assert_eq!(records, vec![record]);

        storage.delete_route(route.id()).unwrap();
        assert!(storage.query_all_routes().unwrap().is_empty());
        assert!(storage.query_records(route.id()).unwrap().is_empty());
        assert_eq!(storage.query_records(other.route).unwrap().len(), 1);
    }

    #[test]
    fn test_sled_store() {
        let mut store = SledStorage::open_temp().unwrap();
        roundtrip(&mut store);
    }

    #[test]
    fn test_memory_store() {
        let mut store = MemoryStorage::new();
        roundtrip(&mut store);
        assert_eq!(store.writes(), 4);
    }

    #[test]
    fn test_sled_update_replaces_route() {
        let mut store = SledStorage::open_temp().unwrap();
        let route = sample_route();
        let mut doc = route.to_document();

        store.insert_or_update_route(&doc).unwrap();
        doc.name = "Renamed".into();
        store.insert_or_update_route(&doc).unwrap();

        let routes = store.query_all_routes().unwrap();
        assert_eq!(routes.len(), 1);
        assert_eq!(routes[0].name, "Renamed");
    }
}
