//! Completion records and record retention.

use crate::ids::{RecordId, RouteId, TriggerId};
use crate::path::TimedPoint;
use crate::simplify::{simplify, SimplifyConfig};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Arc, OnceLock};
use tokio::sync::Semaphore;

/// Time offset at which an actor passed a checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Split {
    pub trigger: TriggerId,
    pub offset_ms: u64,
}

/// A verified completion of a route.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: RecordId,
    pub route: RouteId,

    /// Wall-clock completion time, Unix milliseconds
    pub timestamp_ms: u64,

    pub actor_name: String,
    pub actor_world: String,

    /// Race clock from start to finish
    pub elapsed_ms: u64,

    /// Distance covered in game units
    pub distance: f64,

    /// Checkpoint splits in passing order
    pub splits: Vec<Split>,

    /// Simplified race line
    pub line: Vec<TimedPoint>,

    /// Trigger geometry fingerprint at capture time
    pub geometry_hash: String,
}

const MS_PER_DAY: u64 = 86_400_000;

/// Which records a route keeps.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionPolicy {
    /// Keep at most this many records, fastest first
    pub max_records: Option<usize>,

    /// Each actor's fastest record survives `max_records` trimming
    pub keep_personal_bests: bool,

    /// Discard runs faster than this (implausible)
    pub min_elapsed_ms: Option<u64>,

    /// Discard runs slower than this
    pub max_elapsed_ms: Option<u64>,

    /// Discard records older than this many days
    pub max_age_days: Option<u32>,
}

impl RetentionPolicy {
    /// Whether a single record passes the time-window and age filters.
    pub fn admits(&self, record: &Record, now_ms: u64) -> bool {
        if self.min_elapsed_ms.is_some_and(|min| record.elapsed_ms < min) {
            return false;
        }
        if self.max_elapsed_ms.is_some_and(|max| record.elapsed_ms > max) {
            return false;
        }
        if let Some(days) = self.max_age_days {
            let cutoff = now_ms.saturating_sub(u64::from(days) * MS_PER_DAY);
            if record.timestamp_ms < cutoff {
                return false;
            }
        }
        true
    }

    /// Filter and trim `records` in place, leaving them sorted fastest first.
    ///
    /// Returns the number of records dropped.
    pub fn apply(&self, records: &mut Vec<Record>, now_ms: u64) -> usize {
        let before = records.len();
        records.retain(|r| self.admits(r, now_ms));
        records.sort_by_key(|r| (r.elapsed_ms, r.timestamp_ms));

        if let Some(max) = self.max_records {
            if records.len() > max {
                let mut seen = HashSet::new();
                let mut kept = 0;
                records.retain(|r| {
                    let personal_best = seen.insert(r.actor_name.clone());
                    if kept < max {
                        kept += 1;
                        true
                    } else {
                        self.keep_personal_bests && personal_best
                    }
                });
            }
        }

        before - records.len()
    }
}

/// Shared handle to a freshly built record.
///
/// The record is created with its raw path; `finalize_line` simplifies it
/// exactly once. Concurrent callers wait on a single-slot semaphore and
/// later callers get the finished record without recomputing.
#[derive(Debug, Clone)]
pub struct RecordHandle {
    inner: Arc<RecordSlot>,
}

#[derive(Debug)]
struct RecordSlot {
    draft: Record,
    gate: Semaphore,
    finished: OnceLock<Record>,
}

impl RecordHandle {
    /// Wrap a record whose `line` still holds the raw path.
    pub fn new(draft: Record) -> Self {
        Self {
            inner: Arc::new(RecordSlot {
                draft,
                gate: Semaphore::new(1),
                finished: OnceLock::new(),
            }),
        }
    }

    pub fn id(&self) -> RecordId {
        self.inner.draft.id
    }

    /// The record as captured, before simplification.
    pub fn draft(&self) -> &Record {
        &self.inner.draft
    }

    /// The finished record, once `finalize_line` has run.
    pub fn finished(&self) -> Option<&Record> {
        self.inner.finished.get()
    }

    pub fn is_finalized(&self) -> bool {
        self.inner.finished.get().is_some()
    }

    /// Simplify the race line and return the finished record.
    pub async fn finalize_line(&self, config: &SimplifyConfig) -> Record {
        if let Some(done) = self.inner.finished.get() {
            return done.clone();
        }

        // The semaphore is never closed, so acquire only fails if that changes
        let _permit = self.inner.gate.acquire().await.ok();
        if let Some(done) = self.inner.finished.get() {
            return done.clone();
        }

        let mut record = self.inner.draft.clone();
        record.line = simplify(&self.inner.draft.line, config);
        tracing::debug!(
            record = %record.id,
            raw = self.inner.draft.line.len(),
            simplified = record.line.len(),
            "Race line simplified"
        );

        let _ = self.inner.finished.set(record.clone());
        record
    }
}

#[cfg(test)]
pub(crate) fn sample_record(actor: &str, elapsed_ms: u64, timestamp_ms: u64) -> Record {
    Record {
        id: RecordId::new(),
        route: RouteId::from_seed(1),
        timestamp_ms,
        actor_name: actor.to_string(),
        actor_world: "Home".to_string(),
        elapsed_ms,
        distance: 100.0,
        splits: Vec::new(),
        line: Vec::new(),
        geometry_hash: String::new(),
    }
}
