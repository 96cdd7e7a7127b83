//! Path recording for actors mid-race.

use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// A position stamped with its offset from the race start.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimedPoint {
    pub position: Vector3<f64>,
    pub offset_ms: u64,
}

impl TimedPoint {
    pub fn new(position: Vector3<f64>, offset_ms: u64) -> Self {
        Self { position, offset_ms }
    }

    pub fn distance_to(&self, other: &TimedPoint) -> f64 {
        (other.position - self.position).norm()
    }
}

/// One immutable step of the recorded path.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineSegment {
    pub source: TimedPoint,
    pub destination: TimedPoint,
}

/// Bounded trajectory buffer for one actor's race.
///
/// Raw points feed the distance calculation. The segment chain feeds
/// drawing and line simplification; a segment is never changed once
/// appended. Both evict their oldest entry at `capacity`.
#[derive(Debug, Clone)]
pub struct PathTracker {
    capacity: usize,
    raw: VecDeque<TimedPoint>,
    segments: VecDeque<LineSegment>,

    /// First point of a path that has no segment yet
    origin: Option<TimedPoint>,

    /// Distance covered by raw points already evicted
    evicted_distance: f64,

    /// Newest evicted point that was not a placeholder
    evicted_tail: Option<TimedPoint>,
}

impl PathTracker {
    /// Default cap on raw points and segments.
    pub const DEFAULT_CAPACITY: usize = 2000;

    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(2);
        Self {
            capacity,
            raw: VecDeque::with_capacity(capacity.min(256)),
            segments: VecDeque::with_capacity(capacity.min(256)),
            origin: None,
            evicted_distance: 0.0,
            evicted_tail: None,
        }
    }

    /// Record a sample.
    ///
    /// The first point of a new path only anchors the chain; every later
    /// point appends a segment from the previous point.
    pub fn add_point(&mut self, position: Vector3<f64>, offset_ms: u64) {
        let point = TimedPoint::new(position, offset_ms);

        if let Some(previous) = self.last_point() {
            self.segments.push_back(LineSegment {
                source: previous,
                destination: point,
            });
            if self.segments.len() > self.capacity {
                self.segments.pop_front();
            }
        } else {
            self.origin = Some(point);
        }

        self.raw.push_back(point);
        if self.raw.len() > self.capacity {
            if let Some(evicted) = self.raw.pop_front().filter(|p| !is_placeholder(p)) {
                if let Some(tail) = self.evicted_tail {
                    self.evicted_distance += tail.distance_to(&evicted);
                }
                self.evicted_tail = Some(evicted);
            }
        }
    }

    /// Total distance covered, skipping zero-vector placeholder points.
    ///
    /// Evicted points chain into the live window the same way.
    pub fn distance_traveled(&self) -> f64 {
        let mut total = self.evicted_distance;
        let mut previous = self.evicted_tail;
        for point in self.raw.iter().filter(|p| !is_placeholder(p)) {
            if let Some(prev) = previous {
                total += prev.distance_to(point);
            }
            previous = Some(*point);
        }
        total
    }

    /// Points of the segment chain, oldest first.
    ///
    /// With `live` set, a synthetic trailing point at the actor's current
    /// position is appended so an in-progress race draws to the actor.
    pub fn snapshot_for_drawing(&self, live: Option<TimedPoint>) -> Vec<TimedPoint> {
        let mut points = Vec::with_capacity(self.segments.len() + 2);

        match self.segments.front() {
            Some(first) => {
                points.push(first.source);
                points.extend(self.segments.iter().map(|s| s.destination));
            }
            None => points.extend(self.origin),
        }

        points.extend(live);
        points
    }

    pub fn clear(&mut self) {
        self.raw.clear();
        self.segments.clear();
        self.origin = None;
        self.evicted_distance = 0.0;
        self.evicted_tail = None;
    }

    pub fn len(&self) -> usize {
        self.raw.len()
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    pub fn raw_points(&self) -> impl Iterator<Item = &TimedPoint> {
        self.raw.iter()
    }

    pub fn last_point(&self) -> Option<TimedPoint> {
        self.segments
            .back()
            .map(|s| s.destination)
            .or(self.origin)
    }
}

impl Default for PathTracker {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}

fn is_placeholder(point: &TimedPoint) -> bool {
    point.position == Vector3::zeros()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn p(x: f64, y: f64, z: f64) -> Vector3<f64> {
        Vector3::new(x, y, z)
    }

    #[test]
    fn test_first_point_has_no_segment() {
        let mut path = PathTracker::new(10);
        path.add_point(p(1.0, 0.0, 0.0), 0);

        assert_eq!(path.len(), 1);
        assert_eq!(path.segment_count(), 0);
        assert_eq!(path.snapshot_for_drawing(None).len(), 1);
    }

    #[test]
    fn test_distance_traveled() {
        let mut path = PathTracker::new(10);
        path.add_point(p(1.0, 0.0, 0.0), 0);
        path.add_point(p(4.0, 4.0, 0.0), 100);
        path.add_point(p(4.0, 4.0, 2.0), 200);

        assert_relative_eq!(path.distance_traveled(), 7.0);
    }

    #[test]
    fn test_distance_skips_placeholders() {
        let mut path = PathTracker::new(10);
        path.add_point(p(1.0, 0.0, 0.0), 0);
        path.add_point(Vector3::zeros(), 50);
        path.add_point(p(2.0, 0.0, 0.0), 100);

        assert_relative_eq!(path.distance_traveled(), 1.0);
    }

    #[test]
    fn test_eviction_promotes_next_anchor() {
        let mut path = PathTracker::new(3);
        for i in 1..=6 {
            path.add_point(p(i as f64, 0.0, 0.0), i * 10);
        }

        assert_eq!(path.len(), 3);
        assert_eq!(path.segment_count(), 3);

        let drawn = path.snapshot_for_drawing(None);
        // Oldest surviving segment starts at x=3
        assert_eq!(drawn.first().map(|t| t.offset_ms), Some(30));
        assert_eq!(drawn.last().map(|t| t.offset_ms), Some(60));

        // Evicted steps still count toward distance
        assert_relative_eq!(path.distance_traveled(), 5.0);
    }

    #[test]
    fn test_placeholder_eviction_keeps_distance() {
        let mut capped = PathTracker::new(3);
        let mut full = PathTracker::new(100);
        let samples = [
            p(1.0, 0.0, 0.0),
            Vector3::zeros(),
            p(2.0, 0.0, 0.0),
            p(3.0, 0.0, 0.0),
            p(4.0, 0.0, 0.0),
            p(4.0, 0.0, 5.0),
        ];

        for (i, &position) in samples.iter().enumerate() {
            capped.add_point(position, i as u64 * 10);
            full.add_point(position, i as u64 * 10);
            // The placeholder scrolls out at i=4
            assert_relative_eq!(capped.distance_traveled(), full.distance_traveled());
        }
        assert_relative_eq!(capped.distance_traveled(), 8.0);
    }

    #[test]
    fn test_live_point_is_synthetic() {
        let mut path = PathTracker::new(10);
        path.add_point(p(1.0, 0.0, 0.0), 0);
        path.add_point(p(2.0, 0.0, 0.0), 10);

        let live = TimedPoint::new(p(2.5, 0.0, 0.0), 15);
        let drawn = path.snapshot_for_drawing(Some(live));
        assert_eq!(drawn.len(), 3);
        assert_eq!(drawn[2], live);

        // Not retained between calls
        assert_eq!(path.snapshot_for_drawing(None).len(), 2);
    }

    #[test]
    fn test_clear() {
        let mut path = PathTracker::default();
        path.add_point(p(1.0, 1.0, 1.0), 0);
        path.add_point(p(2.0, 1.0, 1.0), 10);
        path.clear();

        assert!(path.is_empty());
        assert!(path.last_point().is_none());
        assert_eq!(path.distance_traveled(), 0.0);
    }
}
