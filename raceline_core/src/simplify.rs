//! Race-line simplification.
//!
//! Adaptive Douglas-Peucker: the tolerance grows with path length, sharp
//! turns and a fixed stride of points are pinned as anchors, and short
//! results are backfilled so a race line never collapses to a handful of
//! points.

use crate::path::TimedPoint;
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Tuning for [`simplify`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimplifyConfig {
    /// Tolerance for a 10-unit path (default: 0.5)
    pub base_epsilon: f64,

    /// Output floor for long, non-straight inputs (default: 10)
    pub min_points: usize,

    /// Turns sharper than this are always kept, in degrees (default: 35)
    pub turn_angle_deg: f64,

    /// Tolerance never exceeds `base_epsilon` times this (default: 5)
    pub max_epsilon_factor: f64,
}

impl Default for SimplifyConfig {
    fn default() -> Self {
        Self {
            base_epsilon: 0.5,
            min_points: 10,
            turn_angle_deg: 35.0,
            max_epsilon_factor: 5.0,
        }
    }
}

/// Path length below which the tolerance stays at `base_epsilon`.
const REFERENCE_LENGTH: f64 = 10.0;

/// Chord deviation, relative to path length, still treated as a straight line.
const COLLINEAR_TOLERANCE: f64 = 1e-9;

/// Reduce a recorded path to a race line.
pub fn simplify(points: &[TimedPoint], config: &SimplifyConfig) -> Vec<TimedPoint> {
    let n = points.len();
    if n <= 2 {
        return points.to_vec();
    }

    let length = path_length(points);
    let epsilon = adaptive_epsilon(length, config);
    let turn_threshold = config.turn_angle_deg.to_radians();

    let turns: Vec<usize> = (1..n - 1)
        .filter(|&i| turn_angle(points, i).is_some_and(|a| a > turn_threshold))
        .collect();

    // Only truly collinear input collapses; gentle curves take the floor below
    let (first, last) = (&points[0], &points[n - 1]);
    let collinear_tolerance = COLLINEAR_TOLERANCE * length.max(1.0);
    if turns.is_empty()
        && points.iter().all(|p| {
            segment_distance(&p.position, &first.position, &last.position) <= collinear_tolerance
        })
    {
        return vec![*first, *last];
    }

    // Anchors: endpoints, sharp turns and a forced stride
    let stride = (n / 20).max(5);
    let mut keep: BTreeSet<usize> = BTreeSet::new();
    keep.insert(0);
    keep.insert(n - 1);
    keep.extend(turns);
    keep.extend((0..n).step_by(stride));

    let anchors: Vec<usize> = keep.iter().copied().collect();
    for pair in anchors.windows(2) {
        reduce_span(points, pair[0], pair[1], epsilon, &mut keep);
    }

    if keep.len() < config.min_points && n > config.min_points {
        let step = n / config.min_points;
        for i in (0..config.min_points).map(|k| k * step) {
            if keep.len() >= config.min_points {
                break;
            }
            keep.insert(i);
        }
    }

    let mut line: Vec<TimedPoint> = keep.into_iter().map(|i| points[i]).collect();
    line.sort_by_key(|p| p.offset_ms);
    line
}

/// Tolerance for a path of the given length.
pub fn adaptive_epsilon(length: f64, config: &SimplifyConfig) -> f64 {
    let scaled = config.base_epsilon * (length.max(REFERENCE_LENGTH) / REFERENCE_LENGTH).sqrt();
    scaled.min(config.base_epsilon * config.max_epsilon_factor)
}

fn path_length(points: &[TimedPoint]) -> f64 {
    points.windows(2).map(|w| w[0].distance_to(&w[1])).sum()
}

/// Angle between the incoming and outgoing direction at `i`, in radians.
fn turn_angle(points: &[TimedPoint], i: usize) -> Option<f64> {
    let incoming = points[i].position - points[i - 1].position;
    let outgoing = points[i + 1].position - points[i].position;
    let (a, b) = (incoming.norm(), outgoing.norm());
    if a < f64::EPSILON || b < f64::EPSILON {
        return None;
    }
    let cos = (incoming.dot(&outgoing) / (a * b)).clamp(-1.0, 1.0);
    Some(cos.acos())
}

/// Douglas-Peucker over `points[start..=end]`, adding kept indices to `keep`.
fn reduce_span(
    points: &[TimedPoint],
    start: usize,
    end: usize,
    epsilon: f64,
    keep: &mut BTreeSet<usize>,
) {
    let mut stack = vec![(start, end)];

    while let Some((a, b)) = stack.pop() {
        if b <= a + 1 {
            continue;
        }

        let (mut worst, mut worst_distance) = (a, 0.0);
        for i in a + 1..b {
            let d = segment_distance(&points[i].position, &points[a].position, &points[b].position);
            if d > worst_distance {
                worst = i;
                worst_distance = d;
            }
        }

        if worst_distance > epsilon {
            keep.insert(worst);
            stack.push((a, worst));
            stack.push((worst, b));
        }
    }
}

/// Distance from `p` to the finite segment `a`-`b`.
///
/// A zero-length segment falls back to point-to-point distance.
pub fn segment_distance(p: &Vector3<f64>, a: &Vector3<f64>, b: &Vector3<f64>) -> f64 {
    let ab = b - a;
    let len_sq = ab.norm_squared();
    if len_sq < f64::EPSILON {
        return (p - a).norm();
    }
    let t = ((p - a).dot(&ab) / len_sq).clamp(0.0, 1.0);
    (p - (a + ab * t)).norm()
}
