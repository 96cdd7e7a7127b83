//! Ground truth oracle for simulation.
//!
//! The Oracle maintains the "God's eye view" of the simulated world:
//! - True positions of all scripted runners
//! - Kinematics (constant speed along waypoint courses)
//! - Observations handed to the engine (with seeded position noise)

use nalgebra::Vector3;
use raceline_env::{ActorId, ActorState, EnvError, WorldSnapshot};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

/// A course waypoint. The flags apply on the leg that ends here.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Waypoint {
    pub position: Vector3<f64>,
    pub grounded: bool,
    pub mounted: bool,
}

impl Waypoint {
    /// A grounded, unmounted waypoint.
    pub fn at(x: f64, y: f64, z: f64) -> Self {
        Self {
            position: Vector3::new(x, y, z),
            grounded: true,
            mounted: false,
        }
    }

    pub fn mounted(mut self) -> Self {
        self.mounted = true;
        self
    }

    pub fn airborne(mut self) -> Self {
        self.grounded = false;
        self
    }
}

/// A runner following a fixed course at constant speed.
#[derive(Debug, Clone)]
pub struct ScriptedRunner {
    pub id: ActorId,
    pub name: String,
    pub world: String,

    /// Units per second
    pub speed: f64,

    /// The course; the runner spawns on the first waypoint
    pub waypoints: Vec<Waypoint>,

    /// Wrap from the last waypoint back to the first
    pub looped: bool,

    position: Vector3<f64>,
    next: usize,
    grounded: bool,
    mounted: bool,
}

impl ScriptedRunner {
    /// Creates a runner standing on the first waypoint of its course.
    pub fn new(seed: u64, name: impl Into<String>, speed: f64, waypoints: Vec<Waypoint>) -> Self {
        let first = waypoints.first().copied().unwrap_or(Waypoint::at(0.0, 0.0, 0.0));
        Self {
            id: ActorId::from_seed(seed),
            name: name.into(),
            world: "Sim".to_string(),
            speed,
            waypoints,
            looped: false,
            position: first.position,
            next: 1,
            grounded: first.grounded,
            mounted: first.mounted,
        }
    }

    /// Keep circling the course instead of stopping at its end.
    pub fn looped(mut self) -> Self {
        self.looped = true;
        self
    }

    pub fn position(&self) -> Vector3<f64> {
        self.position
    }

    /// True once a non-looping runner has reached its last waypoint.
    pub fn is_done(&self) -> bool {
        !self.looped && self.next >= self.waypoints.len()
    }

    /// Total length of one pass over the course.
    pub fn course_length(&self) -> f64 {
        let mut length: f64 = self
            .waypoints
            .windows(2)
            .map(|w| (w[1].position - w[0].position).norm())
            .sum();
        if self.looped {
            if let (Some(first), Some(last)) = (self.waypoints.first(), self.waypoints.last()) {
                length += (first.position - last.position).norm();
            }
        }
        length
    }

    /// Move `speed * dt` along the course, possibly past several waypoints.
    pub fn step(&mut self, dt: f64) {
        let mut budget = self.speed * dt;
        while budget > 0.0 {
            if self.next >= self.waypoints.len() {
                if !self.looped || self.waypoints.len() < 2 {
                    return;
                }
                self.next = 0;
            }

            let target = self.waypoints[self.next];
            self.grounded = target.grounded;
            self.mounted = target.mounted;

            let to_target = target.position - self.position;
            let remaining = to_target.norm();
            if remaining <= budget {
                self.position = target.position;
                budget -= remaining;
                self.next += 1;
            } else {
                self.position += to_target * (budget / remaining);
                budget = 0.0;
            }
        }
    }

    /// The exact observation for this runner.
    pub fn state(&self) -> ActorState {
        ActorState::new(self.id, self.name.clone(), self.position)
            .with_world(self.world.clone())
            .with_grounded(self.grounded)
            .with_mounted(self.mounted)
    }
}

/// The Oracle - maintains ground truth and generates observations.
pub struct Oracle {
    /// RNG for observation noise
    physics_rng: ChaCha8Rng,

    runners: Vec<ScriptedRunner>,

    /// Current simulation time (seconds)
    current_time: f64,

    /// None: exact positions
    noise: Option<Normal<f64>>,

    /// Observations produced by the last step
    observed: Vec<ActorState>,

    /// When false, the next snapshots fail as if the world were loading
    available: bool,
}

impl Oracle {
    /// Creates a new Oracle with the given physics seed.
    pub fn new(physics_seed: u64) -> Self {
        Self {
            physics_rng: ChaCha8Rng::seed_from_u64(physics_seed),
            runners: Vec::new(),
            current_time: 0.0,
            noise: None,
            observed: Vec::new(),
            available: true,
        }
    }

    /// Sets the position noise standard deviation (0 disables noise).
    pub fn set_position_noise(&mut self, std_dev: f64) {
        self.noise = if std_dev > 0.0 {
            Normal::new(0.0, std_dev).ok()
        } else {
            None
        };
    }

    pub fn set_available(&mut self, available: bool) {
        self.available = available;
    }

    /// Adds a runner; it is observed from the next step on.
    pub fn spawn_runner(&mut self, runner: ScriptedRunner) -> ActorId {
        let id = runner.id;
        self.runners.push(runner);
        id
    }

    pub fn runners(&self) -> &[ScriptedRunner] {
        &self.runners
    }

    /// Advances every runner by dt seconds and refreshes the observations.
    pub fn step(&mut self, dt: f64) {
        self.current_time += dt;
        for runner in &mut self.runners {
            runner.step(dt);
        }

        let mut observed = Vec::with_capacity(self.runners.len());
        for runner in &self.runners {
            let mut state = runner.state();
            if let Some(normal) = &self.noise {
                state.position += Vector3::new(
                    normal.sample(&mut self.physics_rng),
                    normal.sample(&mut self.physics_rng),
                    normal.sample(&mut self.physics_rng),
                );
            }
            observed.push(state);
        }
        self.observed = observed;
    }

    /// Returns the current simulation time.
    pub fn time(&self) -> f64 {
        self.current_time
    }

    /// The last observations, without failing when the world is unavailable.
    pub fn observed(&self) -> &[ActorState] {
        &self.observed
    }

    /// True once every non-looping runner has finished its course.
    pub fn all_done(&self) -> bool {
        self.runners.iter().all(|r| r.is_done())
    }
}

impl WorldSnapshot for Oracle {
    fn snapshot(&self) -> Result<Vec<ActorState>, EnvError> {
        if !self.available {
            return Err(EnvError::snapshot("world is loading"));
        }
        Ok(self.observed.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn straight() -> Vec<Waypoint> {
        vec![Waypoint::at(0.0, 0.0, 0.0), Waypoint::at(10.0, 0.0, 0.0)]
    }

    #[test]
    fn test_runner_moves_at_speed_and_stops() {
        let mut runner = ScriptedRunner::new(1, "A", 4.0, straight());

        runner.step(1.0);
        assert_relative_eq!(runner.position().x, 4.0);
        assert!(!runner.is_done());

        runner.step(5.0);
        assert_relative_eq!(runner.position().x, 10.0);
        assert!(runner.is_done());
    }

    #[test]
    fn test_runner_turns_corners() {
        let course = vec![
            Waypoint::at(0.0, 0.0, 0.0),
            Waypoint::at(3.0, 0.0, 0.0),
            Waypoint::at(3.0, 0.0, 4.0).mounted(),
        ];
        let mut runner = ScriptedRunner::new(1, "A", 5.0, course);

        runner.step(1.0);

        assert_relative_eq!(runner.position().x, 3.0);
        assert_relative_eq!(runner.position().z, 2.0);
        assert!(runner.state().mounted);
    }

    #[test]
    fn test_looped_runner_wraps() {
        let course = vec![
            Waypoint::at(0.0, 0.0, 0.0),
            Waypoint::at(10.0, 0.0, 0.0),
            Waypoint::at(10.0, 0.0, 10.0),
            Waypoint::at(0.0, 0.0, 10.0),
        ];
        let mut runner = ScriptedRunner::new(1, "A", 10.0, course).looped();
        assert_relative_eq!(runner.course_length(), 40.0);

        runner.step(4.5);

        assert!(!runner.is_done());
        assert_relative_eq!(runner.position().x, 5.0);
        assert_relative_eq!(runner.position().z, 0.0);
    }

    #[test]
    fn test_oracle_deterministic_noise() {
        let mut oracle1 = Oracle::new(42);
        let mut oracle2 = Oracle::new(42);
        for oracle in [&mut oracle1, &mut oracle2] {
            oracle.set_position_noise(0.5);
            oracle.spawn_runner(ScriptedRunner::new(1, "A", 1.0, straight()));
            oracle.step(0.1);
        }

        // Same seed = same noise
        assert_eq!(oracle1.snapshot().unwrap(), oracle2.snapshot().unwrap());
        assert_ne!(oracle1.observed()[0].position, oracle1.runners()[0].position());
    }

    #[test]
    fn test_unavailable_world_fails_snapshot() {
        let mut oracle = Oracle::new(7);
        oracle.spawn_runner(ScriptedRunner::new(1, "A", 1.0, straight()));
        oracle.step(0.1);

        oracle.set_available(false);
        assert!(matches!(oracle.snapshot(), Err(EnvError::SnapshotUnavailable(_))));

        oracle.set_available(true);
        assert_eq!(oracle.snapshot().unwrap().len(), 1);
    }
}
