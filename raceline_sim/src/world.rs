//! SimWorld - The simulation harness container.

use crate::context::SimContext;
use crate::oracle::Oracle;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Configuration for a simulation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Master seed for determinism
    pub seed: u64,

    /// Tick rate in Hz
    pub tick_rate_hz: u32,

    /// Simulation duration in seconds (None: the scenario's own length)
    pub duration_secs: Option<f64>,

    /// Position noise standard deviation for observations
    pub position_noise: f64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            tick_rate_hz: 30,
            duration_secs: None,
            position_noise: 0.02,
        }
    }
}

impl SimConfig {
    /// Length of one tick.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.tick_rate_hz.max(1) as f64)
    }
}

/// The SimWorld - container for the entire simulation.
pub struct SimWorld {
    /// Configuration
    pub config: SimConfig,

    /// Shared simulation context (virtual clock)
    pub context: Arc<SimContext>,

    /// Ground truth oracle
    pub oracle: Oracle,

    /// Current tick count
    tick_count: u64,
}

impl SimWorld {
    /// Creates a new SimWorld with the given configuration.
    pub fn new(config: SimConfig) -> Self {
        // Keep the noise stream independent of anything else seeded later
        let physics_seed = config.seed.wrapping_mul(0x9e3779b97f4a7c15);

        let mut oracle = Oracle::new(physics_seed);
        oracle.set_position_noise(config.position_noise);

        Self {
            config,
            context: SimContext::shared(),
            oracle,
            tick_count: 0,
        }
    }

    /// Advance the virtual clock and every runner by one tick.
    pub fn step(&mut self) {
        let dt = self.config.tick_interval();
        self.context.advance_time(dt);
        self.oracle.step(dt.as_secs_f64());
        self.tick_count += 1;
    }

    pub fn tick_count(&self) -> u64 {
        self.tick_count
    }

    /// Current simulation time in seconds.
    pub fn time_secs(&self) -> f64 {
        self.oracle.time()
    }
}
