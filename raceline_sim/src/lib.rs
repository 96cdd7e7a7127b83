//! Raceline Deterministic Simulation Harness
//!
//! This crate provides a controlled world where the race engine runs
//! deterministically against scripted runners.
//!
//! # Core Principle
//!
//! All sources of non-determinism are intercepted and controlled:
//! - **Time**: the race clock is a virtual clock advanced once per tick;
//!   persistence timers run on a paused Tokio clock
//! - **Actors**: scripted runners follow fixed waypoint courses
//! - **Randomness**: observation noise derives from a single 64-bit seed
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                         SimWorld                            │
//! │  ┌──────────────────┐        ┌───────────────────────────┐  │
//! │  │ SimContext       │        │ Oracle                    │  │
//! │  │ (virtual clock)  │        │ (scripted runners, noise) │  │
//! │  └────────┬─────────┘        └─────────────┬─────────────┘  │
//! │           │ now()                          │ snapshot()     │
//! │           ▼                                ▼                │
//! │  ┌──────────────────────────────────────────────────────┐   │
//! │  │ RaceEngine (routes, event bus, persistence queue)    │   │
//! │  └──────────────────────────────────────────────────────┘   │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use raceline_sim::{ScenarioRunner, scenarios::ScenarioId};
//!
//! let result = ScenarioRunner::new(42).run(ScenarioId::Sprint);
//! assert!(result.passed);
//! ```

mod context;
mod oracle;
mod world;
pub mod exporter;
pub mod runner;
pub mod scenarios;

pub use context::SimContext;
pub use oracle::{Oracle, ScriptedRunner, Waypoint};
pub use runner::{EventCounts, ScenarioResult, ScenarioRunner};
pub use world::{SimConfig, SimWorld};
