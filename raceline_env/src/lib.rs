//! Raceline Environment Abstraction Layer
//!
//! This crate provides the "Sans-IO" abstraction allowing the race engine
//! to run in both **Production** (tokio) and **Simulation** (virtual clock)
//! environments.
//!
//! # Core Concept
//!
//! The race engine never queries the host game directly. Everything it needs
//! from the outside world is intercepted here:
//! - Time (`now()`, `sleep()`)
//! - Task spawning (`spawn()`)
//! - Actor observations (`WorldSnapshot::snapshot()`)
//!
//! # Example
//!
//! ```ignore
//! use raceline_env::{RaceContext, WorldSnapshot};
//!
//! async fn tick_loop<Ctx: RaceContext, W: WorldSnapshot>(ctx: &Ctx, world: &W) {
//!     loop {
//!         engine.tick(world)?;
//!         ctx.sleep(Duration::from_millis(33)).await;
//!     }
//! }
//! ```

mod context;
mod error;
mod snapshot;
mod tokio_impl;
mod types;

pub use context::RaceContext;
pub use error::EnvError;
pub use snapshot::{StaticSnapshot, WorldSnapshot};
pub use tokio_impl::TokioContext;
pub use types::{ActorId, ActorState};
