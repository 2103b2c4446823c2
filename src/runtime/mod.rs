//! Workflow runtime: engine surface, superstep executor, configuration, and
//! checkpoint persistence.
//!
//! The runtime layer drives compiled workflows with durable, resumable
//! execution:
//!
//! - [`Engine`] — the external surface (`submit`/`resume`/`cancel`/sweeper)
//! - executor — the internal superstep loop (fan-out, barrier merge,
//!   routing, suspension, cancellation)
//! - [`Checkpointer`] — pluggable persistence; [`InMemoryCheckpointer`]
//!   always available, [`SqliteCheckpointer`] behind the `sqlite` feature
//! - [`EngineConfig`] — the per-engine knobs with spec defaults
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use fablegraph::runtime::{Engine, EngineConfig, InMemoryCheckpointer};
//! use fablegraph::state::StoryState;
//! # async fn example(workflow: fablegraph::graph::Workflow) -> Result<(), Box<dyn std::error::Error>> {
//! let engine = Engine::new(
//!     workflow,
//!     Arc::new(InMemoryCheckpointer::new()),
//!     EngineConfig::default(),
//! );
//!
//! let state = StoryState::builder("job-1", "a mouse finds cheese").build();
//! let outcome = engine.submit(state, "job-1").await?;
//! # let _ = outcome;
//! # Ok(())
//! # }
//! ```

pub mod checkpoint;
#[cfg(feature = "sqlite")]
pub mod checkpoint_sqlite;
pub mod config;
pub mod engine;
mod executor;
pub mod persistence;

pub use checkpoint::{
    Checkpoint, Checkpointer, CheckpointerError, InMemoryCheckpointer, Suspension, WorkItem,
};
#[cfg(feature = "sqlite")]
pub use checkpoint_sqlite::SqliteCheckpointer;
pub use config::EngineConfig;
pub use engine::{new_thread_id, Engine, EngineError, RunOutcome, SYSTEM_TIMEOUT_REVIEWER};
