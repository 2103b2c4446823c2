//! ```text
//! story::story_workflow ─► Workflow ─► Engine
//!                                       │
//!                                       ├─► Executor ─► NodeHandlers ─► StatePatch
//!                                       │                               │
//!                                       │                               ├─► merge rules → StoryState
//!                                       │                               └─► EventBus (observability)
//!                                       │
//!                                       └─► Checkpointer (SQLite / InMemory)
//! ```
//!
//! Fablegraph is a checkpointed, fan-out/fan-in workflow engine for a
//! children's story generation pipeline: story writing, media prompting and
//! generation, quality evaluation, multi-layer content guardrails, a
//! human-review suspension point, and publication.
//!
//! The engine provides parallel dispatch with deterministic aggregation,
//! durable state that survives process restarts, suspension awaiting an
//! external decision with exact-point resume, and bounded retry for media
//! whose output fails safety checks. External capabilities (LLMs, vision,
//! moderation, media generation, blob storage) are injected as
//! [`providers`] ports; the HTTP layer, task queue, and review UI live
//! outside this crate and interact only through
//! [`Engine::submit`](runtime::Engine::submit) and
//! [`Engine::resume`](runtime::Engine::resume).

pub mod event_bus;
pub mod graph;
pub mod guardrails;
pub mod node;
pub mod providers;
pub mod registry;
pub mod runtime;
pub mod state;
pub mod story;
pub mod types;
