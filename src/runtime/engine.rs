//! The engine: the external surface of the workflow runtime.
//!
//! An [`Engine`] owns a compiled workflow, a checkpoint store, and the
//! configuration, and exposes the two operations external collaborators
//! call:
//!
//! - [`submit`](Engine::submit) — start (or crash-recover) a thread and
//!   drive it until it terminates or suspends.
//! - [`resume`](Engine::resume) — supply the decision value a suspended
//!   thread is waiting for and continue from the exact suspension point,
//!   including across process restarts.
//!
//! Plus the operational helpers: [`cancel`](Engine::cancel) for
//! administrative aborts and [`sweep_expired_reviews`](Engine::sweep_expired_reviews)
//! for the out-of-band review deadline.

use std::sync::{Mutex, OnceLock};

use chrono::{DateTime, Utc};
use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde_json::{json, Value};
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::event_bus::EventBus;
use crate::graph::Workflow;
use crate::state::StoryState;
use crate::types::{JobStatus, NodeKind};

use super::checkpoint::{Checkpoint, Checkpointer, CheckpointerError};
use super::config::EngineConfig;
use super::executor::Executor;

/// Reviewer id recorded when the deadline sweeper rejects a thread.
pub const SYSTEM_TIMEOUT_REVIEWER: &str = "system_timeout";

/// How a `submit` or `resume` call ended.
#[derive(Clone, Debug)]
pub enum RunOutcome {
    /// The thread is suspended awaiting an external decision; `payload` is
    /// the review packet the suspending node built.
    Suspended { payload: Value },
    /// The thread reached a terminal and its final snapshot is durable.
    Terminal {
        status: JobStatus,
        state: StoryState,
    },
}

impl RunOutcome {
    /// The terminal status, if the thread terminated.
    #[must_use]
    pub fn status(&self) -> Option<JobStatus> {
        match self {
            RunOutcome::Terminal { status, .. } => Some(*status),
            RunOutcome::Suspended { .. } => None,
        }
    }

    #[must_use]
    pub fn is_suspended(&self) -> bool {
        matches!(self, RunOutcome::Suspended { .. })
    }
}

/// Caller-facing engine errors. In-workflow failures are *not* errors here:
/// they settle the thread as `Terminal { status: Failed }` with the detail
/// captured in the snapshot.
#[derive(Debug, Error, Diagnostic)]
pub enum EngineError {
    #[error("thread not found: {thread_id}")]
    #[diagnostic(code(fablegraph::engine::thread_not_found))]
    ThreadNotFound { thread_id: String },

    #[error("thread {thread_id} is not awaiting a resume decision")]
    #[diagnostic(
        code(fablegraph::engine::not_suspended),
        help("resume is only valid while the thread is suspended at the review gate.")
    )]
    NotSuspended { thread_id: String },

    #[error("checkpoint for thread {thread_id} references unknown node '{node}'")]
    #[diagnostic(
        code(fablegraph::engine::checkpoint_schema),
        help("The persisted thread was written by a different graph version.")
    )]
    CheckpointSchema { thread_id: String, node: String },

    #[error(transparent)]
    #[diagnostic(code(fablegraph::engine::checkpointer))]
    Checkpointer(#[from] CheckpointerError),
}

/// Resume input for the suspended node, visible only to it.
#[derive(Clone, Debug)]
pub(crate) struct ResumeEnvelope {
    pub node: NodeKind,
    pub value: Value,
}

/// Generate a fresh thread id.
#[must_use]
pub fn new_thread_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// The workflow runtime. Cheap to share by reference; threads (jobs) are
/// fully independent and may run concurrently on one engine.
pub struct Engine {
    workflow: Arc<Workflow>,
    checkpointer: Arc<dyn Checkpointer>,
    config: EngineConfig,
    event_bus: EventBus,
    listener: OnceLock<tokio::task::JoinHandle<()>>,
    cancel_tokens: Mutex<FxHashMap<String, CancellationToken>>,
}

impl Engine {
    /// Build an engine around a compiled workflow.
    #[must_use]
    pub fn new(
        workflow: Workflow,
        checkpointer: Arc<dyn Checkpointer>,
        config: EngineConfig,
    ) -> Self {
        Self::with_event_bus(workflow, checkpointer, config, EventBus::default())
    }

    /// Build an engine with a custom event bus (extra sinks, capacity).
    #[must_use]
    pub fn with_event_bus(
        workflow: Workflow,
        checkpointer: Arc<dyn Checkpointer>,
        config: EngineConfig,
        event_bus: EventBus,
    ) -> Self {
        Self {
            workflow: Arc::new(workflow),
            checkpointer,
            config,
            event_bus,
            listener: OnceLock::new(),
            cancel_tokens: Mutex::new(FxHashMap::default()),
        }
    }

    /// The engine's configuration.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Submit a thread: create it, or continue it if a checkpoint already
    /// exists (crash recovery — completed nodes are never re-entered).
    ///
    /// Submitting an already-suspended thread returns its pending payload;
    /// submitting a terminated thread returns its recorded terminal outcome.
    #[instrument(skip(self, initial_state), err)]
    pub async fn submit(
        &self,
        initial_state: StoryState,
        thread_id: &str,
    ) -> Result<RunOutcome, EngineError> {
        self.ensure_listener();

        let checkpoint = match self.checkpointer.load_latest(thread_id).await? {
            Some(cp) if cp.status.is_terminal() => {
                return Ok(RunOutcome::Terminal {
                    status: cp.status,
                    state: cp.state,
                });
            }
            Some(cp) => {
                if let Some(suspension) = &cp.suspension {
                    return Ok(RunOutcome::Suspended {
                        payload: suspension.payload.clone(),
                    });
                }
                tracing::info!(thread_id, seq = cp.seq, "continuing thread from checkpoint");
                cp
            }
            None => {
                let cp = Checkpoint::initial(
                    thread_id,
                    initial_state,
                    self.workflow.entry().to_vec(),
                );
                self.checkpointer.save(cp.clone()).await?;
                cp
            }
        };

        self.drive(thread_id, checkpoint, None).await
    }

    /// Supply the decision a suspended thread is waiting for and continue
    /// from the suspension point. Only the suspended node sees the value.
    #[instrument(skip(self, decision), err)]
    pub async fn resume(
        &self,
        thread_id: &str,
        decision: Value,
    ) -> Result<RunOutcome, EngineError> {
        self.ensure_listener();

        let checkpoint = self
            .checkpointer
            .load_latest(thread_id)
            .await?
            .ok_or_else(|| EngineError::ThreadNotFound {
                thread_id: thread_id.to_string(),
            })?;
        let suspension =
            checkpoint
                .suspension
                .clone()
                .ok_or_else(|| EngineError::NotSuspended {
                    thread_id: thread_id.to_string(),
                })?;

        let envelope = ResumeEnvelope {
            node: suspension.node,
            value: decision,
        };
        self.drive(thread_id, checkpoint, Some(envelope)).await
    }

    /// Signal cancellation for a running thread. Returns whether a running
    /// thread was signalled. Cancellation is cooperative: outstanding
    /// handlers unwind, then the thread settles as `Cancelled`.
    pub fn cancel(&self, thread_id: &str) -> bool {
        let tokens = self.cancel_tokens.lock().expect("cancel registry poisoned");
        match tokens.get(thread_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Reject every suspended thread whose resume deadline has passed, by
    /// resuming it with a synthetic timeout rejection. Returns the thread
    /// ids that were swept. Intended to be called periodically out-of-band.
    #[instrument(skip(self), err)]
    pub async fn sweep_expired_reviews(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<String>, EngineError> {
        let mut swept = Vec::new();
        for thread_id in self.checkpointer.list_threads().await? {
            let Some(cp) = self.checkpointer.load_latest(&thread_id).await? else {
                continue;
            };
            let expired = cp.status == JobStatus::AwaitingReview
                && cp
                    .suspension
                    .as_ref()
                    .is_some_and(|s| s.resume_deadline < now);
            if !expired {
                continue;
            }
            tracing::warn!(thread_id, "review deadline expired, rejecting");
            self.resume(
                &thread_id,
                json!({
                    "decision": "rejected",
                    "comment": "Auto-rejected: no review received before the deadline",
                    "reviewer_id": SYSTEM_TIMEOUT_REVIEWER,
                    "reason": "timeout",
                }),
            )
            .await?;
            swept.push(thread_id);
        }
        Ok(swept)
    }

    async fn drive(
        &self,
        thread_id: &str,
        checkpoint: Checkpoint,
        resume: Option<ResumeEnvelope>,
    ) -> Result<RunOutcome, EngineError> {
        let cancel = self.register_cancel(thread_id);
        let executor = Executor {
            workflow: &self.workflow,
            checkpointer: self.checkpointer.as_ref(),
            config: &self.config,
            events: self.event_bus.sender(),
            cancel,
        };
        let result = executor.run(checkpoint, resume).await;
        self.unregister_cancel(thread_id);
        result
    }

    fn register_cancel(&self, thread_id: &str) -> CancellationToken {
        let mut tokens = self.cancel_tokens.lock().expect("cancel registry poisoned");
        let token = CancellationToken::new();
        tokens.insert(thread_id.to_string(), token.clone());
        token
    }

    fn unregister_cancel(&self, thread_id: &str) {
        let mut tokens = self.cancel_tokens.lock().expect("cancel registry poisoned");
        tokens.remove(thread_id);
    }

    fn ensure_listener(&self) {
        self.listener.get_or_init(|| self.event_bus.listen());
    }
}
