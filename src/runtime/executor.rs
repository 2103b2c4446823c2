//! The superstep executor.
//!
//! Each thread is driven as a sequence of supersteps over a frontier of
//! [`WorkItem`]s:
//!
//! 1. Partition the frontier: fan-in sinks are deferred while any non-sink
//!    work remains, so every upstream contribution has committed at an
//!    earlier barrier before a sink is scheduled.
//! 2. Run the batch concurrently on a bounded worker pool (`JoinSet` +
//!    `Semaphore`); each handler receives an immutable state snapshot, its
//!    dispatch overlay, the thread's cancellation token, and the event
//!    emitter.
//! 3. Barrier: merge returned patches in scheduling order (the executor
//!    task owns the state, so commits are linearized), record completed
//!    nodes, bump the sequence number, and snapshot synchronously through
//!    the checkpoint store.
//! 4. Route: unconditional edges plus router output of every ran node form
//!    the next frontier (deduplicated, completed nodes excluded).
//!
//! Suspension, permanent errors, and cancellation each terminate the loop
//! with a distinct snapshot; see the match arms in [`Executor::run`].

use std::sync::Arc;

use chrono::Utc;
use rustc_hash::FxHashSet;
use serde_json::Value;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::event_bus::Event;
use crate::graph::{Route, Workflow};
use crate::node::{NodeContext, NodeError, NodeOutput};
use crate::types::{JobStatus, NodeKind};

use super::checkpoint::{Checkpoint, Checkpointer, Suspension, WorkItem};
use super::config::EngineConfig;
use super::engine::{EngineError, ResumeEnvelope, RunOutcome};

pub(crate) struct Executor<'a> {
    pub workflow: &'a Workflow,
    pub checkpointer: &'a dyn Checkpointer,
    pub config: &'a EngineConfig,
    pub events: flume::Sender<Event>,
    pub cancel: CancellationToken,
}

/// Outcome of one handler invocation, tagged with its batch position.
type BatchResult = (usize, Result<NodeOutput, NodeError>);

impl<'a> Executor<'a> {
    /// Drive a thread from `checkpoint` until it terminates or suspends.
    ///
    /// `resume` carries the decision value for the suspended node when the
    /// caller is resuming; only that node sees it.
    #[instrument(skip(self, checkpoint, resume), fields(thread_id = %checkpoint.thread_id))]
    pub async fn run(
        &self,
        checkpoint: Checkpoint,
        mut resume: Option<ResumeEnvelope>,
    ) -> Result<RunOutcome, EngineError> {
        self.validate(&checkpoint)?;

        let thread_id = checkpoint.thread_id.clone();
        let mut state = checkpoint.state;
        let mut seq = checkpoint.seq;
        let mut completed: FxHashSet<NodeKind> =
            checkpoint.completed_nodes.iter().cloned().collect();
        let mut frontier = checkpoint.frontier;
        let mut terminal_status: Option<JobStatus> = None;

        let semaphore = Arc::new(Semaphore::new(self.config.worker_pool_size.max(1)));

        loop {
            if self.cancel.is_cancelled() {
                return self
                    .settle(&thread_id, seq + 1, state, &completed, JobStatus::Cancelled, None)
                    .await;
            }

            // Fan-in sinks wait until they are the only work left.
            let registry = self.workflow.registry();
            let (sinks, runnable): (Vec<WorkItem>, Vec<WorkItem>) = frontier
                .iter()
                .cloned()
                .partition(|item| registry.is_fan_in_sink(&item.node));
            let (batch, carry) = if runnable.is_empty() {
                (sinks, Vec::new())
            } else {
                (runnable, sinks)
            };

            if batch.is_empty() {
                let status = terminal_status.unwrap_or(JobStatus::Completed);
                return self
                    .settle(&thread_id, seq + 1, state, &completed, status, None)
                    .await;
            }

            seq += 1;
            self.emit(Event::diagnostic(
                thread_id.clone(),
                "superstep",
                format!(
                    "step {seq}: running {} item(s), {} deferred",
                    batch.len(),
                    carry.len()
                ),
            ));

            let results = self
                .run_batch(&thread_id, seq, &state, &batch, &semaphore, &mut resume)
                .await;

            // Barrier: merge patches in scheduling order, collect control
            // outcomes.
            let mut suspension: Option<(NodeKind, Value)> = None;
            let mut fatal: Option<NodeError> = None;
            let mut unwound = false;
            let mut ordered = results;
            ordered.sort_by_key(|(idx, _)| *idx);

            for (idx, result) in ordered {
                let node = batch[idx].node.clone();
                match result {
                    Ok(NodeOutput::Patch(patch)) => {
                        patch.apply(&mut state);
                        completed.insert(node.clone());
                        if let Some(status) = registry.terminal_status(&node) {
                            terminal_status = Some(status);
                        }
                    }
                    Ok(NodeOutput::Suspend(payload)) => {
                        // No patch merges for a suspending node.
                        suspension.get_or_insert((node, payload));
                    }
                    Err(NodeError::Cancelled) => {
                        // The handler unwound cooperatively.
                        unwound = true;
                    }
                    Err(err) => {
                        tracing::error!(%node, error = %err, "node failed permanently");
                        fatal.get_or_insert(err);
                    }
                }
            }

            if unwound || self.cancel.is_cancelled() {
                return self
                    .settle(&thread_id, seq, state, &completed, JobStatus::Cancelled, None)
                    .await;
            }

            if let Some(err) = fatal {
                state.error = Some(err.to_string());
                return self
                    .settle(
                        &thread_id,
                        seq,
                        state,
                        &completed,
                        JobStatus::Failed,
                        Some(err.to_string()),
                    )
                    .await;
            }

            // Next frontier: deferred sinks, then routed successors of every
            // committed batch node.
            let mut next = carry;
            let mut seen: FxHashSet<(NodeKind, Option<u32>)> = next
                .iter()
                .map(|item| (item.node.clone(), item.overlay.as_ref().map(|o| o.index)))
                .collect();
            let mut push = |next: &mut Vec<WorkItem>, item: WorkItem| {
                if item.node.is_end() || completed.contains(&item.node) {
                    return;
                }
                let key = (item.node.clone(), item.overlay.as_ref().map(|o| o.index));
                if seen.insert(key) {
                    next.push(item);
                }
            };

            let mut batch_nodes: Vec<NodeKind> = Vec::new();
            for item in &batch {
                if !batch_nodes.contains(&item.node) {
                    batch_nodes.push(item.node.clone());
                }
            }
            for node in &batch_nodes {
                if suspension.as_ref().is_some_and(|(s, _)| s == node) {
                    continue;
                }
                for successor in self.workflow.edges_from(node) {
                    push(&mut next, WorkItem::bare(successor.clone()));
                }
                if let Some(router) = self.workflow.router(node) {
                    match router(&state) {
                        Route::To(targets) => {
                            for target in targets {
                                push(&mut next, WorkItem::bare(target));
                            }
                        }
                        Route::Dispatch(units) => {
                            for unit in units {
                                push(
                                    &mut next,
                                    WorkItem {
                                        node: unit.target,
                                        overlay: unit.overlay,
                                    },
                                );
                            }
                        }
                    }
                }
            }

            if let Some((node, payload)) = suspension {
                // The suspended item stays in the frontier so resume
                // re-enters exactly this node.
                next.push(WorkItem::bare(node.clone()));
                let suspension = Suspension {
                    node,
                    payload: payload.clone(),
                    resume_deadline: Utc::now() + self.config.review_deadline,
                };
                self.save(Checkpoint {
                    thread_id: thread_id.clone(),
                    seq,
                    state,
                    completed_nodes: completed.iter().cloned().collect(),
                    frontier: next,
                    status: JobStatus::AwaitingReview,
                    suspension: Some(suspension),
                    error: None,
                    created_at: Utc::now(),
                })
                .await?;
                self.emit(Event::diagnostic(
                    thread_id.clone(),
                    "suspension",
                    "awaiting external review decision",
                ));
                return Ok(RunOutcome::Suspended { payload });
            }

            frontier = next;
            self.save(Checkpoint {
                thread_id: thread_id.clone(),
                seq,
                state: state.clone(),
                completed_nodes: completed.iter().cloned().collect(),
                frontier: frontier.clone(),
                status: JobStatus::Running,
                suspension: None,
                error: None,
                created_at: Utc::now(),
            })
            .await?;
        }
    }

    /// Spawn one superstep's batch on the bounded pool and collect every
    /// handler's outcome (completion order is irrelevant; results are
    /// re-ordered at the barrier).
    async fn run_batch(
        &self,
        thread_id: &str,
        seq: u64,
        state: &crate::state::StoryState,
        batch: &[WorkItem],
        semaphore: &Arc<Semaphore>,
        resume: &mut Option<ResumeEnvelope>,
    ) -> Vec<BatchResult> {
        let snapshot = Arc::new(state.clone());
        let mut join_set: JoinSet<BatchResult> = JoinSet::new();

        for (idx, item) in batch.iter().enumerate() {
            let Some(handler) = self.workflow.handler(&item.node) else {
                // Validated on entry; a miss here is an engine bug surfaced
                // through the Failed path.
                join_set.spawn(async move {
                    (idx, Err(NodeError::MissingInput { what: "node handler" }))
                });
                continue;
            };

            let resume_value = if resume.as_ref().is_some_and(|e| e.node == item.node) {
                resume.take().map(|e| e.value)
            } else {
                None
            };

            let ctx = NodeContext {
                thread_id: thread_id.to_string(),
                node: item.node.clone(),
                step: seq,
                overlay: item.overlay.clone(),
                resume: resume_value,
                cancel: self.cancel.clone(),
                event_sender: self.events.clone(),
            };
            let snapshot = Arc::clone(&snapshot);
            let semaphore = Arc::clone(semaphore);

            join_set.spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return (idx, Err(NodeError::Cancelled)),
                };
                if ctx.cancel.is_cancelled() {
                    return (idx, Err(NodeError::Cancelled));
                }
                let result = handler.run(&snapshot, &ctx).await;
                (idx, result)
            });
        }

        let mut results = Vec::with_capacity(batch.len());
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(result) => results.push(result),
                Err(join_err) => {
                    // A panicking handler is an internal bug; surface it
                    // through the Failed path with context.
                    tracing::error!(error = %join_err, "node task join error");
                    results.push((
                        batch.len().saturating_sub(1),
                        Err(NodeError::Generation(format!(
                            "internal: node task join error: {join_err}"
                        ))),
                    ));
                }
            }
        }
        results
    }

    /// Write the terminal snapshot and produce the terminal outcome.
    async fn settle(
        &self,
        thread_id: &str,
        seq: u64,
        state: crate::state::StoryState,
        completed: &FxHashSet<NodeKind>,
        status: JobStatus,
        error: Option<String>,
    ) -> Result<RunOutcome, EngineError> {
        self.save(Checkpoint {
            thread_id: thread_id.to_string(),
            seq,
            state: state.clone(),
            completed_nodes: completed.iter().cloned().collect(),
            frontier: Vec::new(),
            status,
            suspension: None,
            error,
            created_at: Utc::now(),
        })
        .await?;
        self.emit(Event::diagnostic(
            thread_id.to_string(),
            "terminal",
            format!("thread settled as {status}"),
        ));
        Ok(RunOutcome::Terminal { status, state })
    }

    async fn save(&self, checkpoint: Checkpoint) -> Result<(), EngineError> {
        self.checkpointer
            .save(checkpoint)
            .await
            .map_err(EngineError::Checkpointer)
    }

    /// Checkpoints are validated against the immutable registry before any
    /// node runs; a frontier naming an unknown node means the persisted
    /// thread belongs to a different graph version.
    fn validate(&self, checkpoint: &Checkpoint) -> Result<(), EngineError> {
        let registry = self.workflow.registry();
        for item in &checkpoint.frontier {
            if !registry.contains(&item.node) {
                return Err(EngineError::CheckpointSchema {
                    thread_id: checkpoint.thread_id.clone(),
                    node: item.node.to_string(),
                });
            }
        }
        for node in &checkpoint.completed_nodes {
            if !registry.contains(node) {
                return Err(EngineError::CheckpointSchema {
                    thread_id: checkpoint.thread_id.clone(),
                    node: node.to_string(),
                });
            }
        }
        Ok(())
    }

    fn emit(&self, event: Event) {
        // Observability is best-effort; a full bus never blocks execution.
        let _ = self.events.try_send(event);
    }
}
