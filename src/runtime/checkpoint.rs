//! Durable checkpoints and the pluggable checkpoint store.
//!
//! A [`Checkpoint`] is the full recovery record of one thread at one
//! sequence number: the merged state, the set of committed nodes, the
//! pending frontier (including fan-out overlays), the job status, and any
//! pending suspension. The executor writes one synchronously after every
//! barrier commit, so a crash loses at most the effect of the superstep in
//! flight.
//!
//! [`Checkpointer`] is the store abstraction; [`InMemoryCheckpointer`] backs
//! tests and development, and the `sqlite` feature adds a durable
//! SQLite-backed implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use miette::Diagnostic;
use rustc_hash::FxHashMap;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::graph::DispatchOverlay;
use crate::state::StoryState;
use crate::types::{JobStatus, NodeKind};

/// One pending invocation in a thread's frontier.
#[derive(Clone, Debug, PartialEq)]
pub struct WorkItem {
    pub node: NodeKind,
    /// Present for fan-out dispatch units; the overlay persists with the
    /// frontier so a restart re-dispatches exactly the units that had not
    /// run.
    pub overlay: Option<DispatchOverlay>,
}

impl WorkItem {
    #[must_use]
    pub fn bare(node: NodeKind) -> Self {
        Self {
            node,
            overlay: None,
        }
    }

    #[must_use]
    pub fn with_overlay(node: NodeKind, overlay: DispatchOverlay) -> Self {
        Self {
            node,
            overlay: Some(overlay),
        }
    }
}

/// A pending suspension awaiting an external decision.
#[derive(Clone, Debug, PartialEq)]
pub struct Suspension {
    /// The node that suspended; re-entered on resume.
    pub node: NodeKind,
    /// The review payload surfaced to the caller.
    pub payload: Value,
    /// Wall-clock deadline after which the sweeper rejects the thread.
    pub resume_deadline: DateTime<Utc>,
}

/// Durable record of one thread at one sequence number.
#[derive(Clone, Debug)]
pub struct Checkpoint {
    pub thread_id: String,
    /// Strictly monotonic per thread; seq 0 is the initial submission.
    pub seq: u64,
    pub state: StoryState,
    /// Nodes whose patches have committed. Replay never re-enters these.
    pub completed_nodes: Vec<NodeKind>,
    /// Work that had not run when this snapshot was taken.
    pub frontier: Vec<WorkItem>,
    pub status: JobStatus,
    pub suspension: Option<Suspension>,
    /// Permanent error detail for `Failed` terminals.
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Checkpoint {
    /// The initial checkpoint for a fresh submission.
    #[must_use]
    pub fn initial(thread_id: &str, state: StoryState, entry: Vec<NodeKind>) -> Self {
        Self {
            thread_id: thread_id.to_string(),
            seq: 0,
            state,
            completed_nodes: Vec::new(),
            frontier: entry.into_iter().map(WorkItem::bare).collect(),
            status: JobStatus::Queued,
            suspension: None,
            error: None,
            created_at: Utc::now(),
        }
    }
}

/// Errors raised by checkpoint stores.
#[derive(Debug, Error, Diagnostic)]
pub enum CheckpointerError {
    #[error("checkpoint backend error: {message}")]
    #[diagnostic(code(fablegraph::checkpointer::backend))]
    Backend { message: String },

    #[error("checkpoint serialization error: {source}")]
    #[diagnostic(
        code(fablegraph::checkpointer::serde),
        help("The persisted shape no longer matches this engine version.")
    )]
    Serde {
        #[source]
        source: serde_json::Error,
    },

    #[error("stale checkpoint write for thread {thread_id}: seq {seq} already superseded")]
    #[diagnostic(code(fablegraph::checkpointer::stale_write))]
    StaleWrite { thread_id: String, seq: u64 },
}

pub type Result<T> = std::result::Result<T, CheckpointerError>;

/// Thread-keyed, append-oriented checkpoint store.
///
/// Stores must support concurrent threads writing snapshots for different
/// thread ids; within one thread, the executor serializes writes.
#[async_trait]
pub trait Checkpointer: Send + Sync {
    /// Atomic upsert keyed by `(thread_id, seq)`.
    async fn save(&self, checkpoint: Checkpoint) -> Result<()>;

    /// The highest committed snapshot for a thread, if any.
    async fn load_latest(&self, thread_id: &str) -> Result<Option<Checkpoint>>;

    /// All thread ids with at least one snapshot.
    async fn list_threads(&self) -> Result<Vec<String>>;
}

/// Volatile checkpoint store for tests and development.
///
/// Keeps the full snapshot history per thread, like a real store would, so
/// tests can assert on seq monotonicity.
#[derive(Debug, Default)]
pub struct InMemoryCheckpointer {
    threads: Mutex<FxHashMap<String, Vec<Checkpoint>>>,
}

impl InMemoryCheckpointer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Full snapshot history for a thread, ordered by insertion.
    pub async fn history(&self, thread_id: &str) -> Vec<Checkpoint> {
        self.threads
            .lock()
            .await
            .get(thread_id)
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl Checkpointer for InMemoryCheckpointer {
    async fn save(&self, checkpoint: Checkpoint) -> Result<()> {
        let mut threads = self.threads.lock().await;
        let history = threads.entry(checkpoint.thread_id.clone()).or_default();
        if let Some(existing) = history.iter_mut().find(|c| c.seq == checkpoint.seq) {
            *existing = checkpoint;
        } else {
            history.push(checkpoint);
        }
        Ok(())
    }

    async fn load_latest(&self, thread_id: &str) -> Result<Option<Checkpoint>> {
        let threads = self.threads.lock().await;
        Ok(threads
            .get(thread_id)
            .and_then(|history| history.iter().max_by_key(|c| c.seq))
            .cloned())
    }

    async fn list_threads(&self) -> Result<Vec<String>> {
        let threads = self.threads.lock().await;
        Ok(threads.keys().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn checkpoint(thread: &str, seq: u64) -> Checkpoint {
        Checkpoint {
            seq,
            ..Checkpoint::initial(
                thread,
                StoryState::builder("job", "prompt").build(),
                vec![NodeKind::named("input_moderator")],
            )
        }
    }

    #[tokio::test]
    async fn latest_returns_highest_seq() {
        let store = InMemoryCheckpointer::new();
        store.save(checkpoint("t1", 0)).await.unwrap();
        store.save(checkpoint("t1", 2)).await.unwrap();
        store.save(checkpoint("t1", 1)).await.unwrap();

        let latest = store.load_latest("t1").await.unwrap().unwrap();
        assert_eq!(latest.seq, 2);
    }

    #[tokio::test]
    async fn save_is_upsert_on_seq() {
        let store = InMemoryCheckpointer::new();
        store.save(checkpoint("t1", 1)).await.unwrap();
        let mut replacement = checkpoint("t1", 1);
        replacement.status = JobStatus::Running;
        store.save(replacement).await.unwrap();

        let history = store.history("t1").await;
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].status, JobStatus::Running);
    }

    #[tokio::test]
    async fn missing_thread_is_none() {
        let store = InMemoryCheckpointer::new();
        assert!(store.load_latest("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_threads_sees_all() {
        let store = InMemoryCheckpointer::new();
        store.save(checkpoint("a", 0)).await.unwrap();
        store.save(checkpoint("b", 0)).await.unwrap();
        let mut ids = store.list_threads().await.unwrap();
        ids.sort();
        assert_eq!(ids, vec!["a", "b"]);
    }
}
