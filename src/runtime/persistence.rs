/*!
Persistence primitives for serializing/deserializing checkpoints.

Explicit serde-friendly structs decoupled from the in-memory
representations; conversion logic is localized in `From`/`TryFrom` impls so
checkpointer backends stay lean and declarative. `NodeKind`s round-trip
through their encoded string form (unknown stage names decode as
`NodeKind::Named`), timestamps as RFC3339 strings. This module performs no
I/O.
*/

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::graph::DispatchOverlay;
use crate::state::StoryState;
use crate::types::{JobStatus, NodeKind};

use super::checkpoint::{Checkpoint, CheckpointerError, Suspension, WorkItem};

/// Persisted shape of one frontier work item.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PersistedWorkItem {
    pub node: String,
    #[serde(default)]
    pub overlay: Option<DispatchOverlay>,
}

/// Persisted shape of a pending suspension.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PersistedSuspension {
    pub node: String,
    pub payload: Value,
    /// RFC3339 string form of the resume deadline.
    pub resume_deadline: String,
}

/// Full persisted checkpoint representation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PersistedCheckpoint {
    pub thread_id: String,
    pub seq: u64,
    pub state: StoryState,
    /// Completed nodes encoded with `NodeKind::encode()`.
    #[serde(default)]
    pub completed_nodes: Vec<String>,
    #[serde(default)]
    pub frontier: Vec<PersistedWorkItem>,
    pub status: JobStatus,
    #[serde(default)]
    pub suspension: Option<PersistedSuspension>,
    #[serde(default)]
    pub error: Option<String>,
    /// RFC3339 string form of creation time.
    pub created_at: String,
}

impl From<&Checkpoint> for PersistedCheckpoint {
    fn from(cp: &Checkpoint) -> Self {
        PersistedCheckpoint {
            thread_id: cp.thread_id.clone(),
            seq: cp.seq,
            state: cp.state.clone(),
            completed_nodes: cp.completed_nodes.iter().map(NodeKind::encode).collect(),
            frontier: cp
                .frontier
                .iter()
                .map(|item| PersistedWorkItem {
                    node: item.node.encode(),
                    overlay: item.overlay.clone(),
                })
                .collect(),
            status: cp.status,
            suspension: cp.suspension.as_ref().map(|s| PersistedSuspension {
                node: s.node.encode(),
                payload: s.payload.clone(),
                resume_deadline: s.resume_deadline.to_rfc3339(),
            }),
            error: cp.error.clone(),
            created_at: cp.created_at.to_rfc3339(),
        }
    }
}

impl From<PersistedCheckpoint> for Checkpoint {
    fn from(p: PersistedCheckpoint) -> Self {
        let parse_time = |s: &str| {
            chrono::DateTime::parse_from_rfc3339(s)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now())
        };
        Checkpoint {
            thread_id: p.thread_id,
            seq: p.seq,
            state: p.state,
            completed_nodes: p
                .completed_nodes
                .iter()
                .map(|s| NodeKind::decode(s))
                .collect(),
            frontier: p
                .frontier
                .into_iter()
                .map(|item| WorkItem {
                    node: NodeKind::decode(&item.node),
                    overlay: item.overlay,
                })
                .collect(),
            status: p.status,
            suspension: p.suspension.map(|s| Suspension {
                node: NodeKind::decode(&s.node),
                payload: s.payload,
                resume_deadline: parse_time(&s.resume_deadline),
            }),
            error: p.error,
            created_at: parse_time(&p.created_at),
        }
    }
}

/// Serialize a checkpoint to its persisted JSON string.
pub fn to_json(cp: &Checkpoint) -> Result<String, CheckpointerError> {
    serde_json::to_string(&PersistedCheckpoint::from(cp))
        .map_err(|source| CheckpointerError::Serde { source })
}

/// Deserialize a checkpoint from its persisted JSON string.
pub fn from_json(json: &str) -> Result<Checkpoint, CheckpointerError> {
    let persisted: PersistedCheckpoint =
        serde_json::from_str(json).map_err(|source| CheckpointerError::Serde { source })?;
    Ok(persisted.into())
}
