//! Node execution contracts: the handler trait, execution context, and the
//! partial state updates nodes return.
//!
//! A node is a single unit of computation in the workflow. It receives an
//! immutable snapshot of the thread state plus its execution context
//! (identity, dispatch overlay, cancellation token, event emitter) and
//! returns a [`NodeOutput`]:
//!
//! - [`NodeOutput::Patch`] — a [`StatePatch`] merged at the superstep
//!   barrier, or
//! - [`NodeOutput::Suspend`] — a request to halt the thread pending an
//!   external decision (only the human review gate does this).
//!
//! Returning `Err(NodeError)` is a **permanent** failure that short-circuits
//! the thread to the `Failed` terminal; transient provider faults are
//! retried inside the provider adapters and never reach this layer.

use async_trait::async_trait;
use miette::Diagnostic;
use serde_json::Value;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::event_bus::Event;
use crate::graph::DispatchOverlay;
use crate::guardrails::Violation;
use crate::providers::ProviderError;
use crate::state::{
    EvaluationScores, MediaBinding, MediaMetadata, ScenePrompt, StoryState,
};
use crate::types::{MediaKind, NodeKind};

/// Errors raised by [`NodeContext`] methods.
#[derive(Debug, Error, Diagnostic)]
pub enum NodeContextError {
    /// Event could not be sent because the event bus is gone.
    #[error("failed to emit event: event bus unavailable")]
    #[diagnostic(
        code(fablegraph::node::event_bus_unavailable),
        help("The event bus may be disconnected or at capacity.")
    )]
    EventBusUnavailable,
}

/// Execution context passed to a node for one invocation.
///
/// Carries the node's identity, the superstep number, the per-dispatch
/// overlay (for fan-out units), the resume value (for the suspended node on
/// resume), the thread's cancellation token, and the event emitter.
#[derive(Clone, Debug)]
pub struct NodeContext {
    /// The thread this invocation belongs to.
    pub thread_id: String,
    /// The node being invoked.
    pub node: NodeKind,
    /// Superstep number (monotonic per thread, matches the snapshot seq).
    pub step: u64,
    /// Transient per-dispatch values for fan-out units. `None` for plain
    /// invocations. Never persisted onto canonical state.
    pub overlay: Option<DispatchOverlay>,
    /// The decision value supplied by `resume`, visible only to the node
    /// that suspended.
    pub resume: Option<Value>,
    /// Cooperative cancellation. Handlers should abandon provider calls at
    /// the next check and return.
    pub cancel: CancellationToken,
    pub(crate) event_sender: flume::Sender<Event>,
}

impl NodeContext {
    /// Emit a node-scoped event enriched with this context's metadata.
    pub fn emit(
        &self,
        scope: impl Into<String>,
        message: impl Into<String>,
    ) -> Result<(), NodeContextError> {
        self.event_sender
            .send(Event::node(
                self.thread_id.clone(),
                self.node.to_string(),
                self.step,
                scope,
                message,
            ))
            .map_err(|_| NodeContextError::EventBusUnavailable)
    }

    /// The dispatch overlay, or a `MissingInput` error for nodes that are
    /// only ever reached through fan-out.
    pub fn overlay(&self) -> Result<&DispatchOverlay, NodeError> {
        self.overlay.as_ref().ok_or(NodeError::MissingInput {
            what: "dispatch overlay",
        })
    }
}

/// Partial state update returned by a node.
///
/// All fields are optional (or empty): a node states only what it changes.
/// The executor merges patches at the barrier using the field rules declared
/// in [`crate::state::FIELDS`] — `Option` scalars overwrite when `Some`,
/// `Vec` reducers concatenate. Unset fields never clear existing state.
///
/// # Examples
///
/// ```rust
/// use fablegraph::node::StatePatch;
///
/// let patch = StatePatch {
///     story_title: Some("The Brave Little Fern".into()),
///     story_text: Some("Once upon a time...".into()),
///     ..Default::default()
/// };
/// assert!(patch.guardrail_violations.is_empty());
/// ```
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StatePatch {
    // Scalars (last-writer-wins)
    pub story_text: Option<String>,
    pub story_title: Option<String>,
    pub image_prompts: Option<Vec<ScenePrompt>>,
    pub video_prompts: Option<Vec<ScenePrompt>>,
    pub image_urls: Option<Vec<String>>,
    pub video_urls: Option<Vec<String>>,
    pub evaluation_scores: Option<EvaluationScores>,
    pub input_moderation_passed: Option<bool>,
    pub guardrail_passed: Option<bool>,
    pub guardrail_summary: Option<String>,
    pub review_decision: Option<String>,
    pub review_comment: Option<String>,
    pub reviewer_id: Option<String>,
    pub error: Option<String>,

    // Reducers (append-only)
    pub image_metadata: Vec<MediaMetadata>,
    pub video_metadata: Vec<MediaMetadata>,
    pub guardrail_violations: Vec<Violation>,
    pub image_bindings: Vec<MediaBinding>,
    pub video_bindings: Vec<MediaBinding>,
}

impl StatePatch {
    /// A patch carrying only guardrail violations.
    #[must_use]
    pub fn with_violations(violations: Vec<Violation>) -> Self {
        Self {
            guardrail_violations: violations,
            ..Default::default()
        }
    }

    /// True when the patch changes nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Merge this patch into `state`.
    ///
    /// This is the single merge function of the engine: scalar fields
    /// overwrite on `Some`, reducer fields concatenate. The operation is
    /// pure with respect to ordering of reducer contributions — applying
    /// patches in any order yields the same multiset per reducer field.
    pub fn apply(self, state: &mut StoryState) {
        // Scalars: last writer wins, None leaves the field untouched.
        if let Some(v) = self.story_text {
            state.story_text = Some(v);
        }
        if let Some(v) = self.story_title {
            state.story_title = Some(v);
        }
        if let Some(v) = self.image_prompts {
            state.image_prompts = v;
        }
        if let Some(v) = self.video_prompts {
            state.video_prompts = v;
        }
        if let Some(v) = self.image_urls {
            state.image_urls = v;
        }
        if let Some(v) = self.video_urls {
            state.video_urls = v;
        }
        if let Some(v) = self.evaluation_scores {
            state.evaluation_scores = Some(v);
        }
        if let Some(v) = self.input_moderation_passed {
            state.input_moderation_passed = Some(v);
        }
        if let Some(v) = self.guardrail_passed {
            state.guardrail_passed = Some(v);
        }
        if let Some(v) = self.guardrail_summary {
            state.guardrail_summary = Some(v);
        }
        if let Some(v) = self.review_decision {
            state.review_decision = Some(v);
        }
        if let Some(v) = self.review_comment {
            state.review_comment = Some(v);
        }
        if let Some(v) = self.reviewer_id {
            state.reviewer_id = Some(v);
        }
        if let Some(v) = self.error {
            state.error = Some(v);
        }

        // Reducers: concatenation.
        state.image_metadata.extend(self.image_metadata);
        state.video_metadata.extend(self.video_metadata);
        state.guardrail_violations.extend(self.guardrail_violations);
        state.image_bindings.extend(self.image_bindings);
        state.video_bindings.extend(self.video_bindings);
    }
}

/// What a node invocation produced.
///
/// Suspension is a distinguished return value rather than an error so that
/// control flow stays explicit and unwinding deterministic.
#[derive(Clone, Debug)]
pub enum NodeOutput {
    /// Normal completion; the patch is merged at the barrier.
    Patch(StatePatch),
    /// Halt the thread and surface the payload to an external reviewer.
    /// No patch is merged; the node re-runs on resume with
    /// [`NodeContext::resume`] populated.
    Suspend(Value),
}

impl From<StatePatch> for NodeOutput {
    fn from(patch: StatePatch) -> Self {
        NodeOutput::Patch(patch)
    }
}

/// Core trait for executable workflow nodes.
///
/// Handlers are pure with respect to state: they read the snapshot and
/// return a patch. They may perform external I/O through provider ports,
/// which can block; the executor never assumes nonblocking handlers.
///
/// # Examples
///
/// ```rust,no_run
/// use fablegraph::node::{NodeContext, NodeError, NodeHandler, NodeOutput, StatePatch};
/// use fablegraph::state::StoryState;
/// use async_trait::async_trait;
///
/// struct TitleCase;
///
/// #[async_trait]
/// impl NodeHandler for TitleCase {
///     async fn run(&self, state: &StoryState, ctx: &NodeContext) -> Result<NodeOutput, NodeError> {
///         ctx.emit("title", "normalizing title")?;
///         let title = state.story_title.clone().unwrap_or_default();
///         Ok(StatePatch { story_title: Some(title.trim().to_string()), ..Default::default() }.into())
///     }
/// }
/// ```
#[async_trait]
pub trait NodeHandler: Send + Sync {
    /// Execute this node against the given state snapshot.
    async fn run(&self, state: &StoryState, ctx: &NodeContext)
        -> Result<NodeOutput, NodeError>;
}

/// Permanent errors raised during node execution.
///
/// Any of these short-circuits the thread to the `Failed` terminal (the
/// executor drains in-flight siblings, merges their patches, records the
/// error in the terminal snapshot). Transient provider faults are retried
/// inside the provider adapters; by the time an error surfaces here it is
/// final.
#[derive(Debug, Error, Diagnostic)]
pub enum NodeError {
    /// Expected input data is missing from the snapshot or overlay.
    #[error("missing expected input: {what}")]
    #[diagnostic(
        code(fablegraph::node::missing_input),
        help("Check that the upstream node produced the required data.")
    )]
    MissingInput { what: &'static str },

    /// A provider port failed permanently (including exhausted retries).
    #[error("provider error ({port}): {source}")]
    #[diagnostic(code(fablegraph::node::provider))]
    Provider {
        port: &'static str,
        #[source]
        source: ProviderError,
    },

    /// A structured-output port returned data that does not match its
    /// declared schema.
    #[error("schema validation failed for {what}: {source}")]
    #[diagnostic(
        code(fablegraph::node::schema),
        help("The provider returned a value that does not decode into the expected shape.")
    )]
    Schema {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },

    /// Generation produced unusable output (wrong counts, empty story).
    #[error("generation failed: {0}")]
    #[diagnostic(code(fablegraph::node::generation))]
    Generation(String),

    /// A media item still carries hard violations after the allowed
    /// regeneration attempts.
    #[error("media_guardrail_exhausted: {media} #{index} failed {attempts} pass(es)")]
    #[diagnostic(
        code(fablegraph::node::media_guardrail_exhausted),
        help("The media item failed safety checks on every generation attempt.")
    )]
    MediaGuardrailExhausted {
        media: MediaKind,
        index: u32,
        attempts: u32,
    },

    /// The thread was cancelled while this handler was running.
    #[error("cancelled")]
    #[diagnostic(code(fablegraph::node::cancelled))]
    Cancelled,

    /// Event bus communication error.
    #[error("event bus error: {0}")]
    #[diagnostic(code(fablegraph::node::event_bus))]
    EventBus(#[from] NodeContextError),
}

impl NodeError {
    /// Helper for wrapping a provider failure with its port name.
    #[must_use]
    pub fn provider(port: &'static str, source: ProviderError) -> Self {
        NodeError::Provider { port, source }
    }
}

/// Decode a structured provider value into a typed schema, mapping decode
/// failures to the permanent [`NodeError::Schema`] error.
pub fn decode_structured<T: serde::de::DeserializeOwned>(
    what: &'static str,
    value: Value,
) -> Result<T, NodeError> {
    serde_json::from_value(value).map_err(|source| NodeError::Schema { what, source })
}
