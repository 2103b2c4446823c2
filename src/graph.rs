//! Graph construction: nodes, edges, routers, and dispatch units.
//!
//! A workflow graph is assembled with [`GraphBuilder`] and compiled into an
//! immutable [`Workflow`]. Two routing mechanisms exist:
//!
//! - **Static edges** ([`GraphBuilder::add_edge`]) — unconditional
//!   successors; multiple edges from one node run the successors in
//!   parallel.
//! - **Routers** ([`GraphBuilder::add_router`]) — state-dependent routing
//!   evaluated after the node commits. A router either selects successor
//!   nodes ([`Route::To`]) or emits a dynamic fan-out of
//!   [`DispatchUnit`]s, one per element of some state list, each carrying a
//!   [`DispatchOverlay`] with its per-dispatch transients.
//!
//! Routers are side-effect-free and must be deterministic given state. An
//! empty dispatch list is legal and schedules nothing — the downstream
//! fan-in proceeds once remaining work drains.

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use miette::Diagnostic;
use thiserror::Error;

use crate::node::NodeHandler;
use crate::registry::{NodeRegistry, NodeSpec};
use crate::state::StoryState;
use crate::types::NodeKind;

/// Transient values carried by one fan-out dispatch unit.
///
/// Overlays are visible only to the dispatched node invocation (through its
/// context) and are never merged onto canonical state. They are serialized
/// inside pending frontier work items so a restarted process can re-dispatch
/// exactly the units that had not yet run.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DispatchOverlay {
    /// Display-order index of the element this unit handles.
    pub index: u32,
    /// The generation or moderation prompt for this element.
    pub prompt: String,
    /// Scene description, when available.
    #[serde(default)]
    pub description: String,
    /// URL of the media item under check (guardrail dispatches).
    #[serde(default)]
    pub media_url: Option<String>,
}

/// One target invocation emitted by a router for fan-out.
#[derive(Clone, Debug)]
pub struct DispatchUnit {
    pub target: NodeKind,
    pub overlay: Option<DispatchOverlay>,
}

impl DispatchUnit {
    /// A dispatch unit with an overlay.
    #[must_use]
    pub fn new(target: impl Into<String>, overlay: DispatchOverlay) -> Self {
        Self {
            target: NodeKind::named(target),
            overlay: Some(overlay),
        }
    }

    /// A dispatch unit without transients (plain parallel sibling).
    #[must_use]
    pub fn bare(target: impl Into<String>) -> Self {
        Self {
            target: NodeKind::named(target),
            overlay: None,
        }
    }
}

/// What a router decided.
#[derive(Clone, Debug)]
pub enum Route {
    /// Deterministic selection among named successors.
    To(Vec<NodeKind>),
    /// Dynamic fan-out: one work item per dispatch unit. May be empty.
    Dispatch(Vec<DispatchUnit>),
}

impl Route {
    /// Route to a single named successor.
    #[must_use]
    pub fn to(target: impl Into<String>) -> Self {
        Route::To(vec![NodeKind::named(target)])
    }

    /// Route straight to the virtual end.
    #[must_use]
    pub fn end() -> Self {
        Route::To(vec![NodeKind::End])
    }
}

/// State-dependent routing function evaluated after a node commits.
pub type RouterFn = Arc<dyn Fn(&StoryState) -> Route + Send + Sync>;

/// Errors raised while building or compiling a graph.
#[derive(Debug, Error, Diagnostic)]
pub enum GraphError {
    #[error("duplicate node registration: {name}")]
    #[diagnostic(code(fablegraph::graph::duplicate_node))]
    DuplicateNode { name: String },

    #[error("edge references unregistered node: {name}")]
    #[diagnostic(
        code(fablegraph::graph::unknown_edge_target),
        help("Register the node with add_node before wiring edges to it.")
    )]
    UnknownEdgeTarget { name: String },

    #[error("no entry edges from Start")]
    #[diagnostic(
        code(fablegraph::graph::no_entry),
        help("Add at least one edge from NodeKind::Start.")
    )]
    NoEntry,

    #[error("virtual endpoint {name} cannot carry a handler")]
    #[diagnostic(code(fablegraph::graph::virtual_endpoint))]
    VirtualEndpoint { name: String },
}

/// Builder for workflow graphs.
///
/// # Examples
///
/// ```rust,no_run
/// use fablegraph::graph::{GraphBuilder, Route};
/// use fablegraph::registry::NodeSpec;
/// use fablegraph::types::NodeKind;
/// use std::sync::Arc;
/// # use fablegraph::node::{NodeHandler, NodeContext, NodeError, NodeOutput, StatePatch};
/// # use fablegraph::state::StoryState;
/// # struct Writer;
/// # #[async_trait::async_trait]
/// # impl NodeHandler for Writer {
/// #     async fn run(&self, _: &StoryState, _: &NodeContext) -> Result<NodeOutput, NodeError> {
/// #         Ok(StatePatch::default().into())
/// #     }
/// # }
///
/// let workflow = GraphBuilder::new()
///     .add_node(NodeSpec::linear(NodeKind::named("writer")), Writer)
///     .add_edge(NodeKind::Start, NodeKind::named("writer"))
///     .add_router(NodeKind::named("writer"), Arc::new(|_state| Route::end()))
///     .compile()
///     .unwrap();
/// assert_eq!(workflow.entry().len(), 1);
/// ```
pub struct GraphBuilder {
    handlers: FxHashMap<NodeKind, Arc<dyn NodeHandler>>,
    registry: NodeRegistry,
    edges: FxHashMap<NodeKind, Vec<NodeKind>>,
    routers: FxHashMap<NodeKind, RouterFn>,
    error: Option<GraphError>,
}

impl Default for GraphBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            handlers: FxHashMap::default(),
            registry: NodeRegistry::default(),
            edges: FxHashMap::default(),
            routers: FxHashMap::default(),
            error: None,
        }
    }

    /// Register a node with its spec and handler.
    ///
    /// `Start` and `End` are virtual and cannot be registered.
    #[must_use]
    pub fn add_node(mut self, spec: NodeSpec, handler: impl NodeHandler + 'static) -> Self {
        if spec.name.is_start() || spec.name.is_end() {
            self.error.get_or_insert(GraphError::VirtualEndpoint {
                name: spec.name.to_string(),
            });
            return self;
        }
        if self.handlers.contains_key(&spec.name) {
            self.error.get_or_insert(GraphError::DuplicateNode {
                name: spec.name.to_string(),
            });
            return self;
        }
        self.handlers.insert(spec.name.clone(), Arc::new(handler));
        self.registry.insert(spec);
        self
    }

    /// Add an unconditional edge.
    #[must_use]
    pub fn add_edge(mut self, from: NodeKind, to: NodeKind) -> Self {
        self.edges.entry(from).or_default().push(to);
        self
    }

    /// Attach a router evaluated after `from` commits.
    #[must_use]
    pub fn add_router(mut self, from: NodeKind, router: RouterFn) -> Self {
        self.routers.insert(from, router);
        self
    }

    /// Validate and freeze the graph.
    pub fn compile(self) -> Result<Workflow, GraphError> {
        if let Some(err) = self.error {
            return Err(err);
        }
        let entry = self
            .edges
            .get(&NodeKind::Start)
            .cloned()
            .unwrap_or_default();
        if entry.is_empty() {
            return Err(GraphError::NoEntry);
        }
        for (from, targets) in &self.edges {
            if !self.registry.contains(from) {
                return Err(GraphError::UnknownEdgeTarget {
                    name: from.to_string(),
                });
            }
            for to in targets {
                if !self.registry.contains(to) {
                    return Err(GraphError::UnknownEdgeTarget {
                        name: to.to_string(),
                    });
                }
            }
        }
        Ok(Workflow {
            handlers: self.handlers,
            registry: self.registry,
            edges: self.edges,
            routers: self.routers,
            entry,
        })
    }
}

/// A compiled, immutable workflow graph.
#[derive(Clone)]
pub struct Workflow {
    handlers: FxHashMap<NodeKind, Arc<dyn NodeHandler>>,
    registry: NodeRegistry,
    edges: FxHashMap<NodeKind, Vec<NodeKind>>,
    routers: FxHashMap<NodeKind, RouterFn>,
    entry: Vec<NodeKind>,
}

impl std::fmt::Debug for Workflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workflow")
            .field("edges", &self.edges)
            .field("entry", &self.entry)
            .finish_non_exhaustive()
    }
}

impl Workflow {
    /// The initial frontier: targets of edges from `Start`.
    #[must_use]
    pub fn entry(&self) -> &[NodeKind] {
        &self.entry
    }

    /// Look up a node's handler.
    #[must_use]
    pub fn handler(&self, node: &NodeKind) -> Option<Arc<dyn NodeHandler>> {
        self.handlers.get(node).cloned()
    }

    /// The node specification registry.
    #[must_use]
    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    /// Unconditional successors of a node.
    #[must_use]
    pub fn edges_from(&self, node: &NodeKind) -> &[NodeKind] {
        self.edges.get(node).map(Vec::as_slice).unwrap_or(&[])
    }

    /// The router attached to a node, if any.
    #[must_use]
    pub fn router(&self, node: &NodeKind) -> Option<&RouterFn> {
        self.routers.get(node)
    }
}
