//! Declarative node specifications.
//!
//! Every executable node carries a [`NodeSpec`] describing how the executor
//! may schedule it: plain linear node, fan-out dispatch target, or fan-in
//! sink that must wait for every upstream contribution. Terminal nodes also
//! declare the [`JobStatus`] the thread settles into when they complete.
//!
//! The registry is immutable per engine version and doubles as the schema
//! checkpoints are validated against on resume: a persisted frontier that
//! names an unknown node is rejected rather than executed.

use rustc_hash::FxHashMap;

use crate::types::{JobStatus, NodeKind};

/// How the executor may schedule a node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConcurrencyKind {
    /// One in, one out: a single invocation per thread.
    Linear,
    /// Target of a dynamic fan-out: many dispatch units of this node may run
    /// in the same superstep, each with its own overlay.
    FanOutTarget,
    /// Fan-in sink: scheduled only once every upstream contribution has
    /// committed. The executor defers sinks while non-sink work remains.
    FanInSink,
}

/// Declaration of one node: identity, scheduling kind, and terminal status.
#[derive(Clone, Debug)]
pub struct NodeSpec {
    pub name: NodeKind,
    pub concurrency: ConcurrencyKind,
    /// For terminal nodes, the job status recorded when the node completes.
    pub terminal: Option<JobStatus>,
}

impl NodeSpec {
    /// A plain linear node.
    #[must_use]
    pub fn linear(name: impl Into<NodeKind>) -> Self {
        Self {
            name: name.into(),
            concurrency: ConcurrencyKind::Linear,
            terminal: None,
        }
    }

    /// A fan-out dispatch target.
    #[must_use]
    pub fn fan_out_target(name: impl Into<NodeKind>) -> Self {
        Self {
            name: name.into(),
            concurrency: ConcurrencyKind::FanOutTarget,
            terminal: None,
        }
    }

    /// A fan-in sink.
    #[must_use]
    pub fn fan_in_sink(name: impl Into<NodeKind>) -> Self {
        Self {
            name: name.into(),
            concurrency: ConcurrencyKind::Linear,
            terminal: None,
        }
        .as_sink()
    }

    fn as_sink(mut self) -> Self {
        self.concurrency = ConcurrencyKind::FanInSink;
        self
    }

    /// Mark this node terminal with the given settled status.
    #[must_use]
    pub fn terminal(mut self, status: JobStatus) -> Self {
        self.terminal = Some(status);
        self
    }
}

/// Immutable lookup table of node specifications.
#[derive(Clone, Debug, Default)]
pub struct NodeRegistry {
    specs: FxHashMap<NodeKind, NodeSpec>,
}

impl NodeRegistry {
    pub(crate) fn insert(&mut self, spec: NodeSpec) {
        self.specs.insert(spec.name.clone(), spec);
    }

    /// Look up a node's spec.
    #[must_use]
    pub fn spec(&self, node: &NodeKind) -> Option<&NodeSpec> {
        self.specs.get(node)
    }

    /// Whether the node is a fan-in sink.
    #[must_use]
    pub fn is_fan_in_sink(&self, node: &NodeKind) -> bool {
        self.spec(node)
            .map(|s| s.concurrency == ConcurrencyKind::FanInSink)
            .unwrap_or(false)
    }

    /// The terminal status declared for a node, if any.
    #[must_use]
    pub fn terminal_status(&self, node: &NodeKind) -> Option<JobStatus> {
        self.spec(node).and_then(|s| s.terminal)
    }

    /// Whether the registry knows this node. Virtual endpoints are always
    /// considered known.
    #[must_use]
    pub fn contains(&self, node: &NodeKind) -> bool {
        node.is_start() || node.is_end() || self.specs.contains_key(node)
    }

    /// Number of registered nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.specs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spec_builders() {
        let spec = NodeSpec::fan_in_sink(NodeKind::named("assembler"));
        assert_eq!(spec.concurrency, ConcurrencyKind::FanInSink);
        assert!(spec.terminal.is_none());

        let spec = NodeSpec::linear(NodeKind::named("publisher"))
            .terminal(JobStatus::Completed);
        assert_eq!(spec.terminal, Some(JobStatus::Completed));
    }

    #[test]
    fn registry_lookup() {
        let mut registry = NodeRegistry::default();
        registry.insert(NodeSpec::fan_in_sink(NodeKind::named("aggregator")));
        assert!(registry.is_fan_in_sink(&NodeKind::named("aggregator")));
        assert!(!registry.is_fan_in_sink(&NodeKind::named("unknown")));
        assert!(registry.contains(&NodeKind::End));
        assert!(!registry.contains(&NodeKind::named("unknown")));
    }
}
