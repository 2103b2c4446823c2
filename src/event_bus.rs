//! Structured per-node events with pluggable sinks.
//!
//! Every node invocation can emit scoped progress events through its
//! [`NodeContext`](crate::node::NodeContext); the engine forwards them to an
//! [`EventBus`] whose listener task fans events out to the configured
//! [`EventSink`]s. Events carry the thread id so a single bus can serve many
//! concurrent threads and still be correlated per job.
//!
//! The default sink logs through `tracing`; tests use [`MemorySink`] to
//! assert on emitted events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex};

/// Default bounded capacity of the bus channel.
pub const DEFAULT_BUFFER_CAPACITY: usize = 1024;

/// A structured event emitted during workflow execution.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Event {
    /// Thread (job) the event belongs to, when known.
    pub thread_id: Option<String>,
    /// Node that emitted the event, when node-scoped.
    pub node: Option<String>,
    /// Superstep number at emission time.
    pub step: Option<u64>,
    /// Category of the event, e.g. `"generation"`, `"guardrail"`.
    pub scope: String,
    pub message: String,
    pub when: DateTime<Utc>,
}

impl Event {
    /// A node-scoped event with full metadata.
    pub fn node(
        thread_id: impl Into<String>,
        node: impl Into<String>,
        step: u64,
        scope: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            thread_id: Some(thread_id.into()),
            node: Some(node.into()),
            step: Some(step),
            scope: scope.into(),
            message: message.into(),
            when: Utc::now(),
        }
    }

    /// An engine-scoped diagnostic event.
    pub fn diagnostic(
        thread_id: impl Into<String>,
        scope: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            thread_id: Some(thread_id.into()),
            node: None,
            step: None,
            scope: scope.into(),
            message: message.into(),
            when: Utc::now(),
        }
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.thread_id, &self.node, self.step) {
            (Some(t), Some(n), Some(s)) => {
                write!(f, "[{t}/{n}@{s}] {}: {}", self.scope, self.message)
            }
            (Some(t), _, _) => write!(f, "[{t}] {}: {}", self.scope, self.message),
            _ => write!(f, "{}: {}", self.scope, self.message),
        }
    }
}

/// Destination for events drained from the bus.
pub trait EventSink: Send + Sync {
    fn handle(&self, event: &Event);
}

/// Sink that logs every event through `tracing` at info level.
#[derive(Debug, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn handle(&self, event: &Event) {
        tracing::info!(
            thread = event.thread_id.as_deref().unwrap_or("-"),
            node = event.node.as_deref().unwrap_or("-"),
            step = event.step.unwrap_or(0),
            scope = %event.scope,
            "{}",
            event.message
        );
    }
}

/// Sink that collects events in memory, for tests and inspection.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<Event>>,
}

impl MemorySink {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Snapshot of everything collected so far.
    pub fn drain(&self) -> Vec<Event> {
        self.events.lock().expect("memory sink poisoned").clone()
    }
}

impl EventSink for Arc<MemorySink> {
    fn handle(&self, event: &Event) {
        self.events
            .lock()
            .expect("memory sink poisoned")
            .push(event.clone());
    }
}

/// Bounded event channel with a background listener that fans events out to
/// sinks.
///
/// Cloning the sender is cheap; one bus serves every thread of an engine.
pub struct EventBus {
    sender: flume::Sender<Event>,
    receiver: flume::Receiver<Event>,
    sinks: Arc<Vec<Box<dyn EventSink>>>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_sinks(vec![Box::new(TracingSink)])
    }
}

impl EventBus {
    /// Create a bus with the given sinks and the default buffer capacity.
    #[must_use]
    pub fn with_sinks(sinks: Vec<Box<dyn EventSink>>) -> Self {
        Self::with_capacity_and_sinks(DEFAULT_BUFFER_CAPACITY, sinks)
    }

    /// Create a bus with explicit capacity and sinks.
    #[must_use]
    pub fn with_capacity_and_sinks(capacity: usize, sinks: Vec<Box<dyn EventSink>>) -> Self {
        let (sender, receiver) = flume::bounded(capacity.max(1));
        Self {
            sender,
            receiver,
            sinks: Arc::new(sinks),
        }
    }

    /// A cloneable sender handed to node contexts.
    #[must_use]
    pub fn sender(&self) -> flume::Sender<Event> {
        self.sender.clone()
    }

    /// Spawn the listener task that drains the channel into the sinks.
    /// The task ends when every sender (including the bus) is dropped.
    pub fn listen(&self) -> tokio::task::JoinHandle<()> {
        let receiver = self.receiver.clone();
        let sinks = Arc::clone(&self.sinks);
        tokio::spawn(async move {
            while let Ok(event) = receiver.recv_async().await {
                for sink in sinks.iter() {
                    sink.handle(&event);
                }
            }
        })
    }
}
