//! Event types and the per-run event bus
//!
//! The processor writes every lifecycle step to an [`EventBus`]. Consumers
//! either register synchronous listeners (`on`, `on_any`, `once`, sinks) or
//! take an independent [`EventStream`] cursor. Each stream has its own
//! unbounded queue, so a slow stream never blocks the scheduler or any
//! other consumer.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::Stream;
use parking_lot::{Mutex, ReentrantMutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};

use crate::types::{GraphId, NodeId, PortId};
use crate::value::DataValue;

/// Port id to value map used for node inputs and outputs
pub type PortValues = HashMap<PortId, DataValue>;

/// Why a node was excluded instead of run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ExclusionReason {
    /// A required input received `control-flow-excluded`
    #[serde(rename_all = "camelCase")]
    ExcludedInput {
        port_id: PortId,
        from_node_id: NodeId,
    },
    /// The node is disabled
    Disabled,
    /// A required input has no connection, so the node never becomes ready
    #[serde(rename_all = "camelCase")]
    UnconnectedInput { port_id: PortId },
}

impl std::fmt::Display for ExclusionReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExclusionReason::ExcludedInput {
                port_id,
                from_node_id,
            } => write!(f, "input '{}' excluded by node {}", port_id, from_node_id),
            ExclusionReason::Disabled => f.write_str("node disabled"),
            ExclusionReason::UnconnectedInput { port_id } => {
                write!(f, "required input '{}' is not connected", port_id)
            }
        }
    }
}

/// Events emitted while processing a graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "camelCase")]
pub enum ProcessEvent {
    /// The root run started
    #[serde(rename_all = "camelCase")]
    Start {
        run_id: String,
        project_id: String,
        graph_id: GraphId,
        inputs: PortValues,
        context_values: PortValues,
    },

    /// A graph (root or subgraph) started
    #[serde(rename_all = "camelCase")]
    GraphStart {
        graph_id: GraphId,
        graph_name: String,
        inputs: PortValues,
    },

    /// A graph finished and produced its outputs
    #[serde(rename_all = "camelCase")]
    GraphFinish {
        graph_id: GraphId,
        outputs: PortValues,
    },

    /// A graph failed
    #[serde(rename_all = "camelCase")]
    GraphError { graph_id: GraphId, error: String },

    /// A graph was aborted
    #[serde(rename_all = "camelCase")]
    GraphAbort {
        graph_id: GraphId,
        successful: bool,
        error: Option<String>,
    },

    #[serde(rename_all = "camelCase")]
    NodeStart {
        node_id: NodeId,
        node_title: String,
        node_type: String,
        process_id: String,
        inputs: PortValues,
    },

    /// Intermediate outputs of a running node; `index` is the split-run element
    #[serde(rename_all = "camelCase")]
    PartialOutput {
        node_id: NodeId,
        node_title: String,
        process_id: String,
        outputs: PortValues,
        index: usize,
    },

    #[serde(rename_all = "camelCase")]
    NodeFinish {
        node_id: NodeId,
        node_title: String,
        process_id: String,
        outputs: PortValues,
    },

    #[serde(rename_all = "camelCase")]
    NodeError {
        node_id: NodeId,
        node_title: String,
        process_id: String,
        error: String,
    },

    #[serde(rename_all = "camelCase")]
    NodeExcluded {
        node_id: NodeId,
        node_title: String,
        process_id: String,
        inputs: PortValues,
        outputs: PortValues,
        reason: ExclusionReason,
    },

    /// Outputs from a previous run of the node were discarded
    #[serde(rename_all = "camelCase")]
    NodeOutputsCleared { node_id: NodeId },

    /// A global was written; matches `globalSet` and `globalSet:<id>`
    #[serde(rename_all = "camelCase")]
    GlobalSet {
        id: String,
        value: DataValue,
        process_id: String,
    },

    /// A user event was raised; matches `userEvent` and `userEvent:<name>`
    #[serde(rename_all = "camelCase")]
    UserEvent {
        name: String,
        value: Option<DataValue>,
    },

    /// A node is waiting for answers from an external actor
    #[serde(rename_all = "camelCase")]
    UserInput {
        node_id: NodeId,
        node_title: String,
        process_id: String,
        prompts: Vec<String>,
    },

    Trace(String),

    Pause,

    Resume,

    /// The root run completed
    #[serde(rename_all = "camelCase")]
    Done { results: PortValues },

    /// The root run was aborted
    #[serde(rename_all = "camelCase")]
    Abort {
        successful: bool,
        error: Option<String>,
    },

    /// The root run failed
    #[serde(rename_all = "camelCase")]
    Error { error: String },
}

impl ProcessEvent {
    /// The event's base name, as used in the serialized `type` field
    pub fn name(&self) -> &'static str {
        match self {
            ProcessEvent::Start { .. } => "start",
            ProcessEvent::GraphStart { .. } => "graphStart",
            ProcessEvent::GraphFinish { .. } => "graphFinish",
            ProcessEvent::GraphError { .. } => "graphError",
            ProcessEvent::GraphAbort { .. } => "graphAbort",
            ProcessEvent::NodeStart { .. } => "nodeStart",
            ProcessEvent::PartialOutput { .. } => "partialOutput",
            ProcessEvent::NodeFinish { .. } => "nodeFinish",
            ProcessEvent::NodeError { .. } => "nodeError",
            ProcessEvent::NodeExcluded { .. } => "nodeExcluded",
            ProcessEvent::NodeOutputsCleared { .. } => "nodeOutputsCleared",
            ProcessEvent::GlobalSet { .. } => "globalSet",
            ProcessEvent::UserEvent { .. } => "userEvent",
            ProcessEvent::UserInput { .. } => "userInput",
            ProcessEvent::Trace(_) => "trace",
            ProcessEvent::Pause => "pause",
            ProcessEvent::Resume => "resume",
            ProcessEvent::Done { .. } => "done",
            ProcessEvent::Abort { .. } => "abort",
            ProcessEvent::Error { .. } => "error",
        }
    }

    /// Whether a subscription to `filter` receives this event
    ///
    /// `globalSet:<id>` and `userEvent:<name>` narrow the base names to one
    /// global or one user event.
    pub fn matches(&self, filter: &str) -> bool {
        if filter == self.name() {
            return true;
        }
        match self {
            ProcessEvent::GlobalSet { id, .. } => filter.strip_prefix("globalSet:") == Some(id.as_str()),
            ProcessEvent::UserEvent { name, .. } => filter.strip_prefix("userEvent:") == Some(name.as_str()),
            _ => false,
        }
    }

    /// Events that end a root run
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProcessEvent::Done { .. } | ProcessEvent::Abort { .. } | ProcessEvent::Error { .. }
        )
    }

    /// The node this event concerns, if any
    pub fn node_id(&self) -> Option<&str> {
        match self {
            ProcessEvent::NodeStart { node_id, .. }
            | ProcessEvent::PartialOutput { node_id, .. }
            | ProcessEvent::NodeFinish { node_id, .. }
            | ProcessEvent::NodeError { node_id, .. }
            | ProcessEvent::NodeExcluded { node_id, .. }
            | ProcessEvent::NodeOutputsCleared { node_id }
            | ProcessEvent::UserInput { node_id, .. } => Some(node_id),
            _ => None,
        }
    }
}

/// Trait for receiving every event of a run synchronously
///
/// This abstracts over the transport mechanism (recorder, channel, debugger
/// bridge) so the processor can be observed in different contexts.
pub trait EventSink: Send + Sync {
    /// Send an event
    ///
    /// Returns an error if the event could not be delivered (e.g., channel closed)
    fn send(&self, event: &ProcessEvent) -> Result<(), EventError>;
}

/// Error when sending events fails
#[derive(Debug, Clone)]
pub struct EventError {
    pub message: String,
}

impl std::fmt::Display for EventError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Event error: {}", self.message)
    }
}

impl std::error::Error for EventError {}

impl EventError {
    pub fn channel_closed() -> Self {
        Self {
            message: "Channel closed".to_string(),
        }
    }
}

/// A vector-based event sink that collects events
///
/// Useful for testing to verify events were emitted correctly.
#[derive(Default)]
pub struct VecEventSink {
    events: Mutex<Vec<ProcessEvent>>,
}

impl VecEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get all collected events
    pub fn events(&self) -> Vec<ProcessEvent> {
        self.events.lock().clone()
    }

    /// Names of all collected events, in order
    pub fn names(&self) -> Vec<&'static str> {
        self.events.lock().iter().map(ProcessEvent::name).collect()
    }

    /// Clear all collected events
    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl EventSink for VecEventSink {
    fn send(&self, event: &ProcessEvent) -> Result<(), EventError> {
        self.events.lock().push(event.clone());
        Ok(())
    }
}

/// Handle returned by listener registration, used with [`EventBus::off`]
pub type ListenerId = u64;

type Handler = Arc<dyn Fn(&ProcessEvent) + Send + Sync>;

struct Listener {
    id: ListenerId,
    filter: Option<String>,
    once: bool,
    handler: Handler,
}

impl Listener {
    fn wants(&self, event: &ProcessEvent) -> bool {
        self.filter.as_deref().map_or(true, |f| event.matches(f))
    }
}

struct BusInner {
    next_id: AtomicU64,
    listeners: RwLock<Vec<Listener>>,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<Arc<ProcessEvent>>>>,
    // Serializes dispatch so every consumer observes one total order.
    // Reentrant so that handlers may emit.
    dispatch: ReentrantMutex<()>,
}

/// Publish/subscribe channel shared by a root processor and its subprocessors
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(BusInner {
                next_id: AtomicU64::new(1),
                listeners: RwLock::new(Vec::new()),
                subscribers: Mutex::new(Vec::new()),
                dispatch: ReentrantMutex::new(()),
            }),
        }
    }

    /// Deliver an event to every listener and stream
    pub fn emit(&self, event: ProcessEvent) {
        let event = Arc::new(event);
        let _dispatch = self.inner.dispatch.lock();

        let handlers: Vec<Handler> = {
            let mut listeners = self.inner.listeners.write();
            let handlers = listeners
                .iter()
                .filter(|l| l.wants(&*event))
                .map(|l| l.handler.clone())
                .collect();
            listeners.retain(|l| !(l.once && l.wants(&*event)));
            handlers
        };
        for handler in handlers {
            handler(&*event);
        }

        self.inner
            .subscribers
            .lock()
            .retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn add_listener(&self, filter: Option<String>, once: bool, handler: Handler) -> ListenerId {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner.listeners.write().push(Listener {
            id,
            filter,
            once,
            handler,
        });
        id
    }

    /// Call `handler` for every event matching `name`
    pub fn on<F>(&self, name: impl Into<String>, handler: F) -> ListenerId
    where
        F: Fn(&ProcessEvent) + Send + Sync + 'static,
    {
        self.add_listener(Some(name.into()), false, Arc::new(handler))
    }

    /// Call `handler` for every event
    pub fn on_any<F>(&self, handler: F) -> ListenerId
    where
        F: Fn(&ProcessEvent) + Send + Sync + 'static,
    {
        self.add_listener(None, false, Arc::new(handler))
    }

    /// Forward every event to a sink
    pub fn add_sink(&self, sink: Arc<dyn EventSink>) -> ListenerId {
        self.on_any(move |event| {
            if let Err(e) = sink.send(event) {
                log::warn!("Event sink rejected {}: {}", event.name(), e);
            }
        })
    }

    /// Resolve with the next event matching `name`
    ///
    /// The listener is removed when the returned future is dropped.
    pub fn once(&self, name: impl Into<String>) -> EventWaiter {
        let (tx, rx) = oneshot::channel();
        let tx = Mutex::new(Some(tx));
        let id = self.add_listener(
            Some(name.into()),
            true,
            Arc::new(move |event: &ProcessEvent| {
                if let Some(tx) = tx.lock().take() {
                    let _ = tx.send(event.clone());
                }
            }),
        );
        EventWaiter {
            bus: self.clone(),
            id,
            rx,
        }
    }

    /// Remove a listener; returns whether it was registered
    pub fn off(&self, id: ListenerId) -> bool {
        let mut listeners = self.inner.listeners.write();
        let before = listeners.len();
        listeners.retain(|l| l.id != id);
        listeners.len() != before
    }

    /// An independent cursor over every event emitted from now on
    pub fn subscribe(&self) -> EventStream {
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.subscribers.lock().push(tx);
        EventStream {
            rx,
            stop_after_terminal: false,
            finished: false,
        }
    }

    pub fn listener_count(&self) -> usize {
        self.inner.listeners.read().len()
    }
}

/// Future returned by [`EventBus::once`]
pub struct EventWaiter {
    bus: EventBus,
    id: ListenerId,
    rx: oneshot::Receiver<ProcessEvent>,
}

impl Future for EventWaiter {
    type Output = Option<ProcessEvent>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx).poll(cx).map(|r| r.ok())
    }
}

impl Drop for EventWaiter {
    fn drop(&mut self) {
        self.bus.off(self.id);
    }
}

/// Stream of bus events with its own queue
pub struct EventStream {
    rx: mpsc::UnboundedReceiver<Arc<ProcessEvent>>,
    stop_after_terminal: bool,
    finished: bool,
}

impl EventStream {
    /// End the stream after the first `done`, `abort` or `error` event
    pub fn until_finished(mut self) -> Self {
        self.stop_after_terminal = true;
        self
    }
}

impl Stream for EventStream {
    type Item = ProcessEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.finished {
            return Poll::Ready(None);
        }
        match self.rx.poll_recv(cx) {
            Poll::Ready(Some(event)) => {
                if self.stop_after_terminal && event.is_terminal() {
                    self.finished = true;
                }
                Poll::Ready(Some(Arc::unwrap_or_clone(event)))
            }
            Poll::Ready(None) => {
                self.finished = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use std::sync::atomic::AtomicUsize;

    fn global_set(id: &str) -> ProcessEvent {
        ProcessEvent::GlobalSet {
            id: id.to_string(),
            value: DataValue::Number(1.0),
            process_id: "p".to_string(),
        }
    }

    #[test]
    fn test_scoped_names() {
        let event = global_set("g");
        assert!(event.matches("globalSet"));
        assert!(event.matches("globalSet:g"));
        assert!(!event.matches("globalSet:h"));

        let event = ProcessEvent::UserEvent {
            name: "ping".into(),
            value: None,
        };
        assert!(event.matches("userEvent:ping"));
        assert!(!event.matches("userEvent:pong"));
    }

    #[test]
    fn test_serialized_shape() {
        let json = serde_json::to_value(ProcessEvent::Abort {
            successful: false,
            error: Some("x".into()),
        })
        .unwrap();
        assert_eq!(
            json,
            serde_json::json!({"type": "abort", "data": {"successful": false, "error": "x"}})
        );
        let json = serde_json::to_value(ProcessEvent::Pause).unwrap();
        assert_eq!(json, serde_json::json!({"type": "pause"}));
    }

    #[test]
    fn test_on_and_off() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let counter = count.clone();
        let id = bus.on("globalSet:g", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        bus.emit(global_set("g"));
        bus.emit(global_set("h"));
        assert_eq!(count.load(Ordering::SeqCst), 1);

        assert!(bus.off(id));
        bus.emit(global_set("g"));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_sink_receives_everything() {
        let bus = EventBus::new();
        let sink = Arc::new(VecEventSink::new());
        bus.add_sink(sink.clone());
        bus.emit(ProcessEvent::Pause);
        bus.emit(ProcessEvent::Resume);
        assert_eq!(sink.names(), vec!["pause", "resume"]);
    }

    #[test]
    fn test_handlers_may_emit() {
        let bus = EventBus::new();
        let sink = Arc::new(VecEventSink::new());
        bus.add_sink(sink.clone());
        let inner = bus.clone();
        bus.on("pause", move |_| inner.emit(ProcessEvent::Resume));

        bus.emit(ProcessEvent::Pause);
        assert_eq!(sink.names(), vec!["pause", "resume"]);
    }

    #[tokio::test]
    async fn test_once_resolves_and_unregisters() {
        let bus = EventBus::new();
        let waiter = bus.once("userEvent:go");
        assert_eq!(bus.listener_count(), 1);

        bus.emit(ProcessEvent::UserEvent {
            name: "go".into(),
            value: Some(DataValue::string("now")),
        });
        let event = waiter.await;
        assert!(matches!(event, Some(ProcessEvent::UserEvent { .. })));
        assert_eq!(bus.listener_count(), 0);

        let dropped = bus.once("pause");
        drop(dropped);
        assert_eq!(bus.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_independent_streams() {
        let bus = EventBus::new();
        let mut fast = bus.subscribe().until_finished();
        let slow = bus.subscribe();

        bus.emit(ProcessEvent::Pause);
        bus.emit(ProcessEvent::Done {
            results: PortValues::new(),
        });
        bus.emit(ProcessEvent::Resume);

        assert_eq!(fast.next().await, Some(ProcessEvent::Pause));
        assert!(matches!(fast.next().await, Some(ProcessEvent::Done { .. })));
        assert_eq!(fast.next().await, None);

        // The slow stream still has all three queued
        let names: Vec<_> = slow.take(3).map(|e| e.name()).collect().await;
        assert_eq!(names, vec!["pause", "done", "resume"]);
    }
}
