//! Run-scoped mutable state
//!
//! A [`RunState`] is created when the root processor starts a run and is
//! shared by reference with every subprocessor spawned during that run.
//! Processor-lifetime state that outlives runs (event bus, external
//! functions, pause gate) lives in [`SharedState`].

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{oneshot, watch};
use tokio_util::sync::CancellationToken;

use crate::error::{EngineError, Result};
use crate::events::{EventBus, PortValues, ProcessEvent};
use crate::extensions::ProcessContext;
use crate::types::NodeId;
use crate::value::DataValue;

/// Boxed future returned by external functions
pub type ExternalFunctionFuture = Pin<Box<dyn Future<Output = Result<DataValue>> + Send>>;

/// Host callback nodes may invoke by name
pub type ExternalFunction = Arc<dyn Fn(Vec<DataValue>) -> ExternalFunctionFuture + Send + Sync>;

/// The global variable map of one run
///
/// Writes bump a version counter after the map is updated, so a waiter that
/// observes the bump always sees the complete write.
pub struct Globals {
    values: RwLock<HashMap<String, DataValue>>,
    version: watch::Sender<u64>,
}

impl Default for Globals {
    fn default() -> Self {
        Self::new()
    }
}

impl Globals {
    pub fn new() -> Self {
        let (version, _) = watch::channel(0);
        Self {
            values: RwLock::new(HashMap::new()),
            version,
        }
    }

    pub fn get(&self, id: &str) -> Option<DataValue> {
        self.values.read().get(id).cloned()
    }

    /// Store a value, returning the previous one
    pub fn set(&self, id: &str, value: DataValue) -> Option<DataValue> {
        let previous = self.values.write().insert(id.to_string(), value);
        self.version.send_modify(|v| *v = v.wrapping_add(1));
        previous
    }

    pub fn snapshot(&self) -> HashMap<String, DataValue> {
        self.values.read().clone()
    }

    /// Wait until `id` is set, or fail when `cancel` fires
    ///
    /// Wake-up order among concurrent waiters is unspecified.
    pub async fn wait_for(&self, id: &str, cancel: &CancellationToken) -> Result<DataValue> {
        let mut changes = self.version.subscribe();
        loop {
            if let Some(value) = self.get(id) {
                return Ok(value);
            }
            tokio::select! {
                _ = cancel.cancelled() => return Err(EngineError::Cancelled),
                changed = changes.changed() => {
                    if changed.is_err() {
                        return Err(EngineError::Cancelled);
                    }
                }
            }
        }
    }
}

/// Requests for user input that are waiting on an external answer
#[derive(Default)]
pub struct PendingUserInputs {
    pending: Mutex<HashMap<NodeId, VecDeque<oneshot::Sender<Vec<String>>>>>,
}

impl PendingUserInputs {
    /// Register a request for `node_id` and return the receiving half
    pub fn register(&self, node_id: &str) -> oneshot::Receiver<Vec<String>> {
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .entry(node_id.to_string())
            .or_default()
            .push_back(tx);
        rx
    }

    /// Answer the oldest open request of `node_id`; returns whether one was open
    pub fn resolve(&self, node_id: &str, answers: Vec<String>) -> bool {
        let mut pending = self.pending.lock();
        let Some(queue) = pending.get_mut(node_id) else {
            return false;
        };
        let mut answers = answers;
        while let Some(tx) = queue.pop_front() {
            // A closed receiver belongs to a request that was already cancelled
            match tx.send(answers) {
                Ok(()) => {
                    if queue.is_empty() {
                        pending.remove(node_id);
                    }
                    return true;
                }
                Err(returned) => answers = returned,
            }
        }
        pending.remove(node_id);
        false
    }

    /// Drop every open request; their receivers observe closure
    pub fn reject_all(&self) {
        self.pending.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.pending.lock().values().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Blocks new node starts while set
pub struct PauseGate {
    paused: watch::Sender<bool>,
}

impl Default for PauseGate {
    fn default() -> Self {
        let (paused, _) = watch::channel(false);
        Self { paused }
    }
}

impl PauseGate {
    pub fn is_paused(&self) -> bool {
        *self.paused.borrow()
    }

    /// Set the flag; returns whether it changed
    pub fn set(&self, paused: bool) -> bool {
        self.paused.send_if_modified(|current| {
            if *current == paused {
                false
            } else {
                *current = paused;
                true
            }
        })
    }

    /// Resolve once the gate is open
    pub async fn wait_until_resumed(&self) {
        let mut rx = self.paused.subscribe();
        // The sender lives as long as self, so wait_for cannot fail here
        let _ = rx.wait_for(|paused| !*paused).await;
    }
}

/// State owned by a root processor for its whole lifetime and shared with
/// its subprocessors
pub struct SharedState {
    pub bus: EventBus,
    pub external_functions: RwLock<HashMap<String, ExternalFunction>>,
    pub pause: PauseGate,
}

impl SharedState {
    pub fn new() -> Self {
        Self {
            bus: EventBus::new(),
            external_functions: RwLock::new(HashMap::new()),
            pause: PauseGate::default(),
        }
    }

    pub fn external_function(&self, name: &str) -> Option<ExternalFunction> {
        self.external_functions.read().get(name).cloned()
    }
}

impl Default for SharedState {
    fn default() -> Self {
        Self::new()
    }
}

/// State that lives for exactly one root `process_graph` call
pub struct RunState {
    pub run_id: String,
    pub globals: Arc<Globals>,
    pub user_inputs: PendingUserInputs,
    pub context_values: PortValues,
    pub context: Arc<ProcessContext>,
}

impl RunState {
    pub fn new(context: ProcessContext, context_values: PortValues) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            globals: Arc::new(Globals::new()),
            user_inputs: PendingUserInputs::default(),
            context_values,
            context: Arc::new(context),
        }
    }

    /// Write a global and announce it on the bus
    pub fn set_global(&self, bus: &EventBus, id: &str, value: DataValue, process_id: &str) -> Option<DataValue> {
        let previous = self.globals.set(id, value.clone());
        bus.emit(ProcessEvent::GlobalSet {
            id: id.to_string(),
            value,
            process_id: process_id.to_string(),
        });
        previous
    }
}
