//! Per-invocation context handed to `NodeImpl::process`
//!
//! A [`NodeContext`] is the only way a node reaches back into the engine:
//! globals, graph inputs and outputs, user events, user input, external
//! functions, subprocessors and the run's cancellation signal.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::{EngineError, Result};
use crate::events::{PortValues, ProcessEvent};
use crate::extensions::ProcessContext;
use crate::processor::{GraphProcessor, SubProcessorOptions};
use crate::state::{Globals, RunState};
use crate::types::{GraphNode, Project};
use crate::value::DataValue;

/// Inputs and outputs of one graph execution
pub(crate) struct GraphIo {
    pub inputs: PortValues,
    pub outputs: Mutex<PortValues>,
}

impl GraphIo {
    pub fn new(inputs: PortValues) -> Self {
        Self {
            inputs,
            outputs: Mutex::new(PortValues::new()),
        }
    }
}

/// Engine services available to a running node
#[derive(Clone)]
pub struct NodeContext {
    processor: GraphProcessor,
    run: Arc<RunState>,
    node: Arc<GraphNode>,
    process_id: String,
    index: Option<usize>,
    signal: CancellationToken,
    graph_io: Arc<GraphIo>,
}

impl NodeContext {
    pub(crate) fn new(
        processor: GraphProcessor,
        run: Arc<RunState>,
        node: Arc<GraphNode>,
        process_id: String,
        signal: CancellationToken,
        graph_io: Arc<GraphIo>,
    ) -> Self {
        Self {
            processor,
            run,
            node,
            process_id,
            index: None,
            signal,
            graph_io,
        }
    }

    /// Context for one element of a split run
    pub(crate) fn for_element(&self, index: usize) -> Self {
        Self {
            index: Some(index),
            ..self.clone()
        }
    }

    pub fn node(&self) -> &GraphNode {
        &self.node
    }

    /// Identifier of this node invocation, shared by all its events
    pub fn process_id(&self) -> &str {
        &self.process_id
    }

    /// Split-run element index, `None` outside split runs
    pub fn split_index(&self) -> Option<usize> {
        self.index
    }

    pub fn run_id(&self) -> &str {
        &self.run.run_id
    }

    pub fn signal(&self) -> &CancellationToken {
        &self.signal
    }

    pub fn is_cancelled(&self) -> bool {
        self.signal.is_cancelled()
    }

    pub fn processor(&self) -> &GraphProcessor {
        &self.processor
    }

    pub fn project(&self) -> &Project {
        self.processor.project()
    }

    pub fn process_context(&self) -> &ProcessContext {
        &self.run.context
    }

    /// Typed host extension, see [`crate::Extensions`]
    pub fn extension<T: Send + Sync + 'static>(&self, key: &str) -> Option<&T> {
        self.run.context.extensions.get(key)
    }

    pub fn setting(&self, key: &str) -> Option<&serde_json::Value> {
        self.run.context.setting(key)
    }

    pub fn context_value(&self, id: &str) -> Option<&DataValue> {
        self.run.context_values.get(id)
    }

    pub fn graph_input(&self, id: &str) -> Option<&DataValue> {
        self.graph_io.inputs.get(id)
    }

    pub fn graph_inputs(&self) -> &PortValues {
        &self.graph_io.inputs
    }

    pub fn graph_output(&self, id: &str) -> Option<DataValue> {
        self.graph_io.outputs.lock().get(id).cloned()
    }

    /// Set one output of the graph being executed
    pub fn set_graph_output(&self, id: impl Into<String>, value: DataValue) {
        self.graph_io.outputs.lock().insert(id.into(), value);
    }

    pub fn get_global(&self, id: &str) -> Option<DataValue> {
        self.run.globals.get(id)
    }

    /// The run's global map, for values that read globals later
    pub fn globals(&self) -> Arc<Globals> {
        self.run.globals.clone()
    }

    /// Write a global and emit `globalSet`; returns the previous value
    pub fn set_global(&self, id: &str, value: DataValue) -> Option<DataValue> {
        self.run
            .set_global(self.processor.bus(), id, value, &self.process_id)
    }

    /// Block until global `id` is set
    pub async fn wait_for_global(&self, id: &str) -> Result<DataValue> {
        self.run.globals.wait_for(id, &self.signal).await
    }

    pub fn raise_event(&self, name: impl Into<String>, value: Option<DataValue>) {
        self.processor.raise_event(name, value);
    }

    /// Block until the user event `name` is raised; returns its value
    pub async fn wait_for_event(&self, name: &str) -> Result<Option<DataValue>> {
        let waiter = self.processor.bus().once(format!("userEvent:{}", name));
        tokio::select! {
            _ = self.signal.cancelled() => Err(EngineError::Cancelled),
            event = waiter => match event {
                Some(ProcessEvent::UserEvent { value, .. }) => Ok(value),
                _ => Err(EngineError::Cancelled),
            },
        }
    }

    /// Emit a `trace` event
    pub fn trace(&self, message: impl Into<String>) {
        let message = message.into();
        log::trace!("[{}] {}", self.node.title, message);
        if self.processor.options().emit_trace {
            self.processor.bus().emit(ProcessEvent::Trace(message));
        }
    }

    /// Abort the graph this node belongs to
    ///
    /// Without an error the abort counts as successful.
    pub fn abort_graph(&self, error: Option<String>) {
        self.processor.abort(error);
    }

    /// Suspend until [`GraphProcessor::user_input`] answers for this node
    pub async fn request_user_input(&self, prompts: Vec<String>) -> Result<Vec<String>> {
        let answer = self.run.user_inputs.register(&self.node.id);
        self.processor.bus().emit(ProcessEvent::UserInput {
            node_id: self.node.id.clone(),
            node_title: self.node.title.clone(),
            process_id: self.process_id.clone(),
            prompts,
        });
        tokio::select! {
            _ = self.signal.cancelled() => Err(EngineError::Cancelled),
            answers = answer => answers.map_err(|_| EngineError::Cancelled),
        }
    }

    /// Processor for another graph, sharing this run and this node's signal
    pub fn create_sub_processor(&self, graph_id: &str, project_id: Option<&str>) -> Result<GraphProcessor> {
        self.processor.create_sub_processor(
            graph_id,
            SubProcessorOptions {
                project_id: project_id.map(str::to_string),
                signal: Some(self.signal.clone()),
            },
        )
    }

    /// Emit intermediate outputs (e.g. a partially streamed response)
    pub fn on_partial_outputs(&self, outputs: PortValues) {
        self.processor.bus().emit(ProcessEvent::PartialOutput {
            node_id: self.node.id.clone(),
            node_title: self.node.title.clone(),
            process_id: self.process_id.clone(),
            outputs,
            index: self.index.unwrap_or(0),
        });
    }

    /// Call a host-registered external function
    pub async fn call_external_function(&self, name: &str, args: Vec<DataValue>) -> Result<DataValue> {
        let function = self
            .processor
            .shared()
            .external_function(name)
            .ok_or_else(|| EngineError::ExternalFunctionNotFound(name.to_string()))?;
        self.cancellable(function(args)).await?
    }

    /// Sleep unless the run is cancelled first
    pub async fn sleep(&self, duration: Duration) -> Result<()> {
        self.cancellable(tokio::time::sleep(duration)).await
    }

    /// Race a future against the run's cancellation signal
    pub async fn cancellable<F: Future>(&self, future: F) -> Result<F::Output> {
        tokio::select! {
            _ = self.signal.cancelled() => Err(EngineError::Cancelled),
            output = future => Ok(output),
        }
    }
}
