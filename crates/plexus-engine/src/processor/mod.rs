//! Graph processor
//!
//! A [`GraphProcessor`] executes one graph of a project. The root processor
//! owns the run-scoped state of each `process_graph` call; subprocessors
//! created from it (for graph calls, loops and scheduled runs) share that
//! state, the event bus and a child of the cancellation signal.
//!
//! # Example
//!
//! ```ignore
//! let processor = GraphProcessor::builder(project, Arc::new(NodeRegistry::with_builtins()))
//!     .graph("main")
//!     .build()?;
//!
//! let mut events = processor.events();
//! let outputs = processor
//!     .process_graph(ProcessContext::new(), inputs, PortValues::new())
//!     .await?;
//! ```

mod plan;
mod scheduler;
mod split;

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::config::ProcessorOptions;
use crate::constants::ECHO_FUNCTION;
use crate::context::GraphIo;
use crate::error::{EngineError, Result};
use crate::events::{EventBus, EventSink, EventStream, EventWaiter, ListenerId, PortValues, ProcessEvent};
use crate::extensions::ProcessContext;
use crate::recording::Recording;
use crate::registry::NodeRegistry;
use crate::state::{ExternalFunction, RunState, SharedState};
use crate::types::{GraphId, NodeGraph, NodeId, Project, ProjectId};
use crate::value::{DataValue, ScalarType};

use plan::ExecutionPlan;

/// Lifecycle state of a processor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum RunStatus {
    Idle,
    Running,
    /// Running, with new node starts blocked
    Paused,
    Done,
    Aborted { successful: bool },
    Errored,
}

/// Options for [`GraphProcessor::create_sub_processor`]
#[derive(Debug, Clone, Default)]
pub struct SubProcessorOptions {
    /// Project holding the graph; `None` for the current project
    pub project_id: Option<ProjectId>,
    /// Signal the subprocessor's own signal derives from; defaults to the
    /// parent processor's signal
    pub signal: Option<CancellationToken>,
}

#[derive(Debug, Clone)]
struct AbortInfo {
    successful: bool,
    error: Option<String>,
}

/// How one graph execution ended
enum GraphOutcome {
    Done(PortValues),
    Aborted {
        successful: bool,
        error: Option<String>,
        outputs: PortValues,
    },
    Cancelled,
    Failed(String),
}

struct ProcessorInner {
    id: String,
    project: Arc<Project>,
    referenced_projects: Arc<HashMap<ProjectId, Arc<Project>>>,
    graph: NodeGraph,
    registry: Arc<NodeRegistry>,
    options: ProcessorOptions,
    plan: ExecutionPlan,
    shared: Arc<SharedState>,
    is_root: bool,
    parent_signal: Option<CancellationToken>,
    run: RwLock<Option<Arc<RunState>>>,
    cancel: Mutex<CancellationToken>,
    abort: Mutex<Option<AbortInfo>>,
    status: Mutex<RunStatus>,
    produced: Mutex<HashSet<NodeId>>,
}

/// Executes one graph; cheap to clone
#[derive(Clone)]
pub struct GraphProcessor {
    inner: Arc<ProcessorInner>,
}

/// Builder for root processors
pub struct ProcessorBuilder {
    project: Arc<Project>,
    registry: Arc<NodeRegistry>,
    graph_id: Option<GraphId>,
    referenced_projects: HashMap<ProjectId, Arc<Project>>,
    options: ProcessorOptions,
}

impl ProcessorBuilder {
    /// Graph to execute; defaults to the project's main graph
    pub fn graph(mut self, graph_id: impl Into<GraphId>) -> Self {
        self.graph_id = Some(graph_id.into());
        self
    }

    /// Make another project's graphs callable from this one
    pub fn referenced_project(mut self, project: Arc<Project>) -> Self {
        self.referenced_projects
            .insert(project.id().to_string(), project);
        self
    }

    pub fn options(mut self, options: ProcessorOptions) -> Self {
        self.options = options;
        self
    }

    pub fn build(self) -> Result<GraphProcessor> {
        let graph = match &self.graph_id {
            Some(id) => self.project.graph(id),
            None => self.project.main_graph(),
        }
        .cloned()
        .ok_or_else(|| {
            EngineError::GraphNotFound(self.graph_id.clone().unwrap_or_else(|| "<main>".to_string()))
        })?;

        let shared = Arc::new(SharedState::new());
        if self.options.register_echo {
            shared
                .external_functions
                .write()
                .insert(ECHO_FUNCTION.to_string(), echo_function());
        }

        GraphProcessor::assemble(
            self.project,
            Arc::new(self.referenced_projects),
            graph,
            self.registry,
            self.options,
            shared,
            None,
            None,
        )
    }
}

/// Returns its single argument, or all arguments as an `any[]`
fn echo_function() -> ExternalFunction {
    Arc::new(|mut args: Vec<DataValue>| {
        Box::pin(async move {
            if args.len() == 1 {
                Ok(args.remove(0))
            } else {
                Ok(DataValue::array(ScalarType::Any, args))
            }
        })
    })
}

impl GraphProcessor {
    pub fn builder(project: Arc<Project>, registry: Arc<NodeRegistry>) -> ProcessorBuilder {
        ProcessorBuilder {
            project,
            registry,
            graph_id: None,
            referenced_projects: HashMap::new(),
            options: ProcessorOptions::default(),
        }
    }

    /// Root processor for the project's main graph with default options
    pub fn new(project: Arc<Project>, registry: Arc<NodeRegistry>) -> Result<Self> {
        Self::builder(project, registry).build()
    }

    #[allow(clippy::too_many_arguments)]
    fn assemble(
        project: Arc<Project>,
        referenced_projects: Arc<HashMap<ProjectId, Arc<Project>>>,
        graph: NodeGraph,
        registry: Arc<NodeRegistry>,
        options: ProcessorOptions,
        shared: Arc<SharedState>,
        parent_signal: Option<CancellationToken>,
        run: Option<Arc<RunState>>,
    ) -> Result<Self> {
        let plan = ExecutionPlan::build(&graph, &project, &referenced_projects, &registry)?;
        log::debug!(
            "Planned graph '{}' with {} nodes",
            graph.metadata.name,
            plan.len()
        );
        Ok(Self {
            inner: Arc::new(ProcessorInner {
                id: uuid::Uuid::new_v4().to_string(),
                project,
                referenced_projects,
                graph,
                registry,
                options,
                plan,
                shared,
                is_root: parent_signal.is_none(),
                parent_signal,
                run: RwLock::new(run),
                cancel: Mutex::new(CancellationToken::new()),
                abort: Mutex::new(None),
                status: Mutex::new(RunStatus::Idle),
                produced: Mutex::new(HashSet::new()),
            }),
        })
    }

    /// Unique id of this processor instance
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    pub fn graph(&self) -> &NodeGraph {
        &self.inner.graph
    }

    pub fn graph_id(&self) -> &str {
        self.inner.graph.id()
    }

    pub fn project(&self) -> &Project {
        &self.inner.project
    }

    pub fn is_root(&self) -> bool {
        self.inner.is_root
    }

    pub fn options(&self) -> &ProcessorOptions {
        &self.inner.options
    }

    pub fn bus(&self) -> &EventBus {
        &self.inner.shared.bus
    }

    pub(crate) fn shared(&self) -> &SharedState {
        &self.inner.shared
    }

    pub(crate) fn plan(&self) -> &ExecutionPlan {
        &self.inner.plan
    }

    /// The cancellation signal of the current (or last) run
    pub fn signal(&self) -> CancellationToken {
        self.inner.cancel.lock().clone()
    }

    pub fn status(&self) -> RunStatus {
        let status = *self.inner.status.lock();
        if status == RunStatus::Running && self.inner.shared.pause.is_paused() {
            RunStatus::Paused
        } else {
            status
        }
    }

    /// Run the graph to completion
    ///
    /// Creates the run-scoped state (globals, pending user inputs, context
    /// values) and discards it when the call returns. A successful abort
    /// resolves with the outputs set so far.
    pub async fn process_graph(
        &self,
        context: ProcessContext,
        inputs: PortValues,
        context_values: PortValues,
    ) -> Result<PortValues> {
        if !self.inner.is_root {
            return Err(EngineError::failed(
                "process_graph called on a subprocessor; use process_subgraph",
            ));
        }
        self.begin()?;
        if self.inner.shared.pause.set(false) {
            log::debug!("Clearing pause left over from the previous run");
        }

        let run = Arc::new(RunState::new(context, context_values.clone()));
        *self.inner.run.write() = Some(run.clone());
        log::info!("Run {} started for graph '{}'", run.run_id, self.graph_id());

        self.bus().emit(ProcessEvent::Start {
            run_id: run.run_id.clone(),
            project_id: self.inner.project.id().to_string(),
            graph_id: self.graph_id().to_string(),
            inputs: inputs.clone(),
            context_values,
        });

        let outcome = self.execute(run.clone(), inputs).await;
        run.user_inputs.reject_all();
        *self.inner.run.write() = None;

        let terminal = match &outcome {
            GraphOutcome::Done(outputs) => ProcessEvent::Done {
                results: outputs.clone(),
            },
            GraphOutcome::Aborted {
                successful, error, ..
            } => ProcessEvent::Abort {
                successful: *successful,
                error: error.clone(),
            },
            GraphOutcome::Cancelled => ProcessEvent::Abort {
                successful: false,
                error: Some(EngineError::Cancelled.to_string()),
            },
            GraphOutcome::Failed(error) => ProcessEvent::Error {
                error: error.clone(),
            },
        };
        log::info!("Run {} finished: {}", run.run_id, terminal.name());
        self.bus().emit(terminal);

        self.outcome_result(outcome)
    }

    /// Run a subprocessor's graph within its parent's run
    pub async fn process_subgraph(&self, inputs: PortValues) -> Result<PortValues> {
        let run = self
            .inner
            .run
            .read()
            .clone()
            .ok_or_else(|| EngineError::failed("subprocessor has no active parent run"))?;
        self.begin()?;
        let outcome = self.execute(run, inputs).await;
        self.outcome_result(outcome)
    }

    fn begin(&self) -> Result<()> {
        let mut status = self.inner.status.lock();
        if *status == RunStatus::Running {
            return Err(EngineError::AlreadyRunning);
        }
        *status = RunStatus::Running;
        *self.inner.abort.lock() = None;
        *self.inner.cancel.lock() = match &self.inner.parent_signal {
            Some(parent) => parent.child_token(),
            None => CancellationToken::new(),
        };
        Ok(())
    }

    fn outcome_result(&self, outcome: GraphOutcome) -> Result<PortValues> {
        match outcome {
            GraphOutcome::Done(outputs) => Ok(outputs),
            GraphOutcome::Aborted {
                successful: true,
                outputs,
                ..
            } => Ok(outputs),
            GraphOutcome::Aborted { error, .. } => Err(EngineError::Aborted(error)),
            GraphOutcome::Cancelled => Err(EngineError::Cancelled),
            GraphOutcome::Failed(message) => Err(EngineError::GraphFailed {
                graph_id: self.graph_id().to_string(),
                message,
            }),
        }
    }

    async fn execute(&self, run: Arc<RunState>, inputs: PortValues) -> GraphOutcome {
        let graph_id = self.graph_id().to_string();

        let cleared: Vec<NodeId> = self.inner.produced.lock().drain().collect();
        for node_id in cleared {
            self.bus().emit(ProcessEvent::NodeOutputsCleared { node_id });
        }

        self.bus().emit(ProcessEvent::GraphStart {
            graph_id: graph_id.clone(),
            graph_name: self.inner.graph.metadata.name.clone(),
            inputs: inputs.clone(),
        });

        let io = Arc::new(GraphIo::new(inputs));
        let result = scheduler::run_graph(self, run, io.clone()).await;
        self.inner.produced.lock().extend(result.produced);
        let outputs = io.outputs.lock().clone();

        let abort = self.inner.abort.lock().clone();
        let (outcome, status) = if let Some(info) = abort {
            self.bus().emit(ProcessEvent::GraphAbort {
                graph_id,
                successful: info.successful,
                error: info.error.clone(),
            });
            (
                GraphOutcome::Aborted {
                    successful: info.successful,
                    error: info.error,
                    outputs,
                },
                RunStatus::Aborted {
                    successful: info.successful,
                },
            )
        } else if self.signal().is_cancelled() {
            self.bus().emit(ProcessEvent::GraphAbort {
                graph_id,
                successful: false,
                error: Some(EngineError::Cancelled.to_string()),
            });
            (
                GraphOutcome::Cancelled,
                RunStatus::Aborted { successful: false },
            )
        } else if let Some(error) = result.failure {
            let error = error.to_string();
            self.bus().emit(ProcessEvent::GraphError {
                graph_id,
                error: error.clone(),
            });
            (GraphOutcome::Failed(error), RunStatus::Errored)
        } else {
            self.bus().emit(ProcessEvent::GraphFinish {
                graph_id,
                outputs: outputs.clone(),
            });
            (GraphOutcome::Done(outputs), RunStatus::Done)
        };
        *self.inner.status.lock() = status;
        outcome
    }

    /// Abort the running graph
    ///
    /// With no error the abort is successful and `process_graph` resolves
    /// with the outputs set so far. The first abort of a run wins.
    pub fn abort(&self, error: Option<String>) {
        if *self.inner.status.lock() != RunStatus::Running {
            log::debug!("Ignoring abort of graph '{}': not running", self.graph_id());
            return;
        }
        {
            let mut abort = self.inner.abort.lock();
            if abort.is_some() {
                return;
            }
            *abort = Some(AbortInfo {
                successful: error.is_none(),
                error: error.clone(),
            });
        }
        log::info!(
            "Aborting graph '{}'{}",
            self.graph_id(),
            error.map(|e| format!(": {}", e)).unwrap_or_default()
        );
        self.signal().cancel();
        if self.inner.is_root {
            if let Some(run) = self.inner.run.read().as_ref() {
                run.user_inputs.reject_all();
            }
        }
    }

    /// Block new node starts of the current run; running nodes continue
    ///
    /// The next root run starts unpaused.
    pub fn pause(&self) {
        if self.inner.shared.pause.set(true) {
            log::debug!("Processing paused");
            self.bus().emit(ProcessEvent::Pause);
        }
    }

    pub fn resume(&self) {
        if self.inner.shared.pause.set(false) {
            log::debug!("Processing resumed");
            self.bus().emit(ProcessEvent::Resume);
        }
    }

    /// Register a host function nodes can call by name
    pub fn set_external_function<F, Fut>(&self, name: impl Into<String>, function: F)
    where
        F: Fn(Vec<DataValue>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<DataValue>> + Send + 'static,
    {
        let function: ExternalFunction = Arc::new(move |args| Box::pin(function(args)));
        self.inner
            .shared
            .external_functions
            .write()
            .insert(name.into(), function);
    }

    /// Raise a user event on the bus
    pub fn raise_event(&self, name: impl Into<String>, value: Option<DataValue>) {
        self.bus().emit(ProcessEvent::UserEvent {
            name: name.into(),
            value,
        });
    }

    /// Call `handler` with the value of every `name` user event
    pub fn on_user_event<F>(&self, name: &str, handler: F) -> ListenerId
    where
        F: Fn(Option<DataValue>) + Send + Sync + 'static,
    {
        self.bus().on(format!("userEvent:{}", name), move |event| {
            if let ProcessEvent::UserEvent { value, .. } = event {
                handler(value.clone());
            }
        })
    }

    pub fn on<F>(&self, name: impl Into<String>, handler: F) -> ListenerId
    where
        F: Fn(&ProcessEvent) + Send + Sync + 'static,
    {
        self.bus().on(name, handler)
    }

    pub fn on_any<F>(&self, handler: F) -> ListenerId
    where
        F: Fn(&ProcessEvent) + Send + Sync + 'static,
    {
        self.bus().on_any(handler)
    }

    pub fn once(&self, name: impl Into<String>) -> EventWaiter {
        self.bus().once(name)
    }

    pub fn off(&self, id: ListenerId) -> bool {
        self.bus().off(id)
    }

    pub fn add_sink(&self, sink: Arc<dyn EventSink>) -> ListenerId {
        self.bus().add_sink(sink)
    }

    /// Stream of all events from now until the end of the next root run
    pub fn events(&self) -> EventStream {
        self.bus().subscribe().until_finished()
    }

    /// Answer a pending user-input request of `node_id`
    ///
    /// Returns false when the node has no open request.
    pub fn user_input(&self, node_id: &str, answers: Vec<String>) -> bool {
        match self.inner.run.read().as_ref() {
            Some(run) => run.user_inputs.resolve(node_id, answers),
            None => false,
        }
    }

    /// Processor for another graph that shares this processor's run
    pub fn create_sub_processor(&self, graph_id: &str, options: SubProcessorOptions) -> Result<GraphProcessor> {
        let project = match options.project_id.as_deref() {
            None => self.inner.project.clone(),
            Some(id) if id == self.inner.project.id() => self.inner.project.clone(),
            Some(id) => self
                .inner
                .referenced_projects
                .get(id)
                .cloned()
                .ok_or_else(|| EngineError::ProjectNotFound(id.to_string()))?,
        };
        let graph = project
            .graph(graph_id)
            .cloned()
            .ok_or_else(|| EngineError::GraphNotFound(graph_id.to_string()))?;

        let mut referenced = (*self.inner.referenced_projects).clone();
        referenced
            .entry(self.inner.project.id().to_string())
            .or_insert_with(|| self.inner.project.clone());
        referenced.remove(project.id());

        let signal = options.signal.unwrap_or_else(|| self.signal());
        log::debug!("Creating subprocessor for graph '{}'", graph_id);
        GraphProcessor::assemble(
            project,
            Arc::new(referenced),
            graph,
            self.inner.registry.clone(),
            self.inner.options.clone(),
            self.inner.shared.clone(),
            Some(signal),
            self.inner.run.read().clone(),
        )
    }

    /// Re-emit a recorded run on this processor's bus
    pub fn replay_recording(&self, recording: &Recording) {
        log::debug!(
            "Replaying recording {} ({} events)",
            recording.recording_id,
            recording.events.len()
        );
        for recorded in &recording.events {
            self.bus().emit(recorded.event.clone());
        }
    }
}

#[cfg(test)]
mod tests;
