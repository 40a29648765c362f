//! Plexus Engine - dataflow graph execution for LLM pipelines
//!
//! A project holds graphs of nodes wired port to port. A [`GraphProcessor`]
//! runs one graph: every node whose inputs have settled runs concurrently,
//! values flow along connections as tagged [`DataValue`]s, and branches that
//! did not run propagate a `control-flow-excluded` value instead of a result.
//!
//! - Split runs fan a node out over array inputs with bounded concurrency
//! - Subgraphs run on subprocessors sharing the run's globals, event bus and
//!   cancellation token
//! - Every step is published on an [`EventBus`] that any number of
//!   consumers read independently
//! - [`ExecutionRecorder`] captures a run for replay; [`streaming`] projects
//!   it into Server-Sent Events
//!
//! # Example
//!
//! ```ignore
//! use plexus_engine::{GraphProcessor, NodeRegistry, ProcessContext, PortValues};
//!
//! let registry = Arc::new(NodeRegistry::with_builtins());
//! let processor = GraphProcessor::builder(project, registry).graph("main").build()?;
//! let outputs = processor
//!     .process_graph(ProcessContext::new(), inputs, PortValues::new())
//!     .await?;
//! ```

pub mod coerce;
pub mod config;
pub mod constants;
pub mod context;
pub mod error;
pub mod events;
pub mod extensions;
pub mod node;
pub mod processor;
pub mod recording;
pub mod registry;
pub mod state;
pub mod streaming;
pub mod types;
pub mod value;

// Re-export key types
pub use coerce::{coerce, coerce_to_bool, coerce_to_number, coerce_to_object, coerce_to_string};
pub use config::{ProcessorOptions, RecorderOptions};
pub use context::NodeContext;
pub use error::{EngineError, Result};
pub use events::{
    EventBus, EventSink, EventStream, ExclusionReason, ListenerId, PortValues, ProcessEvent, VecEventSink,
};
pub use extensions::{Extensions, ProcessContext};
pub use node::{dynamic_port_count, DefinitionContext, NodeCategory, NodeImpl, NodeMetadata};
pub use processor::{GraphProcessor, ProcessorBuilder, RunStatus, SubProcessorOptions};
pub use recording::{ExecutionRecorder, RecordedEvent, Recording};
pub use registry::{CallbackNode, NodeRegistration, NodeRegistry};
pub use state::{ExternalFunction, Globals};
pub use streaming::{
    processor_events, single_node_stream, sse_stream, EventProjector, NodeFilter, StreamEvent, StreamFilter,
};
pub use types::{
    GraphId, GraphNode, NodeConnection, NodeGraph, NodeId, PortDefinition, PortId, Project, ProjectId,
};
pub use value::{Blob, ChatMessage, DataType, DataValue, LazyValue, ScalarType, LOOP_NOT_BROKEN};

// Re-export for the `inventory::submit!` calls of node crates
pub use inventory;
