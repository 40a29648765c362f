//! Error types for the dataflow engine

use thiserror::Error;

/// Result type alias using EngineError
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors that can occur while building or running a graph
#[derive(Debug, Error)]
pub enum EngineError {
    /// The requested graph does not exist in the project
    #[error("Graph not found: {0}")]
    GraphNotFound(String),

    /// The requested project is neither the main project nor a referenced one
    #[error("Referenced project not found: {0}")]
    ProjectNotFound(String),

    /// A node id is not part of the graph
    #[error("Node not found: {0}")]
    NodeNotFound(String),

    /// No implementation is registered for a node's type tag
    #[error("Unknown node type '{node_type}' for node '{node_id}'")]
    UnknownNodeType { node_id: String, node_type: String },

    /// Missing required input
    #[error("Missing required input: {0}")]
    MissingInput(String),

    /// A value reached a port that neither accepts its type nor permits coercion
    #[error("Invalid input type for '{port}': expected {expected}, got {actual}")]
    InvalidInputType {
        port: String,
        expected: String,
        actual: String,
    },

    /// Coercion between two value types is not possible
    #[error("Cannot coerce {from} to {to}")]
    Coercion { from: String, to: String },

    /// Attempted to coerce a control-flow-excluded value
    #[error("Cannot coerce a control-flow-excluded value")]
    ExcludedCoercion,

    /// Node-level configuration (`data`) could not be read
    #[error("Invalid configuration for node '{node_id}': {message}")]
    InvalidNodeData { node_id: String, message: String },

    /// Task execution failed
    #[error("Task execution failed: {0}")]
    ExecutionFailed(String),

    /// A node's `process` call failed
    #[error("Node '{title}' ({node_id}) failed: {message}")]
    NodeFailed {
        node_id: String,
        title: String,
        message: String,
    },

    /// One or more elements of a split run failed
    #[error("Split run failed for {} element(s): {}", .failures.len(), format_split_failures(.failures))]
    SplitRunFailed { failures: Vec<(usize, String)> },

    /// The graph finished with errored nodes
    #[error("Graph '{graph_id}' failed: {message}")]
    GraphFailed { graph_id: String, message: String },

    /// The run was aborted with an error (unsuccessful abort)
    #[error("Graph aborted: {}", .0.as_deref().unwrap_or("aborted"))]
    Aborted(Option<String>),

    /// Workflow was cancelled
    #[error("Processing cancelled")]
    Cancelled,

    /// A processor is already running a graph
    #[error("Processor is already running")]
    AlreadyRunning,

    /// No external function registered under the given name
    #[error("External function not found: {0}")]
    ExternalFunctionNotFound(String),

    /// Recording file is malformed
    #[error("Recording error: {0}")]
    Recording(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Compression error
    #[error("Compression error: {0}")]
    Compression(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn format_split_failures(failures: &[(usize, String)]) -> String {
    failures
        .iter()
        .map(|(index, message)| format!("[{}] {}", index, message))
        .collect::<Vec<_>>()
        .join("; ")
}

impl EngineError {
    /// Create an execution failed error with a message
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::ExecutionFailed(msg.into())
    }

    /// Create an invalid node data error
    pub fn invalid_data(node_id: impl Into<String>, message: impl ToString) -> Self {
        Self::InvalidNodeData {
            node_id: node_id.into(),
            message: message.to_string(),
        }
    }

    /// Whether this error represents cancellation rather than a failure
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled | Self::Aborted(_))
    }
}
