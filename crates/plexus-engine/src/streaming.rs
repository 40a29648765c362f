//! Client-facing projection of processor events
//!
//! Reduces the full event vocabulary to the handful of events a remote
//! caller cares about (partial output deltas, scoped node start/finish, the
//! final result and errors) and frames them as Server-Sent Events. A run
//! aborted with an error ends the stream with `error`; a successful abort
//! ends it with `abort`.
//!
//! # Usage
//!
//! ```ignore
//! let filter: StreamFilter = serde_json::from_str(r#"{"partialOutputs": ["Writer"], "done": true}"#)?;
//! let frames = sse_stream(&processor, filter);
//! let run = processor.process_graph(context, inputs, PortValues::new());
//! ```
//!
//! Subscribe before starting the run; events emitted earlier are not replayed.

use std::collections::HashMap;
use std::future::ready;
use std::pin::Pin;

use futures_util::{Stream, StreamExt};
use serde::{Deserialize, Serialize};

use crate::coerce::coerce_to_string;
use crate::constants::defaults::PARTIAL_OUTPUT_PORT;
use crate::error::Result;
use crate::events::{PortValues, ProcessEvent};
use crate::processor::GraphProcessor;
use crate::types::NodeId;

/// Nodes an event kind is forwarded for: all of them, or those named by id or title
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum NodeFilter {
    All(bool),
    Nodes(Vec<String>),
}

impl NodeFilter {
    pub fn matches(&self, node_id: &str, node_title: &str) -> bool {
        match self {
            NodeFilter::All(all) => *all,
            NodeFilter::Nodes(nodes) => nodes.iter().any(|n| n == node_id || n == node_title),
        }
    }
}

impl Default for NodeFilter {
    fn default() -> Self {
        NodeFilter::All(false)
    }
}

/// Which events a stream forwards
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StreamFilter {
    pub partial_outputs: NodeFilter,
    pub node_start: NodeFilter,
    pub node_finish: NodeFilter,
    /// Forward the graph outputs when the run completes, and successful aborts
    pub done: bool,
    /// Forward the error when the run fails or is aborted with an error
    pub error: bool,
    /// Output port whose cumulative text is diffed into deltas
    pub partial_output_port: String,
}

impl Default for StreamFilter {
    fn default() -> Self {
        Self {
            partial_outputs: NodeFilter::default(),
            node_start: NodeFilter::default(),
            node_finish: NodeFilter::default(),
            done: false,
            error: false,
            partial_output_port: PARTIAL_OUTPUT_PORT.to_string(),
        }
    }
}

impl StreamFilter {
    /// Partial output deltas and the finish event of one node
    pub fn single_node(node_id_or_title: impl Into<String>) -> Self {
        let node = node_id_or_title.into();
        Self {
            partial_outputs: NodeFilter::Nodes(vec![node.clone()]),
            node_finish: NodeFilter::Nodes(vec![node]),
            ..Self::default()
        }
    }
}

/// An event of the client-facing stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum StreamEvent {
    /// Text added to a node's partial output since the previous event
    #[serde(rename_all = "camelCase")]
    PartialOutput {
        node_id: NodeId,
        node_title: String,
        delta: String,
    },

    #[serde(rename_all = "camelCase")]
    NodeStart {
        node_id: NodeId,
        node_title: String,
        inputs: PortValues,
    },

    #[serde(rename_all = "camelCase")]
    NodeFinish {
        node_id: NodeId,
        node_title: String,
        outputs: PortValues,
    },

    #[serde(rename_all = "camelCase")]
    Done { graph_output: PortValues },

    /// The run was aborted without an error
    Abort,

    Error { error: String },
}

impl StreamEvent {
    pub fn name(&self) -> &'static str {
        match self {
            StreamEvent::PartialOutput { .. } => "partialOutput",
            StreamEvent::NodeStart { .. } => "nodeStart",
            StreamEvent::NodeFinish { .. } => "nodeFinish",
            StreamEvent::Done { .. } => "done",
            StreamEvent::Abort => "abort",
            StreamEvent::Error { .. } => "error",
        }
    }

    /// Frame as a named Server-Sent Event
    pub fn to_sse(&self) -> Result<String> {
        Ok(format!("event: {}\ndata: {}\n\n", self.name(), serde_json::to_string(self)?))
    }
}

/// Stateful filter turning processor events into [`StreamEvent`]s
///
/// Tracks how much of each node's partial output was already forwarded,
/// keyed by node and split-run element, so consecutive deltas never overlap.
#[derive(Debug, Default)]
pub struct EventProjector {
    filter: StreamFilter,
    forwarded: HashMap<(NodeId, usize), usize>,
}

impl EventProjector {
    pub fn new(filter: StreamFilter) -> Self {
        Self {
            filter,
            forwarded: HashMap::new(),
        }
    }

    pub fn filter(&self) -> &StreamFilter {
        &self.filter
    }

    pub fn project(&mut self, event: &ProcessEvent) -> Option<StreamEvent> {
        match event {
            ProcessEvent::PartialOutput {
                node_id,
                node_title,
                outputs,
                index,
                ..
            } if self.filter.partial_outputs.matches(node_id, node_title) => {
                let current = match outputs.get(&self.filter.partial_output_port).map(coerce_to_string) {
                    Some(Ok(text)) => text,
                    Some(Err(e)) => {
                        log::trace!("Partial output of '{}' is not text: {}", node_title, e);
                        return None;
                    }
                    None => return None,
                };
                let length = current.chars().count();
                let previous = self
                    .forwarded
                    .insert((node_id.clone(), *index), length)
                    .unwrap_or(0);
                Some(StreamEvent::PartialOutput {
                    node_id: node_id.clone(),
                    node_title: node_title.clone(),
                    delta: current.chars().skip(previous).collect(),
                })
            }
            ProcessEvent::NodeStart {
                node_id,
                node_title,
                inputs,
                ..
            } if self.filter.node_start.matches(node_id, node_title) => Some(StreamEvent::NodeStart {
                node_id: node_id.clone(),
                node_title: node_title.clone(),
                inputs: inputs.clone(),
            }),
            ProcessEvent::NodeFinish {
                node_id,
                node_title,
                outputs,
                ..
            } if self.filter.node_finish.matches(node_id, node_title) => Some(StreamEvent::NodeFinish {
                node_id: node_id.clone(),
                node_title: node_title.clone(),
                outputs: outputs.clone(),
            }),
            ProcessEvent::Done { results } if self.filter.done => Some(StreamEvent::Done {
                graph_output: results.clone(),
            }),
            ProcessEvent::Error { error } if self.filter.error => Some(StreamEvent::Error {
                error: error.clone(),
            }),
            ProcessEvent::Abort { successful: true, .. } if self.filter.done => Some(StreamEvent::Abort),
            ProcessEvent::Abort {
                successful: false,
                error,
            } if self.filter.error => Some(StreamEvent::Error {
                error: error.clone().unwrap_or_else(|| "graph aborted".to_string()),
            }),
            _ => None,
        }
    }
}

pub type BoxedStream<T> = Pin<Box<dyn Stream<Item = T> + Send>>;

/// Project any stream of processor events, such as a replayed recording
pub fn project_events<S>(events: S, filter: StreamFilter) -> BoxedStream<StreamEvent>
where
    S: Stream<Item = ProcessEvent> + Send + 'static,
{
    let mut projector = EventProjector::new(filter);
    Box::pin(events.filter_map(move |event| ready(projector.project(&event))))
}

/// Filtered events of the processor's next run
pub fn processor_events(processor: &GraphProcessor, filter: StreamFilter) -> BoxedStream<StreamEvent> {
    log::debug!("Opening event stream on processor {}", processor.id());
    project_events(processor.events(), filter)
}

/// Filtered events of the processor's next run, framed as Server-Sent Events
pub fn sse_stream(processor: &GraphProcessor, filter: StreamFilter) -> BoxedStream<Result<String>> {
    Box::pin(processor_events(processor, filter).map(|event| event.to_sse()))
}

/// Partial output deltas of one node as `data: <json string>` frames
///
/// Ends when the node finishes, or with the run if it never does.
pub fn single_node_stream(processor: &GraphProcessor, node_id_or_title: &str) -> BoxedStream<String> {
    let node = node_id_or_title.to_string();
    Box::pin(
        processor_events(processor, StreamFilter::single_node(node_id_or_title))
            .take_while(|event| ready(!matches!(event, StreamEvent::NodeFinish { .. })))
            .filter_map(move |event| {
                ready(match event {
                    StreamEvent::PartialOutput {
                        node_id,
                        node_title,
                        delta,
                    } if node_id == node || node_title == node => {
                        Some(format!("data: {}\n\n", serde_json::Value::String(delta)))
                    }
                    _ => None,
                })
            }),
    )
}
