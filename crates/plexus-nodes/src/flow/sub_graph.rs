//! Subgraph Node
//!
//! Calls another graph of the project (or of a referenced project) with the
//! node's inputs as graph inputs.

use std::collections::HashMap;
use std::time::Instant;

use async_trait::async_trait;
use plexus_engine::{
    DataType, DataValue, DefinitionContext, EngineError, GraphNode, NodeCategory, NodeContext, NodeImpl,
    NodeMetadata, PortDefinition, PortValues, ProjectId, Result,
};
use serde::{Deserialize, Serialize};

use super::{sub_processor, target_input_ports, target_output_ports, with_input_defaults};
use crate::io::graph_output_ports;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SubGraphData {
    pub graph_id: String,
    /// Referenced project holding the graph; the current project when unset
    pub project_id: Option<ProjectId>,
    /// Report failures on an `error` output instead of failing the node
    pub use_error_output: bool,
    /// Values for graph inputs with no incoming connection
    pub input_data: HashMap<String, DataValue>,
}

/// Subgraph Node
///
/// # Inputs
/// One port per distinct `graphInput` id of the target graph.
///
/// # Outputs
/// One port per distinct `graphOutput` id, plus `duration` (ms) and, with
/// `useErrorOutput`, `error`. On failure with `useErrorOutput` every graph
/// output is excluded and `error` carries the message.
pub struct SubGraphNode;

impl SubGraphNode {
    pub const NODE_TYPE: &'static str = "subGraph";
    pub const PORT_DURATION: &'static str = "duration";
    pub const PORT_ERROR: &'static str = "error";
}

#[async_trait]
impl NodeImpl for SubGraphNode {
    fn metadata(&self) -> NodeMetadata {
        NodeMetadata::new(Self::NODE_TYPE, "Subgraph", NodeCategory::Flow)
            .with_description("Executes another graph and outputs its results")
    }

    fn input_definitions(&self, ctx: &DefinitionContext<'_>) -> Vec<PortDefinition> {
        let data: SubGraphData = ctx.node.data_as().unwrap_or_default();
        target_input_ports(ctx, &data.graph_id, data.project_id.as_deref())
    }

    fn output_definitions(&self, ctx: &DefinitionContext<'_>) -> Vec<PortDefinition> {
        let data: SubGraphData = ctx.node.data_as().unwrap_or_default();
        let mut ports = target_output_ports(ctx, &data.graph_id, data.project_id.as_deref());
        ports.push(PortDefinition::optional(Self::PORT_DURATION, "Duration", DataType::NUMBER));
        if data.use_error_output {
            ports.push(PortDefinition::optional(Self::PORT_ERROR, "Error", DataType::STRING));
        }
        ports
    }

    async fn process(&self, node: &GraphNode, inputs: PortValues, ctx: &NodeContext) -> Result<PortValues> {
        let data: SubGraphData = node.data_as()?;
        let inputs = with_input_defaults(inputs, &data.input_data);

        let mut graph_outputs = Vec::new();
        let started = Instant::now();
        let result = match sub_processor(ctx, &data.graph_id, data.project_id.as_deref()) {
            Ok(processor) => {
                graph_outputs = graph_output_ports(processor.graph());
                processor.process_subgraph(inputs).await
            }
            Err(error) => Err(error),
        };

        match result {
            Ok(mut outputs) => {
                if data.use_error_output {
                    outputs.insert(Self::PORT_ERROR.to_string(), DataValue::excluded());
                }
                outputs
                    .entry(Self::PORT_DURATION.to_string())
                    .or_insert_with(|| DataValue::Number(started.elapsed().as_millis() as f64));
                Ok(outputs)
            }
            Err(EngineError::Cancelled) => Err(EngineError::Cancelled),
            Err(error) if data.use_error_output => {
                log::debug!("Subgraph '{}' failed: {}", data.graph_id, error);
                let mut outputs: PortValues = graph_outputs
                    .into_iter()
                    .map(|port| (port.id, DataValue::excluded()))
                    .collect();
                outputs.insert(Self::PORT_ERROR.to_string(), DataValue::String(error.to_string()));
                Ok(outputs)
            }
            Err(error) => Err(error),
        }
    }
}

inventory::submit!(plexus_engine::NodeRegistration {
    factory: || std::sync::Arc::new(SubGraphNode),
});
