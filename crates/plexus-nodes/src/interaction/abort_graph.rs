//! Abort Graph Node

use async_trait::async_trait;
use plexus_engine::coerce::{coerce_to_bool, coerce_to_string};
use plexus_engine::{
    DataType, DefinitionContext, GraphNode, NodeCategory, NodeContext, NodeImpl, NodeMetadata, PortDefinition,
    PortValues, Result,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AbortGraphData {
    /// Abort without an error; the run resolves with the outputs set so far
    pub successfully: bool,
    pub use_successfully_input: bool,
    pub error_message: String,
}

impl Default for AbortGraphData {
    fn default() -> Self {
        Self {
            successfully: true,
            use_successfully_input: false,
            error_message: String::new(),
        }
    }
}

/// Abort Graph Node
///
/// An unsuccessful abort uses the `data` input as its message, then
/// `data.errorMessage`, then a generic message.
pub struct AbortGraphNode;

impl AbortGraphNode {
    pub const NODE_TYPE: &'static str = "abortGraph";
    pub const PORT_DATA: &'static str = "data";
    pub const PORT_SUCCESSFULLY: &'static str = "successfully";
    const DEFAULT_ERROR: &'static str = "Graph aborted with error";
}

#[async_trait]
impl NodeImpl for AbortGraphNode {
    fn metadata(&self) -> NodeMetadata {
        NodeMetadata::new(Self::NODE_TYPE, "Abort Graph", NodeCategory::Interaction)
            .with_description("Aborts the graph, successfully or with an error")
    }

    fn default_data(&self) -> serde_json::Value {
        serde_json::to_value(AbortGraphData::default()).unwrap_or_default()
    }

    fn input_definitions(&self, ctx: &DefinitionContext<'_>) -> Vec<PortDefinition> {
        let data: AbortGraphData = ctx.node.data_as().unwrap_or_default();
        let mut ports = vec![PortDefinition::optional(Self::PORT_DATA, "Data or Error", DataType::ANY)];
        if data.use_successfully_input {
            ports.push(PortDefinition::optional(Self::PORT_SUCCESSFULLY, "Successfully", DataType::BOOLEAN).coerced());
        }
        ports
    }

    fn output_definitions(&self, _ctx: &DefinitionContext<'_>) -> Vec<PortDefinition> {
        Vec::new()
    }

    async fn process(&self, node: &GraphNode, inputs: PortValues, ctx: &NodeContext) -> Result<PortValues> {
        let data: AbortGraphData = node.data_as()?;
        let successfully = match inputs.get(Self::PORT_SUCCESSFULLY) {
            Some(value) if data.use_successfully_input => coerce_to_bool(value)?,
            _ => data.successfully,
        };

        if successfully {
            log::debug!("'{}' aborting graph successfully", node.title);
            ctx.abort_graph(None);
        } else {
            let message = inputs
                .get(Self::PORT_DATA)
                .and_then(|value| coerce_to_string(value).ok())
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .or_else(|| Some(data.error_message).filter(|s| !s.is_empty()))
                .unwrap_or_else(|| Self::DEFAULT_ERROR.to_string());
            log::debug!("'{}' aborting graph: {}", node.title, message);
            ctx.abort_graph(Some(message));
        }
        Ok(PortValues::new())
    }
}

inventory::submit!(plexus_engine::NodeRegistration {
    factory: || std::sync::Arc::new(AbortGraphNode),
});

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{node, processor, run, values};
    use plexus_engine::{DataValue, EngineError, NodeGraph};
    use serde_json::json;

    fn graph(abort: serde_json::Value) -> NodeGraph {
        NodeGraph::new("main", "Main")
            .with_node(node("v", "graphInput", json!({"id": "v", "dataType": "string"})))
            .with_node(node("early", "graphOutput", json!({"id": "early"})))
            .with_node(node("abort", "abortGraph", abort))
            .connect("v", "data", "early", "value")
            .connect("early", "valueOutput", "abort", "data")
    }

    #[tokio::test]
    async fn test_successful_abort_keeps_outputs() {
        let processor = processor(vec![graph(json!({}))]);
        let outputs = run(&processor, values([("v", DataValue::string("kept"))])).await.unwrap();
        assert_eq!(outputs["early"], DataValue::string("kept"));
    }

    #[tokio::test]
    async fn test_abort_with_error_message() {
        let processor = processor(vec![graph(json!({"successfully": false, "errorMessage": "fallback"}))]);

        let error = run(&processor, values([("v", DataValue::string("  from input "))]))
            .await
            .unwrap_err();
        assert!(matches!(error, EngineError::Aborted(Some(ref m)) if m == "from input"));

        let error = run(&processor, values([("v", DataValue::string(""))])).await.unwrap_err();
        assert!(matches!(error, EngineError::Aborted(Some(ref m)) if m == "fallback"));
    }
}
