//! Graph Input Node
//!
//! Exposes one input of the graph being executed.

use async_trait::async_trait;
use plexus_engine::coerce::coerce;
use plexus_engine::{
    DataType, DataValue, DefinitionContext, EngineError, GraphNode, NodeCategory, NodeContext, NodeImpl,
    NodeMetadata, PortDefinition, PortValues, Result,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GraphInputData {
    /// Name of the graph input
    pub id: String,
    pub data_type: DataType,
    /// Payload used when the caller passes nothing
    pub default_value: Option<serde_json::Value>,
    /// Take the fallback from a `default` input port instead
    pub use_default_value_input: bool,
}

impl Default for GraphInputData {
    fn default() -> Self {
        Self {
            id: "input".to_string(),
            data_type: DataType::STRING,
            default_value: None,
            use_default_value_input: false,
        }
    }
}

/// Graph Input Node
///
/// # Outputs
/// - `data` - the graph input `data.id`, coerced to `data.dataType`
///
/// Falls back to the `default` input, then `data.defaultValue`, then the
/// type's default value.
pub struct GraphInputNode;

impl GraphInputNode {
    pub const NODE_TYPE: &'static str = "graphInput";
    pub const PORT_DEFAULT: &'static str = "default";
    pub const PORT_DATA: &'static str = "data";
}

#[async_trait]
impl NodeImpl for GraphInputNode {
    fn metadata(&self) -> NodeMetadata {
        NodeMetadata::new(Self::NODE_TYPE, "Graph Input", NodeCategory::Io)
            .with_description("Outputs one input of the executing graph")
    }

    fn default_data(&self) -> serde_json::Value {
        serde_json::to_value(GraphInputData::default()).unwrap_or_default()
    }

    fn input_definitions(&self, ctx: &DefinitionContext<'_>) -> Vec<PortDefinition> {
        let data: GraphInputData = ctx.node.data_as().unwrap_or_default();
        if data.use_default_value_input {
            vec![PortDefinition::optional(Self::PORT_DEFAULT, "Default", data.data_type).coerced()]
        } else {
            Vec::new()
        }
    }

    fn output_definitions(&self, ctx: &DefinitionContext<'_>) -> Vec<PortDefinition> {
        let data: GraphInputData = ctx.node.data_as().unwrap_or_default();
        vec![PortDefinition::optional(Self::PORT_DATA, "Data", data.data_type)]
    }

    async fn process(&self, node: &GraphNode, inputs: PortValues, ctx: &NodeContext) -> Result<PortValues> {
        let data: GraphInputData = node.data_as()?;

        let value = match ctx.graph_input(&data.id) {
            Some(value) if value.is_excluded() => value.clone(),
            Some(value) => coerce(value, data.data_type)?,
            None => match inputs.get(Self::PORT_DEFAULT) {
                Some(value) => value.clone(),
                None => match data.default_value {
                    Some(payload) => DataValue::from_payload(data.data_type, payload)
                        .map_err(|e| EngineError::invalid_data(&node.id, e))?,
                    None => data.data_type.default_value(),
                },
            },
        };
        log::trace!("Graph input '{}' resolved to {}", data.id, value.data_type());

        Ok(PortValues::from([(Self::PORT_DATA.to_string(), value)]))
    }
}

inventory::submit!(plexus_engine::NodeRegistration {
    factory: || std::sync::Arc::new(GraphInputNode),
});

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{node, processor, run, values};
    use plexus_engine::NodeGraph;
    use serde_json::json;

    fn graph(data: serde_json::Value) -> NodeGraph {
        NodeGraph::new("main", "Main")
            .with_node(node("in", "graphInput", data))
            .with_node(node("out", "graphOutput", json!({"id": "result", "dataType": "any"})))
            .connect("in", "data", "out", "value")
    }

    #[tokio::test]
    async fn test_input_is_coerced() {
        let processor = processor(vec![graph(json!({"id": "n", "dataType": "number"}))]);
        let outputs = run(&processor, values([("n", DataValue::string("42"))])).await.unwrap();
        assert_eq!(outputs["result"], DataValue::Number(42.0));
    }

    #[tokio::test]
    async fn test_default_value_when_missing() {
        let processor = processor(vec![graph(
            json!({"id": "n", "dataType": "string", "defaultValue": "fallback"}),
        )]);
        let outputs = run(&processor, PortValues::new()).await.unwrap();
        assert_eq!(outputs["result"], DataValue::string("fallback"));
    }

    #[tokio::test]
    async fn test_type_default_when_nothing_given() {
        let processor = processor(vec![graph(json!({"id": "list", "dataType": "string[]"}))]);
        let outputs = run(&processor, PortValues::new()).await.unwrap();
        assert_eq!(outputs["result"], DataValue::strings(Vec::<String>::new()));
    }
}
