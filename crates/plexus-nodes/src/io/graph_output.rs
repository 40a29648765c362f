//! Graph Output Node
//!
//! Records its input as one output of the graph being executed.

use async_trait::async_trait;
use plexus_engine::{
    DataType, DataValue, DefinitionContext, GraphNode, NodeCategory, NodeContext, NodeImpl, NodeMetadata,
    PortDefinition, PortValues, Result,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GraphOutputData {
    pub id: String,
    pub data_type: DataType,
}

impl Default for GraphOutputData {
    fn default() -> Self {
        Self {
            id: "output".to_string(),
            data_type: DataType::ANY,
        }
    }
}

/// Graph Output Node
///
/// Receives excluded values: an excluded `value` marks the graph output
/// excluded unless another output node already set it. A real value
/// replaces an unset or excluded output but never a real one.
pub struct GraphOutputNode;

impl GraphOutputNode {
    pub const NODE_TYPE: &'static str = "graphOutput";
    pub const PORT_VALUE: &'static str = "value";
    pub const PORT_VALUE_OUTPUT: &'static str = "valueOutput";
}

#[async_trait]
impl NodeImpl for GraphOutputNode {
    fn metadata(&self) -> NodeMetadata {
        NodeMetadata::new(Self::NODE_TYPE, "Graph Output", NodeCategory::Io)
            .with_description("Sets one output of the executing graph")
    }

    fn default_data(&self) -> serde_json::Value {
        serde_json::to_value(GraphOutputData::default()).unwrap_or_default()
    }

    fn input_definitions(&self, ctx: &DefinitionContext<'_>) -> Vec<PortDefinition> {
        let data: GraphOutputData = ctx.node.data_as().unwrap_or_default();
        vec![PortDefinition::optional(Self::PORT_VALUE, "Value", data.data_type).coerced()]
    }

    fn output_definitions(&self, ctx: &DefinitionContext<'_>) -> Vec<PortDefinition> {
        let data: GraphOutputData = ctx.node.data_as().unwrap_or_default();
        vec![PortDefinition::optional(Self::PORT_VALUE_OUTPUT, "Value", data.data_type)]
    }

    fn accepts_excluded_inputs(&self) -> bool {
        true
    }

    async fn process(&self, node: &GraphNode, inputs: PortValues, ctx: &NodeContext) -> Result<PortValues> {
        let data: GraphOutputData = node.data_as()?;
        let value = inputs
            .get(Self::PORT_VALUE)
            .cloned()
            .unwrap_or(DataValue::Any(serde_json::Value::Null));
        let current = ctx.graph_output(&data.id);

        if value.is_excluded() {
            if current.is_none() {
                ctx.set_graph_output(&data.id, value.clone());
            }
            return Ok(PortValues::from([(Self::PORT_VALUE_OUTPUT.to_string(), value)]));
        }

        let value = match current {
            Some(existing) if !existing.is_excluded() => existing,
            _ => {
                ctx.set_graph_output(&data.id, value.clone());
                value
            }
        };
        Ok(PortValues::from([(Self::PORT_VALUE_OUTPUT.to_string(), value)]))
    }
}

inventory::submit!(plexus_engine::NodeRegistration {
    factory: || std::sync::Arc::new(GraphOutputNode),
});
