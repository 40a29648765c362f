//! Context Node
//!
//! Reads a context value passed to `process_graph`.

use async_trait::async_trait;
use plexus_engine::coerce::coerce;
use plexus_engine::{
    DataType, DataValue, DefinitionContext, EngineError, GraphNode, NodeCategory, NodeContext, NodeImpl,
    NodeMetadata, PortDefinition, PortValues, Result,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ContextData {
    pub id: String,
    pub data_type: DataType,
    pub default_value: Option<serde_json::Value>,
}

impl Default for ContextData {
    fn default() -> Self {
        Self {
            id: "input".to_string(),
            data_type: DataType::STRING,
            default_value: None,
        }
    }
}

pub struct ContextNode;

impl ContextNode {
    pub const NODE_TYPE: &'static str = "context";
    pub const PORT_DATA: &'static str = "data";
}

#[async_trait]
impl NodeImpl for ContextNode {
    fn metadata(&self) -> NodeMetadata {
        NodeMetadata::new(Self::NODE_TYPE, "Context", NodeCategory::State)
            .with_description("Outputs a context value of the run")
    }

    fn default_data(&self) -> serde_json::Value {
        serde_json::to_value(ContextData::default()).unwrap_or_default()
    }

    fn input_definitions(&self, _ctx: &DefinitionContext<'_>) -> Vec<PortDefinition> {
        Vec::new()
    }

    fn output_definitions(&self, ctx: &DefinitionContext<'_>) -> Vec<PortDefinition> {
        let data: ContextData = ctx.node.data_as().unwrap_or_default();
        vec![PortDefinition::optional(Self::PORT_DATA, "Data", data.data_type)]
    }

    async fn process(&self, node: &GraphNode, _inputs: PortValues, ctx: &NodeContext) -> Result<PortValues> {
        let data: ContextData = node.data_as()?;
        let value = match (ctx.context_value(&data.id), data.default_value) {
            (Some(value), _) => coerce(value, data.data_type)?,
            (None, Some(payload)) => DataValue::from_payload(data.data_type, payload)
                .map_err(|e| EngineError::invalid_data(&node.id, e))?,
            (None, None) => data.data_type.default_value(),
        };
        Ok(PortValues::from([(Self::PORT_DATA.to_string(), value)]))
    }
}

inventory::submit!(plexus_engine::NodeRegistration {
    factory: || std::sync::Arc::new(ContextNode),
});
