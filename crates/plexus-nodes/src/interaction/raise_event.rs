//! Raise Event Node

use async_trait::async_trait;
use plexus_engine::{
    DataType, DefinitionContext, GraphNode, NodeCategory, NodeContext, NodeImpl, NodeMetadata, PortDefinition,
    PortValues, Result,
};
use serde::{Deserialize, Serialize};

use super::{resolve_event_name, PORT_EVENT_NAME};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RaiseEventData {
    pub event_name: String,
    pub use_event_name_input: bool,
}

impl Default for RaiseEventData {
    fn default() -> Self {
        Self {
            event_name: "toast".to_string(),
            use_event_name_input: false,
        }
    }
}

/// Raises user event `eventName` with its `data` input, which it also
/// outputs as `result`
pub struct RaiseEventNode;

impl RaiseEventNode {
    pub const NODE_TYPE: &'static str = "raiseEvent";
    pub const PORT_DATA: &'static str = "data";
    pub const PORT_RESULT: &'static str = "result";
}

#[async_trait]
impl NodeImpl for RaiseEventNode {
    fn metadata(&self) -> NodeMetadata {
        NodeMetadata::new(Self::NODE_TYPE, "Raise Event", NodeCategory::Interaction)
            .with_description("Raises a user event that hosts and other nodes can listen for")
    }

    fn default_data(&self) -> serde_json::Value {
        serde_json::to_value(RaiseEventData::default()).unwrap_or_default()
    }

    fn input_definitions(&self, ctx: &DefinitionContext<'_>) -> Vec<PortDefinition> {
        let data: RaiseEventData = ctx.node.data_as().unwrap_or_default();
        let mut ports = Vec::new();
        if data.use_event_name_input {
            ports.push(PortDefinition::required(PORT_EVENT_NAME, "Event Name", DataType::STRING).coerced());
        }
        ports.push(PortDefinition::optional(Self::PORT_DATA, "Data", DataType::ANY));
        ports
    }

    fn output_definitions(&self, _ctx: &DefinitionContext<'_>) -> Vec<PortDefinition> {
        vec![PortDefinition::optional(Self::PORT_RESULT, "Result", DataType::ANY)]
    }

    async fn process(&self, node: &GraphNode, inputs: PortValues, ctx: &NodeContext) -> Result<PortValues> {
        let data: RaiseEventData = node.data_as()?;
        let name = resolve_event_name(&data.event_name, data.use_event_name_input, &inputs)?;
        let value = inputs.get(Self::PORT_DATA).cloned();

        log::debug!("'{}' raising event '{}'", node.title, name);
        ctx.raise_event(name, value.clone());

        Ok(value
            .map(|v| PortValues::from([(Self::PORT_RESULT.to_string(), v)]))
            .unwrap_or_default())
    }
}

inventory::submit!(plexus_engine::NodeRegistration {
    factory: || std::sync::Arc::new(RaiseEventNode),
});
