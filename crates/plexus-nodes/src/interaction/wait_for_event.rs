//! Wait For Event Node

use async_trait::async_trait;
use plexus_engine::{
    DataType, DataValue, DefinitionContext, GraphNode, NodeCategory, NodeContext, NodeImpl, NodeMetadata,
    PortDefinition, PortValues, Result,
};
use serde::{Deserialize, Serialize};

use super::{resolve_event_name, PORT_EVENT_NAME};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct WaitForEventData {
    pub event_name: String,
    pub use_event_name_input: bool,
}

impl Default for WaitForEventData {
    fn default() -> Self {
        Self {
            event_name: "continue".to_string(),
            use_event_name_input: false,
        }
    }
}

/// Wait For Event Node
///
/// Blocks until user event `eventName` is raised, by the host or by a
/// `raiseEvent` node, then passes `inputData` through as `outputData`.
/// Only events raised after the node starts are seen.
pub struct WaitForEventNode;

impl WaitForEventNode {
    pub const NODE_TYPE: &'static str = "waitForEvent";
    pub const PORT_INPUT_DATA: &'static str = "inputData";
    pub const PORT_OUTPUT_DATA: &'static str = "outputData";
    pub const PORT_EVENT_DATA: &'static str = "eventData";
}

#[async_trait]
impl NodeImpl for WaitForEventNode {
    fn metadata(&self) -> NodeMetadata {
        NodeMetadata::new(Self::NODE_TYPE, "Wait For Event", NodeCategory::Interaction)
            .with_description("Waits for a user event before continuing")
    }

    fn default_data(&self) -> serde_json::Value {
        serde_json::to_value(WaitForEventData::default()).unwrap_or_default()
    }

    fn input_definitions(&self, ctx: &DefinitionContext<'_>) -> Vec<PortDefinition> {
        let data: WaitForEventData = ctx.node.data_as().unwrap_or_default();
        let mut ports = Vec::new();
        if data.use_event_name_input {
            ports.push(PortDefinition::required(PORT_EVENT_NAME, "Event Name", DataType::STRING).coerced());
        }
        ports.push(PortDefinition::optional(Self::PORT_INPUT_DATA, "Data", DataType::ANY));
        ports
    }

    fn output_definitions(&self, _ctx: &DefinitionContext<'_>) -> Vec<PortDefinition> {
        vec![
            PortDefinition::optional(Self::PORT_OUTPUT_DATA, "Data", DataType::ANY),
            PortDefinition::optional(Self::PORT_EVENT_DATA, "Event Data", DataType::ANY),
        ]
    }

    async fn process(&self, node: &GraphNode, inputs: PortValues, ctx: &NodeContext) -> Result<PortValues> {
        let data: WaitForEventData = node.data_as()?;
        let name = resolve_event_name(&data.event_name, data.use_event_name_input, &inputs)?;

        log::debug!("'{}' waiting for event '{}'", node.title, name);
        let event_data = ctx
            .wait_for_event(&name)
            .await?
            .unwrap_or(DataValue::Any(serde_json::Value::Null));

        let mut outputs = PortValues::from([(Self::PORT_EVENT_DATA.to_string(), event_data)]);
        if let Some(value) = inputs.get(Self::PORT_INPUT_DATA) {
            outputs.insert(Self::PORT_OUTPUT_DATA.to_string(), value.clone());
        }
        Ok(outputs)
    }
}

inventory::submit!(plexus_engine::NodeRegistration {
    factory: || std::sync::Arc::new(WaitForEventNode),
});
