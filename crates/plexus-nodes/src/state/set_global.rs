//! Set Global Node

use async_trait::async_trait;
use plexus_engine::{
    DataType, DataValue, DefinitionContext, GraphNode, NodeCategory, NodeContext, NodeImpl, NodeMetadata,
    PortDefinition, PortValues, Result,
};
use serde::{Deserialize, Serialize};

use super::{resolve_id, PORT_ID, PORT_VARIABLE_ID_OUT};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SetGlobalData {
    pub id: String,
    pub data_type: DataType,
    pub use_id_input: bool,
}

impl Default for SetGlobalData {
    fn default() -> Self {
        Self {
            id: "variable-name".to_string(),
            data_type: DataType::ANY,
            use_id_input: false,
        }
    }
}

/// Writes `value` to a run-scoped global, waking any waiting readers
///
/// # Outputs
/// - `saved-value` - the value written (lazy values are evaluated first)
/// - `previous-value` - the value replaced, or the type default
/// - `variable_id_out` - the global's id
pub struct SetGlobalNode;

impl SetGlobalNode {
    pub const NODE_TYPE: &'static str = "setGlobal";
    pub const PORT_VALUE: &'static str = "value";
    pub const PORT_SAVED: &'static str = "saved-value";
    pub const PORT_PREVIOUS: &'static str = "previous-value";
}

#[async_trait]
impl NodeImpl for SetGlobalNode {
    fn metadata(&self) -> NodeMetadata {
        NodeMetadata::new(Self::NODE_TYPE, "Set Global", NodeCategory::State)
            .with_description("Writes a global value shared by all graphs of the run")
    }

    fn default_data(&self) -> serde_json::Value {
        serde_json::to_value(SetGlobalData::default()).unwrap_or_default()
    }

    fn input_definitions(&self, ctx: &DefinitionContext<'_>) -> Vec<PortDefinition> {
        let data: SetGlobalData = ctx.node.data_as().unwrap_or_default();
        let mut ports = vec![PortDefinition::required(Self::PORT_VALUE, "Value", data.data_type).coerced()];
        if data.use_id_input {
            ports.push(PortDefinition::required(PORT_ID, "Variable ID", DataType::STRING).coerced());
        }
        ports
    }

    fn output_definitions(&self, ctx: &DefinitionContext<'_>) -> Vec<PortDefinition> {
        let data: SetGlobalData = ctx.node.data_as().unwrap_or_default();
        vec![
            PortDefinition::optional(Self::PORT_SAVED, "Value", data.data_type),
            PortDefinition::optional(Self::PORT_PREVIOUS, "Previous Value", data.data_type),
            PortDefinition::optional(PORT_VARIABLE_ID_OUT, "Variable ID", DataType::STRING),
        ]
    }

    async fn process(&self, node: &GraphNode, inputs: PortValues, ctx: &NodeContext) -> Result<PortValues> {
        let data: SetGlobalData = node.data_as()?;
        let id = resolve_id(&data.id, data.use_id_input, &inputs)?;
        let Some(value) = inputs.get(Self::PORT_VALUE).cloned() else {
            return Ok(PortValues::new());
        };
        let value = value.unwrap_lazy();

        let previous = ctx
            .set_global(&id, value.clone())
            .unwrap_or_else(|| data.data_type.default_value());
        log::debug!("'{}' set global '{}'", node.title, id);

        Ok(PortValues::from([
            (Self::PORT_SAVED.to_string(), value),
            (Self::PORT_PREVIOUS.to_string(), previous),
            (PORT_VARIABLE_ID_OUT.to_string(), DataValue::String(id)),
        ]))
    }
}

inventory::submit!(plexus_engine::NodeRegistration {
    factory: || std::sync::Arc::new(SetGlobalNode),
});

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{node, processor, run_recorded, values};
    use plexus_engine::{NodeGraph, ProcessEvent};
    use serde_json::json;

    #[tokio::test]
    async fn test_set_emits_global_set_and_reports_previous() {
        let graph = NodeGraph::new("main", "Main")
            .with_node(node("v", "graphInput", json!({"id": "v", "dataType": "number"})))
            .with_node(node("first", "setGlobal", json!({"id": "g", "dataType": "number"})))
            .with_node(node("second", "setGlobal", json!({"id": "g", "dataType": "number"})))
            .with_node(node("out", "graphOutput", json!({"id": "previous"})))
            .connect("v", "data", "first", "value")
            .connect("first", "saved-value", "second", "value")
            .connect("second", "previous-value", "out", "value");
        let processor = processor(vec![graph]);

        let (result, sink) = run_recorded(&processor, values([("v", DataValue::Number(7.0))])).await;
        assert_eq!(result.unwrap()["previous"], DataValue::Number(7.0));

        let sets: Vec<_> = sink
            .events()
            .into_iter()
            .filter(|e| e.matches("globalSet:g"))
            .collect();
        assert_eq!(sets.len(), 2);
        assert!(matches!(&sets[0], ProcessEvent::GlobalSet { value, .. } if *value == DataValue::Number(7.0)));
    }
}
