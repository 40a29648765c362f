//! Get Global Node
//!
//! Reads a run-scoped global, directly, blocking until it is set, or lazily.

use async_trait::async_trait;
use plexus_engine::{
    DataType, DataValue, DefinitionContext, EngineError, GraphNode, NodeCategory, NodeContext, NodeImpl,
    NodeMetadata, PortDefinition, PortValues, Result,
};
use serde::{Deserialize, Serialize};

use super::{resolve_id, PORT_ID, PORT_VARIABLE_ID_OUT};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GetGlobalData {
    pub id: String,
    pub data_type: DataType,
    /// Output a `fn<T>` that reads the global when evaluated
    pub on_demand: bool,
    /// Block until the global is set
    pub wait: bool,
    pub use_id_input: bool,
}

impl Default for GetGlobalData {
    fn default() -> Self {
        Self {
            id: "variable-name".to_string(),
            data_type: DataType::STRING,
            on_demand: true,
            wait: false,
            use_id_input: false,
        }
    }
}

/// Get Global Node
///
/// An unset global reads as the default value of `data.dataType`.
pub struct GetGlobalNode;

impl GetGlobalNode {
    pub const NODE_TYPE: &'static str = "getGlobal";
    pub const PORT_VALUE: &'static str = "value";
}

#[async_trait]
impl NodeImpl for GetGlobalNode {
    fn metadata(&self) -> NodeMetadata {
        NodeMetadata::new(Self::NODE_TYPE, "Get Global", NodeCategory::State)
            .with_description("Reads a global value shared by all graphs of the run")
    }

    fn default_data(&self) -> serde_json::Value {
        serde_json::to_value(GetGlobalData::default()).unwrap_or_default()
    }

    fn input_definitions(&self, ctx: &DefinitionContext<'_>) -> Vec<PortDefinition> {
        let data: GetGlobalData = ctx.node.data_as().unwrap_or_default();
        if data.use_id_input {
            vec![PortDefinition::required(PORT_ID, "Variable ID", DataType::STRING).coerced()]
        } else {
            Vec::new()
        }
    }

    fn output_definitions(&self, ctx: &DefinitionContext<'_>) -> Vec<PortDefinition> {
        let data: GetGlobalData = ctx.node.data_as().unwrap_or_default();
        let value_type = if data.on_demand {
            data.data_type.lazy()
        } else {
            data.data_type
        };
        vec![
            PortDefinition::optional(Self::PORT_VALUE, "Value", value_type),
            PortDefinition::optional(PORT_VARIABLE_ID_OUT, "Variable ID", DataType::STRING),
        ]
    }

    async fn process(&self, node: &GraphNode, inputs: PortValues, ctx: &NodeContext) -> Result<PortValues> {
        let data: GetGlobalData = node.data_as()?;
        if data.on_demand && data.wait {
            return Err(EngineError::invalid_data(
                &node.id,
                "onDemand and wait cannot be used together",
            ));
        }
        let id = resolve_id(&data.id, data.use_id_input, &inputs)?;
        let data_type = data.data_type;

        let value = if data.on_demand {
            let globals = ctx.globals();
            let key = id.clone();
            DataValue::lazy(data_type, move || {
                globals.get(&key).unwrap_or_else(|| data_type.default_value())
            })
        } else if data.wait {
            log::debug!("'{}' waiting for global '{}'", node.title, id);
            ctx.wait_for_global(&id).await?
        } else {
            ctx.get_global(&id)
                .unwrap_or_else(|| data_type.default_value())
        };

        Ok(PortValues::from([
            (Self::PORT_VALUE.to_string(), value),
            (PORT_VARIABLE_ID_OUT.to_string(), DataValue::String(id)),
        ]))
    }
}

inventory::submit!(plexus_engine::NodeRegistration {
    factory: || std::sync::Arc::new(GetGlobalNode),
});

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{node, processor, run, values};
    use plexus_engine::NodeGraph;
    use serde_json::json;

    #[tokio::test]
    async fn test_on_demand_reads_at_evaluation() {
        // `direct` reads g before `set` writes it; `lazy` reads g whenever evaluated
        let graph = NodeGraph::new("main", "Main")
            .with_node(node("n", "graphInput", json!({"id": "n", "dataType": "number"})))
            .with_node(node(
                "direct",
                "getGlobal",
                json!({"id": "g", "dataType": "number", "onDemand": false}),
            ))
            .with_node(node(
                "lazy",
                "getGlobal",
                json!({"id": "g", "dataType": "number", "onDemand": true}),
            ))
            .with_node(node("set", "setGlobal", json!({"useIdInput": true})))
            .with_node(node("directOut", "graphOutput", json!({"id": "direct"})))
            .with_node(node("lazyOut", "graphOutput", json!({"id": "lazy"})))
            .connect("direct", "variable_id_out", "set", "id")
            .connect("n", "data", "set", "value")
            .connect("direct", "value", "directOut", "value")
            .connect("lazy", "value", "lazyOut", "value");
        let processor = processor(vec![graph]);

        let outputs = run(&processor, values([("n", DataValue::Number(5.0))])).await.unwrap();
        assert_eq!(outputs["direct"], DataValue::Number(0.0));
        assert!(outputs["lazy"].is_lazy());
        assert_eq!(outputs["lazy"].clone().unwrap_lazy(), DataValue::Number(5.0));
    }

    #[tokio::test]
    async fn test_wait_blocks_until_set() {
        let graph = NodeGraph::new("main", "Main")
            .with_node(node(
                "get",
                "getGlobal",
                json!({"id": "g", "dataType": "string", "onDemand": false, "wait": true}),
            ))
            .with_node(node("v", "graphInput", json!({"id": "v", "dataType": "string"})))
            .with_node(node("set", "setGlobal", json!({"id": "g"})))
            .with_node(node("out", "graphOutput", json!({"id": "result"})))
            .connect("v", "data", "set", "value")
            .connect("get", "value", "out", "value");
        let processor = processor(vec![graph]);

        let outputs = run(&processor, values([("v", DataValue::string("ready"))]))
            .await
            .unwrap();
        assert_eq!(outputs["result"], DataValue::string("ready"));
    }

    #[tokio::test]
    async fn test_on_demand_with_wait_is_an_error() {
        let graph = NodeGraph::new("main", "Main").with_node(node(
            "get",
            "getGlobal",
            json!({"id": "g", "onDemand": true, "wait": true}),
        ));
        let processor = processor(vec![graph]);

        let error = run(&processor, PortValues::new()).await.unwrap_err();
        assert!(error.to_string().contains("onDemand and wait"));
    }
}
