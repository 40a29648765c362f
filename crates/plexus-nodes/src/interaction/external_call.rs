//! External Call Node
//!
//! Calls a function the host registered with
//! `GraphProcessor::set_external_function`.

use async_trait::async_trait;
use plexus_engine::coerce::coerce_to_string;
use plexus_engine::{
    DataType, DataValue, DefinitionContext, EngineError, GraphNode, NodeCategory, NodeContext, NodeImpl,
    NodeMetadata, PortDefinition, PortValues, Result,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ExternalCallData {
    pub function_name: String,
    pub use_function_name_input: bool,
    /// Report failures on an `error` output instead of failing the node
    pub use_error_output: bool,
}

/// External Call Node
///
/// # Inputs
/// - `arguments` - an array is spread into the argument list; any other
///   value is passed as the only argument
///
/// # Outputs
/// - `result` - the function's return value
/// - `error` - with `useErrorOutput`, the failure message (excluded on success)
pub struct ExternalCallNode;

impl ExternalCallNode {
    pub const NODE_TYPE: &'static str = "externalCall";
    pub const PORT_FUNCTION_NAME: &'static str = "functionName";
    pub const PORT_ARGUMENTS: &'static str = "arguments";
    pub const PORT_RESULT: &'static str = "result";
    pub const PORT_ERROR: &'static str = "error";
}

fn arguments(inputs: &PortValues) -> Vec<DataValue> {
    match inputs.get(ExternalCallNode::PORT_ARGUMENTS) {
        Some(value) => value.arrayize().unwrap_or_else(|| vec![value.clone()]),
        None => Vec::new(),
    }
}

#[async_trait]
impl NodeImpl for ExternalCallNode {
    fn metadata(&self) -> NodeMetadata {
        NodeMetadata::new(Self::NODE_TYPE, "External Call", NodeCategory::Interaction)
            .with_description("Calls a function provided by the host application")
    }

    fn input_definitions(&self, ctx: &DefinitionContext<'_>) -> Vec<PortDefinition> {
        let data: ExternalCallData = ctx.node.data_as().unwrap_or_default();
        let mut ports = Vec::new();
        if data.use_function_name_input {
            ports.push(PortDefinition::required(Self::PORT_FUNCTION_NAME, "Function Name", DataType::STRING).coerced());
        }
        ports.push(PortDefinition::optional(Self::PORT_ARGUMENTS, "Arguments", DataType::ANY));
        ports
    }

    fn output_definitions(&self, ctx: &DefinitionContext<'_>) -> Vec<PortDefinition> {
        let data: ExternalCallData = ctx.node.data_as().unwrap_or_default();
        let mut ports = vec![PortDefinition::optional(Self::PORT_RESULT, "Result", DataType::ANY)];
        if data.use_error_output {
            ports.push(PortDefinition::optional(Self::PORT_ERROR, "Error", DataType::STRING));
        }
        ports
    }

    async fn process(&self, node: &GraphNode, inputs: PortValues, ctx: &NodeContext) -> Result<PortValues> {
        let data: ExternalCallData = node.data_as()?;
        let name = match inputs.get(Self::PORT_FUNCTION_NAME) {
            Some(value) if data.use_function_name_input => coerce_to_string(value)?,
            _ => data.function_name,
        };
        let args = arguments(&inputs);
        log::debug!("'{}' calling external function '{}' with {} argument(s)", node.title, name, args.len());

        match ctx.call_external_function(&name, args).await {
            Ok(result) => {
                let mut outputs = PortValues::from([(Self::PORT_RESULT.to_string(), result)]);
                if data.use_error_output {
                    outputs.insert(Self::PORT_ERROR.to_string(), DataValue::excluded());
                }
                Ok(outputs)
            }
            Err(error) if data.use_error_output && !error.is_cancellation() => Ok(PortValues::from([
                (Self::PORT_RESULT.to_string(), DataValue::excluded()),
                (Self::PORT_ERROR.to_string(), DataValue::String(error.to_string())),
            ])),
            Err(error) => Err(error),
        }
    }
}

inventory::submit!(plexus_engine::NodeRegistration {
    factory: || std::sync::Arc::new(ExternalCallNode),
});
