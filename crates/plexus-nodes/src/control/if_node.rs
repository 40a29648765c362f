//! If Node
//!
//! Routes a value down one of two branches; the other branch is excluded.

use async_trait::async_trait;
use plexus_engine::coerce::coerce_to_bool;
use plexus_engine::{
    DataType, DataValue, DefinitionContext, GraphNode, NodeCategory, NodeContext, NodeImpl, NodeMetadata,
    PortDefinition, PortValues, Result,
};

/// If Node
///
/// # Inputs
/// - `if` (required) - condition, judged by truthiness
/// - `value` - value to route; null when unconnected
///
/// # Outputs
/// - `output` - `value` when the condition holds, excluded otherwise
/// - `falseOutput` - `value` when it does not, excluded otherwise
pub struct IfNode;

impl IfNode {
    pub const NODE_TYPE: &'static str = "if";
    pub const PORT_IF: &'static str = "if";
    pub const PORT_VALUE: &'static str = "value";
    pub const PORT_OUTPUT: &'static str = "output";
    pub const PORT_FALSE_OUTPUT: &'static str = "falseOutput";
}

#[async_trait]
impl NodeImpl for IfNode {
    fn metadata(&self) -> NodeMetadata {
        NodeMetadata::new(Self::NODE_TYPE, "If", NodeCategory::Control)
            .with_description("Routes a value based on a condition")
    }

    fn input_definitions(&self, _ctx: &DefinitionContext<'_>) -> Vec<PortDefinition> {
        vec![
            PortDefinition::required(Self::PORT_IF, "If", DataType::ANY),
            PortDefinition::optional(Self::PORT_VALUE, "Value", DataType::ANY),
        ]
    }

    fn output_definitions(&self, _ctx: &DefinitionContext<'_>) -> Vec<PortDefinition> {
        vec![
            PortDefinition::optional(Self::PORT_OUTPUT, "True", DataType::ANY),
            PortDefinition::optional(Self::PORT_FALSE_OUTPUT, "False", DataType::ANY),
        ]
    }

    async fn process(&self, node: &GraphNode, inputs: PortValues, _ctx: &NodeContext) -> Result<PortValues> {
        let condition = match inputs.get(Self::PORT_IF) {
            Some(value) => coerce_to_bool(value)?,
            None => false,
        };
        let value = inputs
            .get(Self::PORT_VALUE)
            .cloned()
            .unwrap_or(DataValue::Any(serde_json::Value::Null));
        log::debug!("If '{}': condition={}", node.title, condition);

        let (taken, skipped) = if condition {
            (Self::PORT_OUTPUT, Self::PORT_FALSE_OUTPUT)
        } else {
            (Self::PORT_FALSE_OUTPUT, Self::PORT_OUTPUT)
        };
        Ok(PortValues::from([
            (taken.to_string(), value),
            (skipped.to_string(), DataValue::excluded()),
        ]))
    }
}

inventory::submit!(plexus_engine::NodeRegistration {
    factory: || std::sync::Arc::new(IfNode),
});
