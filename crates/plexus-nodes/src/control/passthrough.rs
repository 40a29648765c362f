//! Passthrough Node

use async_trait::async_trait;
use plexus_engine::{
    dynamic_port_count, DataType, DefinitionContext, GraphNode, NodeCategory, NodeContext, NodeImpl,
    NodeMetadata, PortDefinition, PortValues, Result,
};

/// Forwards `inputN` to `outputN` unchanged
///
/// Useful as a junction: excluded inputs leave their output unset, which
/// downstream nodes see as excluded.
pub struct PassthroughNode;

impl PassthroughNode {
    pub const NODE_TYPE: &'static str = "passthrough";
}

/// `inputN` / `outputN` port pairs for a dynamic-arity node
pub(crate) fn numbered_ports(count: usize) -> (Vec<PortDefinition>, Vec<PortDefinition>) {
    (1..=count)
        .map(|i| {
            (
                PortDefinition::optional(format!("input{}", i), format!("Input {}", i), DataType::ANY),
                PortDefinition::optional(format!("output{}", i), format!("Output {}", i), DataType::ANY),
            )
        })
        .unzip()
}

/// Rename every `inputN` to `outputN`
pub(crate) fn forward_numbered(inputs: PortValues) -> PortValues {
    inputs
        .into_iter()
        .filter_map(|(port, value)| {
            let index = port.strip_prefix("input")?;
            Some((format!("output{}", index), value))
        })
        .collect()
}

#[async_trait]
impl NodeImpl for PassthroughNode {
    fn metadata(&self) -> NodeMetadata {
        NodeMetadata::new(Self::NODE_TYPE, "Passthrough", NodeCategory::Control)
            .with_description("Passes its inputs through unchanged")
    }

    fn input_definitions(&self, ctx: &DefinitionContext<'_>) -> Vec<PortDefinition> {
        numbered_ports(dynamic_port_count(ctx, "input")).0
    }

    fn output_definitions(&self, ctx: &DefinitionContext<'_>) -> Vec<PortDefinition> {
        numbered_ports(dynamic_port_count(ctx, "input")).1
    }

    async fn process(&self, _node: &GraphNode, inputs: PortValues, _ctx: &NodeContext) -> Result<PortValues> {
        Ok(forward_numbered(inputs))
    }
}

inventory::submit!(plexus_engine::NodeRegistration {
    factory: || std::sync::Arc::new(PassthroughNode),
});
