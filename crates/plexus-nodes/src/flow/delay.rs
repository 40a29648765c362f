//! Delay Node

use std::time::Duration;

use async_trait::async_trait;
use plexus_engine::coerce::coerce_to_number;
use plexus_engine::{
    dynamic_port_count, DataType, DefinitionContext, GraphNode, NodeCategory, NodeContext, NodeImpl, NodeMetadata,
    PortDefinition, PortValues, Result,
};
use serde::{Deserialize, Serialize};

use crate::control::{forward_numbered, numbered_ports};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct DelayData {
    pub delay_ms: u64,
    /// Take the delay from a `delay` input
    pub use_delay_input: bool,
}

impl Default for DelayData {
    fn default() -> Self {
        Self {
            delay_ms: 1000,
            use_delay_input: false,
        }
    }
}

/// Waits, then forwards `inputN` to `outputN`
///
/// The wait ends early with an error when the run is cancelled.
pub struct DelayNode;

impl DelayNode {
    pub const NODE_TYPE: &'static str = "delay";
    pub const PORT_DELAY: &'static str = "delay";
}

#[async_trait]
impl NodeImpl for DelayNode {
    fn metadata(&self) -> NodeMetadata {
        NodeMetadata::new(Self::NODE_TYPE, "Delay", NodeCategory::Flow)
            .with_description("Delays its inputs by a number of milliseconds")
    }

    fn default_data(&self) -> serde_json::Value {
        serde_json::to_value(DelayData::default()).unwrap_or_default()
    }

    fn input_definitions(&self, ctx: &DefinitionContext<'_>) -> Vec<PortDefinition> {
        let data: DelayData = ctx.node.data_as().unwrap_or_default();
        let mut ports = Vec::new();
        if data.use_delay_input {
            ports.push(PortDefinition::optional(Self::PORT_DELAY, "Delay (ms)", DataType::NUMBER).coerced());
        }
        ports.extend(numbered_ports(dynamic_port_count(ctx, "input")).0);
        ports
    }

    fn output_definitions(&self, ctx: &DefinitionContext<'_>) -> Vec<PortDefinition> {
        numbered_ports(dynamic_port_count(ctx, "input")).1
    }

    async fn process(&self, node: &GraphNode, inputs: PortValues, ctx: &NodeContext) -> Result<PortValues> {
        let data: DelayData = node.data_as()?;
        let delay_ms = match inputs.get(Self::PORT_DELAY) {
            Some(value) if data.use_delay_input => coerce_to_number(value)?.max(0.0) as u64,
            _ => data.delay_ms,
        };
        ctx.sleep(Duration::from_millis(delay_ms)).await?;
        Ok(forward_numbered(inputs))
    }
}

inventory::submit!(plexus_engine::NodeRegistration {
    factory: || std::sync::Arc::new(DelayNode),
});
