//! Loop Until Node
//!
//! Runs a graph repeatedly, feeding each iteration's outputs back in as the
//! next iteration's inputs, until a stop condition holds.

use std::collections::HashMap;

use async_trait::async_trait;
use plexus_engine::coerce::coerce_to_string;
use plexus_engine::{
    DataType, DataValue, DefinitionContext, GraphNode, NodeCategory, NodeContext, NodeImpl, NodeMetadata,
    PortDefinition, PortValues, ProjectId, Result, LOOP_NOT_BROKEN,
};
use serde::{Deserialize, Serialize};

use super::{is_truthy, sub_processor, target_input_ports, target_output_ports, with_input_defaults};
use crate::io::graph_output_ports;

/// When a loop stops
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LoopCondition {
    /// No graph output is excluded
    #[default]
    AllOutputsSet,
    /// `conditionOutput` is truthy
    OutputTruthy,
    /// `conditionOutput` formats as `targetValue`
    OutputEquals,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LoopUntilData {
    pub graph_id: String,
    pub project_id: Option<ProjectId>,
    pub condition: LoopCondition,
    pub condition_output: String,
    pub target_value: String,
    /// Unbounded when unset
    pub max_iterations: Option<u32>,
    pub input_data: HashMap<String, DataValue>,
}

impl Default for LoopUntilData {
    fn default() -> Self {
        Self {
            graph_id: String::new(),
            project_id: None,
            condition: LoopCondition::AllOutputsSet,
            condition_output: "break".to_string(),
            target_value: String::new(),
            max_iterations: None,
            input_data: HashMap::new(),
        }
    }
}

impl LoopUntilData {
    fn should_break(&self, outputs: &PortValues) -> bool {
        match self.condition {
            LoopCondition::AllOutputsSet => outputs.values().all(|v| !v.is_excluded()),
            LoopCondition::OutputTruthy => is_truthy(outputs.get(&self.condition_output)),
            LoopCondition::OutputEquals => outputs
                .get(&self.condition_output)
                .filter(|v| !v.is_excluded())
                .and_then(|v| coerce_to_string(v).ok())
                .is_some_and(|s| s == self.target_value),
        }
    }
}

/// Loop Until Node
///
/// # Outputs
/// The target graph's outputs from the last iteration, `iteration` (the
/// number of runs) and `completed`. When `maxIterations` runs out before
/// the condition holds, every graph output is excluded with reason
/// `loop-not-broken` and `completed` is false.
pub struct LoopUntilNode;

impl LoopUntilNode {
    pub const NODE_TYPE: &'static str = "loopUntil";
    pub const PORT_ITERATION: &'static str = "iteration";
    pub const PORT_COMPLETED: &'static str = "completed";
}

#[async_trait]
impl NodeImpl for LoopUntilNode {
    fn metadata(&self) -> NodeMetadata {
        NodeMetadata::new(Self::NODE_TYPE, "Loop Until", NodeCategory::Flow)
            .with_description("Runs a graph in a loop until a condition is met")
    }

    fn default_data(&self) -> serde_json::Value {
        serde_json::to_value(LoopUntilData::default()).unwrap_or_default()
    }

    fn input_definitions(&self, ctx: &DefinitionContext<'_>) -> Vec<PortDefinition> {
        let data: LoopUntilData = ctx.node.data_as().unwrap_or_default();
        target_input_ports(ctx, &data.graph_id, data.project_id.as_deref())
    }

    fn output_definitions(&self, ctx: &DefinitionContext<'_>) -> Vec<PortDefinition> {
        let data: LoopUntilData = ctx.node.data_as().unwrap_or_default();
        let mut ports = target_output_ports(ctx, &data.graph_id, data.project_id.as_deref());
        ports.push(
            PortDefinition::optional(Self::PORT_ITERATION, "Iterations", DataType::NUMBER)
                .with_description("The number of iterations run"),
        );
        ports.push(
            PortDefinition::optional(Self::PORT_COMPLETED, "Completed", DataType::BOOLEAN)
                .with_description("Whether the stop condition was met"),
        );
        ports
    }

    async fn process(&self, node: &GraphNode, inputs: PortValues, ctx: &NodeContext) -> Result<PortValues> {
        let data: LoopUntilData = node.data_as()?;
        let mut current = with_input_defaults(inputs, &data.input_data);
        let mut outputs = PortValues::new();
        let mut output_ports = Vec::new();
        let mut iteration = 0u32;
        let mut broken = false;

        while data.max_iterations.map_or(true, |max| iteration < max) {
            let processor = sub_processor(ctx, &data.graph_id, data.project_id.as_deref())?;
            if output_ports.is_empty() {
                output_ports = graph_output_ports(processor.graph());
            }
            outputs = processor.process_subgraph(current.clone()).await?;
            iteration += 1;

            if data.should_break(&outputs) {
                broken = true;
                break;
            }
            log::trace!("'{}' iteration {} did not break", node.title, iteration);

            let mut partial = outputs.clone();
            partial.insert(Self::PORT_ITERATION.to_string(), DataValue::Number(iteration as f64));
            ctx.on_partial_outputs(partial);

            current.extend(
                outputs
                    .iter()
                    .filter(|(_, v)| !v.is_excluded())
                    .map(|(k, v)| (k.clone(), v.clone())),
            );
        }

        if !broken {
            log::debug!("'{}' stopped after {} iterations without breaking", node.title, iteration);
            for port in output_ports {
                outputs.insert(port.id, DataValue::excluded_because(LOOP_NOT_BROKEN));
            }
        }
        outputs.insert(Self::PORT_ITERATION.to_string(), DataValue::Number(iteration as f64));
        outputs.insert(Self::PORT_COMPLETED.to_string(), DataValue::Boolean(broken));
        Ok(outputs)
    }
}

inventory::submit!(plexus_engine::NodeRegistration {
    factory: || std::sync::Arc::new(LoopUntilNode),
});
