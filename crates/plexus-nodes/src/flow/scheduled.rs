//! Scheduled Node
//!
//! Runs a graph on a fixed interval within the current run.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use plexus_engine::{
    DataType, DataValue, DefinitionContext, GraphNode, NodeCategory, NodeContext, NodeImpl, NodeMetadata,
    PortDefinition, PortValues, ProjectId, Result,
};
use serde::{Deserialize, Serialize};

use super::{is_truthy, run_graph, target_input_ports, target_output_ports, with_input_defaults};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ScheduledData {
    pub graph_id: String,
    pub project_id: Option<ProjectId>,
    pub interval_ms: u64,
    /// Unbounded when unset; the graph can still stop early through `break`
    pub max_runs: Option<u32>,
    /// Run once before the first sleep
    pub execute_immediately: bool,
    pub input_data: HashMap<String, DataValue>,
}

impl Default for ScheduledData {
    fn default() -> Self {
        Self {
            graph_id: String::new(),
            project_id: None,
            interval_ms: 1000,
            max_runs: Some(1),
            execute_immediately: true,
            input_data: HashMap::new(),
        }
    }
}

/// Scheduled Node
///
/// Every run gets the same inputs. A truthy `break` output of the target
/// graph stops the schedule; so does reaching `maxRuns`. Sleeps between runs
/// end early when the run is cancelled or aborted.
///
/// # Outputs
/// The target graph's outputs from the last run, `iteration` and `completed`.
pub struct ScheduledNode;

impl ScheduledNode {
    pub const NODE_TYPE: &'static str = "scheduled";
    pub const GRAPH_OUTPUT_BREAK: &'static str = "break";
    pub const PORT_ITERATION: &'static str = "iteration";
    pub const PORT_COMPLETED: &'static str = "completed";
}

#[async_trait]
impl NodeImpl for ScheduledNode {
    fn metadata(&self) -> NodeMetadata {
        NodeMetadata::new(Self::NODE_TYPE, "Scheduled", NodeCategory::Flow)
            .with_description("Runs a graph repeatedly on a fixed interval")
    }

    fn default_data(&self) -> serde_json::Value {
        serde_json::to_value(ScheduledData::default()).unwrap_or_default()
    }

    fn input_definitions(&self, ctx: &DefinitionContext<'_>) -> Vec<PortDefinition> {
        let data: ScheduledData = ctx.node.data_as().unwrap_or_default();
        target_input_ports(ctx, &data.graph_id, data.project_id.as_deref())
    }

    fn output_definitions(&self, ctx: &DefinitionContext<'_>) -> Vec<PortDefinition> {
        let data: ScheduledData = ctx.node.data_as().unwrap_or_default();
        let mut ports = target_output_ports(ctx, &data.graph_id, data.project_id.as_deref());
        ports.push(PortDefinition::optional(Self::PORT_ITERATION, "Runs", DataType::NUMBER));
        ports.push(PortDefinition::optional(Self::PORT_COMPLETED, "Completed", DataType::BOOLEAN));
        ports
    }

    async fn process(&self, node: &GraphNode, inputs: PortValues, ctx: &NodeContext) -> Result<PortValues> {
        let data: ScheduledData = node.data_as()?;
        let inputs = with_input_defaults(inputs, &data.input_data);
        let interval = Duration::from_millis(data.interval_ms);

        if !data.execute_immediately {
            ctx.sleep(interval).await?;
        }

        let mut runs = 0u32;
        let mut outputs;
        loop {
            outputs = run_graph(ctx, &data.graph_id, data.project_id.as_deref(), inputs.clone()).await?;
            runs += 1;
            log::trace!("'{}' finished scheduled run {}", node.title, runs);

            let mut partial = outputs.clone();
            partial.insert(Self::PORT_ITERATION.to_string(), DataValue::Number(runs as f64));
            ctx.on_partial_outputs(partial);

            if is_truthy(outputs.get(Self::GRAPH_OUTPUT_BREAK)) {
                break;
            }
            if data.max_runs.is_some_and(|max| runs >= max) {
                break;
            }
            ctx.sleep(interval).await?;
        }

        outputs.insert(Self::PORT_ITERATION.to_string(), DataValue::Number(runs as f64));
        outputs.insert(Self::PORT_COMPLETED.to_string(), DataValue::Boolean(true));
        Ok(outputs)
    }
}

inventory::submit!(plexus_engine::NodeRegistration {
    factory: || std::sync::Arc::new(ScheduledNode),
});
