//! Flow nodes
//!
//! Nodes that run other graphs (once, in a loop, on a schedule) or hold
//! values back for a while.

mod delay;
mod loop_until;
mod scheduled;
mod sub_graph;

pub use delay::{DelayData, DelayNode};
pub use loop_until::{LoopCondition, LoopUntilData, LoopUntilNode};
pub use scheduled::{ScheduledData, ScheduledNode};
pub use sub_graph::{SubGraphData, SubGraphNode};

use std::collections::HashMap;

use plexus_engine::coerce::coerce_to_bool;
use plexus_engine::{
    DataValue, DefinitionContext, EngineError, GraphProcessor, NodeContext, NodeGraph, PortDefinition, PortValues,
    Result,
};

use crate::io::{graph_input_ports, graph_output_ports};

/// The graph a flow node targets, from the current or a referenced project
fn target_graph<'a>(ctx: &DefinitionContext<'a>, graph_id: &str, project_id: Option<&str>) -> Option<&'a NodeGraph> {
    ctx.resolve_project(project_id)?.graph(graph_id)
}

fn target_input_ports(ctx: &DefinitionContext<'_>, graph_id: &str, project_id: Option<&str>) -> Vec<PortDefinition> {
    target_graph(ctx, graph_id, project_id)
        .map(graph_input_ports)
        .unwrap_or_default()
}

fn target_output_ports(ctx: &DefinitionContext<'_>, graph_id: &str, project_id: Option<&str>) -> Vec<PortDefinition> {
    target_graph(ctx, graph_id, project_id)
        .map(graph_output_ports)
        .unwrap_or_default()
}

/// Node inputs, with `defaults` filling the graph inputs left unconnected
fn with_input_defaults(mut inputs: PortValues, defaults: &HashMap<String, DataValue>) -> PortValues {
    for (id, value) in defaults {
        inputs.entry(id.clone()).or_insert_with(|| value.clone());
    }
    inputs
}

/// Processor running `graph_id` within the current run
fn sub_processor(ctx: &NodeContext, graph_id: &str, project_id: Option<&str>) -> Result<GraphProcessor> {
    if graph_id.is_empty() {
        return Err(EngineError::failed("No target graph selected"));
    }
    ctx.create_sub_processor(graph_id, project_id)
}

/// Run `graph_id` once as a subgraph of the current run
async fn run_graph(
    ctx: &NodeContext,
    graph_id: &str,
    project_id: Option<&str>,
    inputs: PortValues,
) -> Result<PortValues> {
    sub_processor(ctx, graph_id, project_id)?
        .process_subgraph(inputs)
        .await
}

/// Whether an output is present, not excluded and truthy
fn is_truthy(value: Option<&DataValue>) -> bool {
    value.is_some_and(|v| !v.is_excluded() && coerce_to_bool(v).unwrap_or(false))
}
