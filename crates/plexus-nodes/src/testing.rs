//! Shared fixtures for node tests
//!
//! Node contexts only exist inside a run, so nodes are tested by running
//! small graphs against the built-in registry.

use std::sync::Arc;

use plexus_engine::{
    DataType, DataValue, GraphNode, GraphProcessor, NodeCategory, NodeGraph, NodeMetadata, NodeRegistry,
    PortDefinition, PortValues, ProcessContext, Project, Result, VecEventSink,
};

pub fn node(id: &str, node_type: &str, data: serde_json::Value) -> GraphNode {
    GraphNode::new(id, node_type, id).with_data(data)
}

pub fn values<const N: usize>(pairs: [(&str, DataValue); N]) -> PortValues {
    pairs
        .into_iter()
        .map(|(port, value)| (port.to_string(), value))
        .collect()
}

/// Processor over the first graph, with the others callable as subgraphs
pub fn processor(graphs: Vec<NodeGraph>) -> GraphProcessor {
    processor_with(NodeRegistry::with_builtins(), graphs)
}

pub fn processor_with(registry: NodeRegistry, graphs: Vec<NodeGraph>) -> GraphProcessor {
    let project = graphs
        .into_iter()
        .fold(Project::new("project", "Project"), Project::with_graph);
    GraphProcessor::new(Arc::new(project), Arc::new(registry)).unwrap()
}

/// Built-ins plus `increment`: outputs `n + 1` as `n` and whether it is odd as `odd`
pub fn registry_with_increment() -> NodeRegistry {
    let mut registry = NodeRegistry::with_builtins();
    registry.register_callback(
        NodeMetadata::new("increment", "Increment", NodeCategory::Custom("test".to_string())),
        vec![PortDefinition::required("n", "N", DataType::NUMBER).coerced()],
        vec![
            PortDefinition::optional("n", "N", DataType::NUMBER),
            PortDefinition::optional("odd", "Odd", DataType::BOOLEAN),
        ],
        |_node, inputs, _ctx| async move {
            let n = inputs.get("n").and_then(DataValue::as_number).unwrap_or(0.0) + 1.0;
            Ok(PortValues::from([
                ("n".to_string(), DataValue::Number(n)),
                ("odd".to_string(), DataValue::Boolean(n % 2.0 == 1.0)),
            ]))
        },
    );
    registry
}

/// Graph `id` mapping input `n` to outputs `n` (n + 1) and `odd`
pub fn counter_graph(id: &str) -> NodeGraph {
    NodeGraph::new(id, id)
        .with_node(node("in", "graphInput", serde_json::json!({"id": "n", "dataType": "number"})))
        .with_node(node("inc", "increment", serde_json::json!({})))
        .with_node(node("n", "graphOutput", serde_json::json!({"id": "n", "dataType": "number"})))
        .with_node(node("odd", "graphOutput", serde_json::json!({"id": "odd", "dataType": "boolean"})))
        .connect("in", "data", "inc", "n")
        .connect("inc", "n", "n", "value")
        .connect("inc", "odd", "odd", "value")
}

pub async fn run(processor: &GraphProcessor, inputs: PortValues) -> Result<PortValues> {
    processor
        .process_graph(ProcessContext::new(), inputs, PortValues::new())
        .await
}

/// Run and collect every event of the run
pub async fn run_recorded(processor: &GraphProcessor, inputs: PortValues) -> (Result<PortValues>, Arc<VecEventSink>) {
    let sink = Arc::new(VecEventSink::new());
    processor.add_sink(sink.clone());
    let result = run(processor, inputs).await;
    (result, sink)
}

/// Graph `id` whose input `input` feeds output `output` through a passthrough
pub fn echo_graph(id: &str, input: &str, output: &str) -> NodeGraph {
    NodeGraph::new(id, id)
        .with_node(node("in", "graphInput", serde_json::json!({"id": input, "dataType": "any"})))
        .with_node(node("out", "graphOutput", serde_json::json!({"id": output, "dataType": "any"})))
        .connect("in", "data", "out", "value")
}
