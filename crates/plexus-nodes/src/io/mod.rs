//! Graph input/output and text nodes

mod graph_input;
mod graph_output;
mod text;

pub use graph_input::{GraphInputData, GraphInputNode};
pub use graph_output::{GraphOutputData, GraphOutputNode};
pub use text::{TextData, TextNode};

use std::collections::BTreeMap;

use plexus_engine::{NodeGraph, PortDefinition};

/// Ports mirroring a graph's `graphInput` nodes, one per distinct id, sorted
pub fn graph_input_ports(graph: &NodeGraph) -> Vec<PortDefinition> {
    let mut ports = BTreeMap::new();
    for node in graph.nodes.iter().filter(|n| n.node_type == GraphInputNode::NODE_TYPE) {
        let data: GraphInputData = node.data_as().unwrap_or_default();
        ports
            .entry(data.id.clone())
            .or_insert_with(|| PortDefinition::optional(data.id.clone(), data.id, data.data_type).coerced());
    }
    ports.into_values().collect()
}

/// Ports mirroring a graph's `graphOutput` nodes, one per distinct id, sorted
pub fn graph_output_ports(graph: &NodeGraph) -> Vec<PortDefinition> {
    let mut ports = BTreeMap::new();
    for node in graph.nodes.iter().filter(|n| n.node_type == GraphOutputNode::NODE_TYPE) {
        let data: GraphOutputData = node.data_as().unwrap_or_default();
        ports
            .entry(data.id.clone())
            .or_insert_with(|| PortDefinition::optional(data.id.clone(), data.id, data.data_type));
    }
    ports.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::node;
    use plexus_engine::DataType;
    use serde_json::json;

    #[test]
    fn test_graph_ports_are_distinct_and_sorted() {
        let graph = NodeGraph::new("g", "G")
            .with_node(node("a", "graphInput", json!({"id": "query", "dataType": "string"})))
            .with_node(node("b", "graphInput", json!({"id": "limit", "dataType": "number"})))
            .with_node(node("c", "graphInput", json!({"id": "query", "dataType": "string"})))
            .with_node(node("d", "graphOutput", json!({"id": "answer"})));

        let inputs = graph_input_ports(&graph);
        let ids: Vec<&str> = inputs.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["limit", "query"]);
        assert_eq!(inputs[0].primary_type(), DataType::NUMBER);

        let outputs = graph_output_ports(&graph);
        assert_eq!(outputs.len(), 1);
        assert_eq!(outputs[0].primary_type(), DataType::ANY);
    }
}
