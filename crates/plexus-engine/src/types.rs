//! Core types for dataflow graphs
//!
//! These types define the structure of a project: its graphs, the node
//! instances inside them, the connections between ports, and the port
//! definitions node types declare.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::value::{DataType, DataValue};

/// Unique identifier for a node within a graph
pub type NodeId = String;

/// Unique identifier for a port within one side of a node
pub type PortId = String;

/// Unique identifier for a graph within a project
pub type GraphId = String;

/// Unique identifier for a project
pub type ProjectId = String;

/// Definition of a port (input or output)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortDefinition {
    /// Unique identifier for this port
    pub id: PortId,
    /// Human-readable title
    pub title: String,
    /// Accepted data types; the first one is the preferred coercion target
    pub data_types: Vec<DataType>,
    /// Whether a value must arrive before the node may run (inputs only)
    #[serde(default)]
    pub required: bool,
    /// Whether a mismatched value may be coerced at consumption time
    #[serde(default)]
    pub coerced: bool,
    /// Default value for optional inputs that receive nothing
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<DataValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl PortDefinition {
    /// Create a required port
    pub fn required(id: impl Into<String>, title: impl Into<String>, data_type: DataType) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            data_types: vec![data_type],
            required: true,
            coerced: false,
            default_value: None,
            description: None,
        }
    }

    /// Create an optional port
    pub fn optional(id: impl Into<String>, title: impl Into<String>, data_type: DataType) -> Self {
        Self {
            required: false,
            ..Self::required(id, title, data_type)
        }
    }

    /// Permit coercion of mismatched values
    pub fn coerced(mut self) -> Self {
        self.coerced = true;
        self
    }

    /// Accept an additional data type
    pub fn or_type(mut self, data_type: DataType) -> Self {
        self.data_types.push(data_type);
        self
    }

    /// Set a default value for this port
    pub fn with_default(mut self, value: DataValue) -> Self {
        self.default_value = Some(value);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// The preferred data type of this port
    pub fn primary_type(&self) -> DataType {
        self.data_types.first().copied().unwrap_or(DataType::ANY)
    }

    /// Whether a value of `data_type` may be passed without coercion
    pub fn accepts(&self, data_type: &DataType) -> bool {
        self.data_types.is_empty() || self.data_types.iter().any(|t| t.accepts(data_type))
    }
}

/// A wire from one node's output port to another node's input port
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeConnection {
    pub output_node_id: NodeId,
    pub output_id: PortId,
    pub input_node_id: NodeId,
    pub input_id: PortId,
}

impl NodeConnection {
    pub fn new(
        output_node_id: impl Into<String>,
        output_id: impl Into<String>,
        input_node_id: impl Into<String>,
        input_id: impl Into<String>,
    ) -> Self {
        Self {
            output_node_id: output_node_id.into(),
            output_id: output_id.into(),
            input_node_id: input_node_id.into(),
            input_id: input_id.into(),
        }
    }
}

/// A node instance in a graph
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphNode {
    pub id: NodeId,
    /// Registry type tag
    #[serde(rename = "type")]
    pub node_type: String,
    pub title: String,
    /// Node-type specific configuration
    #[serde(default)]
    pub data: serde_json::Value,
    /// Fan out over array inputs
    #[serde(default)]
    pub is_split_run: bool,
    /// Maximum concurrent split-run elements
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub split_run_max: Option<usize>,
    /// Disabled nodes are excluded without running
    #[serde(default)]
    pub disabled: bool,
}

impl GraphNode {
    pub fn new(id: impl Into<String>, node_type: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            node_type: node_type.into(),
            title: title.into(),
            data: serde_json::Value::Null,
            is_split_run: false,
            split_run_max: None,
            disabled: false,
        }
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }

    /// Enable split runs with an optional concurrency bound
    pub fn split(mut self, max: Option<usize>) -> Self {
        self.is_split_run = true;
        self.split_run_max = max;
        self
    }

    /// Read the node's configuration into a typed struct
    pub fn data_as<T: serde::de::DeserializeOwned>(&self) -> crate::error::Result<T> {
        let data = if self.data.is_null() {
            serde_json::Value::Object(Default::default())
        } else {
            self.data.clone()
        };
        serde_json::from_value(data).map_err(|e| crate::error::EngineError::invalid_data(&self.id, e))
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphMetadata {
    pub id: GraphId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// A dataflow graph: node instances plus connections
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeGraph {
    pub metadata: GraphMetadata,
    pub nodes: Vec<GraphNode>,
    pub connections: Vec<NodeConnection>,
}

impl NodeGraph {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            metadata: GraphMetadata {
                id: id.into(),
                name: name.into(),
                description: String::new(),
            },
            nodes: Vec::new(),
            connections: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.metadata.id
    }

    pub fn with_node(mut self, node: GraphNode) -> Self {
        self.nodes.push(node);
        self
    }

    /// Connect `from_node.from_port` to `to_node.to_port`
    pub fn connect(
        mut self,
        from_node: impl Into<String>,
        from_port: impl Into<String>,
        to_node: impl Into<String>,
        to_port: impl Into<String>,
    ) -> Self {
        self.connections
            .push(NodeConnection::new(from_node, from_port, to_node, to_port));
        self
    }

    pub fn node(&self, id: &str) -> Option<&GraphNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Connections whose input side is `node_id`
    pub fn incoming(&self, node_id: &str) -> impl Iterator<Item = &NodeConnection> {
        let node_id = node_id.to_string();
        self.connections
            .iter()
            .filter(move |c| c.input_node_id == node_id)
    }

    /// Connections touching `node_id` on either side
    pub fn connections_for(&self, node_id: &str) -> Vec<NodeConnection> {
        self.connections
            .iter()
            .filter(|c| c.input_node_id == node_id || c.output_node_id == node_id)
            .cloned()
            .collect()
    }

    pub fn nodes_by_id(&self) -> HashMap<NodeId, GraphNode> {
        self.nodes.iter().map(|n| (n.id.clone(), n.clone())).collect()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectMetadata {
    pub id: ProjectId,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub main_graph_id: Option<GraphId>,
}

/// A set of graphs that can call each other
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub metadata: ProjectMetadata,
    pub graphs: HashMap<GraphId, NodeGraph>,
}

impl Project {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            metadata: ProjectMetadata {
                id: id.into(),
                title: title.into(),
                main_graph_id: None,
            },
            graphs: HashMap::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.metadata.id
    }

    pub fn with_graph(mut self, graph: NodeGraph) -> Self {
        if self.metadata.main_graph_id.is_none() {
            self.metadata.main_graph_id = Some(graph.metadata.id.clone());
        }
        self.graphs.insert(graph.metadata.id.clone(), graph);
        self
    }

    pub fn graph(&self, id: &str) -> Option<&NodeGraph> {
        self.graphs.get(id)
    }

    pub fn main_graph(&self) -> Option<&NodeGraph> {
        self.metadata
            .main_graph_id
            .as_deref()
            .and_then(|id| self.graphs.get(id))
    }
}
