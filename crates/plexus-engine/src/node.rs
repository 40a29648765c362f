//! The node contract
//!
//! Every node type implements [`NodeImpl`]: it describes itself with
//! [`NodeMetadata`], declares its ports (possibly depending on the node's
//! configuration, its connections and the enclosing project) and processes
//! inputs into outputs. The scheduler never looks further into a node than
//! this trait.
//!
//! # Example
//!
//! ```ignore
//! use plexus_engine::{NodeImpl, NodeMetadata, NodeCategory, DefinitionContext};
//!
//! struct Upper;
//!
//! #[async_trait]
//! impl NodeImpl for Upper {
//!     fn metadata(&self) -> NodeMetadata {
//!         NodeMetadata::new("upper", "Uppercase", NodeCategory::Text)
//!     }
//!     fn input_definitions(&self, _: &DefinitionContext<'_>) -> Vec<PortDefinition> {
//!         vec![PortDefinition::required("input", "Input", DataType::STRING).coerced()]
//!     }
//!     fn output_definitions(&self, _: &DefinitionContext<'_>) -> Vec<PortDefinition> {
//!         vec![PortDefinition::optional("output", "Output", DataType::STRING)]
//!     }
//!     async fn process(&self, _: &GraphNode, inputs: PortValues, _: &NodeContext) -> Result<PortValues> {
//!         let text = coerce_to_string(&inputs["input"])?;
//!         Ok(PortValues::from([("output".into(), DataValue::String(text.to_uppercase()))]))
//!     }
//! }
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::context::NodeContext;
use crate::error::Result;
use crate::events::PortValues;
use crate::types::{GraphNode, NodeConnection, NodeId, PortDefinition, Project, ProjectId};

/// Category for grouping node types in palettes
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum NodeCategory {
    /// Graph inputs and outputs
    Io,
    /// Branching and merging
    Control,
    /// Globals and context values
    State,
    /// Subgraph calls, loops and scheduling
    Flow,
    /// User input, user events, external calls
    Interaction,
    Text,
    Custom(String),
}

/// Static description of a node type
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeMetadata {
    /// Unique type tag (e.g., "subGraph")
    pub node_type: String,
    /// Human-readable label
    pub label: String,
    #[serde(default)]
    pub description: String,
    pub category: NodeCategory,
}

impl NodeMetadata {
    pub fn new(node_type: impl Into<String>, label: impl Into<String>, category: NodeCategory) -> Self {
        Self {
            node_type: node_type.into(),
            label: label.into(),
            description: String::new(),
            category,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Graph state port definitions may depend on
pub struct DefinitionContext<'a> {
    pub node: &'a GraphNode,
    /// Connections touching this node, on either side
    pub connections: &'a [NodeConnection],
    pub nodes: &'a HashMap<NodeId, GraphNode>,
    pub project: &'a Project,
    pub referenced_projects: &'a HashMap<ProjectId, Arc<Project>>,
}

impl<'a> DefinitionContext<'a> {
    /// Connections feeding this node's inputs
    pub fn incoming(&self) -> impl Iterator<Item = &'a NodeConnection> + '_ {
        self.connections
            .iter()
            .filter(move |c| c.input_node_id == self.node.id)
    }

    /// Resolve a project by id: the current project or a referenced one
    pub fn resolve_project(&self, project_id: Option<&str>) -> Option<&'a Project> {
        match project_id {
            None => Some(self.project),
            Some(id) if id == self.project.id() => Some(self.project),
            Some(id) => self.referenced_projects.get(id).map(|p| p.as_ref()),
        }
    }
}

/// Behaviour of one node type
#[async_trait]
pub trait NodeImpl: Send + Sync {
    fn metadata(&self) -> NodeMetadata;

    /// Default configuration of a fresh node
    fn default_data(&self) -> serde_json::Value {
        serde_json::Value::Object(Default::default())
    }

    /// Create a node instance of this type
    fn create(&self, id: &str) -> GraphNode {
        let metadata = self.metadata();
        GraphNode::new(id, metadata.node_type, metadata.label).with_data(self.default_data())
    }

    fn input_definitions(&self, ctx: &DefinitionContext<'_>) -> Vec<PortDefinition>;

    fn output_definitions(&self, ctx: &DefinitionContext<'_>) -> Vec<PortDefinition>;

    /// Nodes that return true receive `control-flow-excluded` inputs instead
    /// of being excluded themselves
    fn accepts_excluded_inputs(&self) -> bool {
        false
    }

    async fn process(&self, node: &GraphNode, inputs: PortValues, ctx: &NodeContext) -> Result<PortValues>;
}

/// Count of `<prefix>N` ports needed so one is always free for a new wire
///
/// Used by nodes whose input set grows as connections are attached.
pub fn dynamic_port_count(ctx: &DefinitionContext<'_>, prefix: &str) -> usize {
    let highest = ctx
        .incoming()
        .filter_map(|c| c.input_id.strip_prefix(prefix))
        .filter_map(|n| n.parse::<usize>().ok())
        .max()
        .unwrap_or(0);
    highest + 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::NodeGraph;

    #[test]
    fn test_dynamic_port_count() {
        let graph = NodeGraph::new("g", "G")
            .with_node(GraphNode::new("a", "x", "A"))
            .with_node(GraphNode::new("b", "x", "B"))
            .connect("a", "out", "b", "input1")
            .connect("a", "out", "b", "input3");
        let project = Project::new("p", "P").with_graph(graph.clone());
        let nodes = graph.nodes_by_id();
        let node = graph.node("b").unwrap();
        let connections = graph.connections_for("b");
        let referenced = HashMap::new();
        let ctx = DefinitionContext {
            node,
            connections: &connections,
            nodes: &nodes,
            project: &project,
            referenced_projects: &referenced,
        };
        assert_eq!(dynamic_port_count(&ctx, "input"), 4);
        assert_eq!(ctx.incoming().count(), 2);
        assert!(ctx.resolve_project(Some("p")).is_some());
        assert!(ctx.resolve_project(Some("q")).is_none());
    }
}
