//! Static execution plan of one graph
//!
//! Resolves every node's implementation and port definitions once, and keeps
//! only the connections whose ports exist on both ends.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::error::{EngineError, Result};
use crate::node::{DefinitionContext, NodeImpl};
use crate::registry::NodeRegistry;
use crate::types::{GraphNode, NodeConnection, NodeGraph, NodeId, PortDefinition, PortId, Project, ProjectId};

pub(crate) struct NodePlan {
    pub node: Arc<GraphNode>,
    pub implementation: Arc<dyn NodeImpl>,
    pub inputs: Vec<PortDefinition>,
    pub outputs: Vec<PortDefinition>,
    /// Valid connections feeding this node
    pub incoming: Vec<NodeConnection>,
    /// Distinct nodes this node reads from
    pub producers: HashSet<NodeId>,
    /// A required input without a connection or default; the node can never run
    pub unconnected_required: Option<PortId>,
}

impl NodePlan {
    pub fn input(&self, port_id: &str) -> Option<&PortDefinition> {
        self.inputs.iter().find(|p| p.id == port_id)
    }
}

pub(crate) struct ExecutionPlan {
    pub nodes: Vec<NodePlan>,
    pub index: HashMap<NodeId, usize>,
}

impl ExecutionPlan {
    pub fn build(
        graph: &NodeGraph,
        project: &Project,
        referenced_projects: &HashMap<ProjectId, Arc<Project>>,
        registry: &NodeRegistry,
    ) -> Result<Self> {
        let nodes_by_id = graph.nodes_by_id();

        let mut resolved = Vec::with_capacity(graph.nodes.len());
        for node in &graph.nodes {
            let implementation =
                registry
                    .get(&node.node_type)
                    .ok_or_else(|| EngineError::UnknownNodeType {
                        node_id: node.id.clone(),
                        node_type: node.node_type.clone(),
                    })?;
            let connections = graph.connections_for(&node.id);
            let ctx = DefinitionContext {
                node,
                connections: &connections,
                nodes: &nodes_by_id,
                project,
                referenced_projects,
            };
            let inputs = implementation.input_definitions(&ctx);
            let outputs = implementation.output_definitions(&ctx);
            resolved.push((node, implementation, inputs, outputs));
        }

        let outputs_by_node: HashMap<&str, HashSet<&str>> = resolved
            .iter()
            .map(|(node, _, _, outputs)| {
                (
                    node.id.as_str(),
                    outputs.iter().map(|p| p.id.as_str()).collect(),
                )
            })
            .collect();

        let mut nodes = Vec::with_capacity(resolved.len());
        for (node, implementation, inputs, outputs) in &resolved {
            let input_ids: HashSet<&str> = inputs.iter().map(|p| p.id.as_str()).collect();
            let incoming: Vec<NodeConnection> = graph
                .incoming(&node.id)
                .filter(|c| {
                    let valid = input_ids.contains(c.input_id.as_str())
                        && outputs_by_node
                            .get(c.output_node_id.as_str())
                            .is_some_and(|o| o.contains(c.output_id.as_str()));
                    if !valid {
                        log::warn!(
                            "Ignoring connection {}.{} -> {}.{}: port not defined",
                            c.output_node_id,
                            c.output_id,
                            c.input_node_id,
                            c.input_id
                        );
                    }
                    valid
                })
                .cloned()
                .collect();
            let producers = incoming.iter().map(|c| c.output_node_id.clone()).collect();
            let unconnected_required = inputs
                .iter()
                .find(|port| {
                    port.required
                        && port.default_value.is_none()
                        && !incoming.iter().any(|c| c.input_id == port.id)
                })
                .map(|port| port.id.clone());
            nodes.push(NodePlan {
                node: Arc::new((*node).clone()),
                implementation: implementation.clone(),
                inputs: inputs.clone(),
                outputs: outputs.clone(),
                incoming,
                producers,
                unconnected_required,
            });
        }

        let index = nodes
            .iter()
            .enumerate()
            .map(|(i, p)| (p.node.id.clone(), i))
            .collect();
        Ok(Self { nodes, index })
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }
}
