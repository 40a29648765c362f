//! Node type registry for dynamic node resolution
//!
//! This module provides a registry that maps node type tags to their
//! implementations. Built-in node types register themselves at link time
//! through `inventory`; hosts add their own with [`NodeRegistry::register`]
//! or [`NodeRegistry::register_callback`].
//!
//! # Usage
//!
//! ```ignore
//! use plexus_engine::NodeRegistry;
//!
//! let mut registry = NodeRegistry::with_builtins();
//! registry.register(Arc::new(MyNode));
//! registry.merge(plugin_registry); // Add plugin nodes
//! ```

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;

use crate::context::NodeContext;
use crate::error::Result;
use crate::events::PortValues;
use crate::node::{DefinitionContext, NodeCategory, NodeImpl, NodeMetadata};
use crate::types::{GraphNode, PortDefinition};

/// Link-time registration of a node type.
///
/// # Example
///
/// ```ignore
/// inventory::submit!(plexus_engine::NodeRegistration {
///     factory: || std::sync::Arc::new(IfNode),
/// });
/// ```
pub struct NodeRegistration {
    /// Factory function that creates the node implementation.
    pub factory: fn() -> Arc<dyn NodeImpl>,
}

inventory::collect!(NodeRegistration);

/// Registry of node types
pub struct NodeRegistry {
    entries: HashMap<String, Arc<dyn NodeImpl>>,
}

impl NodeRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Create a registry holding every node type submitted through `inventory`
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for registration in inventory::iter::<NodeRegistration> {
            registry.register((registration.factory)());
        }
        log::debug!("Registered {} built-in node types", registry.entries.len());
        registry
    }

    /// Register a node implementation under its metadata's type tag
    pub fn register(&mut self, implementation: Arc<dyn NodeImpl>) {
        let node_type = implementation.metadata().node_type;
        if self.entries.insert(node_type.clone(), implementation).is_some() {
            log::debug!("Node type '{}' replaced", node_type);
        }
    }

    /// Register a node type with fixed ports backed by an async callback
    ///
    /// The callback receives the node, its inputs and a clone of its context.
    pub fn register_callback<F, Fut>(
        &mut self,
        metadata: NodeMetadata,
        inputs: Vec<PortDefinition>,
        outputs: Vec<PortDefinition>,
        callback: F,
    ) where
        F: Fn(GraphNode, PortValues, NodeContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<PortValues>> + Send + 'static,
    {
        self.register(Arc::new(CallbackNode::new(metadata, inputs, outputs, callback)));
    }

    /// Get the implementation for a node type
    pub fn get(&self, node_type: &str) -> Option<Arc<dyn NodeImpl>> {
        self.entries.get(node_type).cloned()
    }

    /// Check if a node type is registered
    pub fn has_node_type(&self, node_type: &str) -> bool {
        self.entries.contains_key(node_type)
    }

    /// List all registered node type tags
    pub fn node_types(&self) -> Vec<&str> {
        self.entries.keys().map(|s| s.as_str()).collect()
    }

    /// Get all registered metadata
    pub fn all_metadata(&self) -> Vec<NodeMetadata> {
        self.entries.values().map(|e| e.metadata()).collect()
    }

    /// Get metadata grouped by category
    pub fn metadata_by_category(&self) -> HashMap<NodeCategory, Vec<NodeMetadata>> {
        let mut grouped: HashMap<NodeCategory, Vec<NodeMetadata>> = HashMap::new();
        for metadata in self.all_metadata() {
            grouped
                .entry(metadata.category.clone())
                .or_default()
                .push(metadata);
        }
        grouped
    }

    /// Create a fresh node of the given type
    pub fn create_node(&self, node_type: &str, id: &str) -> Option<GraphNode> {
        self.entries.get(node_type).map(|e| e.create(id))
    }

    /// Merge another registry into this one
    ///
    /// Entries from `other` override entries in `self` if they share the same node_type.
    pub fn merge(&mut self, other: NodeRegistry) {
        self.entries.extend(other.entries);
    }
}

impl Default for NodeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

type BoxedCallback = Box<
    dyn Fn(GraphNode, PortValues, NodeContext) -> Pin<Box<dyn Future<Output = Result<PortValues>> + Send>>
        + Send
        + Sync,
>;

/// Async callback-based node type with fixed ports
///
/// Lets hosts and bindings define node types without a dedicated struct.
pub struct CallbackNode {
    metadata: NodeMetadata,
    inputs: Vec<PortDefinition>,
    outputs: Vec<PortDefinition>,
    accepts_excluded: bool,
    callback: BoxedCallback,
}

impl CallbackNode {
    pub fn new<F, Fut>(
        metadata: NodeMetadata,
        inputs: Vec<PortDefinition>,
        outputs: Vec<PortDefinition>,
        callback: F,
    ) -> Self
    where
        F: Fn(GraphNode, PortValues, NodeContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<PortValues>> + Send + 'static,
    {
        Self {
            metadata,
            inputs,
            outputs,
            accepts_excluded: false,
            callback: Box::new(move |node, values, ctx| Box::pin(callback(node, values, ctx))),
        }
    }

    /// Receive excluded inputs instead of being excluded
    pub fn accepting_excluded(mut self) -> Self {
        self.accepts_excluded = true;
        self
    }
}

#[async_trait]
impl NodeImpl for CallbackNode {
    fn metadata(&self) -> NodeMetadata {
        self.metadata.clone()
    }

    fn input_definitions(&self, _ctx: &DefinitionContext<'_>) -> Vec<PortDefinition> {
        self.inputs.clone()
    }

    fn output_definitions(&self, _ctx: &DefinitionContext<'_>) -> Vec<PortDefinition> {
        self.outputs.clone()
    }

    fn accepts_excluded_inputs(&self) -> bool {
        self.accepts_excluded
    }

    async fn process(&self, node: &GraphNode, inputs: PortValues, ctx: &NodeContext) -> Result<PortValues> {
        (self.callback)(node.clone(), inputs, ctx.clone()).await
    }
}
