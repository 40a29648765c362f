//! Coalesce Node
//!
//! Outputs the first of its inputs that carries a real value.

use async_trait::async_trait;
use plexus_engine::{
    dynamic_port_count, DataType, DataValue, DefinitionContext, GraphNode, NodeCategory, NodeContext,
    NodeImpl, NodeMetadata, PortDefinition, PortValues, Result,
};

/// Coalesce Node
///
/// Inputs `input1..N` grow as wires are attached. An excluded
/// `conditional` input excludes the output outright; otherwise the first
/// non-excluded input wins and the output is excluded when none qualifies.
pub struct CoalesceNode;

impl CoalesceNode {
    pub const NODE_TYPE: &'static str = "coalesce";
    pub const PORT_CONDITIONAL: &'static str = "conditional";
    pub const PORT_OUTPUT: &'static str = "output";
    pub const INPUT_PREFIX: &'static str = "input";
}

#[async_trait]
impl NodeImpl for CoalesceNode {
    fn metadata(&self) -> NodeMetadata {
        NodeMetadata::new(Self::NODE_TYPE, "Coalesce", NodeCategory::Control)
            .with_description("Outputs the first input that is not excluded")
    }

    fn input_definitions(&self, ctx: &DefinitionContext<'_>) -> Vec<PortDefinition> {
        let mut ports = vec![PortDefinition::optional(Self::PORT_CONDITIONAL, "Conditional", DataType::ANY)];
        for i in 1..=dynamic_port_count(ctx, Self::INPUT_PREFIX) {
            ports.push(PortDefinition::optional(
                format!("{}{}", Self::INPUT_PREFIX, i),
                format!("Input {}", i),
                DataType::ANY,
            ));
        }
        ports
    }

    fn output_definitions(&self, _ctx: &DefinitionContext<'_>) -> Vec<PortDefinition> {
        vec![PortDefinition::optional(Self::PORT_OUTPUT, "Output", DataType::ANY)]
    }

    fn accepts_excluded_inputs(&self) -> bool {
        true
    }

    async fn process(&self, _node: &GraphNode, inputs: PortValues, _ctx: &NodeContext) -> Result<PortValues> {
        let excluded = PortValues::from([(Self::PORT_OUTPUT.to_string(), DataValue::excluded())]);
        if inputs
            .get(Self::PORT_CONDITIONAL)
            .is_some_and(DataValue::is_excluded)
        {
            return Ok(excluded);
        }

        let mut numbered: Vec<(usize, &DataValue)> = inputs
            .iter()
            .filter_map(|(port, value)| {
                let index = port.strip_prefix(Self::INPUT_PREFIX)?.parse().ok()?;
                Some((index, value))
            })
            .collect();
        numbered.sort_by_key(|(index, _)| *index);

        Ok(match numbered.into_iter().find(|(_, value)| !value.is_excluded()) {
            Some((_, value)) => PortValues::from([(Self::PORT_OUTPUT.to_string(), value.clone())]),
            None => excluded,
        })
    }
}

inventory::submit!(plexus_engine::NodeRegistration {
    factory: || std::sync::Arc::new(CoalesceNode),
});

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{node, processor, run, values};
    use plexus_engine::NodeGraph;
    use serde_json::json;

    /// `if` excludes one of two branches; coalesce joins them again
    fn graph() -> NodeGraph {
        NodeGraph::new("main", "Main")
            .with_node(node("cond", "graphInput", json!({"id": "cond", "dataType": "boolean"})))
            .with_node(node("value", "graphInput", json!({"id": "value", "dataType": "string"})))
            .with_node(node("if", "if", json!({})))
            .with_node(node("merge", "coalesce", json!({})))
            .with_node(node("out", "graphOutput", json!({"id": "result"})))
            .connect("cond", "data", "if", "if")
            .connect("value", "data", "if", "value")
            .connect("if", "falseOutput", "merge", "input1")
            .connect("if", "output", "merge", "input2")
            .connect("merge", "output", "out", "value")
    }

    #[tokio::test]
    async fn test_first_available_value_wins() {
        let processor = processor(vec![graph()]);
        let outputs = run(
            &processor,
            values([
                ("cond", DataValue::Boolean(true)),
                ("value", DataValue::string("kept")),
            ]),
        )
        .await
        .unwrap();
        assert_eq!(outputs["result"], DataValue::string("kept"));
    }

    #[tokio::test]
    async fn test_excluded_conditional_excludes_output() {
        let graph = graph()
            .with_node(node("gate", "if", json!({})))
            .connect("cond", "data", "gate", "if")
            .connect("gate", "falseOutput", "merge", "conditional");
        let processor = processor(vec![graph]);
        let outputs = run(
            &processor,
            values([
                ("cond", DataValue::Boolean(true)),
                ("value", DataValue::string("kept")),
            ]),
        )
        .await
        .unwrap();
        assert!(outputs["result"].is_excluded());
    }
}
