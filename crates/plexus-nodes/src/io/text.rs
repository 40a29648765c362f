//! Text Node
//!
//! Outputs a text template with `{{name}}` placeholders filled from inputs.
//! Each distinct placeholder becomes an input port.

use async_trait::async_trait;
use plexus_engine::coerce::coerce_to_string;
use plexus_engine::{
    DataType, DataValue, DefinitionContext, GraphNode, NodeCategory, NodeContext, NodeImpl, NodeMetadata,
    PortDefinition, PortValues, Result,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TextData {
    pub text: String,
}

pub struct TextNode;

impl TextNode {
    pub const NODE_TYPE: &'static str = "text";
    pub const PORT_OUTPUT: &'static str = "output";
}

/// Distinct placeholder names in order of first appearance
fn placeholders(template: &str) -> Vec<String> {
    let mut names = Vec::new();
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            break;
        };
        let name = after[..end].trim();
        if !name.is_empty() && !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
        rest = &after[end + 2..];
    }
    names
}

/// Replace each `{{name}}` with `lookup(name)`; unknown names become empty
fn interpolate(template: &str, lookup: impl Fn(&str) -> Option<String>) -> String {
    let mut output = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            break;
        };
        output.push_str(&rest[..start]);
        output.push_str(&lookup(after[..end].trim()).unwrap_or_default());
        rest = &after[end + 2..];
    }
    output.push_str(rest);
    output
}

#[async_trait]
impl NodeImpl for TextNode {
    fn metadata(&self) -> NodeMetadata {
        NodeMetadata::new(Self::NODE_TYPE, "Text", NodeCategory::Text)
            .with_description("Outputs text, interpolating {{placeholders}} from its inputs")
    }

    fn default_data(&self) -> serde_json::Value {
        serde_json::json!({"text": "{{input}}"})
    }

    fn input_definitions(&self, ctx: &DefinitionContext<'_>) -> Vec<PortDefinition> {
        let data: TextData = ctx.node.data_as().unwrap_or_default();
        placeholders(&data.text)
            .into_iter()
            .map(|name| PortDefinition::optional(name.clone(), name, DataType::STRING).coerced())
            .collect()
    }

    fn output_definitions(&self, _ctx: &DefinitionContext<'_>) -> Vec<PortDefinition> {
        vec![PortDefinition::optional(Self::PORT_OUTPUT, "Output", DataType::STRING)]
    }

    async fn process(&self, node: &GraphNode, inputs: PortValues, _ctx: &NodeContext) -> Result<PortValues> {
        let data: TextData = node.data_as()?;
        let text = interpolate(&data.text, |name| {
            inputs.get(name).and_then(|value| coerce_to_string(value).ok())
        });
        Ok(PortValues::from([(Self::PORT_OUTPUT.to_string(), DataValue::String(text))]))
    }
}

inventory::submit!(plexus_engine::NodeRegistration {
    factory: || std::sync::Arc::new(TextNode),
});

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{node, processor, run, values};
    use plexus_engine::NodeGraph;
    use serde_json::json;

    #[test]
    fn test_placeholders() {
        assert_eq!(
            placeholders("{{ name }} is {{age}}; {{name}} again {{unclosed"),
            vec!["name", "age"]
        );
    }

    #[test]
    fn test_interpolate_missing_as_empty() {
        let text = interpolate("Hello {{name}}{{missing}}!", |name| {
            (name == "name").then(|| "Ada".to_string())
        });
        assert_eq!(text, "Hello Ada!");
    }

    #[tokio::test]
    async fn test_text_node_in_graph() {
        let graph = NodeGraph::new("main", "Main")
            .with_node(node("n", "graphInput", json!({"id": "n", "dataType": "number"})))
            .with_node(node("t", "text", json!({"text": "count: {{n}}"})))
            .with_node(node("out", "graphOutput", json!({"id": "text"})))
            .connect("n", "data", "t", "n")
            .connect("t", "output", "out", "value");
        let processor = processor(vec![graph]);

        let outputs = run(&processor, values([("n", DataValue::Number(3.0))])).await.unwrap();
        assert_eq!(outputs["text"], DataValue::string("count: 3"));
    }
}
