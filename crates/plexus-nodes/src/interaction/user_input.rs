//! User Input Node
//!
//! Suspends until the host answers through `GraphProcessor::user_input`.

use async_trait::async_trait;
use plexus_engine::coerce::coerce_to_string;
use plexus_engine::{
    DataType, DataValue, DefinitionContext, GraphNode, NodeCategory, NodeContext, NodeImpl, NodeMetadata,
    PortDefinition, PortValues, Result, ScalarType,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct UserInputData {
    pub prompt: String,
    /// Ask the questions from the `questions` input instead of `prompt`
    pub use_input: bool,
}

impl Default for UserInputData {
    fn default() -> Self {
        Self {
            prompt: "This is an example question?".to_string(),
            use_input: false,
        }
    }
}

pub struct UserInputNode;

impl UserInputNode {
    pub const NODE_TYPE: &'static str = "userInput";
    pub const PORT_QUESTIONS: &'static str = "questions";
    pub const PORT_OUTPUT: &'static str = "output";
    pub const PORT_QUESTIONS_AND_ANSWERS: &'static str = "questionsAndAnswers";
}

#[async_trait]
impl NodeImpl for UserInputNode {
    fn metadata(&self) -> NodeMetadata {
        NodeMetadata::new(Self::NODE_TYPE, "User Input", NodeCategory::Interaction)
            .with_description("Pauses the node until the user answers its questions")
    }

    fn default_data(&self) -> serde_json::Value {
        serde_json::to_value(UserInputData::default()).unwrap_or_default()
    }

    fn input_definitions(&self, ctx: &DefinitionContext<'_>) -> Vec<PortDefinition> {
        let data: UserInputData = ctx.node.data_as().unwrap_or_default();
        if data.use_input {
            vec![PortDefinition::required(
                Self::PORT_QUESTIONS,
                "Questions",
                DataType::array_of(ScalarType::String),
            )
            .coerced()]
        } else {
            Vec::new()
        }
    }

    fn output_definitions(&self, _ctx: &DefinitionContext<'_>) -> Vec<PortDefinition> {
        vec![
            PortDefinition::optional(Self::PORT_OUTPUT, "Answers", DataType::array_of(ScalarType::String)),
            PortDefinition::optional(
                Self::PORT_QUESTIONS_AND_ANSWERS,
                "Q & A",
                DataType::array_of(ScalarType::String),
            ),
        ]
    }

    async fn process(&self, node: &GraphNode, inputs: PortValues, ctx: &NodeContext) -> Result<PortValues> {
        let data: UserInputData = node.data_as()?;
        let questions = match inputs.get(Self::PORT_QUESTIONS) {
            Some(value) if data.use_input => match value.arrayize() {
                Some(items) => items.iter().map(coerce_to_string).collect::<Result<Vec<_>>>()?,
                None => vec![coerce_to_string(value)?],
            },
            _ => vec![data.prompt],
        };

        log::debug!("'{}' waiting for {} answer(s)", node.title, questions.len());
        let answers = ctx.request_user_input(questions.clone()).await?;

        let pairs: Vec<String> = questions
            .iter()
            .zip(answers.iter())
            .map(|(question, answer)| format!("{}\n{}", question, answer))
            .collect();

        Ok(PortValues::from([
            (Self::PORT_OUTPUT.to_string(), DataValue::strings(answers)),
            (Self::PORT_QUESTIONS_AND_ANSWERS.to_string(), DataValue::strings(pairs)),
        ]))
    }
}

inventory::submit!(plexus_engine::NodeRegistration {
    factory: || std::sync::Arc::new(UserInputNode),
});

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{node, processor, run, values};
    use plexus_engine::{NodeGraph, ProcessEvent};
    use serde_json::json;

    fn graph(data: serde_json::Value) -> NodeGraph {
        NodeGraph::new("main", "Main")
            .with_node(node("q", "graphInput", json!({"id": "questions", "dataType": "string[]"})))
            .with_node(node("ask", "userInput", data))
            .with_node(node("answers", "graphOutput", json!({"id": "answers"})))
            .with_node(node("qa", "graphOutput", json!({"id": "qa"})))
            .connect("q", "data", "ask", "questions")
            .connect("ask", "output", "answers", "value")
            .connect("ask", "questionsAndAnswers", "qa", "value")
    }

    #[tokio::test]
    async fn test_waits_for_answers() {
        let processor = processor(vec![graph(json!({"prompt": "Name?"}))]);
        let request = processor.once("userInput");

        let answer = async {
            match request.await {
                Some(ProcessEvent::UserInput { node_id, prompts, .. }) => {
                    assert_eq!(prompts, vec!["Name?".to_string()]);
                    assert!(processor.user_input(&node_id, vec!["Ada".to_string()]));
                }
                other => panic!("unexpected event {:?}", other),
            }
        };
        let (result, _) = tokio::join!(run(&processor, PortValues::new()), answer);

        let outputs = result.unwrap();
        assert_eq!(outputs["answers"], DataValue::strings(["Ada"]));
        assert_eq!(outputs["qa"], DataValue::strings(["Name?\nAda"]));
    }

    #[tokio::test]
    async fn test_questions_from_input() {
        let processor = processor(vec![graph(json!({"useInput": true}))]);
        let request = processor.once("userInput");

        let answer = async {
            if let Some(ProcessEvent::UserInput { prompts, .. }) = request.await {
                assert_eq!(prompts.len(), 2);
                processor.user_input("ask", vec!["blue".to_string(), "7".to_string()]);
            }
        };
        let inputs = values([("questions", DataValue::strings(["Color?", "Number?"]))]);
        let (result, _) = tokio::join!(run(&processor, inputs), answer);

        let outputs = result.unwrap();
        assert_eq!(outputs["answers"], DataValue::strings(["blue", "7"]));
    }

    #[test]
    fn test_unanswered_request_is_rejected_on_abort() {
        tokio_test::block_on(async {
            let processor = processor(vec![graph(json!({"prompt": "Never answered"}))]);
            let request = processor.once("userInput");
            let abort = async {
                request.await;
                processor.abort(None);
            };
            let (result, _) = tokio::join!(run(&processor, PortValues::new()), abort);
            // A successful abort resolves with whatever was set so far
            assert!(result.unwrap().get("answers").is_none());
        });
    }
}
