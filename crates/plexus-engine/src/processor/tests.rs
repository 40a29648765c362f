use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use serde_json::json;

use super::*;
use crate::events::{ExclusionReason, VecEventSink};
use crate::node::{NodeCategory, NodeMetadata};
use crate::registry::CallbackNode;
use crate::types::{GraphNode, PortDefinition};
use crate::value::DataType;

fn metadata(node_type: &str) -> NodeMetadata {
    NodeMetadata::new(node_type, node_type, NodeCategory::Custom("test".into()))
}

fn text(node: &GraphNode, key: &str) -> String {
    node.data
        .get(key)
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .to_string()
}

/// Registry of small node types used across these tests
fn test_registry() -> NodeRegistry {
    let _ = env_logger::builder().is_test(true).try_init();
    let mut registry = NodeRegistry::new();

    // Emits `data.text` on "1" and an excluded value on "2"
    registry.register_callback(
        metadata("emit"),
        vec![],
        vec![
            PortDefinition::optional("1", "One", DataType::STRING),
            PortDefinition::optional("2", "Two", DataType::STRING),
        ],
        |node, _inputs, _ctx| async move {
            Ok(PortValues::from([
                ("1".to_string(), DataValue::string(text(&node, "text"))),
                ("2".to_string(), DataValue::excluded()),
            ]))
        },
    );

    registry.register_callback(
        metadata("upper"),
        vec![PortDefinition::required("input", "Input", DataType::STRING).coerced()],
        vec![PortDefinition::optional("output", "Output", DataType::STRING)],
        |_node, inputs, _ctx| async move {
            let input = crate::coerce::coerce_to_string(&inputs["input"])?;
            Ok(PortValues::from([(
                "output".to_string(),
                DataValue::String(input.to_uppercase()),
            )]))
        },
    );

    registry.register_callback(
        metadata("strict"),
        vec![PortDefinition::required("flag", "Flag", DataType::BOOLEAN)],
        vec![],
        |_node, _inputs, _ctx| async move { Ok(PortValues::new()) },
    );

    registry.register_callback(
        metadata("fail"),
        vec![PortDefinition::optional("input", "Input", DataType::ANY)],
        vec![PortDefinition::optional("output", "Output", DataType::ANY)],
        |node, _inputs, _ctx| async move { Err(EngineError::failed(text(&node, "message"))) },
    );

    registry.register_callback(
        metadata("waitGlobal"),
        vec![],
        vec![PortDefinition::optional("value", "Value", DataType::ANY)],
        |node, _inputs, ctx| async move {
            let value = ctx.wait_for_global(&text(&node, "id")).await?;
            Ok(PortValues::from([("value".to_string(), value)]))
        },
    );

    registry.register_callback(
        metadata("setGlobal"),
        vec![PortDefinition::required("value", "Value", DataType::ANY)],
        vec![],
        |node, inputs, ctx| async move {
            ctx.set_global(&text(&node, "id"), inputs["value"].clone());
            Ok(PortValues::new())
        },
    );

    registry.register_callback(
        metadata("ask"),
        vec![],
        vec![PortDefinition::optional("answer", "Answer", DataType::STRING)],
        |node, _inputs, ctx| async move {
            let answers = ctx.request_user_input(vec![text(&node, "prompt")]).await?;
            Ok(PortValues::from([(
                "answer".to_string(),
                DataValue::String(answers.join(",")),
            )]))
        },
    );

    registry.register_callback(
        metadata("input"),
        vec![],
        vec![PortDefinition::optional("value", "Value", DataType::ANY)],
        |node, _inputs, ctx| async move {
            let value = ctx
                .graph_input(&text(&node, "id"))
                .cloned()
                .unwrap_or_else(DataValue::excluded);
            Ok(PortValues::from([("value".to_string(), value)]))
        },
    );

    registry.register(Arc::new(
        CallbackNode::new(
            metadata("output"),
            vec![PortDefinition::required("value", "Value", DataType::ANY)],
            vec![],
            |node, inputs, ctx| async move {
                if let Some(value) = inputs.get("value") {
                    ctx.set_graph_output(text(&node, "id"), value.clone());
                }
                Ok(PortValues::new())
            },
        )
        .accepting_excluded(),
    ));

    registry.register_callback(
        metadata("call"),
        vec![PortDefinition::optional("input", "Input", DataType::ANY)],
        vec![PortDefinition::optional("output", "Output", DataType::ANY)],
        |node, inputs, ctx| async move {
            let sub = ctx.create_sub_processor(&text(&node, "graph"), None)?;
            let outputs = sub.process_subgraph(inputs).await?;
            Ok(PortValues::from([(
                "output".to_string(),
                outputs.get("output").cloned().unwrap_or_else(DataValue::excluded),
            )]))
        },
    );

    registry.register_callback(
        metadata("abort"),
        vec![PortDefinition::optional("input", "Input", DataType::ANY)],
        vec![],
        |node, inputs, ctx| async move {
            if let Some(value) = inputs.get("input") {
                ctx.set_graph_output("result", value.clone());
            }
            let message = text(&node, "error");
            ctx.abort_graph(if message.is_empty() { None } else { Some(message) });
            Ok(PortValues::new())
        },
    );

    registry.register_callback(
        metadata("external"),
        vec![PortDefinition::required("input", "Input", DataType::ANY)],
        vec![PortDefinition::optional("output", "Output", DataType::ANY)],
        |node, inputs, ctx| async move {
            let result = ctx
                .call_external_function(&text(&node, "function"), vec![inputs["input"].clone()])
                .await?;
            Ok(PortValues::from([("output".to_string(), result)]))
        },
    );

    registry
}

fn processor_for(graphs: Vec<NodeGraph>, registry: NodeRegistry) -> GraphProcessor {
    let project = graphs
        .into_iter()
        .fold(Project::new("project", "Test project"), Project::with_graph);
    GraphProcessor::new(Arc::new(project), Arc::new(registry)).unwrap()
}

fn node(id: &str, node_type: &str, data: serde_json::Value) -> GraphNode {
    GraphNode::new(id, node_type, id).with_data(data)
}

/// `name` or `name:nodeId` labels of the recorded events
fn labels(sink: &VecEventSink) -> Vec<String> {
    sink.events()
        .iter()
        .map(|e| match e.node_id() {
            Some(id) => format!("{}:{}", e.name(), id),
            None => e.name().to_string(),
        })
        .collect()
}

fn position(labels: &[String], label: &str) -> usize {
    labels
        .iter()
        .position(|l| l == label)
        .unwrap_or_else(|| panic!("missing event {} in {:?}", label, labels))
}

async fn run(processor: &GraphProcessor, inputs: PortValues) -> Result<PortValues> {
    processor
        .process_graph(ProcessContext::new(), inputs, PortValues::new())
        .await
}

#[tokio::test]
async fn test_excluded_branch_event_order() {
    let graph = NodeGraph::new("main", "Main")
        .with_node(node("A", "emit", json!({"text": "hi"})))
        .with_node(node("B", "upper", json!({})))
        .with_node(node("C", "upper", json!({})))
        .connect("A", "1", "B", "input")
        .connect("A", "2", "C", "input");
    let processor = processor_for(vec![graph], test_registry());
    let sink = Arc::new(VecEventSink::new());
    processor.add_sink(sink.clone());

    run(&processor, PortValues::new()).await.unwrap();

    assert_eq!(
        labels(&sink),
        [
            "start",
            "graphStart",
            "nodeStart:A",
            "nodeFinish:A",
            "nodeStart:B",
            "nodeExcluded:C",
            "nodeFinish:B",
            "graphFinish",
            "done",
        ]
    );
    assert_eq!(processor.status(), RunStatus::Done);
}

#[tokio::test]
async fn test_unconnected_required_input_excludes_node() {
    let graph = NodeGraph::new("main", "Main")
        .with_node(node("A", "emit", json!({"text": "hi"})))
        .with_node(node("B", "upper", json!({})))
        .with_node(node("lonely", "upper", json!({})))
        .with_node(node("after", "upper", json!({})))
        .with_node(node("out", "output", json!({"id": "result"})))
        .connect("A", "1", "B", "input")
        .connect("B", "output", "out", "value")
        .connect("lonely", "output", "after", "input");
    let processor = processor_for(vec![graph], test_registry());
    let sink = Arc::new(VecEventSink::new());
    processor.add_sink(sink.clone());

    let outputs = run(&processor, PortValues::new()).await.unwrap();

    assert_eq!(outputs["result"], DataValue::string("HI"));
    let labels = labels(&sink);
    assert!(!labels.contains(&"nodeStart:lonely".to_string()), "{:?}", labels);
    assert!(!labels.contains(&"nodeStart:after".to_string()), "{:?}", labels);
    let reasons: HashMap<String, ExclusionReason> = sink
        .events()
        .into_iter()
        .filter_map(|e| match e {
            ProcessEvent::NodeExcluded { node_id, reason, .. } => Some((node_id, reason)),
            _ => None,
        })
        .collect();
    assert_eq!(
        reasons["lonely"],
        ExclusionReason::UnconnectedInput {
            port_id: "input".into()
        }
    );
    assert!(matches!(
        &reasons["after"],
        ExclusionReason::ExcludedInput { from_node_id, .. } if from_node_id == "lonely"
    ));
    assert_eq!(processor.status(), RunStatus::Done);
}

#[tokio::test]
async fn test_exclusion_is_transitive() {
    let graph = NodeGraph::new("main", "Main")
        .with_node(node("A", "emit", json!({"text": "hi"})))
        .with_node(node("C", "upper", json!({})))
        .with_node(node("D", "upper", json!({})))
        .with_node(node("E", "upper", json!({})))
        .connect("A", "2", "C", "input")
        .connect("C", "output", "D", "input")
        .connect("D", "output", "E", "input");
    let processor = processor_for(vec![graph], test_registry());
    let sink = Arc::new(VecEventSink::new());
    processor.add_sink(sink.clone());

    run(&processor, PortValues::new()).await.unwrap();

    let reasons: Vec<(String, ExclusionReason)> = sink
        .events()
        .into_iter()
        .filter_map(|e| match e {
            ProcessEvent::NodeExcluded { node_id, reason, .. } => Some((node_id, reason)),
            _ => None,
        })
        .collect();
    assert_eq!(reasons.len(), 3);
    assert_eq!(
        reasons[2],
        (
            "E".to_string(),
            ExclusionReason::ExcludedInput {
                port_id: "input".into(),
                from_node_id: "D".into()
            }
        )
    );
    let starts = sink.names().iter().filter(|n| **n == "nodeStart").count();
    assert_eq!(starts, 1);
}

#[tokio::test]
async fn test_disabled_node_is_excluded() {
    let mut disabled = node("B", "upper", json!({}));
    disabled.disabled = true;
    let graph = NodeGraph::new("main", "Main")
        .with_node(node("A", "emit", json!({"text": "hi"})))
        .with_node(disabled)
        .connect("A", "1", "B", "input");
    let processor = processor_for(vec![graph], test_registry());
    let sink = Arc::new(VecEventSink::new());
    processor.add_sink(sink.clone());

    run(&processor, PortValues::new()).await.unwrap();

    assert!(sink.events().iter().any(|e| matches!(
        e,
        ProcessEvent::NodeExcluded { node_id, reason: ExclusionReason::Disabled, .. } if node_id == "B"
    )));
}

#[tokio::test]
async fn test_graph_inputs_and_outputs() {
    let graph = NodeGraph::new("main", "Main")
        .with_node(node("in", "input", json!({"id": "name"})))
        .with_node(node("up", "upper", json!({})))
        .with_node(node("out", "output", json!({"id": "result"})))
        .connect("in", "value", "up", "input")
        .connect("up", "output", "out", "value");
    let processor = processor_for(vec![graph], test_registry());

    let outputs = run(
        &processor,
        PortValues::from([("name".to_string(), DataValue::string("ada"))]),
    )
    .await
    .unwrap();
    assert_eq!(outputs["result"], DataValue::string("ADA"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_split_run_respects_concurrency_bound() {
    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let mut registry = test_registry();
    {
        let running = running.clone();
        let peak = peak.clone();
        registry.register_callback(
            metadata("slow"),
            vec![PortDefinition::required("item", "Item", DataType::NUMBER)],
            vec![PortDefinition::optional("doubled", "Doubled", DataType::NUMBER)],
            move |_node, inputs, _ctx| {
                let running = running.clone();
                let peak = peak.clone();
                async move {
                    let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    running.fetch_sub(1, Ordering::SeqCst);
                    let item = inputs["item"].as_number().unwrap_or_default();
                    Ok(PortValues::from([("doubled".to_string(), DataValue::Number(item * 2.0))]))
                }
            },
        );
    }

    let graph = NodeGraph::new("main", "Main")
        .with_node(node("in", "input", json!({"id": "items"})))
        .with_node(node("slow", "slow", json!({})).split(Some(3)))
        .with_node(node("out", "output", json!({"id": "doubled"})))
        .connect("in", "value", "slow", "item")
        .connect("slow", "doubled", "out", "value");
    let processor = processor_for(vec![graph], registry);

    let items: Vec<DataValue> = (0..10).map(|i| DataValue::Number(i as f64)).collect();
    let outputs = run(
        &processor,
        PortValues::from([("items".to_string(), DataValue::array(ScalarType::Number, items))]),
    )
    .await
    .unwrap();

    assert!(peak.load(Ordering::SeqCst) <= 3);
    assert!(peak.load(Ordering::SeqCst) >= 2);
    let expected: Vec<DataValue> = (0..10).map(|i| DataValue::Number(i as f64 * 2.0)).collect();
    assert_eq!(outputs["doubled"], DataValue::array(ScalarType::Number, expected));
}

#[tokio::test]
async fn test_split_run_element_failure_fails_node() {
    let mut registry = test_registry();
    registry.register_callback(
        metadata("picky"),
        vec![PortDefinition::required("item", "Item", DataType::STRING)],
        vec![PortDefinition::optional("output", "Output", DataType::STRING)],
        |_node, inputs, _ctx| async move {
            match inputs["item"].as_str() {
                Some("bad") => Err(EngineError::failed("bad item")),
                Some(item) => Ok(PortValues::from([("output".to_string(), DataValue::string(item))])),
                None => Err(EngineError::failed("not a string")),
            }
        },
    );
    let graph = NodeGraph::new("main", "Main")
        .with_node(node("in", "input", json!({"id": "items"})))
        .with_node(node("picky", "picky", json!({})).split(None))
        .connect("in", "value", "picky", "item");
    let processor = processor_for(vec![graph], registry);
    let sink = Arc::new(VecEventSink::new());
    processor.add_sink(sink.clone());

    let err = run(
        &processor,
        PortValues::from([("items".to_string(), DataValue::strings(["ok", "bad", "fine", "bad"]))]),
    )
    .await
    .unwrap_err();

    let message = err.to_string();
    assert!(message.contains("[1] Task execution failed: bad item"), "{}", message);
    assert!(message.contains("[3]"), "{}", message);
    assert!(!message.contains("[0]"), "{}", message);
    assert_eq!(sink.names().last(), Some(&"error"));
    assert!(sink.names().contains(&"nodeError"));
    assert_eq!(processor.status(), RunStatus::Errored);
}

#[tokio::test]
async fn test_node_error_stops_graph() {
    let graph = NodeGraph::new("main", "Main")
        .with_node(node("bad", "fail", json!({"message": "kaput"})))
        .with_node(node("after", "upper", json!({})))
        .connect("bad", "output", "after", "input");
    let processor = processor_for(vec![graph], test_registry());
    let sink = Arc::new(VecEventSink::new());
    processor.add_sink(sink.clone());

    let err = run(&processor, PortValues::new()).await.unwrap_err();
    assert!(matches!(err, EngineError::GraphFailed { .. }));
    assert!(err.to_string().contains("kaput"));

    let labels = labels(&sink);
    assert!(labels.contains(&"nodeError:bad".to_string()));
    assert!(!labels.contains(&"nodeStart:after".to_string()));
    assert!(position(&labels, "graphError") < position(&labels, "error"));
}

#[tokio::test]
async fn test_input_type_mismatch_is_node_error() {
    let graph = NodeGraph::new("main", "Main")
        .with_node(node("A", "emit", json!({"text": "yes"})))
        .with_node(node("S", "strict", json!({})))
        .connect("A", "1", "S", "flag");
    let processor = processor_for(vec![graph], test_registry());

    let err = run(&processor, PortValues::new()).await.unwrap_err();
    assert!(err.to_string().contains("expected boolean, got string"), "{}", err);
}

#[tokio::test]
async fn test_unknown_node_type_fails_build() {
    let graph = NodeGraph::new("main", "Main").with_node(node("x", "nope", json!({})));
    let project = Project::new("p", "P").with_graph(graph);
    let result = GraphProcessor::new(Arc::new(project), Arc::new(test_registry()));
    assert!(matches!(result, Err(EngineError::UnknownNodeType { .. })));
}

#[tokio::test]
async fn test_abort_during_wait_for_global() {
    let graph = NodeGraph::new("main", "Main").with_node(node("w", "waitGlobal", json!({"id": "never"})));
    let processor = processor_for(vec![graph], test_registry());
    let sink = Arc::new(VecEventSink::new());
    processor.add_sink(sink.clone());

    let started = processor.once("nodeStart");
    let handle = {
        let processor = processor.clone();
        tokio::spawn(async move { run(&processor, PortValues::new()).await })
    };
    started.await;
    processor.abort(Some("stop".into()));

    let result = tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("run did not observe the abort")
        .unwrap();
    assert!(matches!(result, Err(EngineError::Aborted(Some(ref e))) if e == "stop"));
    assert_eq!(processor.status(), RunStatus::Aborted { successful: false });
    assert_eq!(
        sink.events().last(),
        Some(&ProcessEvent::Abort {
            successful: false,
            error: Some("stop".into())
        })
    );
    assert!(sink.names().contains(&"graphAbort"));
}

#[tokio::test]
async fn test_cancelled_signal_during_user_input_aborts_run() {
    let graph = NodeGraph::new("main", "Main").with_node(node("ask", "ask", json!({"prompt": "name?"})));
    let processor = processor_for(vec![graph], test_registry());

    let asked = processor.once("userInput");
    let handle = {
        let processor = processor.clone();
        tokio::spawn(async move { run(&processor, PortValues::new()).await })
    };
    asked.await;
    processor.signal().cancel();

    let result = tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("run did not observe cancellation")
        .unwrap();
    assert!(matches!(result, Err(EngineError::Cancelled)));
    assert_eq!(processor.status(), RunStatus::Aborted { successful: false });
}

#[tokio::test]
async fn test_user_input_answers_resume_node() {
    let graph = NodeGraph::new("main", "Main")
        .with_node(node("ask", "ask", json!({"prompt": "name?"})))
        .with_node(node("out", "output", json!({"id": "answer"})))
        .connect("ask", "answer", "out", "value");
    let processor = processor_for(vec![graph], test_registry());

    let mut events = processor.events();
    let handle = {
        let processor = processor.clone();
        tokio::spawn(async move { run(&processor, PortValues::new()).await })
    };
    while let Some(event) = events.next().await {
        if let ProcessEvent::UserInput { node_id, prompts, .. } = event {
            assert_eq!(prompts, vec!["name?".to_string()]);
            assert!(processor.user_input(&node_id, vec!["ada".into(), "lovelace".into()]));
            break;
        }
    }

    let outputs = handle.await.unwrap().unwrap();
    assert_eq!(outputs["answer"], DataValue::string("ada,lovelace"));
    assert!(!processor.user_input("ask", vec![]));
}

#[tokio::test]
async fn test_successful_abort_returns_outputs() {
    let graph = NodeGraph::new("main", "Main")
        .with_node(node("A", "emit", json!({"text": "partial"})))
        .with_node(node("stop", "abort", json!({})))
        .with_node(node("later", "upper", json!({})))
        .connect("A", "1", "stop", "input")
        .connect("A", "2", "later", "input");
    let processor = processor_for(vec![graph], test_registry());
    let sink = Arc::new(VecEventSink::new());
    processor.add_sink(sink.clone());

    let outputs = run(&processor, PortValues::new()).await.unwrap();
    assert_eq!(outputs["result"], DataValue::string("partial"));
    assert_eq!(processor.status(), RunStatus::Aborted { successful: true });
    assert_eq!(
        sink.events().last(),
        Some(&ProcessEvent::Abort {
            successful: true,
            error: None
        })
    );
}

#[tokio::test(start_paused = true)]
async fn test_pause_blocks_new_nodes_until_resume() {
    let graph = NodeGraph::new("main", "Main")
        .with_node(node("A", "emit", json!({"text": "x"})))
        .with_node(node("E", "external", json!({"function": "gate"})))
        .with_node(node("B", "upper", json!({})))
        .connect("A", "1", "E", "input")
        .connect("E", "output", "B", "input");
    let processor = processor_for(vec![graph], test_registry());
    processor.set_external_function("gate", |args| async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        Ok(args.into_iter().next().unwrap_or_else(DataValue::excluded))
    });
    let sink = Arc::new(VecEventSink::new());
    processor.add_sink(sink.clone());

    let handle = {
        let processor = processor.clone();
        tokio::spawn(async move { run(&processor, PortValues::new()).await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    processor.pause();
    assert_eq!(processor.status(), RunStatus::Paused);

    // E finishes while paused, but B must not start
    tokio::time::sleep(Duration::from_millis(100)).await;
    let labels_while_paused = labels(&sink);
    assert!(labels_while_paused.contains(&"nodeFinish:E".to_string()));
    assert!(!labels_while_paused.contains(&"nodeStart:B".to_string()));

    processor.resume();
    handle.await.unwrap().unwrap();
    let labels = labels(&sink);
    assert!(position(&labels, "resume") < position(&labels, "nodeStart:B"));
    assert_eq!(processor.status(), RunStatus::Done);
}

#[tokio::test]
async fn test_pause_does_not_outlive_the_run() {
    let graph = NodeGraph::new("main", "Main").with_node(node("A", "emit", json!({"text": "x"})));
    let processor = processor_for(vec![graph], test_registry());
    run(&processor, PortValues::new()).await.unwrap();

    processor.pause();
    tokio::time::timeout(Duration::from_secs(1), run(&processor, PortValues::new()))
        .await
        .expect("second run stayed paused")
        .unwrap();
    assert_eq!(processor.status(), RunStatus::Done);
}

#[tokio::test]
async fn test_subprocessor_shares_globals_and_bus() {
    let child = NodeGraph::new("child", "Child")
        .with_node(node("in", "input", json!({"id": "input"})))
        .with_node(node("up", "upper", json!({})))
        .with_node(node("set", "setGlobal", json!({"id": "seen"})))
        .with_node(node("out", "output", json!({"id": "output"})))
        .connect("in", "value", "up", "input")
        .connect("up", "output", "set", "value")
        .connect("up", "output", "out", "value");
    let main = NodeGraph::new("main", "Main")
        .with_node(node("A", "emit", json!({"text": "inner"})))
        .with_node(node("call", "call", json!({"graph": "child"})))
        .with_node(node("wait", "waitGlobal", json!({"id": "seen"})))
        .with_node(node("out", "output", json!({"id": "result"})))
        .with_node(node("seen", "output", json!({"id": "seen"})))
        .connect("A", "1", "call", "input")
        .connect("call", "output", "out", "value")
        .connect("wait", "value", "seen", "value");
    let processor = processor_for(vec![main, child], test_registry());
    let sink = Arc::new(VecEventSink::new());
    processor.add_sink(sink.clone());

    let outputs = run(&processor, PortValues::new()).await.unwrap();
    assert_eq!(outputs["result"], DataValue::string("INNER"));
    assert_eq!(outputs["seen"], DataValue::string("INNER"));

    let graph_starts: Vec<String> = sink
        .events()
        .into_iter()
        .filter_map(|e| match e {
            ProcessEvent::GraphStart { graph_id, .. } => Some(graph_id),
            _ => None,
        })
        .collect();
    assert_eq!(graph_starts, vec!["main".to_string(), "child".to_string()]);
    assert_eq!(sink.names().iter().filter(|n| **n == "done").count(), 1);
}

#[tokio::test]
async fn test_missing_subgraph_is_node_error() {
    let main = NodeGraph::new("main", "Main").with_node(node("call", "call", json!({"graph": "missing"})));
    let processor = processor_for(vec![main], test_registry());
    let err = run(&processor, PortValues::new()).await.unwrap_err();
    assert!(err.to_string().contains("Graph not found: missing"), "{}", err);
}

#[tokio::test]
async fn test_external_functions() {
    let graph = NodeGraph::new("main", "Main")
        .with_node(node("A", "emit", json!({"text": "ping"})))
        .with_node(node("echo", "external", json!({"function": "echo"})))
        .with_node(node("len", "external", json!({"function": "length"})))
        .with_node(node("o1", "output", json!({"id": "echo"})))
        .with_node(node("o2", "output", json!({"id": "length"})))
        .connect("A", "1", "echo", "input")
        .connect("A", "1", "len", "input")
        .connect("echo", "output", "o1", "value")
        .connect("len", "output", "o2", "value");
    let processor = processor_for(vec![graph], test_registry());
    processor.set_external_function("length", |args: Vec<DataValue>| async move {
        let text = args.first().and_then(|a| a.as_str()).unwrap_or_default().to_string();
        Ok(DataValue::Number(text.len() as f64))
    });

    let outputs = run(&processor, PortValues::new()).await.unwrap();
    assert_eq!(outputs["echo"], DataValue::string("ping"));
    assert_eq!(outputs["length"], DataValue::Number(4.0));
}

#[tokio::test]
async fn test_user_events_reach_listeners() {
    let graph = NodeGraph::new("main", "Main").with_node(node("A", "emit", json!({"text": "x"})));
    let processor = processor_for(vec![graph], test_registry());
    let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
    {
        let seen = seen.clone();
        processor.on_user_event("ping", move |value| seen.lock().push(value));
    }

    processor.raise_event("ping", Some(DataValue::Number(1.0)));
    processor.raise_event("other", None);
    processor.raise_event("ping", None);

    assert_eq!(*seen.lock(), vec![Some(DataValue::Number(1.0)), None]);
}

#[tokio::test]
async fn test_rerun_clears_previous_outputs() {
    let graph = NodeGraph::new("main", "Main").with_node(node("A", "emit", json!({"text": "x"})));
    let processor = processor_for(vec![graph], test_registry());

    run(&processor, PortValues::new()).await.unwrap();
    let sink = Arc::new(VecEventSink::new());
    processor.add_sink(sink.clone());
    run(&processor, PortValues::new()).await.unwrap();

    let labels = labels(&sink);
    assert!(position(&labels, "nodeOutputsCleared:A") < position(&labels, "nodeStart:A"));
}

#[tokio::test]
async fn test_events_stream_ends_after_done() {
    let graph = NodeGraph::new("main", "Main").with_node(node("A", "emit", json!({"text": "x"})));
    let processor = processor_for(vec![graph], test_registry());

    let events = processor.events();
    run(&processor, PortValues::new()).await.unwrap();
    let names: Vec<&'static str> = events.map(|e| e.name()).collect().await;
    assert_eq!(names.first(), Some(&"start"));
    assert_eq!(names.last(), Some(&"done"));
}

#[tokio::test]
async fn test_subprocessor_rejects_process_graph() {
    let main = NodeGraph::new("main", "Main");
    let child = NodeGraph::new("child", "Child");
    let processor = processor_for(vec![main, child], test_registry());
    let sub = processor
        .create_sub_processor("child", SubProcessorOptions::default())
        .unwrap();
    assert!(!sub.is_root());
    assert!(run(&sub, PortValues::new()).await.is_err());
    assert!(sub.process_subgraph(PortValues::new()).await.is_err());
}
