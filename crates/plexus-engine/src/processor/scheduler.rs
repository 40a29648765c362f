//! Dependency-driven node scheduling
//!
//! A node becomes ready once every producer it reads from has settled
//! (finished or excluded). Ready nodes either get excluded on the spot or are
//! spawned as independent tasks, so unrelated regions of the graph run
//! concurrently. A node with an unconnected required input never becomes
//! ready and is excluded up front. After the first node failure no new node
//! starts; nodes already running are allowed to finish.

use std::collections::{HashMap, HashSet};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures_util::FutureExt;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::plan::{ExecutionPlan, NodePlan};
use super::{split, GraphProcessor};
use crate::coerce::coerce;
use crate::context::{GraphIo, NodeContext};
use crate::error::{EngineError, Result};
use crate::events::{EventBus, ExclusionReason, PortValues, ProcessEvent};
use crate::node::NodeImpl;
use crate::state::RunState;
use crate::types::{GraphNode, NodeId, PortDefinition, PortId};
use crate::value::DataValue;

pub(crate) struct GraphRunResult {
    pub failure: Option<EngineError>,
    /// Nodes that finished with outputs during this execution
    pub produced: HashSet<NodeId>,
}

enum NodeState {
    Pending,
    Running,
    /// Finished or excluded, with the outputs dependents read
    Settled(Arc<PortValues>),
    Failed,
}

type NodeTaskResult = (usize, Result<PortValues>);

pub(crate) async fn run_graph(processor: &GraphProcessor, run: Arc<RunState>, io: Arc<GraphIo>) -> GraphRunResult {
    let plan = processor.plan();
    let signal = processor.signal();
    let pause = &processor.shared().pause;

    let mut scheduler = Scheduler {
        processor,
        plan,
        run,
        io,
        signal: signal.clone(),
        states: (0..plan.len()).map(|_| NodeState::Pending).collect(),
        tasks: JoinSet::new(),
        produced: HashSet::new(),
    };
    let mut failure: Option<EngineError> = None;

    loop {
        let halted = failure.is_some() || signal.is_cancelled();
        let paused = pause.is_paused();
        if !halted && !paused {
            scheduler.start_ready_nodes();
        }

        if scheduler.tasks.is_empty() {
            if halted || !paused {
                break;
            }
            tokio::select! {
                _ = pause.wait_until_resumed() => {}
                _ = signal.cancelled() => {}
            }
            continue;
        }

        tokio::select! {
            Some(joined) = scheduler.tasks.join_next() => match joined {
                Ok((index, Ok(outputs))) => {
                    scheduler.produced.insert(plan.nodes[index].node.id.clone());
                    scheduler.states[index] = NodeState::Settled(Arc::new(outputs));
                }
                Ok((index, Err(error))) => {
                    scheduler.states[index] = NodeState::Failed;
                    // Cancellation is reported by the abort path, not as a failure
                    if failure.is_none() && !(error.is_cancellation() && signal.is_cancelled()) {
                        log::warn!("Stopping graph '{}': {}", processor.graph_id(), error);
                        failure = Some(error);
                    }
                }
                Err(join_error) => {
                    log::error!("Node task ended abnormally: {}", join_error);
                    if failure.is_none() {
                        failure = Some(EngineError::failed(join_error.to_string()));
                    }
                }
            },
            _ = pause.wait_until_resumed(), if paused => {}
            _ = signal.cancelled(), if !halted => {}
        }
    }

    if failure.is_none() && !signal.is_cancelled() {
        let stuck: Vec<&str> = scheduler
            .states
            .iter()
            .enumerate()
            .filter(|(_, s)| matches!(s, NodeState::Pending))
            .map(|(i, _)| plan.nodes[i].node.title.as_str())
            .collect();
        if !stuck.is_empty() {
            failure = Some(EngineError::failed(format!(
                "Nodes never became ready (dependency cycle?): {}",
                stuck.join(", ")
            )));
        }
    }

    GraphRunResult {
        failure,
        produced: scheduler.produced,
    }
}

struct Scheduler<'a> {
    processor: &'a GraphProcessor,
    plan: &'a ExecutionPlan,
    run: Arc<RunState>,
    io: Arc<GraphIo>,
    signal: CancellationToken,
    states: Vec<NodeState>,
    tasks: JoinSet<NodeTaskResult>,
    produced: HashSet<NodeId>,
}

/// A value arriving on an input port and the node it came from
struct Arrival {
    from_node_id: NodeId,
    value: DataValue,
}

impl Scheduler<'_> {
    /// Start or exclude every ready node, repeating while exclusions cascade
    ///
    /// Within one pass, the `nodeStart` events of the nodes being started are
    /// emitted before the pass's exclusions, and the node tasks are spawned
    /// after both.
    fn start_ready_nodes(&mut self) {
        let plan = self.plan;
        loop {
            let mut starts = Vec::new();
            let mut exclusions = Vec::new();
            for (index, node_plan) in plan.nodes.iter().enumerate() {
                if !matches!(self.states[index], NodeState::Pending) {
                    continue;
                }
                if let Some(port_id) = &node_plan.unconnected_required {
                    let reason = if node_plan.node.disabled {
                        ExclusionReason::Disabled
                    } else {
                        ExclusionReason::UnconnectedInput {
                            port_id: port_id.clone(),
                        }
                    };
                    exclusions.push((index, HashMap::new(), reason));
                    continue;
                }
                let Some(arrivals) = self.gather_inputs(node_plan) else {
                    continue;
                };
                match exclusion_reason(node_plan, &arrivals) {
                    Some(reason) => exclusions.push((index, arrivals, reason)),
                    None => starts.push((index, arrivals)),
                }
            }
            if starts.is_empty() && exclusions.is_empty() {
                break;
            }

            let jobs: Vec<_> = starts
                .into_iter()
                .map(|(index, arrivals)| self.prepare_start(index, arrivals))
                .collect();
            for (index, arrivals, reason) in exclusions {
                self.exclude(index, arrivals, reason);
            }
            for (job, inputs, ctx) in jobs {
                self.tasks.spawn(job.run(inputs, ctx));
            }
        }
    }

    /// Collect inputs once every producer has settled
    fn gather_inputs(&self, node_plan: &NodePlan) -> Option<HashMap<PortId, Arrival>> {
        let settled = node_plan.producers.iter().all(|producer| {
            self.plan
                .index
                .get(producer)
                .is_some_and(|&i| matches!(self.states[i], NodeState::Settled(_)))
        });
        if !settled {
            return None;
        }

        let mut per_port: HashMap<&PortId, Vec<Arrival>> = HashMap::new();
        for connection in &node_plan.incoming {
            let producer = *self.plan.index.get(&connection.output_node_id)?;
            let NodeState::Settled(outputs) = &self.states[producer] else {
                return None;
            };
            // A port the producer did not write counts as excluded
            let value = outputs
                .get(&connection.output_id)
                .cloned()
                .unwrap_or_else(DataValue::excluded);
            per_port.entry(&connection.input_id).or_default().push(Arrival {
                from_node_id: connection.output_node_id.clone(),
                value,
            });
        }

        per_port
            .into_iter()
            .map(|(port_id, arrivals)| {
                let merged = match node_plan.input(port_id) {
                    Some(port) => merge_arrivals(&node_plan.node, port, arrivals),
                    None => arrivals.into_iter().last(),
                }?;
                Some((port_id.clone(), merged))
            })
            .collect()
    }

    fn exclude(&mut self, index: usize, arrivals: HashMap<PortId, Arrival>, reason: ExclusionReason) {
        let node_plan = &self.plan.nodes[index];
        let node = node_plan.node.clone();
        log::debug!("Excluding node '{}': {}", node.title, reason);

        let outputs: PortValues = node_plan
            .outputs
            .iter()
            .map(|port| (port.id.clone(), DataValue::excluded()))
            .collect();
        self.processor.bus().emit(ProcessEvent::NodeExcluded {
            node_id: node.id.clone(),
            node_title: node.title.clone(),
            process_id: uuid::Uuid::new_v4().to_string(),
            inputs: arrivals.into_iter().map(|(port, a)| (port, a.value)).collect(),
            outputs: outputs.clone(),
            reason,
        });
        self.states[index] = NodeState::Settled(Arc::new(outputs));
    }

    /// Mark a node running and emit its `nodeStart`; the caller spawns the job
    fn prepare_start(&mut self, index: usize, arrivals: HashMap<PortId, Arrival>) -> (NodeJob, PortValues, NodeContext) {
        let plan = self.plan;
        let node_plan = &plan.nodes[index];
        let node = &node_plan.node;
        let accepts_excluded = node_plan.implementation.accepts_excluded_inputs();
        // Excluded optional inputs are dropped unless the node asks for them
        let inputs: PortValues = arrivals
            .into_iter()
            .filter(|(_, a)| accepts_excluded || !a.value.is_excluded())
            .map(|(port, a)| (port, a.value))
            .collect();

        let ctx = NodeContext::new(
            self.processor.clone(),
            self.run.clone(),
            node.clone(),
            uuid::Uuid::new_v4().to_string(),
            self.signal.clone(),
            self.io.clone(),
        );
        let job = NodeJob {
            index,
            implementation: node_plan.implementation.clone(),
            inputs: node_plan.inputs.clone(),
            outputs: node_plan.outputs.clone(),
            split_run_max: node.split_run_max.unwrap_or(self.processor.options().split_run_max),
        };
        log::trace!("Starting node '{}'", node.title);
        self.processor.bus().emit(ProcessEvent::NodeStart {
            node_id: node.id.clone(),
            node_title: node.title.clone(),
            node_type: node.node_type.clone(),
            process_id: ctx.process_id().to_string(),
            inputs: inputs.clone(),
        });
        self.states[index] = NodeState::Running;
        (job, inputs, ctx)
    }
}

/// Why a node must be excluded instead of run, if it must
fn exclusion_reason(node_plan: &NodePlan, arrivals: &HashMap<PortId, Arrival>) -> Option<ExclusionReason> {
    if node_plan.node.disabled {
        return Some(ExclusionReason::Disabled);
    }
    if node_plan.implementation.accepts_excluded_inputs() {
        return None;
    }
    node_plan
        .inputs
        .iter()
        .filter(|port| port.required)
        .find_map(|port| match arrivals.get(&port.id) {
            Some(arrival) if arrival.value.is_excluded() => Some(ExclusionReason::ExcludedInput {
                port_id: port.id.clone(),
                from_node_id: arrival.from_node_id.clone(),
            }),
            _ => None,
        })
}

/// Combine several connections into one input port
///
/// Array-typed ports collect every non-excluded value; other ports keep the
/// last connection.
fn merge_arrivals(node: &GraphNode, port: &PortDefinition, mut arrivals: Vec<Arrival>) -> Option<Arrival> {
    if arrivals.len() <= 1 {
        return arrivals.pop();
    }
    let data_type = port.primary_type();
    if !data_type.array {
        log::warn!(
            "Input '{}' of node '{}' has {} connections; using the last one",
            port.id,
            node.title,
            arrivals.len()
        );
        return arrivals.pop();
    }

    let from_node_id = arrivals[0].from_node_id.clone();
    let mut items = Vec::new();
    for arrival in arrivals {
        let value = arrival.value.unwrap_lazy();
        if value.is_excluded() {
            continue;
        }
        match value.arrayize() {
            Some(nested) => items.extend(nested),
            None => items.push(value),
        }
    }
    let value = if items.is_empty() {
        DataValue::excluded()
    } else {
        DataValue::array(data_type.scalar, items)
    };
    Some(Arrival { from_node_id, value })
}

/// Everything a node task needs, detached from the scheduler's borrows
pub(super) struct NodeJob {
    pub index: usize,
    pub implementation: Arc<dyn NodeImpl>,
    pub inputs: Vec<PortDefinition>,
    pub outputs: Vec<PortDefinition>,
    pub split_run_max: usize,
}

impl NodeJob {
    async fn run(self, inputs: PortValues, ctx: NodeContext) -> NodeTaskResult {
        let node = ctx.node().clone();
        let bus: EventBus = ctx.processor().bus().clone();

        let work = async {
            if split::should_split(&node, &inputs) {
                split::run_split(&self, &node, inputs, &ctx).await
            } else {
                self.process_once(&node, inputs, &ctx).await
            }
        };
        let result = tokio::select! {
            _ = ctx.signal().cancelled() => Err(EngineError::Cancelled),
            outcome = AssertUnwindSafe(work).catch_unwind() => {
                outcome.unwrap_or_else(|_| Err(EngineError::failed("node panicked")))
            }
        };

        match &result {
            Ok(outputs) => {
                log::trace!("Node '{}' finished", node.title);
                bus.emit(ProcessEvent::NodeFinish {
                    node_id: node.id.clone(),
                    node_title: node.title.clone(),
                    process_id: ctx.process_id().to_string(),
                    outputs: outputs.clone(),
                });
            }
            Err(error) => {
                log::debug!("Node '{}' failed: {}", node.title, error);
                bus.emit(ProcessEvent::NodeError {
                    node_id: node.id.clone(),
                    node_title: node.title.clone(),
                    process_id: ctx.process_id().to_string(),
                    error: error.to_string(),
                });
            }
        }

        let result = result.map_err(|error| {
            if error.is_cancellation() {
                error
            } else {
                EngineError::NodeFailed {
                    node_id: node.id.clone(),
                    title: node.title.clone(),
                    message: error.to_string(),
                }
            }
        });
        (self.index, result)
    }

    pub(super) async fn process_once(&self, node: &GraphNode, inputs: PortValues, ctx: &NodeContext) -> Result<PortValues> {
        let inputs = prepare_inputs(&self.inputs, inputs)?;
        self.implementation.process(node, inputs, ctx).await
    }
}

/// Type-check and coerce inputs, then fill in defaults of missing ports
pub(super) fn prepare_inputs(ports: &[PortDefinition], inputs: PortValues) -> Result<PortValues> {
    let mut prepared = PortValues::with_capacity(inputs.len());
    for (port_id, value) in inputs {
        let Some(port) = ports.iter().find(|p| p.id == port_id) else {
            prepared.insert(port_id, value);
            continue;
        };
        let value = if value.is_excluded() || port.accepts(&value.data_type()) {
            value
        } else if port.coerced {
            coerce(&value, port.primary_type())?
        } else {
            return Err(EngineError::InvalidInputType {
                port: port_id,
                expected: port
                    .data_types
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(" | "),
                actual: value.data_type().to_string(),
            });
        };
        prepared.insert(port_id, value);
    }

    for port in ports {
        if prepared.contains_key(&port.id) {
            continue;
        }
        match &port.default_value {
            Some(default) => {
                prepared.insert(port.id.clone(), default.clone());
            }
            None if port.required => return Err(EngineError::MissingInput(port.id.clone())),
            None => {}
        }
    }
    Ok(prepared)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::{DataType, ScalarType};

    #[test]
    fn test_prepare_inputs_coerces_flagged_ports() {
        let ports = vec![
            PortDefinition::required("text", "Text", DataType::STRING).coerced(),
            PortDefinition::optional("count", "Count", DataType::NUMBER).with_default(DataValue::Number(3.0)),
        ];
        let inputs = PortValues::from([("text".to_string(), DataValue::Number(42.0))]);
        let prepared = prepare_inputs(&ports, inputs).unwrap();
        assert_eq!(prepared["text"], DataValue::string("42"));
        assert_eq!(prepared["count"], DataValue::Number(3.0));
    }

    #[test]
    fn test_prepare_inputs_rejects_mismatched_type() {
        let ports = vec![PortDefinition::required("flag", "Flag", DataType::BOOLEAN)];
        let inputs = PortValues::from([("flag".to_string(), DataValue::string("yes"))]);
        let err = prepare_inputs(&ports, inputs).unwrap_err();
        assert!(matches!(err, EngineError::InvalidInputType { ref port, .. } if port == "flag"));
    }

    #[test]
    fn test_prepare_inputs_requires_connected_value() {
        let ports = vec![PortDefinition::required("value", "Value", DataType::ANY)];
        let err = prepare_inputs(&ports, PortValues::new()).unwrap_err();
        assert!(matches!(err, EngineError::MissingInput(ref port) if port == "value"));
    }

    #[test]
    fn test_merge_collects_into_array_ports() {
        let node = GraphNode::new("n", "x", "N");
        let port = PortDefinition::required("items", "Items", DataType::array_of(ScalarType::String));
        let arrivals = vec![
            Arrival {
                from_node_id: "a".into(),
                value: DataValue::string("one"),
            },
            Arrival {
                from_node_id: "b".into(),
                value: DataValue::excluded(),
            },
            Arrival {
                from_node_id: "c".into(),
                value: DataValue::strings(["two", "three"]),
            },
        ];
        let merged = merge_arrivals(&node, &port, arrivals).unwrap();
        assert_eq!(merged.from_node_id, "a");
        assert_eq!(merged.value, DataValue::strings(["one", "two", "three"]));
    }

    #[test]
    fn test_merge_keeps_last_for_scalar_ports() {
        let node = GraphNode::new("n", "x", "N");
        let port = PortDefinition::required("value", "Value", DataType::STRING);
        let arrivals = vec![
            Arrival {
                from_node_id: "a".into(),
                value: DataValue::string("first"),
            },
            Arrival {
                from_node_id: "b".into(),
                value: DataValue::string("second"),
            },
        ];
        let merged = merge_arrivals(&node, &port, arrivals).unwrap();
        assert_eq!(merged.value, DataValue::string("second"));
    }
}
