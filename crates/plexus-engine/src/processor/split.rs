//! Split runs: per-element fan-out over array inputs
//!
//! Array inputs are split index-aligned; non-array inputs are handed to
//! every element unchanged. At most `split_run_max` elements are in flight
//! at once. If any element fails, the node fails with every element's error.

use std::collections::HashMap;

use futures_util::{stream, StreamExt};

use super::scheduler::{prepare_inputs, NodeJob};
use crate::context::NodeContext;
use crate::error::{EngineError, Result};
use crate::events::PortValues;
use crate::types::{GraphNode, PortId};
use crate::value::{DataValue, ScalarType};

pub(super) fn should_split(node: &GraphNode, inputs: &PortValues) -> bool {
    node.is_split_run && inputs.values().any(DataValue::is_array)
}

pub(super) async fn run_split(
    job: &NodeJob,
    node: &GraphNode,
    inputs: PortValues,
    ctx: &NodeContext,
) -> Result<PortValues> {
    let mut arrays: HashMap<PortId, Vec<DataValue>> = HashMap::new();
    let mut broadcast = PortValues::new();
    for (port_id, value) in inputs {
        match value.arrayize() {
            Some(items) => {
                arrays.insert(port_id, items);
            }
            None => {
                broadcast.insert(port_id, value);
            }
        }
    }
    let count = arrays.values().map(Vec::len).max().unwrap_or(0);
    let limit = job.split_run_max.max(1);
    log::debug!(
        "Split run of '{}': {} elements, at most {} at once",
        node.title,
        count,
        limit
    );

    let mut results: Vec<(usize, Result<PortValues>)> = stream::iter(0..count)
        .map(|index| {
            let mut element = broadcast.clone();
            for (port_id, items) in &arrays {
                if let Some(item) = items.get(index) {
                    element.insert(port_id.clone(), item.clone());
                }
            }
            let ctx = ctx.for_element(index);
            async move {
                let result = match prepare_inputs(&job.inputs, element) {
                    Ok(element) => job.implementation.process(node, element, &ctx).await,
                    Err(error) => Err(error),
                };
                (index, result)
            }
        })
        .buffer_unordered(limit)
        .collect()
        .await;
    results.sort_by_key(|(index, _)| *index);

    let mut element_outputs = Vec::with_capacity(results.len());
    let mut failures = Vec::new();
    for (index, result) in results {
        match result {
            Ok(outputs) => element_outputs.push(outputs),
            Err(error) if error.is_cancellation() => return Err(error),
            Err(error) => {
                ctx.trace(format!("{} [{}] failed: {}", node.title, index, error));
                failures.push((index, error.to_string()));
            }
        }
    }
    if !failures.is_empty() {
        return Err(EngineError::SplitRunFailed { failures });
    }

    let mut port_ids: Vec<PortId> = job.outputs.iter().map(|p| p.id.clone()).collect();
    for outputs in &element_outputs {
        for port_id in outputs.keys() {
            if !port_ids.contains(port_id) {
                port_ids.push(port_id.clone());
            }
        }
    }

    Ok(port_ids
        .into_iter()
        .map(|port_id| {
            let fallback = job
                .outputs
                .iter()
                .find(|p| p.id == port_id)
                .map(|p| p.primary_type().scalar)
                .unwrap_or(ScalarType::Any);
            let items: Vec<DataValue> = element_outputs
                .iter()
                .map(|outputs| {
                    outputs
                        .get(&port_id)
                        .cloned()
                        .map(DataValue::unwrap_lazy)
                        .unwrap_or_else(DataValue::excluded)
                })
                .collect();
            (port_id, assemble(items, fallback))
        })
        .collect())
}

/// Combine per-element values of one port into an array value
///
/// Homogeneous scalar items form a typed array, anything else an `any[]`.
/// A port excluded by every element stays excluded.
fn assemble(items: Vec<DataValue>, fallback: ScalarType) -> DataValue {
    if items.is_empty() {
        return DataValue::array(fallback, Vec::new());
    }
    if items.iter().all(DataValue::is_excluded) {
        return DataValue::excluded();
    }

    let first = items[0].data_type();
    let homogeneous = !first.array && items.iter().all(|item| item.data_type() == first);
    if homogeneous {
        return DataValue::array(first.scalar, items);
    }
    let items = items
        .into_iter()
        .map(|item| {
            if item.is_excluded() {
                DataValue::Any(serde_json::Value::Null)
            } else {
                item
            }
        })
        .collect();
    DataValue::array(ScalarType::Any, items)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assemble_homogeneous_items() {
        let value = assemble(
            vec![DataValue::Number(1.0), DataValue::Number(2.0)],
            ScalarType::Any,
        );
        assert_eq!(value.data_type().to_string(), "number[]");
    }

    #[test]
    fn test_assemble_mixed_items_as_any() {
        let value = assemble(
            vec![DataValue::string("a"), DataValue::excluded()],
            ScalarType::String,
        );
        assert_eq!(
            value,
            DataValue::array(
                ScalarType::Any,
                vec![
                    DataValue::Any(serde_json::json!("a")),
                    DataValue::Any(serde_json::Value::Null)
                ]
            )
        );
    }

    #[test]
    fn test_assemble_all_excluded_stays_excluded() {
        let value = assemble(vec![DataValue::excluded(), DataValue::excluded()], ScalarType::String);
        assert!(value.is_excluded());
        assert_eq!(assemble(Vec::new(), ScalarType::String), DataValue::strings(Vec::<String>::new()));
    }
}
