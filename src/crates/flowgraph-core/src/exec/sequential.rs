//! [`SequentialExecutor`]: a single-threaded cooperative scheduler over a
//! validated plan.

use super::Executor;
use crate::error::{GraphError, Result};
use crate::node::{Node, NodeId};
use crate::planner::Plan;
use crate::types::Value;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};

/// Runs every node on the current task in plan order, dispatching a node as
/// soon as its last unresolved dependency completes.
#[derive(Debug, Default)]
pub struct SequentialExecutor;

impl SequentialExecutor {
    pub fn new() -> Self {
        SequentialExecutor
    }
}

#[async_trait]
impl Executor for SequentialExecutor {
    async fn execute(
        &self,
        plan: &Plan,
        nodes: &HashMap<NodeId, Node>,
        boundary: HashMap<(NodeId, String), Value>,
    ) -> Result<HashMap<NodeId, HashMap<String, Value>>> {
        let mut pending_inputs: HashMap<NodeId, HashMap<String, Value>> = HashMap::new();
        let mut waiting_deps: HashMap<NodeId, HashSet<NodeId>> = HashMap::new();
        let mut dependents: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
        let mut ready: VecDeque<NodeId> = VecDeque::new();
        let mut results: HashMap<NodeId, HashMap<String, Value>> = HashMap::new();

        for entry in plan.iter() {
            let deps: HashSet<NodeId> = entry.deps.iter().cloned().collect();
            for dep in &deps {
                dependents.entry(dep.clone()).or_default().push(entry.node.clone());
            }
            waiting_deps.insert(entry.node.clone(), deps);
            pending_inputs.entry(entry.node.clone()).or_default();
        }

        for ((node_id, input_name), value) in boundary {
            pending_inputs.entry(node_id).or_default().insert(input_name, value);
        }

        for entry in plan.iter() {
            if waiting_deps.get(&entry.node).map(|d| d.is_empty()).unwrap_or(true) {
                ready.push_back(entry.node.clone());
            }
        }

        while let Some(node_id) = ready.pop_front() {
            let node = nodes
                .get(&node_id)
                .ok_or_else(|| GraphError::Internal(format!("plan references unknown node '{node_id}'")))?;

            let mut values = pending_inputs.remove(&node_id).unwrap_or_default();
            for (input_name, source) in &node.inputs {
                if values.contains_key(input_name) {
                    continue;
                }
                if let Some((src_node, src_output)) = source {
                    let value = results
                        .get(src_node)
                        .and_then(|out| out.get(src_output))
                        .cloned()
                        .ok_or_else(|| {
                            GraphError::Internal(format!(
                                "'{node_id}.{input_name}' depends on '{src_node}.{src_output}' which has not produced a result yet"
                            ))
                        })?;
                    values.insert(input_name.clone(), value);
                }
            }

            let out = node.task.run(values).await?;
            results.insert(node_id.clone(), out);

            if let Some(waiters) = dependents.get(&node_id) {
                for waiter in waiters.clone() {
                    if let Some(remaining) = waiting_deps.get_mut(&waiter) {
                        remaining.remove(&node_id);
                        if remaining.is_empty() {
                            ready.push_back(waiter);
                        }
                    }
                }
            }
        }

        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Subgraph;
    use crate::task::AtomicTask;
    use crate::types::TypeToken;
    use std::sync::Arc;

    fn get5() -> Arc<AtomicTask> {
        Arc::new(
            AtomicTask::new("get5", "mem://get5", vec![], Some(TypeToken::new("int").unwrap()), |_| {
                Ok(serde_json::json!(5))
            })
            .unwrap(),
        )
    }

    fn minus() -> Arc<AtomicTask> {
        Arc::new(
            AtomicTask::new(
                "minus",
                "mem://minus",
                vec![
                    ("a".into(), TypeToken::new("int").unwrap()),
                    ("b".into(), TypeToken::new("int").unwrap()),
                ],
                Some(TypeToken::new("int").unwrap()),
                |v| Ok(serde_json::json!(v["a"].as_i64().unwrap() - v["b"].as_i64().unwrap())),
            )
            .unwrap(),
        )
    }

    #[tokio::test]
    async fn runs_a_simple_pipeline() {
        let mut sg = Subgraph::new("pipeline");
        sg.add_task("get5", get5());
        sg.add_task("minus", minus());
        let a = sg.add_node("get5").unwrap();
        let m = sg.add_node("minus").unwrap();
        sg.add_edge(&a, "", &m, "a").unwrap();
        sg.add_declared_input("b_in", TypeToken::new("int").unwrap());
        sg.add_input_map("b_in", &m, "b").unwrap();
        sg.add_declared_output("result", TypeToken::new("int").unwrap());
        sg.add_output_map("result", &m, "").unwrap();

        let plan = sg.ensure_plan().unwrap();
        let boundary = sg.boundary_inputs(&HashMap::from([("b_in".to_string(), serde_json::json!(2))]));
        let exec = SequentialExecutor::new();
        let raw = exec.execute(&plan, sg.nodes(), boundary).await.unwrap();
        let out = sg.project_outputs(&raw).unwrap();
        assert_eq!(out["result"], serde_json::json!(3));
    }
}
