//! [`validate`]: acyclicity and input-completeness checks.

use crate::error::{GraphError, Result};
use crate::graph::Subgraph;
use crate::node::NodeId;
use std::collections::{HashMap, HashSet};

/// Run both validator passes. On success the caller is free to set its own
/// `validated` flag and cache a plan; this function itself is stateless.
pub fn validate(sg: &Subgraph) -> Result<()> {
    check_acyclic(sg)?;
    check_input_complete(sg, false)?;
    Ok(())
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum NodeState {
    InProgress(u32),
    Done,
}

/// Multi-source traversal labeling each visited node with a component index.
/// Re-entering a node that is `InProgress` under the *same* component label
/// is a back edge, i.e. a cycle; re-entering a `Done` node (a shared
/// descendant reached from an independent root) is not. Using component
/// labels instead of a single visited set avoids false positives across
/// disjoint components.
fn check_acyclic(sg: &Subgraph) -> Result<()> {
    let mut state: HashMap<NodeId, NodeState> = HashMap::new();
    let mut next_component: u32 = 0;
    for root in sg.node_order() {
        if !state.contains_key(root) {
            next_component += 1;
            visit(sg, root, next_component, &mut state)?;
        }
    }
    Ok(())
}

fn visit(
    sg: &Subgraph,
    node_id: &str,
    component: u32,
    state: &mut HashMap<NodeId, NodeState>,
) -> Result<()> {
    state.insert(node_id.to_string(), NodeState::InProgress(component));
    if let Some(node) = sg.get_node(node_id) {
        let mut successors = Vec::new();
        for fanout in node.outputs.values() {
            for sink in fanout.keys() {
                successors.push(sink.clone());
            }
        }
        for succ in successors {
            match state.get(&succ) {
                None => visit(sg, &succ, component, state)?,
                Some(NodeState::InProgress(c)) if *c == component => {
                    return Err(GraphError::Circular(succ));
                }
                _ => {}
            }
        }
    }
    state.insert(node_id.to_string(), NodeState::Done);
    Ok(())
}

/// Starting from the nodes that (transitively) feed a declared output — or
/// from every node, if `consider_all` — walk backward across filled input
/// slots recording every node visited. Then for each considered node, every
/// empty input slot not covered by `inputMap` is reported as
/// [`GraphError::MissingInput`].
///
/// The considered set is always a collection of [`crate::node::Node`]
/// objects (not raw ids or map keys), regardless of `consider_all`.
fn check_input_complete(sg: &Subgraph, consider_all: bool) -> Result<()> {
    let considered: HashSet<NodeId> = if consider_all {
        sg.node_order().iter().cloned().collect()
    } else {
        backward_reachable_from_outputs(sg)
    };

    for node_id in sg.node_order() {
        if !considered.contains(node_id) {
            continue;
        }
        let node = sg.get_node(node_id).expect("node_order is consistent with nodes");
        let mut names: Vec<&String> = node.inputs.keys().collect();
        names.sort();
        for input_name in names {
            let slot = &node.inputs[input_name];
            if slot.is_some() {
                continue;
            }
            let covered = sg.input_map().values().any(|fanout| {
                fanout
                    .get(node_id)
                    .map(|ins| ins.iter().any(|n| n == input_name))
                    .unwrap_or(false)
            });
            if !covered {
                return Err(GraphError::MissingInput {
                    node: node_id.clone(),
                    input: input_name.clone(),
                });
            }
        }
    }
    Ok(())
}

fn backward_reachable_from_outputs(sg: &Subgraph) -> HashSet<NodeId> {
    let mut seen = HashSet::new();
    let mut stack: Vec<NodeId> = sg.output_map().values().map(|(n, _)| n.clone()).collect();
    while let Some(id) = stack.pop() {
        if seen.insert(id.clone()) {
            if let Some(node) = sg.get_node(&id) {
                stack.extend(node.dependencies());
            }
        }
    }
    seen
}

#[cfg(test)]
mod tests {
    use super::*;
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

    #[test]
    fn detects_simple_cycle() {
        let mut sg = Subgraph::new("S");
        sg.add_task("a", get5());
        sg.add_task("m", minus());
        let a = sg.add_node("a").unwrap();
        let m = sg.add_node("m").unwrap();
        sg.add_edge(&a, "", &m, "a").unwrap();
        // close the loop: m -> a's (nonexistent) input is impossible since `a`
        // has no inputs, so instead create a 2-node cycle through two minus nodes.
        let m2_task = minus();
        sg.add_task("m2", m2_task);
        let m2 = sg.add_node("m2").unwrap();
        sg.add_edge(&m, "", &m2, "a").unwrap();
        sg.add_edge(&m2, "", &m, "b").unwrap();
        let err = validate(&sg).unwrap_err();
        assert!(matches!(err, GraphError::Circular(_)));
    }

    #[test]
    fn diamond_shared_descendant_is_not_a_cycle() {
        let mut sg = Subgraph::new("S");
        sg.add_task("a", get5());
        sg.add_task("m", minus());
        let a = sg.add_node("a").unwrap();
        let m = sg.add_node("m").unwrap();
        sg.add_edge(&a, "", &m, "a").unwrap();
        sg.add_edge(&a, "", &m, "b").unwrap();
        assert!(check_acyclic(&sg).is_ok());
    }

    #[test]
    fn missing_input_not_covered_by_input_map() {
        let mut sg = Subgraph::new("S");
        sg.add_task("m", minus());
        let m = sg.add_node("m").unwrap();
        sg.add_declared_output("out", TypeToken::new("int").unwrap());
        sg.add_output_map("out", &m, "").unwrap();
        let err = validate(&sg).unwrap_err();
        assert!(matches!(err, GraphError::MissingInput { ref node, ref input } if node == &m && input == "a"));
    }

    #[test]
    fn input_map_covers_the_slot() {
        let mut sg = Subgraph::new("S");
        sg.add_task("m", minus());
        let m = sg.add_node("m").unwrap();
        sg.add_declared_input("ia", TypeToken::new("int").unwrap());
        sg.add_declared_input("ib", TypeToken::new("int").unwrap());
        sg.add_input_map("ia", &m, "a").unwrap();
        sg.add_input_map("ib", &m, "b").unwrap();
        sg.add_declared_output("out", TypeToken::new("int").unwrap());
        sg.add_output_map("out", &m, "").unwrap();
        assert!(validate(&sg).is_ok());
    }
}
