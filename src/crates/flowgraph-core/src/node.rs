//! [`Node`]: a use-site of a task inside a subgraph.

use crate::task::TaskRef;
use crate::types::Value;
use std::collections::HashMap;

/// Stable, process-unique identifier for a node, minted as `"<taskName>.<tick>"`
/// by [`crate::graph::Subgraph::add_node`].
pub type NodeId = String;

/// A use-site of a task inside a subgraph, with per-input and per-output edge slots.
///
/// For an atomic task there is exactly one output slot, keyed by
/// [`crate::types::SENTINEL_OUTPUT`], so the same shape covers atomic and
/// composite nodes uniformly.
#[derive(Clone)]
pub struct Node {
    pub id: NodeId,
    pub task: TaskRef,
    /// `inputName -> Some((sourceNodeId, sourceOutputName))` once filled by an edge.
    pub inputs: HashMap<String, Option<(NodeId, String)>>,
    /// `outputName -> { sinkNodeId -> [sinkInputName, ...] }`, the fan-out set.
    pub outputs: HashMap<String, HashMap<NodeId, Vec<String>>>,
    pub cache_last_result: bool,
    pub last_result: Option<HashMap<String, Value>>,
}

impl Node {
    /// Build a fresh node for `task`, with one empty input slot per declared
    /// input and one empty output fan-out set per declared output (or the
    /// sentinel slot for an atomic task).
    pub fn new(id: NodeId, task: TaskRef) -> Self {
        let inputs = task.inputs().keys().map(|k| (k.clone(), None)).collect();
        let outputs = task
            .outputs()
            .keys()
            .map(|k| (k.clone(), HashMap::new()))
            .collect();
        Node {
            id,
            task,
            inputs,
            outputs,
            cache_last_result: false,
            last_result: None,
        }
    }

    /// Number of filled input slots, i.e. incoming edges.
    pub fn n_links_in(&self) -> usize {
        self.inputs.values().filter(|v| v.is_some()).count()
    }

    /// Number of outgoing edges across every output slot's fan-out set.
    pub fn n_links_out(&self) -> usize {
        self.outputs.values().map(|fanout| fanout.len()).sum()
    }

    /// `true` if this node has no incident edges at all — a precondition for removal.
    pub fn is_isolated(&self) -> bool {
        self.n_links_in() == 0 && self.n_links_out() == 0
    }

    /// Distinct predecessor node ids reachable via this node's filled input slots.
    /// This is exactly the `deps` set the planner emits for this node.
    pub fn dependencies(&self) -> Vec<NodeId> {
        let mut seen = std::collections::HashSet::new();
        let mut deps = Vec::new();
        for slot in self.inputs.values().flatten() {
            if seen.insert(slot.0.clone()) {
                deps.push(slot.0.clone());
            }
        }
        deps
    }

    /// Remove the output-slot entry for `sink` if present, pruning the entry
    /// entirely once its fan-out set becomes empty.
    pub fn remove_output_link(&mut self, output_name: &str, sink: &NodeId, sink_input: &str) {
        if let Some(fanout) = self.outputs.get_mut(output_name) {
            if let Some(inputs) = fanout.get_mut(sink) {
                inputs.retain(|i| i != sink_input);
                if inputs.is_empty() {
                    fanout.remove(sink);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::AtomicTask;
    use crate::types::TypeToken;
    use std::sync::Arc;

    fn dummy_task() -> TaskRef {
        Arc::new(
            AtomicTask::new(
                "get5",
                "mem://get5",
                vec![],
                Some(TypeToken::new("int").unwrap()),
                |_| Ok(serde_json::json!(5)),
            )
            .unwrap(),
        )
    }

    #[test]
    fn new_node_has_sentinel_output_slot() {
        let node = Node::new("get5.0".into(), dummy_task());
        assert!(node.outputs.contains_key(crate::types::SENTINEL_OUTPUT));
        assert!(node.is_isolated());
    }

    #[test]
    fn remove_output_link_prunes_empty_entry() {
        let mut node = Node::new("get5.0".into(), dummy_task());
        node.outputs
            .get_mut("")
            .unwrap()
            .insert("sink.0".into(), vec!["a".into()]);
        assert_eq!(node.outputs[""].len(), 1);
        node.remove_output_link("", &"sink.0".to_string(), "a");
        assert_eq!(node.outputs[""].len(), 0);
    }
}
