//! [`plan`]: turns a validated [`Subgraph`] into a deterministic execution
//! order.

use crate::graph::Subgraph;
use crate::node::NodeId;

/// One node's place in the plan: its id and the distinct predecessor node
/// ids it depends on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PlanEntry {
    pub node: NodeId,
    pub deps: Vec<NodeId>,
}

/// `(node, deps[])` pairs in node insertion order. Insertion order, not a
/// topological sort, is what makes two plans built from the same edit
/// sequence identical.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Plan {
    pub entries: Vec<PlanEntry>,
}

impl Plan {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, PlanEntry> {
        self.entries.iter()
    }
}

/// Build the plan for `sg`. Assumes `sg` has already passed
/// [`crate::validator::validate`]; does not itself check acyclicity or
/// input completeness.
pub fn plan(sg: &Subgraph) -> Plan {
    let entries = sg
        .node_order()
        .iter()
        .map(|id| {
            let deps = sg
                .get_node(id)
                .map(|n| n.dependencies())
                .unwrap_or_default();
            PlanEntry {
                node: id.clone(),
                deps,
            }
        })
        .collect();
    Plan { entries }
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
    fn plan_preserves_insertion_order_and_collects_deps() {
        let mut sg = Subgraph::new("S");
        sg.add_task("a", get5());
        sg.add_task("m", minus());
        let a = sg.add_node("a").unwrap();
        let m = sg.add_node("m").unwrap();
        sg.add_edge(&a, "", &m, "a").unwrap();
        sg.add_edge(&a, "", &m, "b").unwrap();

        let p = plan(&sg);
        assert_eq!(p.entries[0].node, a);
        assert_eq!(p.entries[1].node, m);
        assert_eq!(p.entries[1].deps, vec![a.clone()]);
        assert!(p.entries[0].deps.is_empty());
    }
}
