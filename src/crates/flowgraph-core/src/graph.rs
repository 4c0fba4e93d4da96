//! [`Subgraph`]: a named, typed container of tasks and nodes.
//!
//! A `Subgraph` is itself a [`Task`](crate::task::Task) — it can be nested
//! inside another subgraph's `tasks` map, exposing the same `run` contract
//! as an [`crate::task::AtomicTask`].

use crate::error::{GraphError, Result, Slot};
use crate::node::{Node, NodeId};
use crate::planner::Plan;
use crate::task::{Task, TaskRef};
use crate::types::{TypeToken, Value};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Process-wide node id generator, shared across every [`Subgraph`] instance
/// so ids stay unique even across separate subgraphs.
static NODE_TICK: AtomicU64 = AtomicU64::new(0);

/// `declaredInput -> { nodeId -> [inputName, ...] }`: a declared input may
/// fan out to many interior input sites.
pub type InputMap = HashMap<String, HashMap<NodeId, Vec<String>>>;

/// `declaredOutput -> (nodeId, outputName)`: each declared output has at
/// most one interior producer.
pub type OutputMap = HashMap<String, (NodeId, String)>;

/// A named, typed container of [`crate::task::AtomicTask`]s and/or other
/// `Subgraph`s — the composite-task half of the uniform task contract.
pub struct Subgraph {
    name: String,
    pub version: u32,
    declared_inputs: HashMap<String, TypeToken>,
    declared_outputs: HashMap<String, TypeToken>,
    input_map: InputMap,
    output_map: OutputMap,
    tasks: HashMap<String, TaskRef>,
    nodes: HashMap<NodeId, Node>,
    /// Insertion order of `nodes`, so the planner is deterministic.
    node_order: Vec<NodeId>,
    validated: bool,
    plan_cache: Option<Plan>,
    users: Mutex<HashSet<NodeId>>,
}

impl fmt::Debug for Subgraph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subgraph")
            .field("name", &self.name)
            .field("nodes", &self.node_order.len())
            .finish()
    }
}

impl Subgraph {
    pub fn new(name: impl Into<String>) -> Self {
        Subgraph {
            name: name.into(),
            version: 1,
            declared_inputs: HashMap::new(),
            declared_outputs: HashMap::new(),
            input_map: HashMap::new(),
            output_map: HashMap::new(),
            tasks: HashMap::new(),
            nodes: HashMap::new(),
            node_order: Vec::new(),
            validated: false,
            plan_cache: None,
            users: Mutex::new(HashSet::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn declared_inputs(&self) -> &HashMap<String, TypeToken> {
        &self.declared_inputs
    }

    pub fn declared_outputs(&self) -> &HashMap<String, TypeToken> {
        &self.declared_outputs
    }

    pub fn input_map(&self) -> &InputMap {
        &self.input_map
    }

    pub fn output_map(&self) -> &OutputMap {
        &self.output_map
    }

    pub fn tasks(&self) -> &HashMap<String, TaskRef> {
        &self.tasks
    }

    pub fn nodes(&self) -> &HashMap<NodeId, Node> {
        &self.nodes
    }

    pub fn node_order(&self) -> &[NodeId] {
        &self.node_order
    }

    pub fn get_node(&self, id: &str) -> Option<&Node> {
        self.nodes.get(id)
    }

    pub fn is_validated(&self) -> bool {
        self.validated
    }

    fn invalidate(&mut self) {
        self.validated = false;
        self.plan_cache = None;
    }

    // --- declared inputs/outputs ---

    pub fn add_declared_input(&mut self, name: impl Into<String>, ty: TypeToken) {
        self.declared_inputs.insert(name.into(), ty);
        self.invalidate();
    }

    pub fn remove_declared_input(&mut self, name: &str) -> Result<()> {
        if self
            .input_map
            .get(name)
            .map(|fanout| !fanout.is_empty())
            .unwrap_or(false)
        {
            return Err(GraphError::MappingInUse(name.to_string()));
        }
        self.declared_inputs.remove(name);
        self.invalidate();
        Ok(())
    }

    pub fn add_declared_output(&mut self, name: impl Into<String>, ty: TypeToken) {
        self.declared_outputs.insert(name.into(), ty);
        self.invalidate();
    }

    pub fn remove_declared_output(&mut self, name: &str) -> Result<()> {
        if self.output_map.contains_key(name) {
            return Err(GraphError::MappingInUse(name.to_string()));
        }
        self.declared_outputs.remove(name);
        self.invalidate();
        Ok(())
    }

    // --- tasks ---

    pub fn add_task(&mut self, local_name: impl Into<String>, task: TaskRef) {
        self.tasks.insert(local_name.into(), task);
        self.invalidate();
    }

    pub fn remove_task(&mut self, local_name: &str) -> Result<()> {
        let in_use = self
            .node_order
            .iter()
            .filter_map(|id| self.nodes.get(id))
            .any(|n| n.task.name() == local_name);
        if in_use {
            return Err(GraphError::NodeInUse(local_name.to_string()));
        }
        self.tasks.remove(local_name);
        self.invalidate();
        Ok(())
    }

    // --- nodes ---

    /// Allocate a globally unique node id (`"<taskName>.<tick>"`), create a
    /// fresh [`Node`] with empty slots, and register it with the task's user
    /// list.
    pub fn add_node(&mut self, local_task_name: &str) -> Result<NodeId> {
        let task = self
            .tasks
            .get(local_task_name)
            .cloned()
            .ok_or_else(|| GraphError::Unknown(local_task_name.to_string()))?;
        let tick = NODE_TICK.fetch_add(1, Ordering::Relaxed);
        let id = format!("{local_task_name}.{tick}");
        let node = Node::new(id.clone(), task.clone());
        task.add_user(id.clone());
        self.nodes.insert(id.clone(), node);
        self.node_order.push(id.clone());
        self.invalidate();
        Ok(id)
    }

    /// Remove a node, if it has no incident edges and is not referenced by
    /// any boundary map.
    pub fn remove_node(&mut self, id: &str) -> Result<()> {
        let node = self
            .nodes
            .get(id)
            .ok_or_else(|| GraphError::Unknown(id.to_string()))?;
        if !node.is_isolated() {
            return Err(GraphError::MappingInUse(id.to_string()));
        }
        let referenced_by_input_map = self
            .input_map
            .values()
            .any(|fanout| fanout.contains_key(id));
        let referenced_by_output_map = self.output_map.values().any(|(n, _)| n == id);
        if referenced_by_input_map || referenced_by_output_map {
            return Err(GraphError::MappingInUse(id.to_string()));
        }
        let task = node.task.clone();
        task.remove_user(id.to_string());
        self.nodes.remove(id);
        self.node_order.retain(|n| n != id);
        self.invalidate();
        Ok(())
    }

    // --- boundary maps ---

    pub fn add_input_map(&mut self, declared: &str, node_id: &str, input_name: &str) -> Result<()> {
        let declared_ty = self
            .declared_inputs
            .get(declared)
            .ok_or_else(|| GraphError::Unknown(declared.to_string()))?
            .clone();
        let node = self
            .nodes
            .get(node_id)
            .ok_or_else(|| GraphError::Unknown(node_id.to_string()))?;
        let slot_ty = node
            .task
            .inputs()
            .get(input_name)
            .cloned()
            .ok_or_else(|| GraphError::Unknown(format!("{node_id}.{input_name}")))?;
        if slot_ty != declared_ty {
            return Err(GraphError::TypeMismatch {
                src: Slot {
                    node: "<declared>".into(),
                    name: declared.into(),
                },
                src_type: declared_ty.to_string(),
                dst: Slot {
                    node: node_id.into(),
                    name: input_name.into(),
                },
                dst_type: slot_ty.to_string(),
            });
        }
        let fanout = self.input_map.entry(declared.to_string()).or_default();
        let names = fanout.entry(node_id.to_string()).or_default();
        if !names.iter().any(|n| n == input_name) {
            names.push(input_name.to_string());
        }
        self.invalidate();
        Ok(())
    }

    pub fn remove_input_map(&mut self, declared: &str, node_id: &str, input_name: &str) {
        if let Some(fanout) = self.input_map.get_mut(declared) {
            if let Some(names) = fanout.get_mut(node_id) {
                names.retain(|n| n != input_name);
                if names.is_empty() {
                    fanout.remove(node_id);
                }
            }
            if fanout.is_empty() {
                self.input_map.remove(declared);
            }
        }
        self.invalidate();
    }

    pub fn add_output_map(&mut self, declared: &str, node_id: &str, output_name: &str) -> Result<()> {
        if self.output_map.contains_key(declared) {
            return Err(GraphError::MappingInUse(declared.to_string()));
        }
        let declared_ty = self
            .declared_outputs
            .get(declared)
            .ok_or_else(|| GraphError::Unknown(declared.to_string()))?
            .clone();
        let node = self
            .nodes
            .get(node_id)
            .ok_or_else(|| GraphError::Unknown(node_id.to_string()))?;
        let slot_ty = node
            .task
            .outputs()
            .get(output_name)
            .cloned()
            .ok_or_else(|| GraphError::Unknown(format!("{node_id}.{output_name}")))?;
        if slot_ty != declared_ty {
            return Err(GraphError::TypeMismatch {
                src: Slot {
                    node: node_id.into(),
                    name: output_name.into(),
                },
                src_type: slot_ty.to_string(),
                dst: Slot {
                    node: "<declared>".into(),
                    name: declared.into(),
                },
                dst_type: declared_ty.to_string(),
            });
        }
        self.output_map
            .insert(declared.to_string(), (node_id.to_string(), output_name.to_string()));
        self.invalidate();
        Ok(())
    }

    pub fn remove_output_map(&mut self, declared: &str) {
        self.output_map.remove(declared);
        self.invalidate();
    }

    // --- edges ---

    /// Link `(srcId, srcOut) -> (dstId, dstIn)`. Fails if either endpoint is
    /// missing, the sink input slot is already filled, or type tokens
    /// disagree.
    pub fn add_edge(&mut self, src_id: &str, src_out: &str, dst_id: &str, dst_in: &str) -> Result<()> {
        let src_ty = self
            .nodes
            .get(src_id)
            .ok_or_else(|| GraphError::Unknown(src_id.to_string()))?
            .task
            .outputs()
            .get(src_out)
            .cloned()
            .ok_or_else(|| GraphError::Unknown(format!("{src_id}.{src_out}")))?;
        let dst_ty = {
            let dst_node = self
                .nodes
                .get(dst_id)
                .ok_or_else(|| GraphError::Unknown(dst_id.to_string()))?;
            if dst_node.inputs.get(dst_in).map(|s| s.is_some()).unwrap_or(false) {
                return Err(GraphError::MappingInUse(format!("{dst_id}.{dst_in}")));
            }
            dst_node
                .task
                .inputs()
                .get(dst_in)
                .cloned()
                .ok_or_else(|| GraphError::Unknown(format!("{dst_id}.{dst_in}")))?
        };
        if src_ty != dst_ty {
            return Err(GraphError::TypeMismatch {
                src: Slot {
                    node: src_id.into(),
                    name: src_out.into(),
                },
                src_type: src_ty.to_string(),
                dst: Slot {
                    node: dst_id.into(),
                    name: dst_in.into(),
                },
                dst_type: dst_ty.to_string(),
            });
        }
        self.nodes
            .get_mut(src_id)
            .unwrap()
            .outputs
            .entry(src_out.to_string())
            .or_default()
            .entry(dst_id.to_string())
            .or_default()
            .push(dst_in.to_string());
        self.nodes.get_mut(dst_id).unwrap().inputs.insert(
            dst_in.to_string(),
            Some((src_id.to_string(), src_out.to_string())),
        );
        self.invalidate();
        Ok(())
    }

    pub fn remove_edge(&mut self, src_id: &str, src_out: &str, dst_id: &str, dst_in: &str) -> Result<()> {
        if let Some(node) = self.nodes.get_mut(src_id) {
            node.remove_output_link(src_out, &dst_id.to_string(), dst_in);
        }
        if let Some(node) = self.nodes.get_mut(dst_id) {
            if let Some(slot) = node.inputs.get_mut(dst_in) {
                *slot = None;
            }
        }
        self.invalidate();
        Ok(())
    }

    /// Validate (if stale) and return the cached plan, computing it via the
    /// planner on success.
    pub fn ensure_plan(&mut self) -> Result<Plan> {
        if !self.validated {
            crate::validator::validate(self)?;
            self.validated = true;
            self.plan_cache = Some(crate::planner::plan(self));
        }
        Ok(self.plan_cache.clone().expect("plan cached after validation"))
    }

    /// Project an executor's raw per-node result map back onto this
    /// subgraph's declared outputs.
    pub fn project_outputs(
        &self,
        results: &HashMap<NodeId, HashMap<String, Value>>,
    ) -> Result<HashMap<String, Value>> {
        let mut out = HashMap::new();
        for (declared, (node_id, output_name)) in &self.output_map {
            let value = results
                .get(node_id)
                .and_then(|m| m.get(output_name))
                .cloned()
                .ok_or_else(|| {
                    GraphError::Internal(format!(
                        "no result for {node_id}.{output_name} backing declared output '{declared}'"
                    ))
                })?;
            out.insert(declared.clone(), value);
        }
        Ok(out)
    }

    /// Toggle whether a node's result is cached for later inspection after a
    /// run. Used by `flowgraph-serde` when reconstructing a node from a
    /// document that recorded a cached result.
    pub fn set_node_cache(&mut self, id: &str, cache: bool) -> Result<()> {
        let node = self
            .nodes
            .get_mut(id)
            .ok_or_else(|| GraphError::Unknown(id.to_string()))?;
        node.cache_last_result = cache;
        Ok(())
    }

    /// Set a node's last cached result directly, bypassing a run. Used by
    /// `flowgraph-serde` when a loaded document carries a prior result.
    pub fn set_node_last_result(&mut self, id: &str, result: Option<HashMap<String, Value>>) -> Result<()> {
        let node = self
            .nodes
            .get_mut(id)
            .ok_or_else(|| GraphError::Unknown(id.to_string()))?;
        node.last_result = result;
        Ok(())
    }

    /// Pre-supplied boundary inputs, keyed by `(nodeId, inputName)`, derived
    /// from the caller's `Run(inputs)` map via `inputMap`.
    pub fn boundary_inputs(
        &self,
        inputs: &HashMap<String, Value>,
    ) -> HashMap<(NodeId, String), Value> {
        let mut out = HashMap::new();
        for (declared, fanout) in &self.input_map {
            if let Some(value) = inputs.get(declared) {
                for (node_id, input_names) in fanout {
                    for input_name in input_names {
                        out.insert((node_id.clone(), input_name.clone()), value.clone());
                    }
                }
            }
        }
        out
    }
}

/// A `Subgraph` used as a node's task: implements [`Task`] by delegating to
/// its own [`crate::exec::Executor`] to run its cached plan. Exposes the
/// same invocation contract as an [`crate::task::AtomicTask`], with its
/// lifecycle guarded the same way, via a name-indexed side table of users
/// rather than owning back-pointers.
pub struct SubgraphHandle {
    name: String,
    inner: Arc<RwLock<Subgraph>>,
    executor: Arc<dyn crate::exec::Executor>,
    users: Mutex<HashSet<NodeId>>,
}

impl fmt::Debug for SubgraphHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubgraphHandle").field("name", &self.name).finish()
    }
}

impl SubgraphHandle {
    pub fn new(inner: Subgraph, executor: Arc<dyn crate::exec::Executor>) -> Self {
        SubgraphHandle {
            name: inner.name.clone(),
            inner: Arc::new(RwLock::new(inner)),
            executor,
            users: Mutex::new(HashSet::new()),
        }
    }

    pub fn inner(&self) -> Arc<RwLock<Subgraph>> {
        self.inner.clone()
    }
}

#[async_trait]
impl Task for SubgraphHandle {
    fn name(&self) -> &str {
        &self.name
    }

    fn inputs(&self) -> HashMap<String, TypeToken> {
        self.inner.read().declared_inputs.clone()
    }

    fn outputs(&self) -> HashMap<String, TypeToken> {
        self.inner.read().declared_outputs.clone()
    }

    async fn run(&self, values: HashMap<String, Value>) -> Result<HashMap<String, Value>> {
        // Snapshot everything the executor needs and drop the lock before
        // awaiting: parking_lot guards are not meant to be held across
        // await points.
        let (plan, node_snapshot, boundary) = {
            let mut inner = self.inner.write();
            let plan = inner.ensure_plan()?;
            let node_snapshot = inner.nodes().clone();
            let boundary = inner.boundary_inputs(&values);
            (plan, node_snapshot, boundary)
        };
        let raw = self.executor.execute(&plan, &node_snapshot, boundary).await?;
        self.inner.read().project_outputs(&raw)
    }

    fn reload(&self) -> Result<()> {
        let inner = self.inner.read();
        for task in inner.tasks.values() {
            task.reload()?;
        }
        Ok(())
    }

    fn source_location(&self) -> Option<&str> {
        None
    }

    fn add_user(&self, node: NodeId) {
        self.users.lock().insert(node);
    }

    fn remove_user(&self, node: NodeId) {
        self.users.lock().remove(&node);
    }

    fn in_use(&self) -> bool {
        !self.users.lock().is_empty()
    }

    fn as_any(&self) -> &dyn std::any::Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::AtomicTask;

    fn get5() -> TaskRef {
        Arc::new(
            AtomicTask::new("get5", "mem://get5", vec![], Some(TypeToken::new("int").unwrap()), |_| {
                Ok(serde_json::json!(5))
            })
            .unwrap(),
        )
    }

    #[test]
    fn add_node_allocates_unique_ids() {
        let mut sg = Subgraph::new("S");
        sg.add_task("get5", get5());
        let a = sg.add_node("get5").unwrap();
        let b = sg.add_node("get5").unwrap();
        assert_ne!(a, b);
        assert_eq!(sg.node_order(), &[a, b]);
    }

    #[test]
    fn remove_node_rejects_when_mapped() {
        let mut sg = Subgraph::new("S");
        sg.add_task("get5", get5());
        let n = sg.add_node("get5").unwrap();
        sg.add_declared_output("out", TypeToken::new("int").unwrap());
        sg.add_output_map("out", &n, "").unwrap();
        assert!(sg.remove_node(&n).is_err());
        sg.remove_output_map("out");
        assert!(sg.remove_node(&n).is_ok());
    }

    #[test]
    fn add_edge_rejects_type_mismatch() {
        let mut sg = Subgraph::new("S");
        sg.add_task("get5", get5());
        let minus = Arc::new(
            AtomicTask::new(
                "minus",
                "mem://minus",
                vec![
                    ("a".into(), TypeToken::new("float").unwrap()),
                    ("b".into(), TypeToken::new("float").unwrap()),
                ],
                Some(TypeToken::new("float").unwrap()),
                |v| {
                    let a = v["a"].as_f64().unwrap();
                    let b = v["b"].as_f64().unwrap();
                    Ok(serde_json::json!(a - b))
                },
            )
            .unwrap(),
        );
        sg.add_task("minus", minus);
        let g = sg.add_node("get5").unwrap();
        let m = sg.add_node("minus").unwrap();
        let err = sg.add_edge(&g, "", &m, "a").unwrap_err();
        assert!(matches!(err, GraphError::TypeMismatch { .. }));
    }

    #[test]
    fn add_edge_rejects_occupied_input_slot() {
        let mut sg = Subgraph::new("S");
        sg.add_task("get5", get5());
        let minus = Arc::new(
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
        );
        sg.add_task("minus", minus);
        let g1 = sg.add_node("get5").unwrap();
        let g2 = sg.add_node("get5").unwrap();
        let m = sg.add_node("minus").unwrap();
        sg.add_edge(&g1, "", &m, "a").unwrap();
        let err = sg.add_edge(&g2, "", &m, "a").unwrap_err();
        assert!(matches!(err, GraphError::MappingInUse(_)));
    }
}
