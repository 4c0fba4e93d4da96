//! [`Task`]: the uniform contract shared by [`AtomicTask`] and
//! [`crate::graph::Subgraph`].

use crate::error::{GraphError, Result};
use crate::node::NodeId;
use crate::types::{TypeToken, Value, SENTINEL_OUTPUT};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

/// A shared handle to anything that can sit as a node's task: an
/// [`AtomicTask`] or a [`crate::graph::Subgraph`].
pub type TaskRef = Arc<dyn Task>;

/// The contract both atomic and composite tasks expose, so a [`crate::node::Node`]
/// can hold either uniformly.
#[async_trait]
pub trait Task: Send + Sync + fmt::Debug {
    /// Unique name of this task (unique within the [`crate::registry::Registry`]
    /// for atomic tasks; locally scoped for subgraphs).
    fn name(&self) -> &str;

    /// Declared input schema: `name -> type token`. Empty if the task takes no input.
    fn inputs(&self) -> HashMap<String, TypeToken>;

    /// Declared output schema. For an atomic task this is always a single
    /// entry keyed by [`SENTINEL_OUTPUT`].
    fn outputs(&self) -> HashMap<String, TypeToken>;

    /// Invoke the task. `values` carries all declared inputs.
    async fn run(&self, values: HashMap<String, Value>) -> Result<HashMap<String, Value>>;

    /// Re-hydrate this task from its source. For an atomic task, re-resolve
    /// its function pointer from the process-wide function table; for a
    /// subgraph, recurse over its children.
    fn reload(&self) -> Result<()>;

    /// The location this task's computation was loaded from, if any; the
    /// full tree-shaped JSON document is built by `flowgraph-serde`, which
    /// calls back into this for leaf tasks.
    fn source_location(&self) -> Option<&str>;

    fn add_user(&self, node: NodeId);
    fn remove_user(&self, node: NodeId);
    fn in_use(&self) -> bool;

    /// Expose the concrete type so the parallel executor's submitter can shed
    /// an [`AtomicTask`]'s function handle before a node crosses a worker
    /// boundary.
    fn as_any(&self) -> &dyn std::any::Any;
}

/// A name-indexed function table standing in for "load the function from its
/// source file": in a language without dynamic source loading, the function
/// is looked up by name from a table populated at program start instead, and
/// `source_location` becomes informational.
pub type AtomicFn = Arc<dyn Fn(&HashMap<String, Value>) -> Result<Value> + Send + Sync>;

enum FuncState {
    Hydrated(AtomicFn),
    Dry,
}

/// A named, typed, pure computation: declared input schema, declared output
/// type, invocation contract.
pub struct AtomicTask {
    name: String,
    source_location: String,
    inputs: HashMap<String, TypeToken>,
    output: Option<TypeToken>,
    func: RwLock<FuncState>,
    users: Mutex<HashSet<NodeId>>,
}

impl fmt::Debug for AtomicTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AtomicTask")
            .field("name", &self.name)
            .field("source_location", &self.source_location)
            .field("inputs", &self.inputs)
            .field("output", &self.output)
            .finish()
    }
}

impl AtomicTask {
    /// Construct an atomic task directly from an already-resolved function
    /// pointer. Used by the [`crate::registry::Registry`] when a source file
    /// registers a computation, and by tests.
    pub fn new(
        name: impl Into<String>,
        source_location: impl Into<String>,
        inputs: Vec<(String, TypeToken)>,
        output: Option<TypeToken>,
        func: impl Fn(&HashMap<String, Value>) -> Result<Value> + Send + Sync + 'static,
    ) -> Result<Self> {
        Ok(AtomicTask {
            name: name.into(),
            source_location: source_location.into(),
            inputs: inputs.into_iter().collect(),
            output,
            func: RwLock::new(FuncState::Hydrated(Arc::new(func))),
            users: Mutex::new(HashSet::new()),
        })
    }

    /// Construct a "dry" atomic task: metadata only, function handle shed.
    /// A worker that receives this over a queue boundary hydrates it lazily
    /// via [`Task::reload`] on first invocation.
    pub fn dry(
        name: impl Into<String>,
        source_location: impl Into<String>,
        inputs: Vec<(String, TypeToken)>,
        output: Option<TypeToken>,
    ) -> Self {
        AtomicTask {
            name: name.into(),
            source_location: source_location.into(),
            inputs: inputs.into_iter().collect(),
            output,
            func: RwLock::new(FuncState::Dry),
            users: Mutex::new(HashSet::new()),
        }
    }

    /// Shed the function handle, leaving only serializable metadata behind.
    /// Called by the parallel executor's submitter before a node crosses a
    /// worker boundary.
    pub fn shed(&self) {
        *self.func.write() = FuncState::Dry;
    }

    pub fn is_hydrated(&self) -> bool {
        matches!(*self.func.read(), FuncState::Hydrated(_))
    }
}

#[async_trait]
impl Task for AtomicTask {
    fn name(&self) -> &str {
        &self.name
    }

    fn inputs(&self) -> HashMap<String, TypeToken> {
        self.inputs.clone()
    }

    fn outputs(&self) -> HashMap<String, TypeToken> {
        let mut map = HashMap::new();
        if let Some(t) = &self.output {
            map.insert(SENTINEL_OUTPUT.to_string(), t.clone());
        }
        map
    }

    async fn run(&self, values: HashMap<String, Value>) -> Result<HashMap<String, Value>> {
        if !self.is_hydrated() {
            self.reload()?;
        }
        let f = match &*self.func.read() {
            FuncState::Hydrated(f) => f.clone(),
            FuncState::Dry => {
                return Err(GraphError::Internal(format!(
                    "task '{}' failed to hydrate",
                    self.name
                )))
            }
        };
        let out = f(&values).map_err(|e| GraphError::task_failure(&self.name, e))?;
        let mut result = HashMap::new();
        result.insert(SENTINEL_OUTPUT.to_string(), out);
        Ok(result)
    }

    fn reload(&self) -> Result<()> {
        let resolved = crate::registry::Registry::global().function_table_lookup(&self.name);
        match resolved {
            Some(f) => {
                *self.func.write() = FuncState::Hydrated(f);
                Ok(())
            }
            None => Err(GraphError::Unknown(self.name.clone())),
        }
    }

    fn source_location(&self) -> Option<&str> {
        Some(&self.source_location)
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

    #[tokio::test]
    async fn atomic_task_run_wraps_single_output_under_sentinel() {
        let task = AtomicTask::new(
            "get5",
            "mem://get5",
            vec![],
            Some(TypeToken::new("int").unwrap()),
            |_| Ok(serde_json::json!(5)),
        )
        .unwrap();
        let out = task.run(HashMap::new()).await.unwrap();
        assert_eq!(out[SENTINEL_OUTPUT], serde_json::json!(5));
    }

    #[tokio::test]
    async fn task_failure_is_reported_with_node_name_by_caller() {
        let task = AtomicTask::new("boom", "mem://boom", vec![], None, |_| {
            Err(GraphError::Internal("kaboom".into()))
        })
        .unwrap();
        let err = task.run(HashMap::new()).await.unwrap_err();
        assert!(matches!(err, GraphError::TaskFailure { .. }));
    }

    #[test]
    fn add_and_remove_user_tracks_in_use() {
        let task = AtomicTask::new("t", "mem://t", vec![], None, |_| Ok(Value::Null)).unwrap();
        assert!(!task.in_use());
        task.add_user("n1".into());
        assert!(task.in_use());
        task.remove_user("n1".into());
        assert!(!task.in_use());
    }
}
