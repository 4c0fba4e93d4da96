//! [`ParallelExecutor`]: a scheduler, a fixed pool of worker actors, and a
//! per-run waiter actor, talking over `toDo`/`done` queues with one coarse
//! mutex guarding the shared planner state for each run.

use super::Executor;
use crate::error::{GraphError, Result};
use crate::node::{Node, NodeId};
use crate::planner::Plan;
use crate::task::TaskRef;
use crate::types::Value;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

/// One unit of dispatchable work: a node's task, its gathered inputs, and a
/// channel to report back to whichever run submitted it.
struct Job {
    node_id: NodeId,
    task: TaskRef,
    values: HashMap<String, Value>,
    reply: mpsc::Sender<JobResult>,
}

struct JobResult {
    node_id: NodeId,
    outcome: Result<HashMap<String, Value>>,
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Lifecycle {
    NotStarted,
    Running,
    Disposed,
}

struct WorkerPool {
    to_do_tx: mpsc::Sender<Job>,
    workers: Vec<JoinHandle<()>>,
}

/// Shared, per-run planner state guarded by one `tokio::sync::Mutex` — the
/// coarse lock this design uses, rather than a lock per node.
struct RunState {
    nodes: HashMap<NodeId, Node>,
    waiting_deps: HashMap<NodeId, HashSet<NodeId>>,
    dependents: HashMap<NodeId, Vec<NodeId>>,
    pending_inputs: HashMap<NodeId, HashMap<String, Value>>,
    results: HashMap<NodeId, HashMap<String, Value>>,
    remaining: usize,
}

/// A pool of `worker_count` long-lived worker tasks, plus a per-`execute`
/// call scheduler/waiter pair. `wait_delay` bounds how long [`kill`] waits
/// for in-flight jobs to drain before abandoning them.
pub struct ParallelExecutor {
    worker_count: usize,
    wait_delay: Duration,
    /// When true, the pool is torn down as soon as `n_jobs` returns to zero
    /// (`Settings::start_then_kill_workers`), rather than staying warm for
    /// the next `execute` call.
    start_then_kill_workers: bool,
    n_jobs: AtomicUsize,
    state: Mutex<Lifecycle>,
    pool: Mutex<Option<WorkerPool>>,
}

impl ParallelExecutor {
    pub fn new(worker_count: usize, wait_delay: Duration, start_then_kill_workers: bool) -> Self {
        ParallelExecutor {
            worker_count: worker_count.max(1),
            wait_delay,
            start_then_kill_workers,
            n_jobs: AtomicUsize::new(0),
            state: Mutex::new(Lifecycle::NotStarted),
            pool: Mutex::new(None),
        }
    }

    /// Spawn `worker_count` worker tasks, each pulling [`Job`]s off a shared
    /// `toDo` channel behind one receiver lock. Idempotent while already running.
    pub async fn start(&self) {
        let mut lifecycle = self.state.lock().await;
        if *lifecycle == Lifecycle::Running {
            return;
        }
        let (to_do_tx, to_do_rx) = mpsc::channel::<Job>(self.worker_count.max(16));
        let to_do_rx = Arc::new(Mutex::new(to_do_rx));
        let mut workers = Vec::with_capacity(self.worker_count);
        for _ in 0..self.worker_count {
            let rx = to_do_rx.clone();
            workers.push(tokio::spawn(async move {
                loop {
                    let job = {
                        let mut guard = rx.lock().await;
                        guard.recv().await
                    };
                    match job {
                        Some(job) => {
                            let outcome = job.task.run(job.values).await;
                            let _ = job
                                .reply
                                .send(JobResult {
                                    node_id: job.node_id,
                                    outcome,
                                })
                                .await;
                        }
                        None => break,
                    }
                }
            }));
        }
        *self.pool.lock().await = Some(WorkerPool { to_do_tx, workers });
        *lifecycle = Lifecycle::Running;
    }

    /// Stop accepting new work and tear down the worker pool. Waits up to
    /// `wait_delay` for in-flight jobs to finish before abandoning their
    /// handles (see `startThenKillWorkers`).
    pub async fn kill(&self) {
        let mut lifecycle = self.state.lock().await;
        if *lifecycle != Lifecycle::Running {
            *lifecycle = Lifecycle::Disposed;
            return;
        }
        if let Some(pool) = self.pool.lock().await.take() {
            drop(pool.to_do_tx);
            for handle in pool.workers {
                let _ = tokio::time::timeout(self.wait_delay, handle).await;
            }
        }
        *lifecycle = Lifecycle::Disposed;
    }

    /// Drop any disposed or not-yet-started pool state and allow a fresh
    /// [`start`] to run again.
    pub async fn reset(&self) {
        *self.pool.lock().await = None;
        *self.state.lock().await = Lifecycle::NotStarted;
    }

    async fn to_do_sender(&self) -> Result<mpsc::Sender<Job>> {
        let lifecycle = *self.state.lock().await;
        match lifecycle {
            Lifecycle::Disposed => Err(GraphError::AlreadyDisposed),
            Lifecycle::NotStarted => {
                drop(lifecycle);
                self.start().await;
                self.to_do_sender_inner().await
            }
            Lifecycle::Running => self.to_do_sender_inner().await,
        }
    }

    async fn to_do_sender_inner(&self) -> Result<mpsc::Sender<Job>> {
        self.pool
            .lock()
            .await
            .as_ref()
            .map(|p| p.to_do_tx.clone())
            .ok_or(GraphError::NotStarted)
    }
}

#[async_trait]
impl Executor for ParallelExecutor {
    async fn execute(
        &self,
        plan: &Plan,
        nodes: &HashMap<NodeId, Node>,
        boundary: HashMap<(NodeId, String), Value>,
    ) -> Result<HashMap<NodeId, HashMap<String, Value>>> {
        self.n_jobs.fetch_add(1, Ordering::SeqCst);
        let result = self.execute_inner(plan, nodes, boundary).await;
        if self.n_jobs.fetch_sub(1, Ordering::SeqCst) == 1 && self.start_then_kill_workers {
            self.kill().await;
        }
        result
    }
}

impl ParallelExecutor {
    async fn execute_inner(
        &self,
        plan: &Plan,
        nodes: &HashMap<NodeId, Node>,
        boundary: HashMap<(NodeId, String), Value>,
    ) -> Result<HashMap<NodeId, HashMap<String, Value>>> {
        let to_do_tx = self.to_do_sender().await?;

        let mut waiting_deps: HashMap<NodeId, HashSet<NodeId>> = HashMap::new();
        let mut dependents: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
        let mut pending_inputs: HashMap<NodeId, HashMap<String, Value>> = HashMap::new();
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

        let total = plan.len();
        let run_state = Arc::new(Mutex::new(RunState {
            nodes: nodes.clone(),
            waiting_deps,
            dependents,
            pending_inputs,
            results: HashMap::new(),
            remaining: total,
        }));

        let (done_tx, mut done_rx) = mpsc::channel::<JobResult>(total.max(1));

        // Seed every initially ready node (no unresolved dependency).
        {
            let mut state = run_state.lock().await;
            let initial: Vec<NodeId> = state
                .waiting_deps
                .iter()
                .filter(|(_, deps)| deps.is_empty())
                .map(|(id, _)| id.clone())
                .collect();
            for node_id in initial {
                dispatch(&mut state, &node_id, &to_do_tx, &done_tx).await?;
            }
        }

        if total == 0 {
            return Ok(HashMap::new());
        }

        while let Some(result) = done_rx.recv().await {
            let mut state = run_state.lock().await;
            let JobResult { node_id, outcome } = result;
            let out = outcome?;
            state.results.insert(node_id.clone(), out);
            state.remaining -= 1;
            let done = state.remaining == 0;

            let waiters = state.dependents.get(&node_id).cloned().unwrap_or_default();
            for waiter in waiters {
                if let Some(remaining_deps) = state.waiting_deps.get_mut(&waiter) {
                    remaining_deps.remove(&node_id);
                    if remaining_deps.is_empty() {
                        dispatch(&mut state, &waiter, &to_do_tx, &done_tx).await?;
                    }
                }
            }
            if done {
                break;
            }
        }

        let state = run_state.lock().await;
        Ok(state.results.clone())
    }
}

/// Gather a ready node's inputs from already-completed producers and the
/// boundary map, then enqueue it on the `toDo` channel. Workers are
/// long-lived tasks in this same process sharing the submitted `Arc<dyn
/// Task>` directly, so there is no queue boundary here for an
/// [`crate::task::AtomicTask`] to shed its function handle across — shedding
/// would just drop the only live copy of it.
async fn dispatch(
    state: &mut RunState,
    node_id: &str,
    to_do_tx: &mpsc::Sender<Job>,
    done_tx: &mpsc::Sender<JobResult>,
) -> Result<()> {
    let node = state
        .nodes
        .get(node_id)
        .ok_or_else(|| GraphError::Internal(format!("plan references unknown node '{node_id}'")))?;

    let mut values = state.pending_inputs.remove(node_id).unwrap_or_default();
    for (input_name, source) in &node.inputs {
        if values.contains_key(input_name) {
            continue;
        }
        if let Some((src_node, src_output)) = source {
            let value = state
                .results
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

    let task = node.task.clone();

    to_do_tx
        .send(Job {
            node_id: node_id.to_string(),
            task,
            values,
            reply: done_tx.clone(),
        })
        .await
        .map_err(|_| GraphError::Internal("worker pool channel closed mid-run".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Subgraph;
    use crate::task::AtomicTask;
    use crate::types::TypeToken;

    fn get5() -> TaskRef {
        Arc::new(
            AtomicTask::new("get5", "mem://get5", vec![], Some(TypeToken::new("int").unwrap()), |_| {
                Ok(serde_json::json!(5))
            })
            .unwrap(),
        )
    }

    fn minus() -> TaskRef {
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
    async fn runs_a_simple_pipeline_across_workers() {
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
        let exec = ParallelExecutor::new(2, Duration::from_millis(200), false);
        exec.start().await;
        let raw = exec.execute(&plan, sg.nodes(), boundary).await.unwrap();
        let out = sg.project_outputs(&raw).unwrap();
        assert_eq!(out["result"], serde_json::json!(3));
        exec.kill().await;
    }

    #[tokio::test]
    async fn reset_allows_reuse_after_kill() {
        let mut sg = Subgraph::new("pipeline");
        sg.add_task("get5", get5());
        let a = sg.add_node("get5").unwrap();
        sg.add_declared_output("result", TypeToken::new("int").unwrap());
        sg.add_output_map("result", &a, "").unwrap();

        let exec = ParallelExecutor::new(1, Duration::from_millis(50), false);
        exec.start().await;
        let plan = sg.ensure_plan().unwrap();
        exec.execute(&plan, sg.nodes(), HashMap::new()).await.unwrap();
        exec.kill().await;

        let err = exec.execute(&plan, sg.nodes(), HashMap::new()).await.unwrap_err();
        assert!(matches!(err, GraphError::AlreadyDisposed));

        exec.reset().await;
        let raw = exec.execute(&plan, sg.nodes(), HashMap::new()).await.unwrap();
        assert_eq!(raw[&a][""], serde_json::json!(5));
    }

    #[tokio::test]
    async fn start_then_kill_workers_tears_down_pool_once_idle() {
        let mut sg = Subgraph::new("pipeline");
        sg.add_task("get5", get5());
        let a = sg.add_node("get5").unwrap();
        sg.add_declared_output("result", TypeToken::new("int").unwrap());
        sg.add_output_map("result", &a, "").unwrap();

        let exec = ParallelExecutor::new(1, Duration::from_millis(50), true);
        let plan = sg.ensure_plan().unwrap();

        // No explicit `start`: the pool spins up lazily on first submit and
        // tears itself down again as soon as this run's job count returns to
        // zero, since the policy flag is set.
        let raw = exec.execute(&plan, sg.nodes(), HashMap::new()).await.unwrap();
        assert_eq!(raw[&a][""], serde_json::json!(5));
        assert_eq!(*exec.state.lock().await, Lifecycle::Disposed);

        let err = exec.execute(&plan, sg.nodes(), HashMap::new()).await.unwrap_err();
        assert!(matches!(err, GraphError::AlreadyDisposed));

        exec.reset().await;
        let raw = exec.execute(&plan, sg.nodes(), HashMap::new()).await.unwrap();
        assert_eq!(raw[&a][""], serde_json::json!(5));
        assert_eq!(*exec.state.lock().await, Lifecycle::Disposed);
    }
}
