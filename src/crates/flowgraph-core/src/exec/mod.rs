//! The executor seam: a [`Subgraph`](crate::graph::Subgraph) delegates its
//! own `run` to whichever [`Executor`] it was built with.

pub mod parallel;
pub mod sequential;

use crate::error::Result;
use crate::node::{Node, NodeId};
use crate::planner::Plan;
use crate::types::Value;
use async_trait::async_trait;
use std::collections::HashMap;

pub use parallel::ParallelExecutor;
pub use sequential::SequentialExecutor;

/// Runs a validated [`Plan`] over a snapshot of a subgraph's nodes, returning
/// every node's raw result keyed by node id. `nodes` carries each node's task
/// handle and its input-slot wiring; `boundary` carries the externally
/// supplied values for slots fed by a declared input rather than an edge.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(
        &self,
        plan: &Plan,
        nodes: &HashMap<NodeId, Node>,
        boundary: HashMap<(NodeId, String), Value>,
    ) -> Result<HashMap<NodeId, HashMap<String, Value>>>;
}
