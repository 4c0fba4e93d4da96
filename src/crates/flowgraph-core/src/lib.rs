//! Typed dataflow execution engine: a graph of atomic and composite tasks,
//! a validator, a planner, and a choice of sequential or parallel executor.
//!
//! ```
//! use flowgraph_core::graph::Subgraph;
//! use flowgraph_core::task::AtomicTask;
//! use flowgraph_core::types::TypeToken;
//! use std::sync::Arc;
//!
//! let mut pipeline = Subgraph::new("demo");
//! pipeline.add_task(
//!     "get5",
//!     Arc::new(
//!         AtomicTask::new("get5", "mem://get5", vec![], Some(TypeToken::new("int").unwrap()), |_| {
//!             Ok(serde_json::json!(5))
//!         })
//!         .unwrap(),
//!     ),
//! );
//! let node = pipeline.add_node("get5").unwrap();
//! pipeline.add_declared_output("out", TypeToken::new("int").unwrap());
//! pipeline.add_output_map("out", &node, "").unwrap();
//! assert!(pipeline.ensure_plan().is_ok());
//! ```

pub mod error;
pub mod exec;
pub mod graph;
pub mod logging;
pub mod node;
pub mod planner;
pub mod registry;
pub mod settings;
pub mod task;
pub mod types;
pub mod validator;

pub use error::{GraphError, Result};
pub use exec::{Executor, ParallelExecutor, SequentialExecutor};
pub use graph::{Subgraph, SubgraphHandle};
pub use node::{Node, NodeId};
pub use planner::{plan, Plan, PlanEntry};
pub use registry::Registry;
pub use settings::Settings;
pub use task::{AtomicTask, Task, TaskRef};
pub use types::{TypeToken, Value};
pub use validator::validate;
