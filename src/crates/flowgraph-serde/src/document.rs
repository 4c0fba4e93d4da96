//! The on-disk/on-wire JSON shape of a subgraph: a tree of tasks and nodes
//! that mirrors [`flowgraph_core::graph::Subgraph`] closely enough to
//! reconstruct it, but with node ids as plain strings rather than the
//! process-wide generator's allocations.

use flowgraph_core::types::Value;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// The newest document schema version this crate can read.
pub const CURRENT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub name: String,
    pub version: u32,
    pub input: InputSection,
    pub output: OutputSection,
    /// Local task name -> task definition.
    pub tasks: HashMap<String, TaskDocument>,
    /// Node id -> node. Insertion order is not carried by the map itself;
    /// `from_json` recovers it from the numeric tick suffix baked into each
    /// node id (see [`flowgraph_core::graph::Subgraph::add_node`]).
    pub nodes: HashMap<String, NodeDocument>,
    /// Present when this document was read from an external file a
    /// composite task's payload may now refer to by [`CompositePayload::External`]
    /// instead of inlining its full structure again.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub filepath: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct InputSection {
    /// Declared input name -> type token.
    pub objects: HashMap<String, String>,
    /// Declared input name -> { nodeId -> [inputName, ...] }.
    pub mapping: HashMap<String, HashMap<String, Vec<String>>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct OutputSection {
    /// Declared output name -> type token.
    pub objects: HashMap<String, String>,
    /// Declared output name -> (nodeId, outputName).
    pub mapping: HashMap<String, (String, String)>,
}

/// An atomic task's payload: just enough to re-resolve it from the
/// process-wide registry on load. No input/output schema travels here — that
/// schema lives on the registered [`flowgraph_core::task::AtomicTask`]
/// itself, keyed by `name`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AtomicPayload {
    pub name: String,
    #[serde(rename = "sourceFile")]
    pub source_file: String,
}

/// A composite task's payload: either the nested subgraph inlined in full,
/// or a stub pointing at a file it was previously persisted to.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CompositePayload {
    Inline(Box<Document>),
    External { filepath: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "lowercase")]
pub enum TaskDocument {
    Atomic(AtomicPayload),
    Composite(CompositePayload),
}

/// A node's input/output wiring: `links.in[inputName]` is the producer
/// `(nodeId, outputName)` feeding that slot, if any; `links.out[outputName]`
/// fans out to every sink slot currently fed by that output.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Links {
    #[serde(rename = "in")]
    pub inbound: HashMap<String, Option<(String, String)>>,
    #[serde(rename = "out")]
    pub outbound: HashMap<String, HashMap<String, Vec<String>>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDocument {
    /// Local name of the task this node uses.
    #[serde(rename = "instanceOf")]
    pub instance_of: String,
    pub links: Links,
    #[serde(rename = "cacheLastResult")]
    pub cache_last_result: bool,
    #[serde(rename = "lastResult")]
    pub last_result: Option<HashMap<String, Value>>,
}
