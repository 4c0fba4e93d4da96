//! [`to_document`] / [`to_json`]: flatten a [`Subgraph`] into the wire format.

use crate::document::{
    AtomicPayload, CompositePayload, Document, InputSection, Links, NodeDocument, OutputSection, TaskDocument,
    CURRENT_VERSION,
};
use flowgraph_core::error::Result;
use flowgraph_core::graph::{Subgraph, SubgraphHandle};
use flowgraph_core::task::{AtomicTask, Task};
use std::sync::Arc;

/// Flatten `sg` into a [`Document`]. Nested subgraphs (tasks that are
/// themselves [`SubgraphHandle`]s) are serialized recursively as
/// [`TaskDocument::Composite`], always inlined rather than emitted as a
/// [`CompositePayload::External`] stub — this crate has no notion of which
/// file a live subgraph "belongs to"; only a loaded stub is preserved as-is.
pub fn to_document(sg: &Subgraph) -> Document {
    let mut tasks = std::collections::HashMap::new();
    for (local_name, task_ref) in sg.tasks() {
        let doc = if let Some(atomic) = task_ref.as_any().downcast_ref::<AtomicTask>() {
            TaskDocument::Atomic(AtomicPayload {
                name: atomic.name().to_string(),
                source_file: atomic.source_location().unwrap_or("").to_string(),
            })
        } else if let Some(handle) = task_ref.as_any().downcast_ref::<SubgraphHandle>() {
            let inner = handle.inner();
            let inner = inner.read();
            TaskDocument::Composite(CompositePayload::Inline(Box::new(to_document(&inner))))
        } else {
            // Any other `Task` implementor has no document representation;
            // fall back to an opaque atomic stub rather than panicking.
            TaskDocument::Atomic(AtomicPayload {
                name: task_ref.name().to_string(),
                source_file: task_ref.source_location().unwrap_or("").to_string(),
            })
        };
        tasks.insert(local_name.clone(), doc);
    }

    // Recovering a node's *local* task name (not the task's own `.name()`,
    // which may differ) needs a reverse lookup by identity: the same `Arc`
    // handed back from `sg.tasks()` is the one each node holds.
    let task_refs: Vec<(&String, &flowgraph_core::task::TaskRef)> = sg.tasks().iter().collect();

    let nodes = sg
        .node_order()
        .iter()
        .map(|id| {
            let node = sg.get_node(id).expect("node_order is consistent with nodes");
            let instance_of = task_refs
                .iter()
                .find(|(_, task_ref)| Arc::ptr_eq(task_ref, &node.task))
                .map(|(local_name, _)| (*local_name).clone())
                .unwrap_or_else(|| node.task.name().to_string());
            let inbound = node
                .inputs
                .iter()
                .map(|(input_name, source)| (input_name.clone(), source.clone()))
                .collect();
            let outbound = node.outputs.clone();
            (
                id.clone(),
                NodeDocument {
                    instance_of,
                    links: Links { inbound, outbound },
                    cache_last_result: node.cache_last_result,
                    last_result: node.last_result.clone(),
                },
            )
        })
        .collect();

    Document {
        name: sg.name().to_string(),
        version: CURRENT_VERSION,
        input: InputSection {
            objects: sg
                .declared_inputs()
                .iter()
                .map(|(k, v)| (k.clone(), v.as_str().to_string()))
                .collect(),
            mapping: sg.input_map().clone(),
        },
        output: OutputSection {
            objects: sg
                .declared_outputs()
                .iter()
                .map(|(k, v)| (k.clone(), v.as_str().to_string()))
                .collect(),
            mapping: sg.output_map().clone(),
        },
        tasks,
        nodes,
        filepath: None,
    }
}

/// Serialize `sg` to a pretty-printed JSON string.
pub fn to_json(sg: &Subgraph) -> Result<String> {
    serde_json::to_string_pretty(&to_document(sg))
        .map_err(|e| flowgraph_core::error::GraphError::MalformedDocument(e.to_string()))
}
