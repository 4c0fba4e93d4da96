//! [`from_document`] / [`from_json`]: rebuild a [`Subgraph`] from the wire
//! format.
//!
//! Loading proceeds in three passes so that node ids allocated by the
//! process-wide generator never collide with ids baked into an old
//! document: rebuild every task, create a node for each document node under
//! a freshly minted id (recording old id -> new id), then translate every
//! reference — edges and boundary maps alike — through that map.

use crate::document::{CompositePayload, Document, TaskDocument, CURRENT_VERSION};
use flowgraph_core::error::{GraphError, Result};
use flowgraph_core::exec::SequentialExecutor;
use flowgraph_core::graph::{Subgraph, SubgraphHandle};
use flowgraph_core::registry::Registry;
use flowgraph_core::task::TaskRef;
use flowgraph_core::types::TypeToken;
use std::collections::HashMap;
use std::sync::Arc;

/// Rebuild a [`Subgraph`] from `doc`. Fails with
/// [`GraphError::UnsupportedVersion`] if `doc.version` is newer than
/// [`CURRENT_VERSION`], or [`GraphError::MalformedDocument`] if a task,
/// node, or link reference does not resolve.
pub fn from_document(doc: &Document) -> Result<Subgraph> {
    if doc.version > CURRENT_VERSION {
        return Err(GraphError::UnsupportedVersion {
            found: doc.version,
            supported: CURRENT_VERSION,
        });
    }

    let mut sg = Subgraph::new(doc.name.clone());

    for (local_name, task_doc) in &doc.tasks {
        let task_ref = build_task(local_name, task_doc)?;
        sg.add_task(local_name.clone(), task_ref);
    }

    for (name, token) in &doc.input.objects {
        sg.add_declared_input(name.clone(), TypeToken::new(token.clone())?);
    }
    for (name, token) in &doc.output.objects {
        sg.add_declared_output(name.clone(), TypeToken::new(token.clone())?);
    }

    // A document's `nodes` map carries no order of its own; recover the
    // subgraph's original insertion order from the numeric tick suffix every
    // id was minted with (`"<localTaskName>.<tick>"`), so the reloaded plan
    // matches the one that was saved.
    let mut ordered_ids: Vec<&String> = doc.nodes.keys().collect();
    ordered_ids.sort_by_key(|id| node_tick(id));

    let mut old_to_new: HashMap<String, String> = HashMap::new();
    for old_id in &ordered_ids {
        let node_doc = &doc.nodes[*old_id];
        let new_id = sg.add_node(&node_doc.instance_of).map_err(|_| {
            GraphError::MalformedDocument(format!(
                "node '{old_id}' references unknown task '{}'",
                node_doc.instance_of
            ))
        })?;
        old_to_new.insert((*old_id).clone(), new_id);
    }

    let translate = |old_id: &str| -> Result<String> {
        old_to_new
            .get(old_id)
            .cloned()
            .ok_or_else(|| GraphError::MalformedDocument(format!("link references unknown node '{old_id}'")))
    };

    for old_id in &ordered_ids {
        let node_doc = &doc.nodes[*old_id];
        let new_src = translate(old_id)?;
        for (output_name, fanout) in &node_doc.links.outbound {
            for (sink_old_id, sink_inputs) in fanout {
                let new_sink = translate(sink_old_id)?;
                for sink_input in sink_inputs {
                    sg.add_edge(&new_src, output_name, &new_sink, sink_input)?;
                }
            }
        }
        sg.set_node_cache(&new_src, node_doc.cache_last_result)?;
        sg.set_node_last_result(&new_src, node_doc.last_result.clone())?;
    }

    for (declared, fanout) in &doc.input.mapping {
        for (old_id, input_names) in fanout {
            let new_id = translate(old_id)?;
            for input_name in input_names {
                sg.add_input_map(declared, &new_id, input_name)?;
            }
        }
    }
    for (declared, (old_id, output_name)) in &doc.output.mapping {
        let new_id = translate(old_id)?;
        sg.add_output_map(declared, &new_id, output_name)?;
    }

    Ok(sg)
}

/// Parse the monotonic tick suffix out of a `"<localTaskName>.<tick>"` node
/// id. Ids that don't carry one (hand-written documents) sort last, in the
/// order `doc.nodes` happens to iterate them.
fn node_tick(id: &str) -> u64 {
    id.rsplit_once('.').and_then(|(_, tick)| tick.parse().ok()).unwrap_or(u64::MAX)
}

/// Parse `text` as a [`Document`] and rebuild the [`Subgraph`] it describes.
pub fn from_json(text: &str) -> Result<Subgraph> {
    let doc: Document = serde_json::from_str(text).map_err(|e| GraphError::MalformedDocument(e.to_string()))?;
    from_document(&doc)
}

fn build_task(local_name: &str, doc: &TaskDocument) -> Result<TaskRef> {
    match doc {
        TaskDocument::Atomic(payload) => {
            // The wire format carries only a name and source location — no
            // input/output schema — so a loaded atomic task must resolve
            // against the process-wide registry, which already holds the
            // full typed task under that name. There is nothing to fall
            // back to if it isn't registered: re-running a loaded subgraph
            // requires every atomic task's source to have been (re-)executed
            // into the registry first, same as the live case.
            Registry::global().resolve(&payload.name).map(|task| task as TaskRef).map_err(|_| {
                GraphError::MalformedDocument(format!(
                    "task '{local_name}' ({}) is not registered; its source ({}) must run before loading this document",
                    payload.name, payload.source_file
                ))
            })
        }
        TaskDocument::Composite(payload) => {
            let inner_doc = match payload {
                CompositePayload::Inline(inner) => inner.as_ref().clone(),
                CompositePayload::External { filepath } => {
                    let text = std::fs::read_to_string(filepath).map_err(|e| {
                        GraphError::MalformedDocument(format!(
                            "composite task '{local_name}': failed to read '{filepath}': {e}"
                        ))
                    })?;
                    serde_json::from_str(&text)
                        .map_err(|e| GraphError::MalformedDocument(format!("composite task '{local_name}': {e}")))?
                }
            };
            let inner_sg = from_document(&inner_doc)
                .map_err(|e| GraphError::MalformedDocument(format!("composite task '{local_name}': {e}")))?;
            let executor = Arc::new(SequentialExecutor::new());
            Ok(Arc::new(SubgraphHandle::new(inner_sg, executor)) as TaskRef)
        }
    }
}
