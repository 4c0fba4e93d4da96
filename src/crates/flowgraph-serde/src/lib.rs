//! JSON serialization for [`flowgraph_core::graph::Subgraph`]: a wire
//! [`Document`] format plus the node id remapping needed to load one back
//! into a live subgraph.

pub mod document;
pub mod from_json;
pub mod to_json;

pub use document::Document;
pub use from_json::from_document;
pub use to_json::{to_document, to_json};

use flowgraph_core::error::{GraphError, Result};
use flowgraph_core::graph::Subgraph;

/// Parse `text` as a [`Document`] and rebuild the [`Subgraph`] it describes.
pub fn from_json(text: &str) -> Result<Subgraph> {
    let doc: Document = serde_json::from_str(text).map_err(|e| GraphError::MalformedDocument(e.to_string()))?;
    from_document(&doc)
}
