//! Error types for graph construction, validation, and execution.
//!
//! All errors implement `std::error::Error` via `thiserror`. They are grouped
//! by what raised them: structural, input-contract, serialization, execution,
//! and lifecycle.
//!
//! # Example
//!
//! ```rust
//! use flowgraph_core::error::GraphError;
//!
//! let err = GraphError::MissingInput {
//!     node: "A1".into(),
//!     input: "a".into(),
//! };
//! assert_eq!(format!("{err}"), "node 'A1' is missing required input 'a'");
//! ```

use std::fmt;

/// Shorthand for `Result<T, GraphError>`, used throughout the crate's public API.
pub type Result<T> = std::result::Result<T, GraphError>;

/// The node-local slot a [`GraphError::MissingInput`] or type mismatch refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slot {
    pub node: String,
    pub name: String,
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.node, self.name)
    }
}

/// The unified error type returned by every public operation in this crate.
#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    // --- Structural ---
    /// Registering a task under a name that already exists in the active store.
    #[error("a task named '{0}' is already registered")]
    DuplicateName(String),

    /// Resolving a task name the registry has never seen.
    #[error("no task named '{0}' is registered")]
    Unknown(String),

    /// Input completeness check found a filled-by-nothing input slot.
    #[error("node '{node}' is missing required input '{input}'")]
    MissingInput { node: String, input: String },

    /// The validator's acyclicity pass re-entered a node within its own component.
    #[error("graph contains a cycle through node '{0}'")]
    Circular(String),

    /// An edge or boundary map links two slots whose type tokens disagree.
    #[error("type mismatch linking {src} ({src_type}) to {dst} ({dst_type})")]
    TypeMismatch {
        src: Slot,
        src_type: String,
        dst: Slot,
        dst_type: String,
    },

    /// Attempted to remove a task still referenced by a node.
    #[error("task '{0}' is still in use by one or more nodes")]
    NodeInUse(String),

    /// Attempted to remove a node or declared input/output still referenced by a boundary map.
    #[error("'{0}' is still referenced by a boundary mapping")]
    MappingInUse(String),

    // --- Input contract ---
    /// A type token string does not name a type the engine recognizes.
    #[error("'{0}' is not a recognized type token")]
    BadType(String),

    /// Declared inputs disagree with the underlying computation's parameter schema.
    #[error("declared inputs for '{0}' do not match its parameter schema: {1}")]
    BadInputs(String, String),

    // --- Serialization ---
    /// The document's `version` field names a schema newer than this engine supports.
    #[error("document version {found} is newer than the supported version {supported}")]
    UnsupportedVersion { found: u32, supported: u32 },

    /// The document failed structural validation during load.
    #[error("malformed document: {0}")]
    MalformedDocument(String),

    /// A type token string contained characters outside `[A-Za-z0-9.]`.
    #[error("unsafe type token: '{0}'")]
    UnsafeTypeToken(String),

    // --- Execution ---
    /// An atomic task's invocation returned an error; execution aborted.
    #[error("node '{node}' failed: {inner}")]
    TaskFailure { node: String, inner: String },

    /// An invariant the planner or scheduler is supposed to guarantee did not hold.
    #[error("internal invariant violated: {0}")]
    Internal(String),

    // --- Lifecycle ---
    /// The executor this call targets has already been torn down.
    #[error("executor has already been disposed")]
    AlreadyDisposed,

    /// The executor this call targets has not been started.
    #[error("executor has not been started")]
    NotStarted,
}

impl GraphError {
    /// Build a [`GraphError::MissingInput`] from a [`Slot`].
    pub fn missing_input(slot: Slot) -> Self {
        GraphError::MissingInput {
            node: slot.node,
            input: slot.name,
        }
    }

    /// Build a [`GraphError::TaskFailure`] wrapping any displayable inner error.
    pub fn task_failure(node: impl Into<String>, inner: impl fmt::Display) -> Self {
        GraphError::TaskFailure {
            node: node.into(),
            inner: inner.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_input_formats_with_slot() {
        let err = GraphError::missing_input(Slot {
            node: "A1".into(),
            name: "a".into(),
        });
        assert_eq!(format!("{err}"), "node 'A1' is missing required input 'a'");
    }

    #[test]
    fn task_failure_wraps_display() {
        let err = GraphError::task_failure("M1", "divide by zero");
        assert_eq!(format!("{err}"), "node 'M1' failed: divide by zero");
    }
}
