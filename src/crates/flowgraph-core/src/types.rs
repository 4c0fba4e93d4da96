//! Type tokens and the opaque payload value carried along edges.

use crate::error::GraphError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A stable, comparable name for a runtime value category (`"int"`, `"MyStruct"`, ...).
///
/// Equality of type tokens gates edge and boundary validity; the engine never
/// looks past the token to inspect a payload's actual shape. Valid tokens are
/// ASCII alphanumerics plus `.`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TypeToken(String);

impl TypeToken {
    /// Validate and construct a type token. Rejects anything outside
    /// `[A-Za-z0-9.]`, which is also how the serializer refuses injection
    /// when loading tokens out of an untrusted document.
    pub fn new(raw: impl Into<String>) -> Result<Self, GraphError> {
        let raw = raw.into();
        if raw.is_empty() || !raw.chars().all(|c| c.is_ascii_alphanumeric() || c == '.') {
            return Err(GraphError::BadType(raw));
        }
        Ok(TypeToken(raw))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TypeToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The sentinel output name used as the sole output slot of atomic tasks, so
/// a uniform model covers both atomic and composite nodes.
pub const SENTINEL_OUTPUT: &str = "";

/// The opaque payload carried along an edge. The engine never inspects this
/// beyond routing it; only the declared [`TypeToken`] of the slot it sits in
/// is checked.
pub type Value = serde_json::Value;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_alnum_and_dot() {
        assert!(TypeToken::new("int").is_ok());
        assert!(TypeToken::new("my.Struct42").is_ok());
    }

    #[test]
    fn rejects_unsafe_characters() {
        assert!(TypeToken::new("int; DROP TABLE").is_err());
        assert!(TypeToken::new("").is_err());
        assert!(TypeToken::new("a/b").is_err());
    }
}
