use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::error::{PolicyError, Result};
use crate::field::{self, Resolved};

/// Immutable snapshot of the event being evaluated.
///
/// Attributes are addressed by dotted paths (`request.ip`, `user.role`). The
/// context may be supplied as nested JSON, as flat dotted keys, or a mix of
/// both; [`Context::get`] resolves all of them.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Context {
    root: Map<String, Value>,
}

impl Context {
    pub fn builder() -> ContextBuilder {
        ContextBuilder::default()
    }

    /// Wrap a JSON object. Anything other than an object is rejected.
    pub fn from_json(value: Value) -> Result<Self> {
        match value {
            Value::Object(root) => Ok(Self { root }),
            Value::Null => Err(PolicyError::InvalidContext("null")),
            Value::Bool(_) => Err(PolicyError::InvalidContext("a boolean")),
            Value::Number(_) => Err(PolicyError::InvalidContext("a number")),
            Value::String(_) => Err(PolicyError::InvalidContext("a string")),
            Value::Array(_) => Err(PolicyError::InvalidContext("an array")),
        }
    }

    pub fn get(&self, path: &str) -> Resolved<'_> {
        field::resolve(self, path)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.root
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }

    /// SHA-256 over the canonical JSON encoding, hex encoded.
    ///
    /// `serde_json::Map` keeps keys sorted, so two contexts with the same
    /// attributes fingerprint identically regardless of insertion order.
    pub fn fingerprint(&self) -> String {
        let bytes = serde_json::to_vec(&self.root).unwrap_or_default();
        hex::encode(Sha256::digest(&bytes))
    }
}

impl TryFrom<Value> for Context {
    type Error = PolicyError;

    fn try_from(value: Value) -> Result<Self> {
        Self::from_json(value)
    }
}

/// Builds a [`Context`] from dotted paths, creating nested objects as needed.
#[derive(Debug, Default)]
pub struct ContextBuilder {
    root: Map<String, Value>,
}

impl ContextBuilder {
    pub fn insert(mut self, path: &str, value: impl Into<Value>) -> Self {
        let segments: Vec<&str> = path.split('.').collect();
        insert_path(&mut self.root, &segments, value.into());
        self
    }

    pub fn build(self) -> Context {
        Context { root: self.root }
    }
}

fn insert_path(node: &mut Map<String, Value>, segments: &[&str], value: Value) {
    match segments {
        [] => {}
        [last] => {
            node.insert((*last).to_string(), value);
        }
        [head, rest @ ..] => {
            let child = node
                .entry((*head).to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !child.is_object() {
                *child = Value::Object(Map::new());
            }
            if let Value::Object(map) = child {
                insert_path(map, rest, value);
            }
        }
    }
}
