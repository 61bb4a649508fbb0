use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::{RagError, RagResult};

/// Scalar metadata attached to a [`Document`], keyed by field name.
pub type Metadata = BTreeMap<String, serde_json::Value>;

/// Required field values; a document matches when every field is present
/// and equal.
pub type MetadataFilter = BTreeMap<String, serde_json::Value>;

/// A unit of retrievable text.
///
/// `text` is the canonical content used for both embedding and lexical
/// scoring. `id` is unique within a collection and never changes once the
/// document has been indexed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    /// Stable identifier, unique within one index.
    pub id: String,
    /// Canonical text content.
    pub text: String,
    /// Producer-supplied scalar fields (source, category, price, ...).
    #[serde(default)]
    pub metadata: Metadata,
}

impl Document {
    /// Creates a document with no metadata.
    pub fn new(id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            metadata: Metadata::new(),
        }
    }

    /// Adds a metadata field. Chainable builder method.
    pub fn with_metadata(
        mut self,
        key: impl Into<String>,
        value: impl Into<serde_json::Value>,
    ) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Checks the invariants every indexed document must satisfy: a non-empty
    /// id, non-blank text, and scalar-only metadata.
    pub fn validate(&self) -> RagResult<()> {
        if self.id.is_empty() {
            return Err(RagError::InvalidArgument(
                "document id must not be empty".to_string(),
            ));
        }
        if self.text.trim().is_empty() {
            return Err(RagError::InvalidArgument(format!(
                "document '{}' has empty text",
                self.id
            )));
        }
        if let Some((key, _)) = self.metadata.iter().find(|(_, v)| !is_scalar(v)) {
            return Err(RagError::InvalidArgument(format!(
                "document '{}' metadata field '{key}' is not a scalar",
                self.id
            )));
        }
        Ok(())
    }

    /// Returns `true` when every field in `filter` is present in this
    /// document's metadata with an equal value. An empty filter matches.
    pub fn matches(&self, filter: &MetadataFilter) -> bool {
        filter.iter().all(|(key, required)| {
            self.metadata
                .get(key)
                .is_some_and(|value| scalar_eq(value, required))
        })
    }
}

/// Whether a JSON value is a scalar (string, number, bool or null).
pub fn is_scalar(value: &serde_json::Value) -> bool {
    !matches!(
        value,
        serde_json::Value::Array(_) | serde_json::Value::Object(_)
    )
}

/// Scalar equality that treats `1` and `1.0` as the same number.
pub fn scalar_eq(a: &serde_json::Value, b: &serde_json::Value) -> bool {
    match (a, b) {
        (serde_json::Value::Number(x), serde_json::Value::Number(y)) => {
            match (x.as_i64(), y.as_i64()) {
                (Some(x), Some(y)) => x == y,
                _ => x.as_f64() == y.as_f64(),
            }
        }
        _ => a == b,
    }
}
