use hybridrag_core::{Document, RagError, RagResult};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use tracing::info;

use crate::persist::{self, FORMAT_VERSION};
use crate::snapshot::SnapshotStamp;

#[derive(Serialize, Deserialize)]
struct PersistedDocuments {
    format_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    snapshot: Option<SnapshotStamp>,
    documents: Vec<Document>,
}

/// Id → document lookup shared by the vector and lexical indexes.
///
/// Every id referenced by either index must resolve here. Documents are kept
/// in insertion order so a saved store reloads identically.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentStore {
    documents: Vec<Document>,
    positions: HashMap<String, usize>,
}

impl DocumentStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a document. Fails with [`RagError::InvalidArgument`] when the
    /// id is already present.
    pub fn insert(&mut self, document: Document) -> RagResult<()> {
        if self.positions.contains_key(&document.id) {
            return Err(RagError::InvalidArgument(format!(
                "duplicate document id '{}'",
                document.id
            )));
        }
        self.positions
            .insert(document.id.clone(), self.documents.len());
        self.documents.push(document);
        Ok(())
    }

    /// Look up a document by id.
    pub fn get(&self, id: &str) -> RagResult<&Document> {
        self.positions
            .get(id)
            .map(|&pos| &self.documents[pos])
            .ok_or_else(|| RagError::DocumentNotFound(id.to_string()))
    }

    /// Whether `id` resolves.
    pub fn contains(&self, id: &str) -> bool {
        self.positions.contains_key(id)
    }

    /// All stored ids.
    pub fn all_ids(&self) -> BTreeSet<String> {
        self.positions.keys().cloned().collect()
    }

    /// Documents in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Document> {
        self.documents.iter()
    }

    /// Number of stored documents.
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    /// Whether the store is empty.
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Serialize every document with its text and metadata.
    pub fn to_bytes(&self) -> RagResult<Vec<u8>> {
        self.encode(None)
    }

    pub(crate) fn encode(&self, stamp: Option<&SnapshotStamp>) -> RagResult<Vec<u8>> {
        let persisted = PersistedDocuments {
            format_version: FORMAT_VERSION,
            snapshot: stamp.copied(),
            documents: self.documents.clone(),
        };
        Ok(serde_json::to_vec(&persisted)?)
    }

    /// Rebuild a store from [`DocumentStore::to_bytes`] output.
    pub fn from_bytes(bytes: &[u8]) -> RagResult<Self> {
        Self::decode(bytes).map(|(store, _)| store)
    }

    pub(crate) fn decode(bytes: &[u8]) -> RagResult<(Self, Option<SnapshotStamp>)> {
        let persisted: PersistedDocuments = serde_json::from_slice(bytes)
            .map_err(|e| RagError::CorruptIndex(format!("invalid document artifact: {e}")))?;
        if persisted.format_version != FORMAT_VERSION {
            return Err(RagError::CorruptIndex(format!(
                "unsupported document format_version {} (expected {FORMAT_VERSION})",
                persisted.format_version
            )));
        }

        let mut store = Self::new();
        for document in persisted.documents {
            store
                .insert(document)
                .map_err(|e| RagError::CorruptIndex(e.to_string()))?;
        }
        Ok((store, persisted.snapshot))
    }

    /// Persist the store to `path` (temp file + rename).
    pub async fn save(&self, path: &Path) -> RagResult<()> {
        persist::write_atomic(path, &self.to_bytes()?).await?;
        info!(path = %path.display(), documents = self.len(), "Document store saved");
        Ok(())
    }

    /// Load a store saved with [`DocumentStore::save`].
    pub async fn load(path: &Path) -> RagResult<Self> {
        let bytes = persist::read_if_exists(path)
            .await?
            .ok_or_else(|| RagError::IndexNotFound(path.display().to_string()))?;
        Self::from_bytes(&bytes)
    }
}
