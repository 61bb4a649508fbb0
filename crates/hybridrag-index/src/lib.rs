//! Hybrid dense + lexical retrieval with persistent index snapshots.
//!
//! Documents are embedded into an exact cosine-similarity index and
//! tokenized into a BM25 inverted index. Queries run against both, each
//! side's scores are min-max normalized, and the two are blended with a
//! configurable weight before metadata filters are applied.
//!
//! # Main types
//!
//! - [`IndexBuilder`] — Validates, embeds and indexes a document collection.
//! - [`IndexSnapshot`] — Vector index, lexical index and documents as one unit.
//! - [`HybridRetriever`] — Fused ranking over a shared snapshot.
//! - [`VectorIndex`] — Brute-force cosine similarity over unit vectors.
//! - [`LexicalIndex`] — BM25 inverted index.
//! - [`DocumentStore`] — Id → document lookup.
//! - [`EmbeddingProvider`] — Trait for computing text embeddings.

/// BM25 inverted index for keyword-based retrieval.
pub mod bm25;
/// One-shot index construction.
pub mod builder;
/// Id-keyed document storage.
pub mod document_store;
/// Embedding provider trait and local implementation.
pub mod embedding;
/// Retrieval quality metrics.
pub mod evaluation;
/// Min-max normalized fusion of dense and lexical rankings.
pub mod hybrid;
/// OpenAI-compatible HTTP embedding client.
#[cfg(feature = "http-embeddings")]
pub mod http_embedding;
mod persist;
/// Persisted snapshot of all three structures.
pub mod snapshot;
/// Exact dense vector index.
pub mod vector;

pub use bm25::{tokenize, Bm25Params, LexicalIndex};
pub use builder::{BuilderConfig, IndexBuilder};
pub use document_store::DocumentStore;
pub use embedding::{EmbeddingProvider, LocalEmbedding};
pub use evaluation::QueryJudgement;
pub use hybrid::{retrieve_context, HybridRetriever, RetrievalResult, RetrieverConfig};
#[cfg(feature = "http-embeddings")]
pub use http_embedding::HttpEmbedding;
pub use snapshot::{IndexSnapshot, SnapshotStats, DOCUMENTS_FILE, VECTORS_FILE};
pub use vector::VectorIndex;
