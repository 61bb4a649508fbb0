//! Core types and error definitions for the hybridrag retrieval engine.
//!
//! This crate provides the foundational types shared across all hybridrag
//! crates: the unified error enum and the document model that both the
//! dense and the lexical index are built from.
//!
//! # Main types
//!
//! - [`RagError`] — Unified error enum for indexing, retrieval and persistence.
//! - [`RagResult`] — Convenience alias for `Result<T, RagError>`.
//! - [`Document`] — A unit of retrievable text with scalar metadata.
//! - [`Metadata`] / [`MetadataFilter`] — Scalar key-value maps.

/// Document model and metadata matching.
pub mod document;

pub use document::{is_scalar, scalar_eq, Document, Metadata, MetadataFilter};

// --- Error types ---

/// Top-level error type for the hybridrag workspace.
///
/// Structural failures (dimension mismatches, corrupt snapshots, missing
/// documents) are raised to the caller. An empty result list is never an
/// error: it is returned as `Ok(vec![])`.
#[derive(Debug, thiserror::Error)]
pub enum RagError {
    /// An embedding's length does not match the index dimensionality.
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Dimensionality fixed by the index.
        expected: usize,
        /// Dimensionality of the offending vector.
        actual: usize,
    },

    /// An id is referenced by an index but missing from the document store.
    #[error("Document not found: {0}")]
    DocumentNotFound(String),

    /// No snapshot exists at the given location.
    #[error("Index not found: {0}")]
    IndexNotFound(String),

    /// A snapshot exists but is incomplete or inconsistent.
    #[error("Corrupt index: {0}")]
    CorruptIndex(String),

    /// A caller-supplied argument is out of range or malformed.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The embedding collaborator failed; aborts the current build.
    #[error("Embedding failure: {0}")]
    EmbeddingFailure(String),

    /// An error related to session history persistence or lookup.
    #[error("Session error: {0}")]
    Session(String),

    /// An error in configuration parsing or validation.
    #[error("Config error: {0}")]
    Config(String),

    /// An error from an outbound HTTP request (e.g. a remote embedding API).
    #[error("HTTP error: {0}")]
    Http(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A convenience `Result` alias using [`RagError`].
pub type RagResult<T> = Result<T, RagError>;
