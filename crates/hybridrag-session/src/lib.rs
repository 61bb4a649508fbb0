//! Conversation history for multi-turn retrieval sessions.
//!
//! # Main types
//!
//! - [`HistoryStore`] — Async trait for per-session turn storage.
//! - [`SessionHistory`] — In-process store.
//! - [`FileHistory`] — One JSON file per session on disk.

/// Session and turn types.
pub mod session;
/// History store trait and implementations.
pub mod store;

pub use session::{Role, Session, Turn, DEFAULT_WINDOW};
pub use store::{FileHistory, HistoryStore, SessionHistory};
