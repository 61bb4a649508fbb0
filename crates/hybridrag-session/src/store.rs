use crate::session::{Session, Turn};
use async_trait::async_trait;
use hybridrag_core::{RagError, RagResult};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::debug;

/// Per-session conversation history.
///
/// Sessions are created on first use. Ids are restricted to ASCII
/// alphanumerics, `-` and `_`.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Fetch a session, creating an empty one when it does not exist yet.
    async fn get_or_create(&self, session_id: &str) -> RagResult<Session>;
    /// Append a turn, creating the session if needed.
    async fn append(&self, session_id: &str, turn: Turn) -> RagResult<()>;
    /// The last `max` turns of a session (empty for an unknown session).
    async fn recent(&self, session_id: &str, max: usize) -> RagResult<Vec<Turn>>;
    /// Forget a session. Clearing an unknown session is a no-op.
    async fn clear(&self, session_id: &str) -> RagResult<()>;
    /// Ids of all known sessions, sorted.
    async fn sessions(&self) -> RagResult<Vec<String>>;
}

fn validate_session_id(session_id: &str) -> RagResult<()> {
    let valid = !session_id.is_empty()
        && session_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(RagError::Session(format!(
            "invalid session id '{session_id}'"
        )))
    }
}

/// In-process history store.
#[derive(Debug, Default)]
pub struct SessionHistory {
    sessions: RwLock<HashMap<String, Session>>,
}

impl SessionHistory {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HistoryStore for SessionHistory {
    async fn get_or_create(&self, session_id: &str) -> RagResult<Session> {
        validate_session_id(session_id)?;
        let mut sessions = self.sessions.write();
        Ok(sessions
            .entry(session_id.to_string())
            .or_insert_with(|| Session::new(session_id))
            .clone())
    }

    async fn append(&self, session_id: &str, turn: Turn) -> RagResult<()> {
        validate_session_id(session_id)?;
        let mut sessions = self.sessions.write();
        sessions
            .entry(session_id.to_string())
            .or_insert_with(|| Session::new(session_id))
            .push(turn);
        Ok(())
    }

    async fn recent(&self, session_id: &str, max: usize) -> RagResult<Vec<Turn>> {
        validate_session_id(session_id)?;
        Ok(self
            .sessions
            .read()
            .get(session_id)
            .map(|s| s.recent(max).to_vec())
            .unwrap_or_default())
    }

    async fn clear(&self, session_id: &str) -> RagResult<()> {
        validate_session_id(session_id)?;
        self.sessions.write().remove(session_id);
        Ok(())
    }

    async fn sessions(&self) -> RagResult<Vec<String>> {
        let mut ids: Vec<String> = self.sessions.read().keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}

/// History store keeping one JSON file per session under a directory.
pub struct FileHistory {
    dir: PathBuf,
    /// Serializes read-modify-write cycles on session files.
    write_lock: Mutex<()>,
}

impl FileHistory {
    /// Open (and create if needed) the history directory.
    pub async fn new(dir: impl Into<PathBuf>) -> RagResult<Self> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;
        Ok(Self {
            dir,
            write_lock: Mutex::new(()),
        })
    }

    /// Directory holding the session files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn session_path(&self, session_id: &str) -> PathBuf {
        self.dir.join(format!("{session_id}.json"))
    }

    async fn read(&self, session_id: &str) -> RagResult<Option<Session>> {
        let path = self.session_path(session_id);
        let data = match tokio::fs::read_to_string(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let session = serde_json::from_str(&data)
            .map_err(|e| RagError::Session(format!("Failed to parse session: {e}")))?;
        Ok(Some(session))
    }

    async fn write(&self, session: &Session) -> RagResult<()> {
        let json = serde_json::to_string_pretty(session)?;
        tokio::fs::write(self.session_path(&session.id), json).await?;
        Ok(())
    }
}

#[async_trait]
impl HistoryStore for FileHistory {
    async fn get_or_create(&self, session_id: &str) -> RagResult<Session> {
        validate_session_id(session_id)?;
        let _guard = self.write_lock.lock().await;
        if let Some(session) = self.read(session_id).await? {
            return Ok(session);
        }
        let session = Session::new(session_id);
        self.write(&session).await?;
        debug!(session_id, "Session created");
        Ok(session)
    }

    async fn append(&self, session_id: &str, turn: Turn) -> RagResult<()> {
        validate_session_id(session_id)?;
        let _guard = self.write_lock.lock().await;
        let mut session = self
            .read(session_id)
            .await?
            .unwrap_or_else(|| Session::new(session_id));
        session.push(turn);
        self.write(&session).await
    }

    async fn recent(&self, session_id: &str, max: usize) -> RagResult<Vec<Turn>> {
        validate_session_id(session_id)?;
        Ok(self
            .read(session_id)
            .await?
            .map(|s| s.recent(max).to_vec())
            .unwrap_or_default())
    }

    async fn clear(&self, session_id: &str) -> RagResult<()> {
        validate_session_id(session_id)?;
        let _guard = self.write_lock.lock().await;
        match tokio::fs::remove_file(self.session_path(session_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn sessions(&self) -> RagResult<Vec<String>> {
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if let Some(name) = entry.file_name().to_str() {
                if let Some(stem) = name.strip_suffix(".json") {
                    if validate_session_id(stem).is_ok() {
                        ids.push(stem.to_string());
                    }
                }
            }
        }
        ids.sort();
        Ok(ids)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::session::Role;

    #[tokio::test]
    async fn test_in_memory_append_and_recent() {
        let history = SessionHistory::new();
        history.append("s1", Turn::user("hello")).await.unwrap();
        history.append("s1", Turn::assistant("hi")).await.unwrap();

        let recent = history.recent("s1", 10).await.unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[1].role, Role::Assistant);
        assert!(history.recent("unknown", 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_in_memory_get_or_create_and_clear() {
        let history = SessionHistory::new();
        let session = history.get_or_create("abc").await.unwrap();
        assert_eq!(session.turn_count(), 0);
        assert_eq!(history.sessions().await.unwrap(), vec!["abc"]);

        history.clear("abc").await.unwrap();
        assert!(history.sessions().await.unwrap().is_empty());
        history.clear("abc").await.unwrap();
    }

    #[tokio::test]
    async fn test_invalid_session_ids_rejected() {
        let history = SessionHistory::new();
        for bad in ["", "../etc", "a b", "x/y"] {
            let err = history.append(bad, Turn::user("q")).await.unwrap_err();
            assert!(matches!(err, RagError::Session(_)), "{bad:?}");
        }
    }

    #[tokio::test]
    async fn test_file_history_persists() {
        let tmp = tempfile::tempdir().unwrap();
        {
            let history = FileHistory::new(tmp.path()).await.unwrap();
            history.append("s1", Turn::user("first")).await.unwrap();
            history.append("s1", Turn::assistant("second")).await.unwrap();
            history.get_or_create("s2").await.unwrap();
        }

        let reopened = FileHistory::new(tmp.path()).await.unwrap();
        let turns = reopened.recent("s1", 1).await.unwrap();
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].content, "second");
        assert_eq!(reopened.sessions().await.unwrap(), vec!["s1", "s2"]);

        reopened.clear("s1").await.unwrap();
        assert_eq!(reopened.sessions().await.unwrap(), vec!["s2"]);
    }

    #[tokio::test]
    async fn test_file_history_rejects_corrupt_file() {
        let tmp = tempfile::tempdir().unwrap();
        let history = FileHistory::new(tmp.path()).await.unwrap();
        tokio::fs::write(tmp.path().join("bad.json"), "not json")
            .await
            .unwrap();
        let err = history.recent("bad", 5).await.unwrap_err();
        assert!(matches!(err, RagError::Session(_)));
    }
}
