use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Number of turns handed back as conversational context by default.
pub const DEFAULT_WINDOW: usize = 10;

/// Who produced a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The person asking.
    User,
    /// The answering side.
    Assistant,
}

/// One message in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    /// Unique turn id.
    pub id: Uuid,
    /// Author of the turn.
    pub role: Role,
    /// Message text.
    pub content: String,
    /// When the turn was recorded.
    pub timestamp: DateTime<Utc>,
}

impl Turn {
    /// Create a turn stamped with the current time.
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            content: content.into(),
            timestamp: Utc::now(),
        }
    }

    /// A user turn.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// An assistant turn.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// The ordered turns of one conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Caller-chosen session id.
    pub id: String,
    /// Turns, oldest first.
    pub turns: Vec<Turn>,
    /// When the session was first used.
    pub created_at: DateTime<Utc>,
    /// When the last turn was appended.
    pub updated_at: DateTime<Utc>,
}

impl Session {
    /// An empty session.
    pub fn new(id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            turns: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Append a turn.
    pub fn push(&mut self, turn: Turn) {
        self.updated_at = Utc::now();
        self.turns.push(turn);
    }

    /// The last `max` turns, oldest first.
    pub fn recent(&self, max: usize) -> &[Turn] {
        let start = self.turns.len().saturating_sub(max);
        &self.turns[start..]
    }

    /// Number of turns recorded.
    pub fn turn_count(&self) -> usize {
        self.turns.len()
    }
}
