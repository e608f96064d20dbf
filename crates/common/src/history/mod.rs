//! Conversation history
//!
//! Each session owns an append-only [`ConversationLog`] that is passed by
//! reference into every turn. The [`SessionRegistry`] hands out one lock per
//! session so that concurrent sessions never contend with each other.

use crate::errors::{AppError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// Speaker of a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// A citation the answer of a turn actually used
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsedCitation {
    /// Marker number as it appears in the answer (`[n]`)
    pub marker: u32,
    pub chunk_id: String,
    pub source: String,
    pub position: u32,
    /// Sanitized text that was placed in the context pack
    pub snippet: String,
}

/// One entry of a conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub citations: Vec<UsedCitation>,
    pub created_at: DateTime<Utc>,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            citations: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn assistant(content: impl Into<String>, citations: Vec<UsedCitation>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            citations,
            created_at: Utc::now(),
        }
    }
}

/// Append-only log of one session's turns
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationLog {
    pub session_id: Uuid,
    pub created_at: DateTime<Utc>,
    turns: Vec<Turn>,
}

impl Default for ConversationLog {
    fn default() -> Self {
        Self::new(Uuid::new_v4())
    }
}

impl ConversationLog {
    pub fn new(session_id: Uuid) -> Self {
        Self {
            session_id,
            created_at: Utc::now(),
            turns: Vec::new(),
        }
    }

    pub fn append(&mut self, turn: Turn) {
        self.turns.push(turn);
    }

    /// Record a completed exchange: the question and its grounded answer
    pub fn append_exchange(
        &mut self,
        question: impl Into<String>,
        answer: impl Into<String>,
        citations: Vec<UsedCitation>,
    ) {
        self.turns.push(Turn::user(question));
        self.turns.push(Turn::assistant(answer, citations));
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// The last `n` turns, minus any whose content is blank
    pub fn window(&self, n: usize) -> Vec<&Turn> {
        let start = self.turns.len().saturating_sub(n);
        self.turns[start..]
            .iter()
            .filter(|t| !t.content.trim().is_empty())
            .collect()
    }
}

/// Shared handle on one session's log
pub type SessionHandle = Arc<RwLock<ConversationLog>>;

/// Registry of live sessions, keyed by session id
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<Uuid, SessionHandle>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a fresh session and return its id
    pub async fn create(&self) -> Uuid {
        let log = ConversationLog::default();
        let id = log.session_id;
        self.sessions
            .write()
            .await
            .insert(id, Arc::new(RwLock::new(log)));
        tracing::debug!(session_id = %id, "Session created");
        id
    }

    pub async fn get(&self, id: Uuid) -> Result<SessionHandle> {
        self.sessions
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| AppError::SessionNotFound { id: id.to_string() })
    }

    pub async fn remove(&self, id: Uuid) -> Result<()> {
        self.sessions
            .write()
            .await
            .remove(&id)
            .map(|_| ())
            .ok_or_else(|| AppError::SessionNotFound { id: id.to_string() })
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}
