//! Conversation store boundary and session lifecycle.
//!
//! Sessions are keyed by UUID-shaped strings, created lazily on first
//! message, and swept after an inactivity timeout. Expiry is a separate
//! schedulable operation, never checked in the turn hot path.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::types::{Message, MessageRole};

/// Mint a fresh session key.
pub fn generate_session_id() -> String {
    Uuid::new_v4().to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    pub session_id: String,
    pub message_count: usize,
    pub last_activity: DateTime<Utc>,
}

/// Per-session counters derived from the stored history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionStats {
    pub message_count: usize,
    pub user_messages: usize,
    pub assistant_messages: usize,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Append one message, creating the session if needed. Returns the
    /// message's position in the session (1-based).
    async fn append(
        &self,
        session_id: &str,
        role: MessageRole,
        content: &str,
        metadata: Option<serde_json::Value>,
    ) -> Result<i64>;

    /// The most recent `limit` messages in chronological order. System
    /// messages are excluded unless `include_system` is set.
    async fn list(
        &self,
        session_id: &str,
        limit: usize,
        include_system: bool,
    ) -> Result<Vec<Message>>;

    async fn sessions(&self) -> Result<Vec<SessionInfo>>;

    /// Remove a session and its history. False when the session is unknown.
    async fn delete_session(&self, session_id: &str) -> Result<bool>;

    /// Delete sessions idle longer than `ttl`. Returns the number swept.
    async fn cleanup_old_sessions(&self, ttl: Duration) -> Result<usize>;
}

struct StoredMessage {
    message: Message,
    #[allow(dead_code)]
    metadata: Option<serde_json::Value>,
}

struct SessionRecord {
    messages: Vec<StoredMessage>,
    created_at: DateTime<Utc>,
    last_activity: DateTime<Utc>,
}

/// In-process conversation store. The production collaborator is external;
/// this one backs tests and single-process deployments.
#[derive(Default)]
pub struct MemoryConversationStore {
    sessions: RwLock<HashMap<String, SessionRecord>>,
}

impl MemoryConversationStore {
    pub fn new() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub(crate) fn age_session(&self, session_id: &str, by: Duration) {
        if let Some(record) = self.sessions.write().get_mut(session_id) {
            record.last_activity = record.last_activity - by;
        }
    }

    pub fn stats(&self, session_id: &str) -> Option<SessionStats> {
        let sessions = self.sessions.read();
        let record = sessions.get(session_id)?;
        let user_messages = record
            .messages
            .iter()
            .filter(|m| m.message.role == MessageRole::User)
            .count();
        let assistant_messages = record
            .messages
            .iter()
            .filter(|m| m.message.role == MessageRole::Assistant)
            .count();
        Some(SessionStats {
            message_count: record.messages.len(),
            user_messages,
            assistant_messages,
            created_at: record.created_at,
            last_activity: record.last_activity,
        })
    }
}

#[async_trait]
impl ConversationStore for MemoryConversationStore {
    async fn append(
        &self,
        session_id: &str,
        role: MessageRole,
        content: &str,
        metadata: Option<serde_json::Value>,
    ) -> Result<i64> {
        if session_id.is_empty() {
            return Err(Error::Persistence {
                message: "empty session id".into(),
            });
        }
        let now = Utc::now();
        let mut sessions = self.sessions.write();
        let record = sessions
            .entry(session_id.to_string())
            .or_insert_with(|| SessionRecord {
                messages: Vec::new(),
                created_at: now,
                last_activity: now,
            });
        record.messages.push(StoredMessage {
            message: Message::new(role, content),
            metadata,
        });
        record.last_activity = now;
        Ok(record.messages.len() as i64)
    }

    async fn list(
        &self,
        session_id: &str,
        limit: usize,
        include_system: bool,
    ) -> Result<Vec<Message>> {
        let sessions = self.sessions.read();
        let Some(record) = sessions.get(session_id) else {
            return Ok(Vec::new());
        };
        let filtered: Vec<Message> = record
            .messages
            .iter()
            .map(|m| m.message.clone())
            .filter(|m| include_system || m.role != MessageRole::System)
            .collect();
        let start = filtered.len().saturating_sub(limit);
        Ok(filtered[start..].to_vec())
    }

    async fn sessions(&self) -> Result<Vec<SessionInfo>> {
        let sessions = self.sessions.read();
        let mut infos: Vec<SessionInfo> = sessions
            .iter()
            .map(|(id, record)| SessionInfo {
                session_id: id.clone(),
                message_count: record.messages.len(),
                last_activity: record.last_activity,
            })
            .collect();
        infos.sort_by(|a, b| b.last_activity.cmp(&a.last_activity));
        Ok(infos)
    }

    async fn delete_session(&self, session_id: &str) -> Result<bool> {
        Ok(self.sessions.write().remove(session_id).is_some())
    }

    async fn cleanup_old_sessions(&self, ttl: Duration) -> Result<usize> {
        let cutoff = Utc::now() - ttl;
        let mut sessions = self.sessions.write();
        let before = sessions.len();
        sessions.retain(|_, record| record.last_activity >= cutoff);
        let swept = before - sessions.len();
        if swept > 0 {
            tracing::info!(swept, remaining = sessions.len(), "expired sessions removed");
        }
        Ok(swept)
    }
}
