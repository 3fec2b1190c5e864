//! Conversation sessions, messages, and summaries

use crate::error::{Error, Result};
use crate::identity::{CollectionId, MessageId, SessionId, SummaryId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Lifecycle status of a conversation session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Accepting turns
    Active,
    /// Explicitly archived; restorable
    Archived,
    /// Idle past the retention policy; restorable
    Expired,
    /// Terminal
    Deleted,
}

impl SessionStatus {
    /// Whether the session accepts new turns
    #[must_use]
    pub const fn is_active(self) -> bool {
        matches!(self, Self::Active)
    }

    /// Whether `restore` may bring the session back to `Active`
    #[must_use]
    pub const fn can_restore(self) -> bool {
        matches!(self, Self::Archived | Self::Expired)
    }

    /// Whether the session is in a terminal state
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Deleted)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Active => "active",
            Self::Archived => "archived",
            Self::Expired => "expired",
            Self::Deleted => "deleted",
        };
        f.write_str(s)
    }
}

/// Who authored a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    /// The human asking questions
    User,
    /// The pipeline's answers
    Assistant,
    /// Service notices (summaries, tombstones)
    System,
}

/// Classification of a message within a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    /// A fresh user question
    Question,
    /// A pipeline answer
    Answer,
    /// A user question referring back to earlier turns
    FollowUp,
    /// A user message refining a previous question
    Clarification,
    /// A system notice that a summary replaced older context
    SummaryNotice,
}

/// Per-session configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSettings {
    /// Token budget for assembled conversational context
    pub context_window_tokens: usize,
    /// Hard cap on stored messages
    pub max_messages: usize,
    /// Days of inactivity before the janitor may expire the session
    pub retention_days: Option<u32>,
    /// Unsummarized-token threshold that triggers summarization;
    /// defaults to half the context window
    pub summarize_after_tokens: usize,
}

impl Default for SessionSettings {
    fn default() -> Self {
        let context_window_tokens = 4096;
        Self {
            context_window_tokens,
            max_messages: 500,
            retention_days: Some(90),
            summarize_after_tokens: context_window_tokens / 2,
        }
    }
}

/// A noun-phrase entity tracked across a session's turns
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedEntity {
    /// The phrase as first seen (original casing)
    pub phrase: String,
    /// Ordinal of the message that introduced it
    pub first_mention: u64,
    /// Ordinal of the most recent mention
    pub last_mention: u64,
}

/// The default display name given to sessions before auto-naming
pub const DEFAULT_SESSION_NAME: &str = "New conversation";

/// A durable multi-turn conversation bound to one collection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSession {
    /// Unique identifier
    pub id: SessionId,
    /// Owning user
    pub owner: UserId,
    /// The collection searched by this session's turns
    pub collection_id: CollectionId,
    /// Display name; auto-generated after the first completed turn
    pub name: String,
    /// Lifecycle status
    pub status: SessionStatus,
    /// Tombstone marker: set when the bound collection was deleted,
    /// leaving the session readable but unable to search
    pub collection_deleted: bool,
    /// Per-session configuration
    pub settings: SessionSettings,
    /// Number of messages appended
    pub message_count: u64,
    /// Total tokens across all messages
    pub tokens_used: u64,
    /// Entities tracked by the context manager
    pub entities: Vec<TrackedEntity>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last mutation timestamp
    pub updated_at: DateTime<Utc>,
    /// Last turn timestamp, used by the expiry janitor
    pub last_active_at: DateTime<Utc>,
}

impl ConversationSession {
    /// Create a fresh active session with the default placeholder name
    #[must_use]
    pub fn new(owner: UserId, collection_id: CollectionId, settings: SessionSettings) -> Self {
        let now = Utc::now();
        Self {
            id: SessionId::new(),
            owner,
            collection_id,
            name: DEFAULT_SESSION_NAME.to_string(),
            status: SessionStatus::Active,
            collection_deleted: false,
            settings,
            message_count: 0,
            tokens_used: 0,
            entities: Vec::new(),
            created_at: now,
            updated_at: now,
            last_active_at: now,
        }
    }

    /// Apply a status transition.
    ///
    /// # Errors
    ///
    /// Returns `Error::Conflict` for transitions out of `Deleted` or
    /// restores from `Active`.
    pub fn transition(&mut self, next: SessionStatus) -> Result<()> {
        let legal = match (self.status, next) {
            (SessionStatus::Deleted, _) => false,
            (SessionStatus::Active, SessionStatus::Archived | SessionStatus::Expired) => true,
            (from, SessionStatus::Active) => from.can_restore(),
            (_, SessionStatus::Deleted) => true,
            _ => false,
        };
        if !legal {
            return Err(Error::conflict(format!(
                "illegal session transition {} -> {}",
                self.status, next
            )));
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }
}

/// One message within a session; append-only, strictly ordered
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationMessage {
    /// Unique identifier
    pub id: MessageId,
    /// Parent session
    pub session_id: SessionId,
    /// Monotone ordinal within the session, starting at 1, no gaps
    pub ordinal: u64,
    /// Author
    pub role: MessageRole,
    /// Classification
    pub kind: MessageKind,
    /// Message text
    pub content: String,
    /// Token count of `content`
    pub token_count: usize,
    /// Sources, correlation IDs, and other per-message metadata
    pub metadata: HashMap<String, serde_json::Value>,
    /// Append timestamp
    pub created_at: DateTime<Utc>,
}

impl ConversationMessage {
    /// Build a message; the caller assigns the ordinal under the session lock
    #[must_use]
    pub fn new(
        session_id: SessionId,
        ordinal: u64,
        role: MessageRole,
        kind: MessageKind,
        content: impl Into<String>,
        token_count: usize,
    ) -> Self {
        Self {
            id: MessageId::new(),
            session_id,
            ordinal,
            role,
            kind,
            content: content.into(),
            token_count,
            metadata: HashMap::new(),
            created_at: Utc::now(),
        }
    }

    /// Attach a metadata entry
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// An LLM-generated digest of a contiguous message range
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationSummary {
    /// Unique identifier
    pub id: SummaryId,
    /// Parent session
    pub session_id: SessionId,
    /// Strategy tag (e.g. "rolling")
    pub strategy: String,
    /// First message ordinal covered (inclusive)
    pub first_ordinal: u64,
    /// Last message ordinal covered (inclusive)
    pub last_ordinal: u64,
    /// Summary text
    pub text: String,
    /// Estimated tokens the summary saves versus its range
    pub tokens_saved: u64,
    /// Set when a later summary subsumed this range
    pub superseded: bool,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl ConversationSummary {
    /// Whether this summary's range entirely contains `other`'s range
    #[must_use]
    pub const fn subsumes(&self, other: &Self) -> bool {
        self.first_ordinal <= other.first_ordinal && self.last_ordinal >= other.last_ordinal
    }

    /// Whether two summaries of the same strategy overlap
    #[must_use]
    pub fn overlaps(&self, other: &Self) -> bool {
        self.strategy == other.strategy
            && self.first_ordinal <= other.last_ordinal
            && other.first_ordinal <= self.last_ordinal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session() -> ConversationSession {
        ConversationSession::new(UserId::new(), CollectionId::new(), SessionSettings::default())
    }

    #[test]
    fn archive_and_restore() {
        let mut s = session();
        s.transition(SessionStatus::Archived).unwrap();
        assert!(!s.status.is_active());
        s.transition(SessionStatus::Active).unwrap();
        assert!(s.status.is_active());
    }

    #[test]
    fn deleted_is_terminal() {
        let mut s = session();
        s.transition(SessionStatus::Deleted).unwrap();
        assert!(s.transition(SessionStatus::Active).is_err());
        assert!(s.transition(SessionStatus::Archived).is_err());
    }

    #[test]
    fn default_summarize_threshold_is_half_the_window() {
        let settings = SessionSettings::default();
        assert_eq!(
            settings.summarize_after_tokens,
            settings.context_window_tokens / 2
        );
    }

    #[test]
    fn summary_subsumption_and_overlap() {
        let s = |first, last| ConversationSummary {
            id: SummaryId::new(),
            session_id: SessionId::new(),
            strategy: "rolling".into(),
            first_ordinal: first,
            last_ordinal: last,
            text: String::new(),
            tokens_saved: 0,
            superseded: false,
            created_at: Utc::now(),
        };
        assert!(s(1, 10).subsumes(&s(2, 8)));
        assert!(!s(2, 8).subsumes(&s(1, 10)));
        assert!(s(1, 5).overlaps(&s(5, 9)));
        assert!(!s(1, 4).overlaps(&s(5, 9)));
    }
}
