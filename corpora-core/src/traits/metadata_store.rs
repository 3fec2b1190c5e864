//! Metadata store seam
//!
//! The transactional system of record for collections, documents, chunk
//! rows, sessions, messages, summaries, and user profiles. Implementations
//! must make each method atomic; multi-entity consistency (vectors before
//! metadata, compensating deletes) is orchestrated above this seam.

use crate::error::Result;
use crate::identity::{CollectionId, DocumentId, SessionId, SummaryId, UserId};
use crate::types::collection::Collection;
use crate::types::conversation::{ConversationMessage, ConversationSession, ConversationSummary};
use crate::types::document::{ChunkRecord, Document};
use crate::types::profile::UserProfile;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Sort order for collection listings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionSortBy {
    /// Most recently updated first
    #[default]
    UpdatedAt,
    /// Lexicographic by name
    Name,
    /// Creation order
    CreatedAt,
    /// Largest first
    DocumentCount,
}

/// Pagination window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    /// Rows to skip
    pub offset: usize,
    /// Rows to return
    pub limit: usize,
}

impl Default for Page {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: 50,
        }
    }
}

/// Filter for collection listings; visibility is applied by the caller's
/// requester argument, not encoded here
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CollectionFilter {
    /// Restrict to one owner
    pub owner: Option<UserId>,
    /// Substring match on the name
    pub name_contains: Option<String>,
    /// Sort order
    pub sort_by: CollectionSortBy,
    /// Descending sort
    pub sort_desc: bool,
    /// Pagination
    pub page: Page,
}

/// Transactional store of all relational metadata
#[async_trait]
pub trait MetadataStore: Send + Sync {
    // --- collections ---

    /// Insert a collection row.
    ///
    /// # Errors
    ///
    /// Returns `Error::Conflict` if the owner already has a collection
    /// with the same normalized name.
    async fn insert_collection(&self, collection: &Collection) -> Result<()>;

    /// Fetch a collection by ID, tombstones included
    async fn get_collection(&self, id: &CollectionId) -> Result<Option<Collection>>;

    /// Fetch by owner + normalized name
    async fn find_collection_by_name(
        &self,
        owner: &UserId,
        normalized_name: &str,
    ) -> Result<Option<Collection>>;

    /// Overwrite a collection row.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if the row does not exist.
    async fn update_collection(&self, collection: &Collection) -> Result<()>;

    /// List collections matching the filter, excluding tombstones
    async fn list_collections(&self, filter: &CollectionFilter) -> Result<Vec<Collection>>;

    // --- documents ---

    /// Insert a document row.
    ///
    /// # Errors
    ///
    /// Returns `Error::Conflict` if the collection already holds a
    /// document with the same content address (ingest idempotence).
    async fn insert_document(&self, document: &Document) -> Result<()>;

    /// Fetch a document by ID
    async fn get_document(&self, id: &DocumentId) -> Result<Option<Document>>;

    /// Fetch by collection + content address
    async fn find_document_by_address(
        &self,
        collection_id: &CollectionId,
        content_address: &str,
    ) -> Result<Option<Document>>;

    /// Overwrite a document row.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if the row does not exist.
    async fn update_document(&self, document: &Document) -> Result<()>;

    /// List all documents in a collection, upload order
    async fn list_documents(&self, collection_id: &CollectionId) -> Result<Vec<Document>>;

    /// Remove every document row in a collection, returning the count
    async fn delete_documents(&self, collection_id: &CollectionId) -> Result<usize>;

    // --- chunk rows ---

    /// Atomically replace the chunk rows of a document
    async fn replace_chunks(
        &self,
        document_id: &DocumentId,
        chunks: Vec<ChunkRecord>,
    ) -> Result<()>;

    /// List a document's chunk rows in ordinal order
    async fn list_chunks(&self, document_id: &DocumentId) -> Result<Vec<ChunkRecord>>;

    // --- sessions ---

    /// Insert a session row
    async fn insert_session(&self, session: &ConversationSession) -> Result<()>;

    /// Fetch a session by ID
    async fn get_session(&self, id: &SessionId) -> Result<Option<ConversationSession>>;

    /// Overwrite a session row.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if the row does not exist.
    async fn update_session(&self, session: &ConversationSession) -> Result<()>;

    /// List a user's sessions, most recently active first, excluding deleted
    async fn list_sessions(&self, owner: &UserId) -> Result<Vec<ConversationSession>>;

    /// List the non-deleted sessions bound to a collection
    async fn sessions_for_collection(
        &self,
        collection_id: &CollectionId,
    ) -> Result<Vec<ConversationSession>>;

    // --- messages ---

    /// Append a message.
    ///
    /// # Errors
    ///
    /// Returns `Error::Conflict` if the `(session, ordinal)` pair is
    /// already taken; ordinals are assigned under the session lock above
    /// this seam, so a conflict indicates a lost race.
    async fn append_message(&self, message: &ConversationMessage) -> Result<()>;

    /// List a session's messages in ordinal order
    async fn list_messages(&self, session_id: &SessionId) -> Result<Vec<ConversationMessage>>;

    // --- summaries ---

    /// Insert a summary row
    async fn insert_summary(&self, summary: &ConversationSummary) -> Result<()>;

    /// List a session's summaries, oldest first, superseded included
    async fn list_summaries(&self, session_id: &SessionId) -> Result<Vec<ConversationSummary>>;

    /// Mark a summary superseded
    async fn supersede_summary(&self, id: &SummaryId) -> Result<()>;

    // --- user profiles ---

    /// Fetch a user's profile
    async fn get_profile(&self, user_id: &UserId) -> Result<Option<UserProfile>>;

    /// Insert or overwrite a user's profile
    async fn put_profile(&self, profile: &UserProfile) -> Result<()>;
}
