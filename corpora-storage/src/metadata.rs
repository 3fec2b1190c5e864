//! In-memory relational metadata store.
//!
//! One `RwLock` guards all tables, which gives every trait method the
//! transaction semantics the seam requires: unique-index checks and the
//! mutation they guard happen under the same lock acquisition.

use async_trait::async_trait;
use corpora_core::error::{Error, Result};
use corpora_core::identity::{CollectionId, DocumentId, SessionId, SummaryId, UserId};
use corpora_core::traits::metadata_store::{CollectionFilter, CollectionSortBy, MetadataStore};
use corpora_core::types::collection::{Collection, CollectionStatus};
use corpora_core::types::conversation::{
    ConversationMessage, ConversationSession, ConversationSummary, SessionStatus,
};
use corpora_core::types::document::{ChunkRecord, Document};
use corpora_core::types::profile::UserProfile;
use parking_lot::RwLock;
use std::collections::HashMap;

#[derive(Debug, Default)]
struct Tables {
    collections: HashMap<CollectionId, Collection>,
    // unique index: (owner, normalized name) -> collection
    collection_names: HashMap<(UserId, String), CollectionId>,
    documents: HashMap<DocumentId, Document>,
    // unique index: (collection, content address) -> document
    document_addresses: HashMap<(CollectionId, String), DocumentId>,
    chunks: HashMap<DocumentId, Vec<ChunkRecord>>,
    sessions: HashMap<SessionId, ConversationSession>,
    messages: HashMap<SessionId, Vec<ConversationMessage>>,
    summaries: HashMap<SessionId, Vec<ConversationSummary>>,
    profiles: HashMap<UserId, UserProfile>,
}

/// Reference metadata store backed by in-memory tables
#[derive(Debug, Default)]
pub struct MemoryMetadataStore {
    tables: RwLock<Tables>,
}

impl MemoryMetadataStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MetadataStore for MemoryMetadataStore {
    async fn insert_collection(&self, collection: &Collection) -> Result<()> {
        let mut tables = self.tables.write();
        let name_key = (
            collection.owner,
            Collection::normalized_name(&collection.name),
        );
        if tables.collection_names.contains_key(&name_key) {
            return Err(Error::conflict(format!(
                "collection name already in use: {}",
                collection.name
            )));
        }
        tables.collection_names.insert(name_key, collection.id);
        tables.collections.insert(collection.id, collection.clone());
        Ok(())
    }

    async fn get_collection(&self, id: &CollectionId) -> Result<Option<Collection>> {
        Ok(self.tables.read().collections.get(id).cloned())
    }

    async fn find_collection_by_name(
        &self,
        owner: &UserId,
        normalized_name: &str,
    ) -> Result<Option<Collection>> {
        let tables = self.tables.read();
        Ok(tables
            .collection_names
            .get(&(*owner, normalized_name.to_string()))
            .and_then(|id| tables.collections.get(id))
            .cloned())
    }

    async fn update_collection(&self, collection: &Collection) -> Result<()> {
        let mut tables = self.tables.write();
        let existing = tables
            .collections
            .get(&collection.id)
            .ok_or_else(|| Error::not_found("collection", collection.id))?;

        let old_key = (
            existing.owner,
            Collection::normalized_name(&existing.name),
        );
        let new_key = (
            collection.owner,
            Collection::normalized_name(&collection.name),
        );
        if old_key != new_key {
            if tables.collection_names.contains_key(&new_key) {
                return Err(Error::conflict(format!(
                    "collection name already in use: {}",
                    collection.name
                )));
            }
            tables.collection_names.remove(&old_key);
            tables.collection_names.insert(new_key, collection.id);
        }
        tables.collections.insert(collection.id, collection.clone());
        Ok(())
    }

    async fn list_collections(&self, filter: &CollectionFilter) -> Result<Vec<Collection>> {
        let tables = self.tables.read();
        let mut rows: Vec<Collection> = tables
            .collections
            .values()
            .filter(|c| c.status != CollectionStatus::Deleted)
            .filter(|c| filter.owner.map_or(true, |owner| c.owner == owner))
            .filter(|c| {
                filter.name_contains.as_ref().map_or(true, |needle| {
                    c.name.to_lowercase().contains(&needle.to_lowercase())
                })
            })
            .cloned()
            .collect();

        rows.sort_by(|a, b| {
            let ordering = match filter.sort_by {
                CollectionSortBy::UpdatedAt => a.updated_at.cmp(&b.updated_at),
                CollectionSortBy::CreatedAt => a.created_at.cmp(&b.created_at),
                CollectionSortBy::Name => a.name.cmp(&b.name),
                CollectionSortBy::DocumentCount => a.document_count.cmp(&b.document_count),
            };
            if filter.sort_desc {
                ordering.reverse()
            } else {
                ordering
            }
        });

        Ok(rows
            .into_iter()
            .skip(filter.page.offset)
            .take(filter.page.limit)
            .collect())
    }

    async fn insert_document(&self, document: &Document) -> Result<()> {
        let mut tables = self.tables.write();
        let address_key = (document.collection_id, document.content_address.clone());
        if tables.document_addresses.contains_key(&address_key) {
            return Err(Error::conflict(format!(
                "document with content address {} already exists in collection",
                document.content_address
            )));
        }
        tables.document_addresses.insert(address_key, document.id);
        tables.documents.insert(document.id, document.clone());
        Ok(())
    }

    async fn get_document(&self, id: &DocumentId) -> Result<Option<Document>> {
        Ok(self.tables.read().documents.get(id).cloned())
    }

    async fn find_document_by_address(
        &self,
        collection_id: &CollectionId,
        content_address: &str,
    ) -> Result<Option<Document>> {
        let tables = self.tables.read();
        Ok(tables
            .document_addresses
            .get(&(*collection_id, content_address.to_string()))
            .and_then(|id| tables.documents.get(id))
            .cloned())
    }

    async fn update_document(&self, document: &Document) -> Result<()> {
        let mut tables = self.tables.write();
        if !tables.documents.contains_key(&document.id) {
            return Err(Error::not_found("document", document.id));
        }
        tables.documents.insert(document.id, document.clone());
        Ok(())
    }

    async fn list_documents(&self, collection_id: &CollectionId) -> Result<Vec<Document>> {
        let mut rows: Vec<Document> = self
            .tables
            .read()
            .documents
            .values()
            .filter(|d| d.collection_id == *collection_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.uploaded_at.cmp(&b.uploaded_at).then(a.id.cmp(&b.id)));
        Ok(rows)
    }

    async fn delete_documents(&self, collection_id: &CollectionId) -> Result<usize> {
        let mut tables = self.tables.write();
        let doomed: Vec<DocumentId> = tables
            .documents
            .values()
            .filter(|d| d.collection_id == *collection_id)
            .map(|d| d.id)
            .collect();
        for id in &doomed {
            if let Some(doc) = tables.documents.remove(id) {
                tables
                    .document_addresses
                    .remove(&(doc.collection_id, doc.content_address));
            }
            tables.chunks.remove(id);
        }
        Ok(doomed.len())
    }

    async fn replace_chunks(
        &self,
        document_id: &DocumentId,
        chunks: Vec<ChunkRecord>,
    ) -> Result<()> {
        let mut tables = self.tables.write();
        if chunks.is_empty() {
            tables.chunks.remove(document_id);
        } else {
            tables.chunks.insert(*document_id, chunks);
        }
        Ok(())
    }

    async fn list_chunks(&self, document_id: &DocumentId) -> Result<Vec<ChunkRecord>> {
        let mut rows = self
            .tables
            .read()
            .chunks
            .get(document_id)
            .cloned()
            .unwrap_or_default();
        rows.sort_by_key(|c| c.key.ordinal);
        Ok(rows)
    }

    async fn insert_session(&self, session: &ConversationSession) -> Result<()> {
        let mut tables = self.tables.write();
        if tables.sessions.contains_key(&session.id) {
            return Err(Error::conflict(format!(
                "session already exists: {}",
                session.id
            )));
        }
        tables.sessions.insert(session.id, session.clone());
        Ok(())
    }

    async fn get_session(&self, id: &SessionId) -> Result<Option<ConversationSession>> {
        Ok(self.tables.read().sessions.get(id).cloned())
    }

    async fn update_session(&self, session: &ConversationSession) -> Result<()> {
        let mut tables = self.tables.write();
        if !tables.sessions.contains_key(&session.id) {
            return Err(Error::not_found("session", session.id));
        }
        tables.sessions.insert(session.id, session.clone());
        Ok(())
    }

    async fn list_sessions(&self, owner: &UserId) -> Result<Vec<ConversationSession>> {
        let mut rows: Vec<ConversationSession> = self
            .tables
            .read()
            .sessions
            .values()
            .filter(|s| s.owner == *owner && s.status != SessionStatus::Deleted)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.last_active_at.cmp(&a.last_active_at));
        Ok(rows)
    }

    async fn sessions_for_collection(
        &self,
        collection_id: &CollectionId,
    ) -> Result<Vec<ConversationSession>> {
        Ok(self
            .tables
            .read()
            .sessions
            .values()
            .filter(|s| s.collection_id == *collection_id && s.status != SessionStatus::Deleted)
            .cloned()
            .collect())
    }

    async fn append_message(&self, message: &ConversationMessage) -> Result<()> {
        let mut tables = self.tables.write();
        if !tables.sessions.contains_key(&message.session_id) {
            return Err(Error::not_found("session", message.session_id));
        }
        let messages = tables.messages.entry(message.session_id).or_default();
        if messages.iter().any(|m| m.ordinal == message.ordinal) {
            return Err(Error::conflict(format!(
                "ordinal {} already taken in session {}",
                message.ordinal, message.session_id
            )));
        }
        messages.push(message.clone());
        messages.sort_by_key(|m| m.ordinal);
        Ok(())
    }

    async fn list_messages(&self, session_id: &SessionId) -> Result<Vec<ConversationMessage>> {
        Ok(self
            .tables
            .read()
            .messages
            .get(session_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn insert_summary(&self, summary: &ConversationSummary) -> Result<()> {
        let mut tables = self.tables.write();
        if !tables.sessions.contains_key(&summary.session_id) {
            return Err(Error::not_found("session", summary.session_id));
        }
        let summaries = tables.summaries.entry(summary.session_id).or_default();
        if summaries
            .iter()
            .any(|s| !s.superseded && !summary.superseded && s.overlaps(summary))
        {
            return Err(Error::conflict(format!(
                "summary range [{}, {}] overlaps an existing {} summary",
                summary.first_ordinal, summary.last_ordinal, summary.strategy
            )));
        }
        summaries.push(summary.clone());
        summaries.sort_by_key(|s| s.created_at);
        Ok(())
    }

    async fn list_summaries(&self, session_id: &SessionId) -> Result<Vec<ConversationSummary>> {
        Ok(self
            .tables
            .read()
            .summaries
            .get(session_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn supersede_summary(&self, id: &SummaryId) -> Result<()> {
        let mut tables = self.tables.write();
        for summaries in tables.summaries.values_mut() {
            if let Some(summary) = summaries.iter_mut().find(|s| s.id == *id) {
                summary.superseded = true;
                return Ok(());
            }
        }
        Err(Error::not_found("summary", id))
    }

    async fn get_profile(&self, user_id: &UserId) -> Result<Option<UserProfile>> {
        Ok(self.tables.read().profiles.get(user_id).cloned())
    }

    async fn put_profile(&self, profile: &UserProfile) -> Result<()> {
        self.tables
            .write()
            .profiles
            .insert(profile.user_id, profile.clone());
        Ok(())
    }
}
