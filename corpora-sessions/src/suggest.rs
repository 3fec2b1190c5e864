//! Guided follow-up question generation.
//!
//! Three generators share one validation path: suggestions must be
//! non-empty, short, and mutually distinct (edit-distance dedupe), and
//! are ranked by lexical relevance to the current context.

use crate::text::{edit_similarity, estimate_tokens};
use corpora_core::error::{Error, Result};
use corpora_core::identity::{CollectionId, SessionId, UserId};
use corpora_core::traits::metadata_store::MetadataStore;
use corpora_core::types::conversation::MessageRole;
use corpora_core::types::profile::TemplateKind;
use corpora_providers::{CompletionProvider, LexicalReranker};
use std::sync::Arc;
use tracing::debug;

/// Where the suggestion material comes from
#[derive(Debug, Clone)]
pub enum SuggestionSource {
    /// The session's recent context
    Session(SessionId),
    /// A broad sample of a collection's chunks
    Documents(CollectionId),
    /// The last assistant message of a session
    LastMessage(SessionId),
}

/// Upper bound on a suggestion's length in characters
const MAX_SUGGESTION_CHARS: usize = 200;
/// Edit similarity above which two suggestions count as duplicates
const DUPLICATE_SIMILARITY: f32 = 0.8;

/// Generates follow-up questions
pub struct SuggestionService {
    metadata: Arc<dyn MetadataStore>,
    llm: Arc<dyn CompletionProvider>,
    config_service: Arc<corpora_config::ConfigService>,
}

impl std::fmt::Debug for SuggestionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SuggestionService").finish_non_exhaustive()
    }
}

impl SuggestionService {
    /// Create the service
    #[must_use]
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        llm: Arc<dyn CompletionProvider>,
        config_service: Arc<corpora_config::ConfigService>,
    ) -> Self {
        Self {
            metadata,
            llm,
            config_service,
        }
    }

    /// Produce up to `max_suggestions` validated, ranked follow-up
    /// questions.
    ///
    /// # Errors
    ///
    /// `Error::NotFound` for missing sessions or collections, plus
    /// provider failures.
    pub async fn suggest(
        &self,
        user: UserId,
        source: SuggestionSource,
        max_suggestions: usize,
    ) -> Result<Vec<String>> {
        let material = self.gather_material(&source).await?;
        if material.trim().is_empty() {
            return Ok(Vec::new());
        }

        let snapshot = self.config_service.resolve(user).await?;
        let prompt = snapshot
            .template(TemplateKind::QuestionGeneration)
            .replace("{context}", &material)
            .replace("{count}", &(max_suggestions + 2).to_string());

        let completion = self.llm.generate(&prompt, &snapshot.parameters).await?;
        let candidates: Vec<String> = completion
            .text
            .lines()
            .map(|line| line.trim().trim_start_matches(['-', '*', ' ']).to_string())
            .filter(|line| !line.is_empty())
            .collect();

        let mut suggestions = validate_and_dedupe(candidates);
        rank_by_relevance(&mut suggestions, &material);
        suggestions.truncate(max_suggestions);
        debug!(count = suggestions.len(), "suggestions generated");
        Ok(suggestions)
    }

    async fn gather_material(&self, source: &SuggestionSource) -> Result<String> {
        match source {
            SuggestionSource::Session(session_id) => {
                let messages = self.metadata.list_messages(session_id).await?;
                let mut material = String::new();
                let mut budget = 1500usize;
                for message in messages.iter().rev() {
                    let tokens = estimate_tokens(&message.content);
                    if tokens > budget {
                        break;
                    }
                    budget -= tokens;
                    material.insert_str(0, &format!("{}\n", message.content));
                }
                Ok(material)
            }
            SuggestionSource::Documents(collection_id) => {
                let documents = self.metadata.list_documents(collection_id).await?;
                if documents.is_empty() {
                    return Err(Error::not_found("collection documents", collection_id));
                }
                // Sample broadly: the first, middle, and last chunk of
                // each document, a few documents at a time
                let mut material = String::new();
                for document in documents.iter().take(5) {
                    let chunks = self.metadata.list_chunks(&document.id).await?;
                    for index in [0, chunks.len() / 2, chunks.len().saturating_sub(1)] {
                        if let Some(chunk) = chunks.get(index) {
                            material.push_str(&chunk.text);
                            material.push('\n');
                        }
                    }
                }
                Ok(material)
            }
            SuggestionSource::LastMessage(session_id) => Ok(self
                .metadata
                .list_messages(session_id)
                .await?
                .iter()
                .rev()
                .find(|m| m.role == MessageRole::Assistant)
                .map(|m| m.content.clone())
                .unwrap_or_default()),
        }
    }
}

fn validate_and_dedupe(candidates: Vec<String>) -> Vec<String> {
    let mut kept: Vec<String> = Vec::new();
    for candidate in candidates {
        if candidate.len() > MAX_SUGGESTION_CHARS || candidate.len() < 8 {
            continue;
        }
        let duplicate = kept.iter().any(|existing| {
            edit_similarity(&existing.to_lowercase(), &candidate.to_lowercase())
                > DUPLICATE_SIMILARITY
        });
        if !duplicate {
            kept.push(candidate);
        }
    }
    kept
}

fn rank_by_relevance(suggestions: &mut [String], material: &str) {
    suggestions.sort_by(|a, b| {
        let score_a = LexicalReranker::similarity(a, material);
        let score_b = LexicalReranker::similarity(b, material);
        score_b
            .partial_cmp(&score_a)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use corpora_config::ConfigService;
    use corpora_core::types::conversation::{
        ConversationMessage, ConversationSession, MessageKind, SessionSettings,
    };
    use corpora_providers::mock::MockCompletionProvider;
    use corpora_storage::MemoryMetadataStore;

    fn service_with(
        metadata: Arc<MemoryMetadataStore>,
        llm: Arc<MockCompletionProvider>,
    ) -> SuggestionService {
        let config_service = Arc::new(ConfigService::new(metadata.clone()));
        SuggestionService::new(metadata, llm, config_service)
    }

    #[test]
    fn near_duplicates_are_dropped() {
        let kept = validate_and_dedupe(vec![
            "What is a vector index?".to_string(),
            "What is a vector index ?".to_string(),
            "How does reranking work?".to_string(),
            "short?".to_string(),
        ]);
        assert_eq!(kept.len(), 2);
    }

    #[tokio::test]
    async fn suggestions_come_from_the_last_answer() {
        let metadata = Arc::new(MemoryMetadataStore::new());
        let llm = Arc::new(MockCompletionProvider::new());
        llm.push_response(
            "What storage engines use B-trees?\nHow do B-trees handle splits?\nWhat storage engines use B-trees ?",
        );
        let service = service_with(metadata.clone(), llm);

        let session = ConversationSession::new(
            UserId::new(),
            CollectionId::new(),
            SessionSettings::default(),
        );
        metadata.insert_session(&session).await.unwrap();
        metadata
            .append_message(&ConversationMessage::new(
                session.id,
                1,
                MessageRole::Assistant,
                MessageKind::Answer,
                "B-trees are balanced trees used by storage engines.",
                12,
            ))
            .await
            .unwrap();

        let suggestions = service
            .suggest(
                session.owner,
                SuggestionSource::LastMessage(session.id),
                3,
            )
            .await
            .unwrap();
        assert_eq!(suggestions.len(), 2, "{suggestions:?}");
        assert!(suggestions
            .iter()
            .any(|s| s.contains("B-trees") || s.contains("storage")));
    }

    #[tokio::test]
    async fn empty_material_yields_no_suggestions() {
        let metadata = Arc::new(MemoryMetadataStore::new());
        let llm = Arc::new(MockCompletionProvider::new());
        let service = service_with(metadata.clone(), llm);
        let session = ConversationSession::new(
            UserId::new(),
            CollectionId::new(),
            SessionSettings::default(),
        );
        metadata.insert_session(&session).await.unwrap();

        let suggestions = service
            .suggest(
                session.owner,
                SuggestionSource::LastMessage(session.id),
                3,
            )
            .await
            .unwrap();
        assert!(suggestions.is_empty());
    }
}
