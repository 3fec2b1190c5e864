//! Bounded conversational context.
//!
//! The context manager assembles the prompt-side view of a session:
//! the latest summary in full, then messages newer than the summary,
//! newest first, until the token budget is met. When even the recent
//! messages overflow the budget, older candidates are scored against
//! the current question (cosine over cached embeddings) and the least
//! relevant are dropped. It also owns entity tracking, follow-up
//! detection, and the summarization trigger.

use crate::text::{cosine, estimate_tokens, extract_entities};
use chrono::Utc;
use corpora_core::error::{Error, Result};
use corpora_core::identity::SummaryId;
use corpora_core::traits::metadata_store::MetadataStore;
use corpora_core::types::conversation::{
    ConversationMessage, ConversationSession, ConversationSummary, MessageRole, TrackedEntity,
};
use corpora_core::types::profile::LlmParameters;
use corpora_providers::{CompletionProvider, EmbeddingCache, EmbeddingProvider, ProviderRegistry};
use regex::Regex;
use std::sync::Arc;
use std::sync::LazyLock;
use tracing::{debug, info};

static PRONOUNS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(it|its|they|them|their|theirs|this|that|these|those)\b")
        .unwrap_or_else(|_| unreachable!("static pattern"))
});

/// Similarity to the previous assistant message above which a question
/// counts as a follow-up
const FOLLOW_UP_SIMILARITY: f32 = 0.35;

/// The summarization strategy tag this manager writes
const STRATEGY: &str = "rolling";

/// The assembled context for one turn
#[derive(Debug, Clone, Default)]
pub struct BuiltContext {
    /// Recent messages rendered oldest-first, one line each
    pub digest: String,
    /// Latest summary text, included in full
    pub summary: Option<String>,
    /// Anchor entities, most recently mentioned first
    pub anchors: Vec<String>,
    /// Whether the question was classified as a follow-up
    pub follow_up: bool,
    /// Tokens consumed by digest plus summary
    pub token_total: usize,
    /// Ordinals included in the digest
    pub included_ordinals: Vec<u64>,
    /// Messages dropped by relevance pruning
    pub pruned: usize,
}

/// Builds bounded context and maintains session-derived state
pub struct ContextManager {
    metadata: Arc<dyn MetadataStore>,
    providers: Arc<ProviderRegistry>,
    llm: Arc<dyn CompletionProvider>,
    cache: Arc<EmbeddingCache>,
}

impl std::fmt::Debug for ContextManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContextManager").finish_non_exhaustive()
    }
}

impl ContextManager {
    /// Create the manager
    #[must_use]
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        providers: Arc<ProviderRegistry>,
        llm: Arc<dyn CompletionProvider>,
    ) -> Self {
        Self {
            metadata,
            providers,
            llm,
            cache: Arc::new(EmbeddingCache::new(corpora_providers::CacheConfig::default())),
        }
    }

    /// Assemble the bounded context for a question about to be asked.
    ///
    /// # Errors
    ///
    /// Propagates store failures; embedding failures during pruning
    /// degrade to recency order instead of failing the turn.
    pub async fn build(
        &self,
        session: &ConversationSession,
        question: &str,
        embedding_model: &str,
    ) -> Result<BuiltContext> {
        let messages = self.metadata.list_messages(&session.id).await?;
        let summaries = self.metadata.list_summaries(&session.id).await?;

        let latest_summary = summaries
            .iter()
            .filter(|s| !s.superseded && s.strategy == STRATEGY)
            .max_by_key(|s| s.last_ordinal);

        let budget = session.settings.context_window_tokens;
        let summary_tokens = latest_summary.map_or(0, |s| estimate_tokens(&s.text));
        let message_budget = budget.saturating_sub(summary_tokens + estimate_tokens(question));

        // Candidates: everything newer than the summarized range
        let after = latest_summary.map_or(0, |s| s.last_ordinal);
        let mut candidates: Vec<&ConversationMessage> = messages
            .iter()
            .filter(|m| m.ordinal > after)
            .collect();

        // Newest first until the budget is met
        let mut included: Vec<&ConversationMessage> = Vec::new();
        let mut used = 0usize;
        let mut overflow: Vec<&ConversationMessage> = Vec::new();
        candidates.sort_by_key(|m| std::cmp::Reverse(m.ordinal));
        for message in candidates {
            let tokens = estimate_tokens(&message.content);
            if used + tokens <= message_budget {
                used += tokens;
                included.push(message);
            } else {
                overflow.push(message);
            }
        }

        // Relevance pruning only matters when something overflowed:
        // keep the two most recent messages unconditionally, re-rank
        // every other candidate by similarity to the question, and
        // refill the budget best-first.
        let mut pruned = 0usize;
        if !overflow.is_empty() {
            let keep_count = included.len().min(2);
            let keep: Vec<&ConversationMessage> = included.drain(..keep_count).collect();
            let mut kept_tokens: usize = keep
                .iter()
                .map(|m| estimate_tokens(&m.content))
                .sum();

            let mut pool: Vec<&ConversationMessage> = included;
            pool.extend(overflow);

            let mut scored: Vec<(&ConversationMessage, f32)> = Vec::new();
            match self.embed(question, embedding_model).await {
                Ok(question_embedding) => {
                    for message in pool {
                        let score = match self.embed(&message.content, embedding_model).await {
                            Ok(embedding) => cosine(&question_embedding, &embedding),
                            Err(_) => 0.0,
                        };
                        scored.push((message, score));
                    }
                    scored.sort_by(|a, b| {
                        b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal)
                    });
                }
                Err(err) => {
                    debug!("relevance pruning degraded to recency order: {err}");
                    scored = pool.into_iter().map(|m| (m, 0.0)).collect();
                }
            }

            let mut refilled = keep;
            for (message, _) in scored {
                let tokens = estimate_tokens(&message.content);
                if kept_tokens + tokens <= message_budget {
                    kept_tokens += tokens;
                    refilled.push(message);
                } else {
                    pruned += 1;
                }
            }
            used = kept_tokens;
            included = refilled;
        }

        // Render oldest-first
        included.sort_by_key(|m| m.ordinal);
        let digest = included
            .iter()
            .map(|m| format!("{}: {}", role_label(m.role), m.content))
            .collect::<Vec<_>>()
            .join("\n");
        let included_ordinals = included.iter().map(|m| m.ordinal).collect();

        let last_assistant = messages
            .iter()
            .rev()
            .find(|m| m.role == MessageRole::Assistant)
            .map(|m| m.content.as_str());
        let follow_up = Self::is_follow_up(question, &session.entities, last_assistant);

        let mut anchors: Vec<&TrackedEntity> = session.entities.iter().collect();
        anchors.sort_by_key(|e| std::cmp::Reverse(e.last_mention));
        let anchors = anchors.into_iter().map(|e| e.phrase.clone()).collect();

        Ok(BuiltContext {
            token_total: used + summary_tokens,
            digest,
            summary: latest_summary.map(|s| s.text.clone()),
            anchors,
            follow_up,
            included_ordinals,
            pruned,
        })
    }

    /// A question is a follow-up when it carries an unresolved pronoun
    /// while entities are tracked, or when it closely matches the
    /// previous assistant message.
    #[must_use]
    pub fn is_follow_up(
        question: &str,
        entities: &[TrackedEntity],
        last_assistant: Option<&str>,
    ) -> bool {
        if !entities.is_empty() && PRONOUNS.is_match(question) {
            return true;
        }
        last_assistant.is_some_and(|previous| {
            corpora_providers::LexicalReranker::similarity(question, previous)
                > FOLLOW_UP_SIMILARITY
        })
    }

    /// Fold a message's entities into the session tracker
    pub fn track_entities(session: &mut ConversationSession, text: &str, ordinal: u64) {
        for phrase in extract_entities(text) {
            let key = phrase.to_lowercase();
            if let Some(existing) = session
                .entities
                .iter_mut()
                .find(|e| e.phrase.to_lowercase() == key)
            {
                existing.last_mention = ordinal;
            } else {
                session.entities.push(TrackedEntity {
                    phrase,
                    first_mention: ordinal,
                    last_mention: ordinal,
                });
            }
        }
    }

    /// Rebuild the tracker from scratch; the `rebuild_entities` job
    /// handler calls this.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn rebuild_entities(&self, session: &mut ConversationSession) -> Result<()> {
        session.entities.clear();
        for message in self.metadata.list_messages(&session.id).await? {
            if matches!(message.role, MessageRole::User | MessageRole::Assistant) {
                Self::track_entities(session, &message.content, message.ordinal);
            }
        }
        self.metadata.update_session(session).await
    }

    /// Summarize the unsummarized range when it crosses the session's
    /// threshold. Returns the new summary when one was written.
    ///
    /// # Errors
    ///
    /// Store failures propagate. Summarization failures leave the
    /// session functional; messages keep accumulating until the next
    /// attempt succeeds.
    pub async fn summarize_if_needed(
        &self,
        session: &ConversationSession,
        parameters: &LlmParameters,
    ) -> Result<Option<ConversationSummary>> {
        let messages = self.metadata.list_messages(&session.id).await?;
        let summaries = self.metadata.list_summaries(&session.id).await?;
        let after = summaries
            .iter()
            .filter(|s| !s.superseded && s.strategy == STRATEGY)
            .map(|s| s.last_ordinal)
            .max()
            .unwrap_or(0);

        let unsummarized: Vec<&ConversationMessage> =
            messages.iter().filter(|m| m.ordinal > after).collect();
        let unsummarized_tokens: usize = unsummarized
            .iter()
            .map(|m| estimate_tokens(&m.content))
            .sum();
        if unsummarized.len() < 4 || unsummarized_tokens < session.settings.summarize_after_tokens {
            return Ok(None);
        }

        let first_ordinal = unsummarized
            .first()
            .map_or(after + 1, |m| m.ordinal);
        let last_ordinal = unsummarized.last().map_or(after, |m| m.ordinal);
        let transcript = unsummarized
            .iter()
            .map(|m| format!("{}: {}", role_label(m.role), m.content))
            .collect::<Vec<_>>()
            .join("\n");
        let prompt = format!(
            "Summarize the following conversation excerpt in a short paragraph, \
             keeping every fact and named entity.\n\n{transcript}"
        );

        let completion = self.llm.generate(&prompt, parameters).await?;
        let text = completion.text.trim().to_string();
        if text.is_empty() {
            return Ok(None);
        }

        let tokens_saved = unsummarized_tokens.saturating_sub(estimate_tokens(&text)) as u64;
        let summary = ConversationSummary {
            id: SummaryId::new(),
            session_id: session.id,
            strategy: STRATEGY.to_string(),
            first_ordinal,
            last_ordinal,
            text,
            tokens_saved,
            superseded: false,
            created_at: Utc::now(),
        };

        // A wider summary subsumes the narrower ones before it
        for earlier in summaries.iter().filter(|s| {
            !s.superseded && s.strategy == STRATEGY && summary.subsumes(s)
        }) {
            self.metadata.supersede_summary(&earlier.id).await?;
        }
        self.metadata.insert_summary(&summary).await?;
        info!(
            session = %session.id,
            range = ?(first_ordinal, last_ordinal),
            tokens_saved,
            "session range summarized"
        );
        Ok(Some(summary))
    }

    async fn embed(&self, text: &str, model: &str) -> Result<Vec<f32>> {
        let key = EmbeddingCache::key(model, text);
        if let Some(cached) = self.cache.get(key) {
            return Ok(cached);
        }
        let embedder = self.providers.embedder(model)?;
        let mut vectors = embedder.embed(&[text.to_string()]).await?;
        let embedding = vectors
            .pop()
            .ok_or_else(|| Error::internal("embedding provider returned no vector"))?;
        self.cache.put(key, embedding.clone());
        Ok(embedding)
    }
}

fn role_label(role: MessageRole) -> &'static str {
    match role {
        MessageRole::User => "user",
        MessageRole::Assistant => "assistant",
        MessageRole::System => "system",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corpora_core::identity::{CollectionId, UserId};
    use corpora_core::types::conversation::{MessageKind, SessionSettings};
    use corpora_providers::mock::{MockCompletionProvider, MockEmbeddingProvider};
    use corpora_storage::MemoryMetadataStore;

    fn manager_with(metadata: Arc<MemoryMetadataStore>) -> ContextManager {
        let providers = Arc::new(ProviderRegistry::new());
        providers.register(Arc::new(MockEmbeddingProvider::new(64)));
        ContextManager::new(metadata, providers, Arc::new(MockCompletionProvider::new()))
    }

    fn session() -> ConversationSession {
        ConversationSession::new(
            UserId::new(),
            CollectionId::new(),
            SessionSettings {
                context_window_tokens: 120,
                summarize_after_tokens: 60,
                ..SessionSettings::default()
            },
        )
    }

    async fn seed_messages(
        metadata: &MemoryMetadataStore,
        session: &ConversationSession,
        contents: &[&str],
    ) {
        for (i, content) in contents.iter().enumerate() {
            let role = if i % 2 == 0 {
                MessageRole::User
            } else {
                MessageRole::Assistant
            };
            let kind = if i % 2 == 0 {
                MessageKind::Question
            } else {
                MessageKind::Answer
            };
            let message = ConversationMessage::new(
                session.id,
                (i + 1) as u64,
                role,
                kind,
                *content,
                estimate_tokens(content),
            );
            metadata.append_message(&message).await.unwrap();
        }
    }

    #[tokio::test]
    async fn recent_messages_fill_the_budget_newest_first() {
        let metadata = Arc::new(MemoryMetadataStore::new());
        let manager = manager_with(metadata.clone());
        let session = session();
        metadata.insert_session(&session).await.unwrap();
        seed_messages(
            &metadata,
            &session,
            &[
                "first question about storage engines",
                "first answer about storage engines",
                "second question about compaction",
                "second answer about compaction",
            ],
        )
        .await;

        let built = manager
            .build(&session, "what about compaction?", "mock-embed-64")
            .await
            .unwrap();
        // everything fits in this budget; digest is oldest-first
        assert_eq!(built.included_ordinals, vec![1, 2, 3, 4]);
        assert!(built.digest.starts_with("user: first question"));
        assert!(!built.follow_up);
    }

    #[tokio::test]
    async fn follow_up_detection_uses_pronouns_and_entities() {
        let mut s = session();
        ContextManager::track_entities(&mut s, "Tell me about convolutional neural networks", 1);
        assert!(ContextManager::is_follow_up(
            "What are their main applications?",
            &s.entities,
            None
        ));
        assert!(!ContextManager::is_follow_up(
            "What is a decision tree?",
            &s.entities,
            None
        ));
        // without entities, a pronoun alone is not enough
        assert!(!ContextManager::is_follow_up(
            "What are their main applications?",
            &[],
            None
        ));
    }

    #[tokio::test]
    async fn entity_tracker_records_mention_ordinals() {
        let mut s = session();
        ContextManager::track_entities(&mut s, "Tell me about convolutional neural networks", 1);
        ContextManager::track_entities(&mut s, "convolutional neural networks shine at vision", 3);
        assert_eq!(s.entities.len(), 2);
        let entity = &s.entities[0];
        assert_eq!(entity.phrase, "convolutional neural networks");
        assert_eq!(entity.first_mention, 1);
        assert_eq!(entity.last_mention, 3);
    }

    #[tokio::test]
    async fn overflowing_context_prunes_by_relevance() {
        let metadata = Arc::new(MemoryMetadataStore::new());
        let manager = manager_with(metadata.clone());
        let session = session();
        metadata.insert_session(&session).await.unwrap();
        // Long filler messages to overflow the 120-token budget, plus
        // one clearly relevant message
        let filler = "completely unrelated discussion about cooking pasta and sauces with a lot of extra words to burn budget quickly";
        seed_messages(
            &metadata,
            &session,
            &[
                filler,
                "vector databases store embeddings for similarity search",
                filler,
                filler,
                filler,
                filler,
            ],
        )
        .await;

        let built = manager
            .build(
                &session,
                "how do vector databases store embeddings?",
                "mock-embed-64",
            )
            .await
            .unwrap();
        assert!(built.pruned > 0, "expected pruning, got {built:?}");
        assert!(
            built.digest.contains("vector databases store embeddings")
                || built.included_ordinals.contains(&2),
            "relevant message should survive pruning: {built:?}"
        );
    }

    #[tokio::test]
    async fn summarization_triggers_and_supersedes() {
        let metadata = Arc::new(MemoryMetadataStore::new());
        let providers = Arc::new(ProviderRegistry::new());
        providers.register(Arc::new(MockEmbeddingProvider::new(64)));
        let llm = Arc::new(MockCompletionProvider::new());
        llm.push_response("Digest of the early conversation about storage.");
        let manager = ContextManager::new(metadata.clone(), providers, llm.clone());

        let session = session();
        metadata.insert_session(&session).await.unwrap();
        seed_messages(
            &metadata,
            &session,
            &[
                "a long question about log structured merge trees and their compaction",
                "a long answer about log structured merge trees and their compaction",
                "another question about write amplification in storage engines",
                "another answer about write amplification in storage engines",
            ],
        )
        .await;

        let summary = manager
            .summarize_if_needed(&session, &LlmParameters::default())
            .await
            .unwrap()
            .expect("threshold crossed");
        assert_eq!(summary.first_ordinal, 1);
        assert_eq!(summary.last_ordinal, 4);
        assert!(summary.tokens_saved > 0);

        // below threshold immediately afterwards
        let again = manager
            .summarize_if_needed(&session, &LlmParameters::default())
            .await
            .unwrap();
        assert!(again.is_none());

        // the summary now feeds the context build
        let built = manager
            .build(&session, "ok", "mock-embed-64")
            .await
            .unwrap();
        assert_eq!(
            built.summary.as_deref(),
            Some("Digest of the early conversation about storage.")
        );
        assert!(built.included_ordinals.is_empty());
    }
}
