//! Conversation lifecycle and the turn flow.
//!
//! A turn holds the session's append lock for its whole duration, so
//! message ordinals are allocated race-free and only one assistant
//! message can land at a time. Nothing is persisted until the search
//! succeeds: a cancelled or expired search leaves the session exactly
//! as it was.

use crate::context::ContextManager;
use crate::export::SessionExport;
use async_trait::async_trait;
use chrono::Utc;
use corpora_core::error::{Error, Result, StatusCode};
use corpora_core::identity::{CollectionId, SessionId, UserId};
use corpora_core::traits::metadata_store::MetadataStore;
use corpora_core::types::conversation::{
    ConversationMessage, ConversationSession, MessageKind, MessageRole, SessionSettings,
    SessionStatus, DEFAULT_SESSION_NAME,
};
use corpora_jobs::{JobHandler, JobKind, JobSpec, Scheduler};
use corpora_providers::CompletionProvider;
use corpora_rag::pipeline::{ContextAugmentation, SearchRequest, SearchResponse, SearchService};
use corpora_rag::SearchOverrides;
use dashmap::DashMap;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::text::estimate_tokens;

/// Service tuning
#[derive(Debug, Clone)]
pub struct ConversationServiceConfig {
    /// How long a turn waits on the session lock before `SessionBusy`
    pub lock_timeout: Duration,
    /// Idle time after which the expiry janitor may expire a session
    pub idle_expiry: Duration,
}

impl Default for ConversationServiceConfig {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_secs(10),
            idle_expiry: Duration::from_secs(30 * 24 * 60 * 60),
        }
    }
}

/// One conversational turn
#[derive(Debug, Clone)]
pub struct TurnRequest {
    /// Target session
    pub session_id: SessionId,
    /// Requesting user; must own the session
    pub user: UserId,
    /// The user's message
    pub message: String,
    /// Per-request search overrides
    pub overrides: SearchOverrides,
    /// Technique preset override
    pub preset: Option<String>,
    /// Wall-clock budget for the search
    pub deadline: Option<Duration>,
    /// Cooperative cancellation
    pub cancel: CancellationToken,
}

impl TurnRequest {
    /// A plain turn with defaults everywhere
    #[must_use]
    pub fn new(session_id: SessionId, user: UserId, message: impl Into<String>) -> Self {
        Self {
            session_id,
            user,
            message: message.into(),
            overrides: SearchOverrides::default(),
            preset: None,
            deadline: None,
            cancel: CancellationToken::new(),
        }
    }
}

/// Result of a completed turn
#[derive(Debug, Clone)]
pub struct TurnResponse {
    /// The persisted user message
    pub user_message: ConversationMessage,
    /// The persisted assistant message
    pub assistant_message: ConversationMessage,
    /// The full search output, metrics included
    pub search: SearchResponse,
    /// A summary written by post-turn maintenance, when the threshold
    /// was crossed
    pub new_context_summary: Option<String>,
}

/// Sessions, messages, turns, and export
pub struct ConversationService {
    metadata: Arc<dyn MetadataStore>,
    search: Arc<SearchService>,
    context: Arc<ContextManager>,
    llm: Arc<dyn CompletionProvider>,
    config_service: Arc<corpora_config::ConfigService>,
    locks: DashMap<SessionId, Arc<Mutex<()>>>,
    config: ConversationServiceConfig,
}

impl std::fmt::Debug for ConversationService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationService")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl ConversationService {
    /// Create the service and register its job handlers
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        search: Arc<SearchService>,
        context: Arc<ContextManager>,
        llm: Arc<dyn CompletionProvider>,
        config_service: Arc<corpora_config::ConfigService>,
        scheduler: &Arc<Scheduler>,
        config: ConversationServiceConfig,
    ) -> Arc<Self> {
        let service = Arc::new(Self {
            metadata,
            search,
            context,
            llm,
            config_service,
            locks: DashMap::new(),
            config,
        });
        scheduler.register(
            JobKind::SummarizeSession,
            Arc::new(SummarizeHandler {
                service: service.clone(),
            }),
        );
        scheduler.register(
            JobKind::RebuildEntities,
            Arc::new(RebuildEntitiesHandler {
                service: service.clone(),
            }),
        );
        service
    }

    /// Create a session bound to a collection the user can see.
    ///
    /// # Errors
    ///
    /// `Error::NotFound` for a missing collection.
    pub async fn create_session(
        &self,
        owner: UserId,
        collection_id: CollectionId,
        settings: SessionSettings,
    ) -> Result<ConversationSession> {
        let collection = self
            .metadata
            .get_collection(&collection_id)
            .await?
            .ok_or_else(|| Error::not_found("collection", collection_id))?;
        if !collection.visible_to(&owner) {
            return Err(Error::Forbidden {
                message: "collection is private".to_string(),
            });
        }
        let session = ConversationSession::new(owner, collection_id, settings);
        self.metadata.insert_session(&session).await?;
        info!(session = %session.id, collection = %collection_id, "session created");
        Ok(session)
    }

    /// Fetch a session the requester owns.
    ///
    /// # Errors
    ///
    /// `Error::NotFound` when missing or deleted, `Error::Forbidden`
    /// when owned by someone else.
    pub async fn get_session(
        &self,
        session_id: &SessionId,
        requester: &UserId,
    ) -> Result<ConversationSession> {
        let session = self
            .metadata
            .get_session(session_id)
            .await?
            .ok_or_else(|| Error::not_found("session", session_id))?;
        if session.status == SessionStatus::Deleted {
            return Err(Error::not_found("session", session_id));
        }
        if session.owner != *requester {
            return Err(Error::Forbidden {
                message: "session belongs to another user".to_string(),
            });
        }
        Ok(session)
    }

    /// List a user's sessions, most recently active first
    pub async fn list_sessions(&self, owner: &UserId) -> Result<Vec<ConversationSession>> {
        self.metadata.list_sessions(owner).await
    }

    /// Archive an active session
    pub async fn archive_session(&self, session_id: &SessionId, requester: &UserId) -> Result<()> {
        self.transition(session_id, requester, SessionStatus::Archived).await
    }

    /// Restore an archived or expired session
    pub async fn restore_session(&self, session_id: &SessionId, requester: &UserId) -> Result<()> {
        self.transition(session_id, requester, SessionStatus::Active).await
    }

    /// Delete a session (terminal)
    pub async fn delete_session(&self, session_id: &SessionId, requester: &UserId) -> Result<()> {
        self.transition(session_id, requester, SessionStatus::Deleted).await
    }

    /// Expire sessions idle past the configured threshold. Applied by
    /// the scheduled janitor, never as a side effect of reads or
    /// writes.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn expire_idle_sessions(&self, owner: &UserId) -> Result<usize> {
        let now = Utc::now();
        let threshold = chrono::Duration::from_std(self.config.idle_expiry)
            .map_err(|e| Error::internal(format!("idle_expiry out of range: {e}")))?;
        let mut expired = 0;
        for mut session in self.metadata.list_sessions(owner).await? {
            if session.status == SessionStatus::Active
                && now.signed_duration_since(session.last_active_at) > threshold
            {
                session.transition(SessionStatus::Expired)?;
                self.metadata.update_session(&session).await?;
                expired += 1;
            }
        }
        Ok(expired)
    }

    /// Run one conversational turn.
    ///
    /// # Errors
    ///
    /// `Error::SessionBusy` when the append lock is contended past the
    /// timeout, `Error::CollectionDeleted` for tombstoned collections,
    /// `Error::Cancelled` / `Error::DeadlineExceeded` when the search
    /// did not complete (nothing is persisted), plus search errors.
    pub async fn turn(&self, request: TurnRequest) -> Result<TurnResponse> {
        if request.message.trim().is_empty() {
            return Err(Error::validation("message must not be empty"));
        }

        let lock = self
            .locks
            .entry(request.session_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let Ok(_guard) = tokio::time::timeout(self.config.lock_timeout, lock.lock()).await else {
            return Err(Error::SessionBusy {
                id: request.session_id.to_string(),
            });
        };

        let mut session = self.get_session(&request.session_id, &request.user).await?;
        if !session.status.is_active() {
            return Err(Error::conflict(format!(
                "session {} is {}",
                session.id, session.status
            )));
        }
        if session.collection_deleted {
            return Err(Error::CollectionDeleted {
                id: session.collection_id.to_string(),
            });
        }
        let collection = self
            .metadata
            .get_collection(&session.collection_id)
            .await?
            .ok_or_else(|| Error::CollectionDeleted {
                id: session.collection_id.to_string(),
            })?;

        // Build context before anything is persisted
        let built = self
            .context
            .build(&session, &request.message, &collection.policy.embedding_model)
            .await?;

        let search_request = SearchRequest {
            user: request.user,
            collection: session.collection_id,
            question: request.message.clone(),
            preset: request.preset.clone(),
            techniques: None,
            cot_enabled: None,
            rerank_enabled: None,
            overrides: request.overrides.clone(),
            augmentation: Some(ContextAugmentation {
                recent_digest: built.digest.clone(),
                entities: built.anchors.clone(),
                summary: built.summary.clone(),
                follow_up: built.follow_up,
            }),
            deadline: request.deadline,
            cancel: request.cancel.clone(),
        };
        let search = self.search.search(search_request).await?;

        // An incomplete search persists nothing in the session
        match search.status {
            StatusCode::Ok => {}
            StatusCode::Cancelled => return Err(Error::Cancelled),
            StatusCode::DeadlineExceeded => {
                return Err(Error::DeadlineExceeded {
                    elapsed_ms: request.deadline.map_or(0, |d| d.as_millis() as u64),
                })
            }
            other => {
                return Err(Error::internal(format!(
                    "search returned unexpected status {other}"
                )))
            }
        }

        // Persist the pair under the lock
        let user_ordinal = session.message_count + 1;
        let user_kind = if built.follow_up {
            MessageKind::FollowUp
        } else {
            MessageKind::Question
        };
        let user_message = ConversationMessage::new(
            session.id,
            user_ordinal,
            MessageRole::User,
            user_kind,
            request.message.clone(),
            estimate_tokens(&request.message),
        )
        .with_metadata("correlation_id", json!(search.correlation_id.to_string()));

        let assistant_message = ConversationMessage::new(
            session.id,
            user_ordinal + 1,
            MessageRole::Assistant,
            MessageKind::Answer,
            search.answer.clone(),
            estimate_tokens(&search.answer),
        )
        .with_metadata("correlation_id", json!(search.correlation_id.to_string()))
        .with_metadata(
            "sources",
            serde_json::to_value(&search.sources).unwrap_or_default(),
        )
        .with_metadata("insufficient_context", json!(search.insufficient_context));

        self.metadata.append_message(&user_message).await?;
        self.metadata.append_message(&assistant_message).await?;

        session.message_count += 2;
        session.tokens_used +=
            (user_message.token_count + assistant_message.token_count) as u64;
        session.last_active_at = Utc::now();
        session.updated_at = session.last_active_at;

        // Post-turn maintenance
        ContextManager::track_entities(&mut session, &user_message.content, user_message.ordinal);
        ContextManager::track_entities(
            &mut session,
            &assistant_message.content,
            assistant_message.ordinal,
        );

        if session.message_count == 2 && session.name == DEFAULT_SESSION_NAME {
            match self.propose_name(&request.message).await {
                Ok(name) if !name.is_empty() => session.name = name,
                Ok(_) => {}
                Err(err) => debug!("auto-naming skipped: {err}"),
            }
        }

        self.metadata.update_session(&session).await?;

        let snapshot = self.config_service.resolve(request.user).await?;
        let new_context_summary = match self
            .context
            .summarize_if_needed(&session, &snapshot.parameters)
            .await
        {
            Ok(summary) => summary.map(|s| s.text),
            Err(err) => {
                // summarization failure leaves the session functional
                warn!(session = %session.id, "summarization failed, will retry later: {err}");
                None
            }
        };

        info!(
            session = %session.id,
            ordinal = assistant_message.ordinal,
            correlation = %search.correlation_id,
            "turn complete"
        );
        Ok(TurnResponse {
            user_message,
            assistant_message,
            search,
            new_context_summary,
        })
    }

    /// Export a session's messages, summaries, and attributions
    ///
    /// # Errors
    ///
    /// `Error::NotFound` / `Error::Forbidden` as for `get_session`.
    pub async fn export(
        &self,
        session_id: &SessionId,
        requester: &UserId,
    ) -> Result<SessionExport> {
        let session = self.get_session(session_id, requester).await?;
        let messages = self.metadata.list_messages(session_id).await?;
        let summaries = self.metadata.list_summaries(session_id).await?;
        Ok(SessionExport {
            session,
            messages,
            summaries,
        })
    }

    /// Ask the LLM for a short session name (at most six words); the
    /// question's head is the fallback.
    async fn propose_name(&self, first_question: &str) -> Result<String> {
        let prompt = format!(
            "Propose a name of at most six words for a conversation that \
             begins with this question. Reply with the name only.\n\n\
             Question: {first_question}"
        );
        let name = match self
            .llm
            .generate(&prompt, &corpora_core::types::profile::LlmParameters::default())
            .await
        {
            Ok(completion) => completion.text,
            Err(_) => first_question.to_string(),
        };
        let name: String = name
            .split_whitespace()
            .take(6)
            .collect::<Vec<_>>()
            .join(" ")
            .trim_matches(['"', '\'', '.', ':'])
            .to_string();
        Ok(name)
    }

    async fn transition(
        &self,
        session_id: &SessionId,
        requester: &UserId,
        next: SessionStatus,
    ) -> Result<()> {
        let mut session = self.get_session(session_id, requester).await?;
        session.transition(next)?;
        self.metadata.update_session(&session).await?;
        info!(session = %session_id, status = %next, "session transitioned");
        Ok(())
    }

    /// Submit a summarization job for a session (used by maintenance
    /// schedules; turns summarize inline).
    ///
    /// # Errors
    ///
    /// Propagates scheduler errors.
    pub fn schedule_summarize(&self, scheduler: &Scheduler, session_id: &SessionId) -> Result<()> {
        scheduler.submit(JobSpec::new(
            JobKind::SummarizeSession,
            format!("summarize:{session_id}"),
            json!({ "session_id": session_id.to_string() }),
        ))?;
        Ok(())
    }
}

fn session_from_payload(payload: &serde_json::Value) -> Result<SessionId> {
    payload
        .get("session_id")
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::validation("job payload missing session_id"))?
        .parse()
        .map_err(|e| Error::validation(format!("bad session_id: {e}")))
}

struct SummarizeHandler {
    service: Arc<ConversationService>,
}

#[async_trait]
impl JobHandler for SummarizeHandler {
    async fn run(&self, payload: &serde_json::Value, _cancel: &CancellationToken) -> Result<()> {
        let session_id = session_from_payload(payload)?;
        let session = self
            .service
            .metadata
            .get_session(&session_id)
            .await?
            .ok_or_else(|| Error::not_found("session", session_id))?;
        let snapshot = self.service.config_service.resolve(session.owner).await?;
        self.service
            .context
            .summarize_if_needed(&session, &snapshot.parameters)
            .await?;
        Ok(())
    }
}

struct RebuildEntitiesHandler {
    service: Arc<ConversationService>,
}

#[async_trait]
impl JobHandler for RebuildEntitiesHandler {
    async fn run(&self, payload: &serde_json::Value, _cancel: &CancellationToken) -> Result<()> {
        let session_id = session_from_payload(payload)?;
        let mut session = self
            .service
            .metadata
            .get_session(&session_id)
            .await?
            .ok_or_else(|| Error::not_found("session", session_id))?;
        self.service.context.rebuild_entities(&mut session).await
    }
}
