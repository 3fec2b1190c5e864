//! Stage implementations.
//!
//! Every technique is a distinct type behind one capability trait; the
//! builder instantiates them from validated specs. Generation and
//! attribution are built-in stages the orchestrator always appends.
//!
//! Failure semantics per stage:
//! - enhancement falls back to the cleaned question (non-fatal)
//! - retrieval retries transient store errors; empty results are a
//!   legitimate outcome
//! - reranking degrades to retrieval order on provider failure
//! - generation retries transiently then fails the request

use crate::pipeline::context::{RetrievedChunk, SearchContext, SourceRef, SubAnswer};
use crate::pipeline::metrics::StageMetrics;
use crate::pipeline::request::WarningKind;
use crate::techniques::{TechniqueConfig, TechniqueId, TechniqueSpec};
use async_trait::async_trait;
use corpora_core::error::{Error, Result};
use corpora_core::traits::vector_store::VectorStore;
use corpora_core::types::profile::{LlmParameters, TemplateKind};
use corpora_core::types::vector::VectorQuery;
use corpora_providers::{
    retry_with_backoff, BackoffPolicy, Completion, CompletionProvider, EmbeddingCache,
    EmbeddingProvider, LexicalReranker, ProviderRegistry, Reranker, TokenBucket,
};
use corpora_providers::rerank::RerankCandidate;
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::LazyLock;
use std::time::Instant;
use tracing::debug;

/// The answer returned when retrieval finds nothing; generation never
/// fabricates from an empty context
pub const INSUFFICIENT_CONTEXT_ANSWER: &str =
    "The available context does not cover this question.";

static PRONOUNS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(it|its|they|them|their|theirs|this|that|these|those)\b")
        .unwrap_or_else(|_| unreachable!("static pattern"))
});

/// Shared dependencies handed to every stage
pub struct StageDeps {
    /// Vector store
    pub vectors: Arc<dyn VectorStore>,
    /// Embedding provider registry
    pub providers: Arc<ProviderRegistry>,
    /// Completion provider
    pub llm: Arc<dyn CompletionProvider>,
    /// Reranker
    pub reranker: Arc<dyn Reranker>,
    /// Query embedding cache
    pub cache: Arc<EmbeddingCache>,
    /// Token bucket for completion calls
    pub llm_bucket: Arc<TokenBucket>,
    /// Token bucket for embedding calls
    pub embed_bucket: Arc<TokenBucket>,
    /// Per-stage retry budget for transient dependency failures
    pub retry: BackoffPolicy,
}

impl std::fmt::Debug for StageDeps {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageDeps").finish_non_exhaustive()
    }
}

/// One executable pipeline stage
#[async_trait]
pub trait Technique: Send + Sync {
    /// The identifier this stage was instantiated from
    fn id(&self) -> TechniqueId;

    /// Run the stage, mutating the context and emitting its metrics.
    ///
    /// # Errors
    ///
    /// Only errors the stage cannot absorb per its failure semantics.
    async fn execute(&self, ctx: &mut SearchContext) -> Result<StageMetrics>;
}

/// Instantiate the stage for a validated spec
#[must_use]
pub fn instantiate(spec: &TechniqueSpec, deps: &Arc<StageDeps>) -> Arc<dyn Technique> {
    match spec.config {
        TechniqueConfig::QueryRewriting { use_llm } => Arc::new(QueryRewritingStage {
            deps: deps.clone(),
            use_llm,
        }),
        TechniqueConfig::Hyde => Arc::new(HydeStage { deps: deps.clone() }),
        TechniqueConfig::VectorRetrieval { top_k } => Arc::new(VectorRetrievalStage {
            deps: deps.clone(),
            top_k,
        }),
        TechniqueConfig::FusionRetrieval { top_k } => Arc::new(FusionRetrievalStage {
            deps: deps.clone(),
            top_k,
        }),
        TechniqueConfig::Reranking { top_k } => Arc::new(RerankingStage {
            deps: deps.clone(),
            top_k,
        }),
        TechniqueConfig::ContextualCompression => Arc::new(CompressionStage),
        TechniqueConfig::MultiFacetedFiltering { min_score } => {
            Arc::new(FilteringStage { min_score })
        }
        TechniqueConfig::CotDecomposition { max_sub_questions } => Arc::new(CotDecompositionStage {
            deps: deps.clone(),
            max_sub_questions,
        }),
        TechniqueConfig::CotSynthesis => Arc::new(CotSynthesisStage { deps: deps.clone() }),
    }
}

// --- shared helpers ---

#[allow(clippy::cast_possible_truncation)]
fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}

/// Call the LLM under the rate limiter, honoring the request deadline.
async fn call_llm(
    deps: &StageDeps,
    ctx: &SearchContext,
    prompt: &str,
    params: &LlmParameters,
) -> Result<Completion> {
    deps.llm_bucket.acquire(ctx.deadline).await?;
    let call = deps.llm.generate(prompt, params);
    match ctx.deadline {
        None => call.await,
        Some(deadline) => {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(Error::DeadlineExceeded {
                    elapsed_ms: elapsed_ms(ctx.started_at),
                });
            }
            match tokio::time::timeout(remaining, call).await {
                Ok(result) => result,
                Err(_) => Err(Error::DeadlineExceeded {
                    elapsed_ms: elapsed_ms(ctx.started_at),
                }),
            }
        }
    }
}

/// Embed one query text through the cache, rate limiter, and retry
async fn embed_query(deps: &StageDeps, ctx: &SearchContext, text: &str) -> Result<Vec<f32>> {
    let model = &ctx.collection.policy.embedding_model;
    let key = EmbeddingCache::key(model, text);
    if let Some(cached) = deps.cache.get(key) {
        return Ok(cached);
    }

    deps.embed_bucket.acquire(ctx.deadline).await?;
    let embedder = deps.providers.embedder(model)?;
    let texts = vec![text.to_string()];
    let mut vectors = retry_with_backoff(deps.retry, &ctx.cancel, "embed_query", || {
        let embedder = embedder.clone();
        let texts = texts.clone();
        async move { embedder.embed(&texts).await }
    })
    .await?;
    let embedding = vectors
        .pop()
        .ok_or_else(|| Error::internal("embedding provider returned no vector"))?;
    deps.cache.put(key, embedding.clone());
    Ok(embedding)
}

async fn knn(
    deps: &StageDeps,
    ctx: &SearchContext,
    text: &str,
    k: usize,
) -> Result<Vec<RetrievedChunk>> {
    let embedding = embed_query(deps, ctx, text).await?;
    let query = VectorQuery::new(embedding, k).with_threshold(ctx.effective_threshold());
    let namespace = ctx.collection.namespace.clone();
    let hits = retry_with_backoff(deps.retry, &ctx.cancel, "vector_search", || {
        let vectors = deps.vectors.clone();
        let namespace = namespace.clone();
        let query = query.clone();
        async move { vectors.search(&namespace, &query).await }
    })
    .await?;
    Ok(hits.into_iter().map(RetrievedChunk::from_match).collect())
}

fn has_unresolved_pronoun(text: &str) -> bool {
    PRONOUNS.is_match(text)
}

// --- query transformation ---

struct QueryRewritingStage {
    deps: Arc<StageDeps>,
    use_llm: bool,
}

#[async_trait]
impl Technique for QueryRewritingStage {
    fn id(&self) -> TechniqueId {
        TechniqueId::QueryRewriting
    }

    async fn execute(&self, ctx: &mut SearchContext) -> Result<StageMetrics> {
        let started = Instant::now();
        let mut rewritten = ctx.cleaned_question.clone();
        let mut llm_used = false;

        // Coreference anchoring: a follow-up or pronoun-bearing question
        // gets the tracked entities appended so retrieval sees them.
        if let Some(augmentation) = &ctx.augmentation {
            if !augmentation.entities.is_empty()
                && (augmentation.follow_up || has_unresolved_pronoun(&rewritten))
            {
                let anchors = augmentation
                    .entities
                    .iter()
                    .take(3)
                    .cloned()
                    .collect::<Vec<_>>()
                    .join(", ");
                rewritten = format!("{rewritten} (about: {anchors})");
            }
        }

        if self.use_llm {
            let prompt = format!(
                "Rewrite this search query to be explicit and self-contained, \
                 expanding acronyms. Reply with the query only.\n\nQuery: {rewritten}"
            );
            match call_llm(&self.deps, ctx, &prompt, &ctx.snapshot.parameters).await {
                Ok(completion) if !completion.text.trim().is_empty() => {
                    rewritten = crate::pipeline::context::clean_question(&completion.text);
                    llm_used = true;
                }
                Ok(_) => {}
                Err(err @ (Error::Cancelled | Error::DeadlineExceeded { .. })) => return Err(err),
                Err(err) => {
                    debug!("query rewrite fell back to the cleaned question: {err}");
                    ctx.warn(
                        WarningKind::EnhancementFallback,
                        "query rewriting unavailable, using the cleaned question",
                    );
                }
            }
        }

        let changed = rewritten != ctx.cleaned_question;
        if changed {
            ctx.rewritten_question = Some(rewritten);
        }
        Ok(StageMetrics::Enhancement {
            rewritten: changed,
            llm_used,
            duration_ms: elapsed_ms(started),
        })
    }
}

struct HydeStage {
    deps: Arc<StageDeps>,
}

#[async_trait]
impl Technique for HydeStage {
    fn id(&self) -> TechniqueId {
        TechniqueId::Hyde
    }

    async fn execute(&self, ctx: &mut SearchContext) -> Result<StageMetrics> {
        let started = Instant::now();
        let prompt = format!(
            "Write one short factual passage that would directly answer the \
             question below. Reply with the passage only.\n\nQuestion: {}",
            ctx.query_text()
        );
        let mut llm_used = false;
        match call_llm(&self.deps, ctx, &prompt, &ctx.snapshot.parameters).await {
            Ok(completion) if !completion.text.trim().is_empty() => {
                // Embed the hypothetical answer instead of the question
                let mut hypothetical = completion.text.trim().to_string();
                hypothetical.truncate(600);
                ctx.rewritten_question = Some(hypothetical);
                llm_used = true;
            }
            Ok(_) => {}
            Err(err @ (Error::Cancelled | Error::DeadlineExceeded { .. })) => return Err(err),
            Err(err) => {
                debug!("hyde fell back to the plain query: {err}");
                ctx.warn(
                    WarningKind::EnhancementFallback,
                    "hypothetical answer generation unavailable",
                );
            }
        }
        Ok(StageMetrics::Enhancement {
            rewritten: llm_used,
            llm_used,
            duration_ms: elapsed_ms(started),
        })
    }
}

// --- retrieval ---

struct VectorRetrievalStage {
    deps: Arc<StageDeps>,
    top_k: Option<usize>,
}

#[async_trait]
impl Technique for VectorRetrievalStage {
    fn id(&self) -> TechniqueId {
        TechniqueId::VectorRetrieval
    }

    async fn execute(&self, ctx: &mut SearchContext) -> Result<StageMetrics> {
        let started = Instant::now();
        let k = self.top_k.unwrap_or_else(|| ctx.effective_top_k());
        let hits = knn(&self.deps, ctx, ctx.query_text(), k).await?;
        let top_score = hits.first().map(|h| h.retrieval_score);
        debug!(results = hits.len(), "vector retrieval complete");
        ctx.retrieved = hits;
        Ok(StageMetrics::Retrieval {
            results_count: ctx.retrieved.len(),
            top_score,
            duration_ms: elapsed_ms(started),
        })
    }
}

struct FusionRetrievalStage {
    deps: Arc<StageDeps>,
    top_k: Option<usize>,
}

#[async_trait]
impl Technique for FusionRetrievalStage {
    fn id(&self) -> TechniqueId {
        TechniqueId::FusionRetrieval
    }

    async fn execute(&self, ctx: &mut SearchContext) -> Result<StageMetrics> {
        let started = Instant::now();
        let k = self.top_k.unwrap_or_else(|| ctx.effective_top_k());

        // Reciprocal rank fusion over the cleaned and rewritten queries
        let mut result_lists = vec![knn(&self.deps, ctx, &ctx.cleaned_question.clone(), k).await?];
        if let Some(rewritten) = ctx.rewritten_question.clone() {
            if rewritten != ctx.cleaned_question {
                result_lists.push(knn(&self.deps, ctx, &rewritten, k).await?);
            }
        }

        const RRF_K: f32 = 60.0;
        let mut fused: HashMap<String, (RetrievedChunk, f32)> = HashMap::new();
        for list in result_lists {
            for (rank, chunk) in list.into_iter().enumerate() {
                #[allow(clippy::cast_precision_loss)]
                let contribution = 1.0 / (RRF_K + rank as f32 + 1.0);
                fused
                    .entry(chunk.key.to_string())
                    .and_modify(|(_, score)| *score += contribution)
                    .or_insert((chunk, contribution));
            }
        }
        let mut merged: Vec<(RetrievedChunk, f32)> = fused.into_values().collect();
        merged.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.key.cmp(&b.0.key))
        });
        merged.truncate(k);

        ctx.retrieved = merged
            .into_iter()
            .map(|(mut chunk, score)| {
                // surface the fused score so downstream ordering uses it
                chunk.retrieval_score = score;
                chunk
            })
            .collect();

        let top_score = ctx.retrieved.first().map(|c| c.retrieval_score);
        Ok(StageMetrics::Retrieval {
            results_count: ctx.retrieved.len(),
            top_score,
            duration_ms: elapsed_ms(started),
        })
    }
}

// --- post-retrieval ---

struct RerankingStage {
    deps: Arc<StageDeps>,
    top_k: Option<usize>,
}

#[async_trait]
impl Technique for RerankingStage {
    fn id(&self) -> TechniqueId {
        TechniqueId::Reranking
    }

    async fn execute(&self, ctx: &mut SearchContext) -> Result<StageMetrics> {
        let started = Instant::now();
        let input: Vec<RetrievedChunk> = ctx.working_chunks().to_vec();
        let input_count = input.len();
        let keep = ctx
            .overrides
            .rerank_top_k
            .or(self.top_k)
            .unwrap_or(5)
            .max(1);

        if input.is_empty() {
            ctx.reranked = Some(Vec::new());
            return Ok(StageMetrics::Rerank {
                input_count: 0,
                output_count: 0,
                degraded: false,
                duration_ms: elapsed_ms(started),
            });
        }

        let candidates: Vec<RerankCandidate> = input
            .iter()
            .map(|chunk| RerankCandidate {
                id: chunk.key.to_string(),
                text: chunk.text.clone(),
            })
            .collect();

        let mut degraded = false;
        let mut reranked = match self.deps.reranker.score(ctx.query_text(), &candidates).await {
            Ok(scores) => {
                let by_id: HashMap<&str, f32> =
                    scores.iter().map(|s| (s.id.as_str(), s.score)).collect();
                let mut chunks = input;
                for chunk in &mut chunks {
                    chunk.rerank_score = by_id.get(chunk.key.to_string().as_str()).copied();
                }
                // rerank score, then original retrieval score, then ordinal
                chunks.sort_by(|a, b| {
                    b.rerank_score
                        .unwrap_or(0.0)
                        .partial_cmp(&a.rerank_score.unwrap_or(0.0))
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then_with(|| {
                            b.retrieval_score
                                .partial_cmp(&a.retrieval_score)
                                .unwrap_or(std::cmp::Ordering::Equal)
                        })
                        .then_with(|| a.key.ordinal.cmp(&b.key.ordinal))
                });
                chunks
            }
            Err(err) => {
                debug!("reranker unavailable, passing retrieval order through: {err}");
                ctx.warn(
                    WarningKind::RerankDegraded,
                    "reranker unavailable, retrieval order preserved",
                );
                degraded = true;
                input
            }
        };
        reranked.truncate(keep);
        let output_count = reranked.len();
        ctx.reranked = Some(reranked);

        Ok(StageMetrics::Rerank {
            input_count,
            output_count,
            degraded,
            duration_ms: elapsed_ms(started),
        })
    }
}

struct CompressionStage;

#[async_trait]
impl Technique for CompressionStage {
    fn id(&self) -> TechniqueId {
        TechniqueId::ContextualCompression
    }

    async fn execute(&self, ctx: &mut SearchContext) -> Result<StageMetrics> {
        let started = Instant::now();
        let query_tokens: HashSet<String> = ctx
            .query_text()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| t.len() > 2)
            .map(str::to_lowercase)
            .collect();

        let mut input_chars = 0;
        let mut output_chars = 0;
        let compressed: Vec<RetrievedChunk> = ctx
            .working_chunks()
            .iter()
            .cloned()
            .map(|mut chunk| {
                input_chars += chunk.text.len();
                let kept: Vec<&str> = split_into_sentences(&chunk.text)
                    .into_iter()
                    .filter(|sentence| {
                        sentence
                            .split(|c: char| !c.is_alphanumeric())
                            .any(|t| t.len() > 2 && query_tokens.contains(&t.to_lowercase()))
                    })
                    .collect();
                if !kept.is_empty() {
                    chunk.text = kept.join(" ");
                }
                output_chars += chunk.text.len();
                chunk
            })
            .collect();
        ctx.reranked = Some(compressed);

        Ok(StageMetrics::Compression {
            input_chars,
            output_chars,
            duration_ms: elapsed_ms(started),
        })
    }
}

struct FilteringStage {
    min_score: f32,
}

#[async_trait]
impl Technique for FilteringStage {
    fn id(&self) -> TechniqueId {
        TechniqueId::MultiFacetedFiltering
    }

    async fn execute(&self, ctx: &mut SearchContext) -> Result<StageMetrics> {
        let started = Instant::now();
        let input: Vec<RetrievedChunk> = ctx.working_chunks().to_vec();
        let input_count = input.len();
        let threshold = self.min_score.max(ctx.effective_threshold());
        let kept: Vec<RetrievedChunk> = input
            .into_iter()
            .filter(|chunk| chunk.retrieval_score >= threshold)
            .collect();
        let output_count = kept.len();
        ctx.reranked = Some(kept);
        Ok(StageMetrics::Filtering {
            input_count,
            output_count,
            duration_ms: elapsed_ms(started),
        })
    }
}

// --- reasoning ---

struct CotDecompositionStage {
    deps: Arc<StageDeps>,
    max_sub_questions: usize,
}

/// A question qualifies for decomposition when it visibly bundles
/// several asks
fn is_complex(question: &str) -> bool {
    let words = question.split_whitespace().count();
    words > 12
        || question.matches('?').count() > 1
        || question.contains(" and ")
        || question.contains("compare")
        || question.contains(" versus ")
}

#[async_trait]
impl Technique for CotDecompositionStage {
    fn id(&self) -> TechniqueId {
        TechniqueId::CotDecomposition
    }

    async fn execute(&self, ctx: &mut SearchContext) -> Result<StageMetrics> {
        let started = Instant::now();
        if !is_complex(&ctx.cleaned_question) {
            ctx.warn(
                WarningKind::CotSkipped,
                "question was not classified as complex",
            );
            return Ok(StageMetrics::Cot {
                sub_questions: 0,
                duration_ms: elapsed_ms(started),
            });
        }

        let prompt = format!(
            "Break the question below into at most {} simpler sub-questions, \
             one per line, no numbering.\n\nQuestion: {}",
            self.max_sub_questions,
            ctx.query_text()
        );
        match call_llm(&self.deps, ctx, &prompt, &ctx.snapshot.parameters).await {
            Ok(completion) => {
                ctx.reasoning = completion
                    .text
                    .lines()
                    .map(str::trim)
                    .filter(|line| !line.is_empty())
                    .take(self.max_sub_questions)
                    .map(|line| SubAnswer {
                        question: line.to_string(),
                        answer: String::new(),
                    })
                    .collect();
            }
            Err(err @ (Error::Cancelled | Error::DeadlineExceeded { .. })) => return Err(err),
            Err(err) => {
                debug!("decomposition unavailable: {err}");
                ctx.warn(WarningKind::CotSkipped, "decomposition unavailable");
            }
        }
        Ok(StageMetrics::Cot {
            sub_questions: ctx.reasoning.len(),
            duration_ms: elapsed_ms(started),
        })
    }
}

struct CotSynthesisStage {
    deps: Arc<StageDeps>,
}

#[async_trait]
impl Technique for CotSynthesisStage {
    fn id(&self) -> TechniqueId {
        TechniqueId::CotSynthesis
    }

    async fn execute(&self, ctx: &mut SearchContext) -> Result<StageMetrics> {
        let started = Instant::now();
        let sub_questions: Vec<String> =
            ctx.reasoning.iter().map(|s| s.question.clone()).collect();

        // Sub-searches run sequentially, reusing the retrieval path
        for (index, question) in sub_questions.iter().enumerate() {
            ctx.checkpoint()?;
            let hits = knn(&self.deps, ctx, question, 4).await?;
            let context_block = hits
                .iter()
                .map(|c| c.text.as_str())
                .collect::<Vec<_>>()
                .join("\n");
            let prompt = format!(
                "Answer briefly from the context.\n\nContext:\n{context_block}\n\nQuestion: {question}"
            );
            let answer = match call_llm(&self.deps, ctx, &prompt, &ctx.snapshot.parameters).await {
                Ok(completion) => completion.text.trim().to_string(),
                Err(err @ (Error::Cancelled | Error::DeadlineExceeded { .. })) => return Err(err),
                Err(_) => String::new(),
            };
            ctx.reasoning[index].answer = answer;

            // New evidence feeds the final generation
            let seen: HashSet<_> = ctx.retrieved.iter().map(|c| c.key).collect();
            for hit in hits {
                if !seen.contains(&hit.key) {
                    ctx.retrieved.push(hit);
                }
            }
        }

        Ok(StageMetrics::Cot {
            sub_questions: sub_questions.len(),
            duration_ms: elapsed_ms(started),
        })
    }
}

// --- built-in stages ---

/// Answer generation. Empty retrieval yields the canned
/// insufficient-context answer without a provider call.
///
/// # Errors
///
/// `Error::Generation` after the retry budget, `Error::Cancelled` /
/// `Error::DeadlineExceeded` from the cooperative checks.
pub async fn generate(deps: &StageDeps, ctx: &mut SearchContext) -> Result<StageMetrics> {
    let started = Instant::now();
    let chunks = ctx.working_chunks();

    if chunks.is_empty() {
        ctx.warn(WarningKind::EmptyRetrieval, "retrieval returned no chunks");
        ctx.answer = Some(INSUFFICIENT_CONTEXT_ANSWER.to_string());
        ctx.insufficient_context = true;
        return Ok(StageMetrics::Generation {
            tokens_used: 0,
            retries: 0,
            insufficient_context: true,
            duration_ms: elapsed_ms(started),
        });
    }

    let context_block = chunks
        .iter()
        .enumerate()
        .map(|(i, chunk)| {
            let place = match (chunk.filename(), chunk.page) {
                (Some(file), Some(page)) => format!("{file}, page {page}"),
                (Some(file), None) => file.to_string(),
                (None, Some(page)) => format!("page {page}"),
                (None, None) => "unknown source".to_string(),
            };
            format!("[{}] ({place}) {}", i + 1, chunk.text)
        })
        .collect::<Vec<_>>()
        .join("\n\n");

    let mut history = String::new();
    if let Some(augmentation) = &ctx.augmentation {
        if let Some(summary) = &augmentation.summary {
            history.push_str("Summary of earlier conversation: ");
            history.push_str(summary);
            history.push('\n');
        }
        history.push_str(&augmentation.recent_digest);
    }
    if !ctx.reasoning.is_empty() {
        history.push_str("\nReasoning so far:\n");
        for sub in &ctx.reasoning {
            history.push_str(&format!("- {} -> {}\n", sub.question, sub.answer));
        }
    }

    let prompt = ctx
        .snapshot
        .template(TemplateKind::RagQuery)
        .replace("{context}", &context_block)
        .replace("{history}", history.trim())
        .replace("{question}", ctx.query_text());

    let mut params = ctx.snapshot.parameters.clone();
    if let Some(temperature) = ctx.overrides.temperature {
        params.temperature = temperature;
    }
    if let Some(max_new_tokens) = ctx.overrides.max_new_tokens {
        params.max_new_tokens = max_new_tokens;
    }

    // Bounded retry on transient provider failures only
    let mut retries = 0u32;
    let completion = loop {
        ctx.checkpoint()?;
        match call_llm(deps, ctx, &prompt, &params).await {
            Ok(completion) => break completion,
            Err(err @ (Error::Cancelled | Error::DeadlineExceeded { .. })) => return Err(err),
            Err(err) if err.is_transient() && retries + 1 < deps.retry.max_attempts => {
                retries += 1;
                let delay = deps.retry.delay_for(retries);
                debug!(retries, "generation retry after transient failure: {err}");
                tokio::time::sleep(delay).await;
            }
            Err(err) => {
                return Err(Error::Generation {
                    message: err.to_string(),
                })
            }
        }
    };

    ctx.answer = Some(completion.text.trim().to_string());
    Ok(StageMetrics::Generation {
        tokens_used: completion.total_tokens(),
        retries,
        insufficient_context: false,
        duration_ms: elapsed_ms(started),
    })
}

/// Source attribution: map answer sentences to supporting chunks by
/// overlap scoring.
#[must_use]
pub fn attribute(ctx: &mut SearchContext) -> StageMetrics {
    let started = Instant::now();
    const SUPPORT_FLOOR: f32 = 0.08;

    if ctx.insufficient_context {
        ctx.sources = Vec::new();
        return StageMetrics::Attribution {
            sources_count: 0,
            duration_ms: elapsed_ms(started),
        };
    }

    let answer = ctx.answer.clone().unwrap_or_default();
    let sentences = split_into_sentences(&answer);

    let mut supported: Vec<SourceRef> = Vec::new();
    for chunk in ctx.working_chunks() {
        let support = sentences
            .iter()
            .map(|sentence| LexicalReranker::similarity(sentence, &chunk.text))
            .fold(0.0f32, f32::max);
        if support >= SUPPORT_FLOOR {
            supported.push(SourceRef {
                document_id: chunk.key.document_id,
                ordinal: chunk.key.ordinal,
                page: chunk.page,
                filename: chunk.filename().map(str::to_string),
                score: support,
            });
        }
    }
    supported.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.ordinal.cmp(&b.ordinal))
    });
    ctx.sources = supported;

    StageMetrics::Attribution {
        sources_count: ctx.sources.len(),
        duration_ms: elapsed_ms(started),
    }
}

fn split_into_sentences(text: &str) -> Vec<&str> {
    text.split_inclusive(['.', '!', '?'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn complexity_heuristic() {
        assert!(is_complex(
            "compare the revenue of the two companies and explain the difference"
        ));
        assert!(is_complex("what changed? and why?"));
        assert!(!is_complex("what is rust?"));
    }

    #[test]
    fn pronoun_detection() {
        assert!(has_unresolved_pronoun("what are their main applications?"));
        assert!(has_unresolved_pronoun("tell me more about it"));
        assert!(!has_unresolved_pronoun("what is a transformer?"));
    }

    #[test]
    fn sentence_splitting_keeps_content() {
        let sentences = split_into_sentences("One. Two! Three? Four");
        assert_eq!(sentences, vec!["One.", "Two!", "Three?", "Four"]);
    }
}
