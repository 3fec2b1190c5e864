//! The search orchestrator.
//!
//! Resolves the user's frozen configuration, loads and access-checks the
//! collection, materializes the technique plan, and runs the stages in
//! order with cancellation and deadline checks at every boundary.
//! Cancellation and deadline expiry are outcomes, not failures: the
//! response carries whatever metrics the completed stages produced.

use crate::pipeline::context::{clean_question, SearchContext};
use crate::pipeline::metrics::StageMetrics;
use crate::pipeline::request::{SearchRequest, SearchResponse};
use crate::pipeline::stages::{attribute, generate, instantiate, StageDeps, Technique};
use crate::techniques::{preset, validate_sequence, PipelineStage, TechniqueId, TechniqueSpec};
use corpora_config::{ConfigService, ConfigSnapshot};
use corpora_core::error::{Error, Result, StatusCode};
use corpora_core::identity::CorrelationId;
use corpora_core::traits::metadata_store::MetadataStore;
use corpora_core::traits::vector_store::VectorStore;
use corpora_core::types::collection::{Collection, CollectionStatus};
use corpora_providers::{
    BackoffPolicy, CacheConfig, CompletionProvider, EmbeddingCache, LexicalReranker,
    ProviderRegistry, RateLimit, Reranker, TokenBucket,
};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, info_span, Instrument};

/// The search pipeline service
pub struct SearchService {
    metadata: Arc<dyn MetadataStore>,
    config: Arc<ConfigService>,
    deps: Arc<StageDeps>,
}

impl std::fmt::Debug for SearchService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchService").finish_non_exhaustive()
    }
}

impl SearchService {
    /// Create a search service with the default reranker, cache, rate
    /// limits, and retry budget
    #[must_use]
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        vectors: Arc<dyn VectorStore>,
        providers: Arc<ProviderRegistry>,
        llm: Arc<dyn CompletionProvider>,
        config: Arc<ConfigService>,
    ) -> Self {
        Self {
            metadata,
            config,
            deps: Arc::new(StageDeps {
                vectors,
                providers,
                llm,
                reranker: Arc::new(LexicalReranker::new()),
                cache: Arc::new(EmbeddingCache::new(CacheConfig::default())),
                llm_bucket: Arc::new(TokenBucket::new(RateLimit::default())),
                embed_bucket: Arc::new(TokenBucket::new(RateLimit::default())),
                retry: BackoffPolicy::default(),
            }),
        }
    }

    /// Replace the reranker back-end
    #[must_use]
    pub fn with_reranker(mut self, reranker: Arc<dyn Reranker>) -> Self {
        let deps = Arc::get_mut(&mut self.deps)
            .unwrap_or_else(|| unreachable!("builder runs before the service is shared"));
        deps.reranker = reranker;
        self
    }

    /// Replace the per-stage retry budget
    #[must_use]
    pub fn with_retry(mut self, retry: BackoffPolicy) -> Self {
        let deps = Arc::get_mut(&mut self.deps)
            .unwrap_or_else(|| unreachable!("builder runs before the service is shared"));
        deps.retry = retry;
        self
    }

    /// Run one search request to completion.
    ///
    /// # Errors
    ///
    /// Validation, access, pipeline-composition, and generation errors
    /// surface as `Err`. Cancellation and deadline expiry return `Ok`
    /// with the matching status and partial metrics.
    pub async fn search(&self, request: SearchRequest) -> Result<SearchResponse> {
        let correlation_id = CorrelationId::new();
        let span = info_span!("search", correlation = %correlation_id);
        self.search_inner(request, correlation_id).instrument(span).await
    }

    async fn search_inner(
        &self,
        request: SearchRequest,
        correlation_id: CorrelationId,
    ) -> Result<SearchResponse> {
        request.validate()?;
        let snapshot = self.config.resolve(request.user).await?;
        let collection = self.load_collection(&request).await?;

        let specs = resolve_plan(&request, &snapshot)?;
        validate_sequence(&specs, false)?;
        let stages: Vec<Arc<dyn Technique>> =
            specs.iter().map(|spec| instantiate(spec, &self.deps)).collect();

        debug!(
            collection = %collection.id,
            plan = ?specs.iter().map(TechniqueSpec::id).collect::<Vec<_>>(),
            "technique plan resolved"
        );

        let started_at = Instant::now();
        let mut ctx = SearchContext {
            correlation_id,
            user: request.user,
            collection,
            cleaned_question: clean_question(&request.question),
            original_question: request.question,
            rewritten_question: None,
            augmentation: request.augmentation,
            retrieved: Vec::new(),
            reranked: None,
            reasoning: Vec::new(),
            answer: None,
            sources: Vec::new(),
            warnings: Vec::new(),
            snapshot,
            overrides: request.overrides,
            cancel: request.cancel,
            started_at,
            deadline: request.deadline.map(|budget| started_at + budget),
            insufficient_context: false,
        };

        let mut metrics: Vec<StageMetrics> = Vec::new();
        let mut applied: Vec<TechniqueId> = Vec::new();

        let outcome = self
            .run_stages(&stages, &mut ctx, &mut metrics, &mut applied)
            .await;

        match outcome {
            Ok(()) => {
                info!(
                    stages = metrics.len(),
                    sources = ctx.sources.len(),
                    insufficient = ctx.insufficient_context,
                    "search complete"
                );
                Ok(build_response(ctx, metrics, applied, StatusCode::Ok))
            }
            Err(Error::Cancelled) => {
                info!(completed_stages = metrics.len(), "search cancelled");
                ctx.answer = None;
                Ok(build_response(ctx, metrics, applied, StatusCode::Cancelled))
            }
            Err(Error::DeadlineExceeded { elapsed_ms }) => {
                info!(completed_stages = metrics.len(), elapsed_ms, "search deadline exceeded");
                ctx.answer = None;
                Ok(build_response(
                    ctx,
                    metrics,
                    applied,
                    StatusCode::DeadlineExceeded,
                ))
            }
            Err(err) => Err(err),
        }
    }

    async fn run_stages(
        &self,
        stages: &[Arc<dyn Technique>],
        ctx: &mut SearchContext,
        metrics: &mut Vec<StageMetrics>,
        applied: &mut Vec<TechniqueId>,
    ) -> Result<()> {
        for stage in stages {
            ctx.checkpoint()?;
            let record = stage.execute(ctx).await?;
            debug!(stage = record.stage_name(), "stage complete");
            metrics.push(record);
            applied.push(stage.id());
        }

        ctx.checkpoint()?;
        metrics.push(generate(&self.deps, ctx).await?);

        ctx.checkpoint()?;
        metrics.push(attribute(ctx));
        Ok(())
    }

    async fn load_collection(&self, request: &SearchRequest) -> Result<Collection> {
        let collection = self
            .metadata
            .get_collection(&request.collection)
            .await?
            .ok_or_else(|| Error::not_found("collection", request.collection))?;
        if collection.status == CollectionStatus::Deleted {
            return Err(Error::CollectionDeleted {
                id: collection.id.to_string(),
            });
        }
        if !collection.visible_to(&request.user) {
            return Err(Error::Forbidden {
                message: "collection is private".to_string(),
            });
        }
        Ok(collection)
    }
}

/// Resolve the request into a validated technique sequence
fn resolve_plan(request: &SearchRequest, snapshot: &ConfigSnapshot) -> Result<Vec<TechniqueSpec>> {
    let mut specs = if let Some(techniques) = &request.techniques {
        techniques.clone()
    } else {
        let name = request
            .preset
            .as_deref()
            .unwrap_or(&snapshot.pipeline.preset);
        preset(name).ok_or_else(|| Error::validation(format!("unknown preset: {name}")))?
    };

    if request.cot_enabled == Some(true)
        && !specs.iter().any(|s| s.id() == TechniqueId::CotDecomposition)
    {
        specs.push(TechniqueSpec::of(TechniqueId::CotDecomposition));
        specs.push(TechniqueSpec::of(TechniqueId::CotSynthesis));
    }

    match request.rerank_enabled {
        Some(false) => specs.retain(|s| s.id() != TechniqueId::Reranking),
        Some(true) if !specs.iter().any(|s| s.id() == TechniqueId::Reranking) => {
            let position = specs
                .iter()
                .position(|s| s.id().stage() > PipelineStage::PostRetrieval)
                .unwrap_or(specs.len());
            specs.insert(position, TechniqueSpec::of(TechniqueId::Reranking));
        }
        _ => {}
    }

    Ok(specs)
}

fn build_response(
    ctx: SearchContext,
    metrics: Vec<StageMetrics>,
    applied: Vec<TechniqueId>,
    status: StatusCode,
) -> SearchResponse {
    let include_sources = ctx.overrides.include_sources.unwrap_or(true);
    let include_chunks = ctx.overrides.include_chunks.unwrap_or(false);
    SearchResponse {
        status,
        answer: ctx.answer.unwrap_or_default(),
        sources: if include_sources { ctx.sources } else { Vec::new() },
        chunks: if include_chunks {
            Some(
                ctx.reranked
                    .unwrap_or(ctx.retrieved),
            )
        } else {
            None
        },
        techniques_applied: applied,
        metrics,
        warnings: ctx.warnings,
        insufficient_context: ctx.insufficient_context,
        correlation_id: ctx.correlation_id,
    }
}
