//! Document ingestion pipeline.
//!
//! A per-document worker drives
//! `pending -> parsing -> chunking -> embedding -> indexed`, with
//! `failed` reachable from every state. Vectors are upserted batch by
//! batch before chunk rows commit, so a crash leaves orphan vectors
//! (reclaimable by the janitor) rather than dangling metadata.
//!
//! Submissions are deduplicated two ways: identical bytes into the same
//! collection resolve to the existing document, and concurrent
//! submissions for one document collapse through the scheduler's
//! idempotency key.

use crate::chunking::TextChunker;
use crate::parse::DocumentParser;
use async_trait::async_trait;
use chrono::Utc;
use corpora_core::error::{Error, Result};
use corpora_core::identity::{CollectionId, DocumentId, JobId, UserId};
use corpora_core::traits::blob_store::BlobStore;
use corpora_core::traits::metadata_store::MetadataStore;
use corpora_core::traits::vector_store::VectorStore;
use corpora_core::types::collection::{Collection, CollectionStatus};
use corpora_core::types::document::{ChunkKey, ChunkRecord, Document, DocumentStatus};
use corpora_core::types::vector::VectorEntry;
use corpora_jobs::{JobHandler, JobKind, JobSpec, Scheduler};
use corpora_providers::{retry_with_backoff, BackoffPolicy, EmbeddingProvider, ProviderRegistry};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Ingestion tuning
#[derive(Debug, Clone)]
pub struct IngestionConfig {
    /// Chunks embedded per provider call
    pub batch_size: usize,
    /// Per-batch retry budget for transient embedding failures
    pub retry: BackoffPolicy,
}

impl Default for IngestionConfig {
    fn default() -> Self {
        Self {
            batch_size: 16,
            retry: BackoffPolicy::default(),
        }
    }
}

/// A document upload
#[derive(Debug, Clone)]
pub struct IngestRequest {
    /// Target collection
    pub collection_id: CollectionId,
    /// Uploading user; must own the collection
    pub requester: UserId,
    /// Source filename
    pub filename: String,
    /// Raw bytes
    pub bytes: Vec<u8>,
    /// MIME type; inferred from the filename when absent
    pub mime_type: Option<String>,
}

/// Result of an ingestion submission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestResponse {
    /// The document handle; for duplicate uploads, the existing one
    pub document_id: DocumentId,
    /// Status at submission time
    pub status: DocumentStatus,
    /// The processing job, when one was scheduled
    pub job_id: Option<JobId>,
    /// True when the upload resolved to an existing document
    pub deduplicated: bool,
}

/// The ingestion service: submission, the worker, reprocessing, and the
/// orphan janitor
pub struct IngestionService {
    metadata: Arc<dyn MetadataStore>,
    vectors: Arc<dyn VectorStore>,
    blobs: Arc<dyn BlobStore>,
    providers: Arc<ProviderRegistry>,
    parser: Arc<dyn DocumentParser>,
    scheduler: Arc<Scheduler>,
    config: IngestionConfig,
}

impl std::fmt::Debug for IngestionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestionService")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl IngestionService {
    /// Create the service and register its job handlers
    #[must_use]
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        vectors: Arc<dyn VectorStore>,
        blobs: Arc<dyn BlobStore>,
        providers: Arc<ProviderRegistry>,
        parser: Arc<dyn DocumentParser>,
        scheduler: Arc<Scheduler>,
        config: IngestionConfig,
    ) -> Arc<Self> {
        let service = Arc::new(Self {
            metadata,
            vectors,
            blobs,
            providers,
            parser,
            scheduler,
            config,
        });
        let handler = Arc::new(IngestHandler {
            service: service.clone(),
        });
        service.scheduler.register(JobKind::IngestDocument, handler.clone());
        service.scheduler.register(JobKind::ReprocessDocument, handler);
        service
    }

    /// Submit an upload. Identical bytes into the same collection
    /// resolve to the existing document; exactly one document record
    /// ever exists per `(collection, content_address)`.
    ///
    /// # Errors
    ///
    /// `Error::NotFound` / `Error::Forbidden` for a missing or foreign
    /// collection, `Error::Validation` for an empty upload.
    pub async fn submit(&self, request: IngestRequest) -> Result<IngestResponse> {
        if request.bytes.is_empty() {
            return Err(Error::validation("upload is empty"));
        }
        let collection = self.owned_collection(&request.collection_id, &request.requester).await?;

        let blob = self.blobs.put(&request.bytes).await?;
        if let Some(existing) = self
            .metadata
            .find_document_by_address(&collection.id, &blob.address)
            .await?
        {
            debug!(document = %existing.id, "upload deduplicated by content address");
            return Ok(IngestResponse {
                document_id: existing.id,
                status: existing.status,
                job_id: None,
                deduplicated: true,
            });
        }

        let mime_type = request
            .mime_type
            .unwrap_or_else(|| infer_mime(&request.filename));
        let document = Document::new(
            collection.id,
            request.filename,
            blob.address.clone(),
            mime_type,
            blob.size,
        );

        match self.metadata.insert_document(&document).await {
            Ok(()) => {}
            Err(Error::Conflict { .. }) => {
                // lost a concurrent race for the same bytes: adopt the winner
                let existing = self
                    .metadata
                    .find_document_by_address(&collection.id, &blob.address)
                    .await?
                    .ok_or_else(|| {
                        Error::internal("document vanished after address conflict")
                    })?;
                return Ok(IngestResponse {
                    document_id: existing.id,
                    status: existing.status,
                    job_id: None,
                    deduplicated: true,
                });
            }
            Err(err) => return Err(err),
        }

        let mut collection = collection;
        collection.document_count += 1;
        collection.total_size_bytes += blob.size;
        if collection.status == CollectionStatus::Active {
            collection.status = CollectionStatus::Processing;
        }
        collection.updated_at = Utc::now();
        self.metadata.update_collection(&collection).await?;

        let job_id = self.scheduler.submit(JobSpec::new(
            JobKind::IngestDocument,
            format!("ingest:{}", document.id),
            serde_json::json!({ "document_id": document.id.to_string() }),
        ))?;

        info!(document = %document.id, collection = %collection.id, "ingestion scheduled");
        Ok(IngestResponse {
            document_id: document.id,
            status: DocumentStatus::Pending,
            job_id: Some(job_id),
            deduplicated: false,
        })
    }

    /// Reprocess a document under the collection's current policy.
    /// Idempotent per `(document, policy fingerprint)`: a document
    /// already indexed under the current policy is left untouched.
    ///
    /// # Errors
    ///
    /// `Error::Conflict` when the document is mid-ingestion.
    pub async fn reprocess(&self, document_id: &DocumentId, requester: &UserId) -> Result<IngestResponse> {
        let mut document = self
            .metadata
            .get_document(document_id)
            .await?
            .ok_or_else(|| Error::not_found("document", document_id))?;
        let collection = self.owned_collection(&document.collection_id, requester).await?;

        let fingerprint = collection.policy.fingerprint();
        if document.status == DocumentStatus::Indexed
            && document.policy_fingerprint.as_deref() == Some(fingerprint.as_str())
        {
            debug!(document = %document.id, "reprocess is a no-op under unchanged policy");
            return Ok(IngestResponse {
                document_id: document.id,
                status: document.status,
                job_id: None,
                deduplicated: true,
            });
        }

        if document.status != DocumentStatus::Indexed {
            return Err(Error::conflict(format!(
                "document {document_id} is {} and cannot be reprocessed",
                document.status
            )));
        }

        // Delete old vectors, reset counters, re-enter at chunking
        self.vectors
            .delete_document(&collection.namespace, document_id)
            .await?;
        document.chunk_count = 0;
        document.policy_fingerprint = None;
        document.processing_error = None;
        document.transition(DocumentStatus::Chunking)?;
        self.metadata.update_document(&document).await?;

        let job_id = self.scheduler.submit(JobSpec::new(
            JobKind::ReprocessDocument,
            format!("reprocess:{}:{fingerprint}", document.id),
            serde_json::json!({ "document_id": document.id.to_string() }),
        ))?;

        info!(document = %document.id, "reprocess scheduled");
        Ok(IngestResponse {
            document_id: document.id,
            status: DocumentStatus::Chunking,
            job_id: Some(job_id),
            deduplicated: false,
        })
    }

    /// The per-document worker. Invoked only by the scheduler, which
    /// makes it the single writer of the document status field.
    ///
    /// # Errors
    ///
    /// Transient dependency failures bubble for the scheduler to retry;
    /// permanent ones mark the document failed and return `Ok`.
    pub async fn process_document(&self, document_id: &DocumentId) -> Result<()> {
        let mut document = self
            .metadata
            .get_document(document_id)
            .await?
            .ok_or_else(|| Error::not_found("document", document_id))?;
        let collection = self
            .metadata
            .get_collection(&document.collection_id)
            .await?
            .ok_or_else(|| Error::not_found("collection", document.collection_id))?;
        if collection.status == CollectionStatus::Deleted {
            return Err(Error::CollectionDeleted {
                id: collection.id.to_string(),
            });
        }

        match self.run_stages(&mut document, &collection).await {
            Ok(()) => Ok(()),
            Err(err) if err.is_transient() => Err(err),
            Err(err) => {
                warn!(document = %document.id, "ingestion failed terminally: {err}");
                document.status = DocumentStatus::Failed;
                document.processing_error = Some(err.to_string());
                self.metadata.update_document(&document).await?;
                Ok(())
            }
        }
    }

    async fn run_stages(&self, document: &mut Document, collection: &Collection) -> Result<()> {
        let embedder = self.providers.embedder(&collection.policy.embedding_model)?;
        let max_model_tokens = embedder.info().max_input_tokens;

        // Parse. A reprocess enters at chunking but still needs the
        // text; the blob is the source of truth either way.
        if document.status == DocumentStatus::Pending {
            document.transition(DocumentStatus::Parsing)?;
            self.metadata.update_document(document).await?;
        }
        let bytes = self
            .blobs
            .get(&document.content_address)
            .await?
            .ok_or_else(|| Error::not_found("blob", &document.content_address))?;
        let parsed = self.parser.parse(&bytes, &document.mime_type).await?;

        // Chunk
        if document.status == DocumentStatus::Parsing {
            document.transition(DocumentStatus::Chunking)?;
            self.metadata.update_document(document).await?;
        }
        let chunker = TextChunker::for_model(&collection.policy.embedding_model);
        let chunks = chunker.chunk(&parsed.text, &collection.policy, max_model_tokens, &parsed.pages)?;
        document.page_count = parsed.pages.len();

        // Embed and upsert, batch by batch. Vectors land before chunk
        // rows commit; a failure here leaves orphans for the janitor.
        document.transition(DocumentStatus::Embedding)?;
        self.metadata.update_document(document).await?;

        let cancel = CancellationToken::new();
        let mut records = Vec::with_capacity(chunks.len());
        for batch in chunks.chunks(self.config.batch_size.max(1)) {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let embeddings = retry_with_backoff(self.config.retry, &cancel, "embed_batch", || {
                let embedder = embedder.clone();
                let texts = texts.clone();
                async move { embedder.embed(&texts).await }
            })
            .await?;

            let mut entries = Vec::with_capacity(batch.len());
            for (chunk, embedding) in batch.iter().zip(embeddings) {
                let key = ChunkKey::new(document.id, chunk.ordinal);
                let metadata = chunk_metadata(document, &parsed.title, chunk.page, chunk.token_count);
                entries.push(VectorEntry::new(key, embedding, chunk.text.clone()).with_metadata(metadata.clone()));
                records.push(ChunkRecord {
                    key,
                    text: chunk.text.clone(),
                    page: chunk.page,
                    token_count: chunk.token_count,
                    metadata,
                });
            }
            self.vectors.upsert(&collection.namespace, entries).await?;
        }

        // Commit metadata after every vector is in place
        self.metadata.replace_chunks(&document.id, records).await?;
        document.chunk_count = chunks.len();
        document.policy_fingerprint = Some(collection.policy.fingerprint());
        document.transition(DocumentStatus::Indexed)?;
        self.metadata.update_document(document).await?;

        // Collection bookkeeping
        let mut collection = collection.clone();
        collection.last_indexed_at = Some(Utc::now());
        if collection.status == CollectionStatus::Processing {
            let any_in_flight = self
                .metadata
                .list_documents(&collection.id)
                .await?
                .iter()
                .any(|d| {
                    d.id != document.id
                        && !matches!(d.status, DocumentStatus::Indexed | DocumentStatus::Failed)
                });
            if !any_in_flight {
                collection.status = CollectionStatus::Active;
            }
        }
        collection.updated_at = Utc::now();
        self.metadata.update_collection(&collection).await?;

        info!(
            document = %document.id,
            chunks = document.chunk_count,
            pages = document.page_count,
            "document indexed"
        );
        Ok(())
    }

    /// Reclaim vectors whose document is gone or terminally failed.
    ///
    /// In-flight documents (parsing through embedding) are skipped;
    /// their vectors are about to be committed. This janitor is the only
    /// component permitted to sweep orphans.
    ///
    /// # Errors
    ///
    /// Propagates store failures.
    pub async fn run_janitor(&self, collection_id: &CollectionId) -> Result<usize> {
        let collection = self
            .metadata
            .get_collection(collection_id)
            .await?
            .ok_or_else(|| Error::not_found("collection", collection_id))?;

        let mut reclaimed = 0;
        for document_id in self.vectors.document_ids(&collection.namespace).await? {
            let orphaned = match self.metadata.get_document(&document_id).await? {
                None => true,
                Some(doc) => doc.status == DocumentStatus::Failed,
            };
            if orphaned {
                reclaimed += self
                    .vectors
                    .delete_document(&collection.namespace, &document_id)
                    .await?;
            }
        }
        if reclaimed > 0 {
            info!(collection = %collection_id, reclaimed, "janitor reclaimed orphan vectors");
        }
        Ok(reclaimed)
    }

    async fn owned_collection(
        &self,
        collection_id: &CollectionId,
        requester: &UserId,
    ) -> Result<Collection> {
        let collection = self
            .metadata
            .get_collection(collection_id)
            .await?
            .ok_or_else(|| Error::not_found("collection", collection_id))?;
        if collection.status == CollectionStatus::Deleted {
            return Err(Error::CollectionDeleted {
                id: collection_id.to_string(),
            });
        }
        if collection.owner != *requester {
            return Err(Error::Forbidden {
                message: "only the owner may ingest into a collection".to_string(),
            });
        }
        Ok(collection)
    }
}

fn chunk_metadata(
    document: &Document,
    title: &Option<String>,
    page: Option<u32>,
    token_count: usize,
) -> HashMap<String, serde_json::Value> {
    let mut metadata = HashMap::new();
    metadata.insert(
        "document_id".to_string(),
        serde_json::Value::String(document.id.to_string()),
    );
    metadata.insert(
        "filename".to_string(),
        serde_json::Value::String(document.filename.clone()),
    );
    metadata.insert(
        "token_count".to_string(),
        serde_json::Value::Number(token_count.into()),
    );
    metadata.insert(
        "ingested_at".to_string(),
        serde_json::Value::String(Utc::now().to_rfc3339()),
    );
    if let Some(page) = page {
        metadata.insert("page".to_string(), serde_json::Value::Number(page.into()));
    }
    if let Some(title) = title {
        metadata.insert(
            "title".to_string(),
            serde_json::Value::String(title.clone()),
        );
    }
    metadata
}

fn infer_mime(filename: &str) -> String {
    let extension = filename.rsplit('.').next().unwrap_or_default();
    match extension.to_lowercase().as_str() {
        "md" | "markdown" => "text/markdown",
        "csv" => "text/csv",
        _ => "text/plain",
    }
    .to_string()
}

struct IngestHandler {
    service: Arc<IngestionService>,
}

#[async_trait]
impl JobHandler for IngestHandler {
    async fn run(&self, payload: &serde_json::Value, _cancel: &CancellationToken) -> Result<()> {
        let document_id: DocumentId = payload
            .get("document_id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::validation("ingest job payload missing document_id"))?
            .parse()
            .map_err(|e| Error::validation(format!("bad document_id: {e}")))?;
        self.service.process_document(&document_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collections::{CollectionService, CreateCollectionRequest};
    use crate::parse::PlainTextParser;
    use corpora_core::types::collection::Privacy;
    use corpora_jobs::SchedulerConfig;
    use corpora_providers::mock::MockEmbeddingProvider;
    use corpora_storage::{MemoryBlobStore, MemoryMetadataStore, MemoryVectorStore};
    use std::time::Duration;

    struct Fixture {
        collections: Arc<CollectionService>,
        ingestion: Arc<IngestionService>,
        metadata: Arc<MemoryMetadataStore>,
        vectors: Arc<MemoryVectorStore>,
        scheduler: Arc<Scheduler>,
        owner: UserId,
    }

    async fn fixture() -> (Fixture, Collection) {
        let metadata = Arc::new(MemoryMetadataStore::new());
        let vectors = Arc::new(MemoryVectorStore::new());
        let blobs = Arc::new(MemoryBlobStore::new());
        let providers = Arc::new(ProviderRegistry::new());
        providers.register(Arc::new(MockEmbeddingProvider::new(64)));
        let scheduler = Scheduler::new(SchedulerConfig::default());
        let collections = CollectionService::new(
            metadata.clone(),
            vectors.clone(),
            blobs.clone(),
            providers.clone(),
            scheduler.clone(),
        );
        let ingestion = IngestionService::new(
            metadata.clone(),
            vectors.clone(),
            blobs,
            providers,
            Arc::new(PlainTextParser::new()),
            scheduler.clone(),
            IngestionConfig::default(),
        );
        let owner = UserId::new();
        let collection = collections
            .create(CreateCollectionRequest {
                owner,
                name: "library".into(),
                chunk_size: 64,
                overlap: 8,
                embedding_model: "mock-embed-64".into(),
                privacy: Privacy::Private,
            })
            .await
            .unwrap();
        (
            Fixture {
                collections,
                ingestion,
                metadata,
                vectors,
                scheduler,
                owner,
            },
            collection,
        )
    }

    fn upload(f: &Fixture, collection: &Collection, name: &str, body: &str) -> IngestRequest {
        IngestRequest {
            collection_id: collection.id,
            requester: f.owner,
            filename: name.to_string(),
            bytes: body.as_bytes().to_vec(),
            mime_type: None,
        }
    }

    async fn ingest_and_wait(f: &Fixture, request: IngestRequest) -> Document {
        let response = f.ingestion.submit(request).await.unwrap();
        if let Some(job) = response.job_id {
            let status = f
                .scheduler
                .wait(&job, Duration::from_secs(5))
                .await
                .unwrap();
            assert_eq!(status.state, corpora_jobs::JobState::Completed, "{status:?}");
        }
        f.metadata
            .get_document(&response.document_id)
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn document_reaches_indexed_with_matching_vectors() {
        let (f, collection) = fixture().await;
        let body = "Alpha sentence one. Alpha sentence two. Beta sentence three. \
                    Gamma sentence four. Delta sentence five.";
        let doc = ingest_and_wait(&f, upload(&f, &collection, "a.txt", body)).await;

        assert_eq!(doc.status, DocumentStatus::Indexed);
        assert!(doc.chunk_count > 0);
        assert!(doc.processed_at.is_some());

        let keys = f
            .vectors
            .document_keys(&collection.namespace, &doc.id)
            .await
            .unwrap();
        assert_eq!(keys.len(), doc.chunk_count);
        let rows = f.metadata.list_chunks(&doc.id).await.unwrap();
        assert_eq!(rows.len(), doc.chunk_count);
        f.scheduler.stop();
    }

    #[tokio::test]
    async fn duplicate_bytes_resolve_to_one_document() {
        let (f, collection) = fixture().await;
        let body = "Identical content uploaded twice.";
        let first = ingest_and_wait(&f, upload(&f, &collection, "one.txt", body)).await;
        let second = f
            .ingestion
            .submit(upload(&f, &collection, "two.txt", body))
            .await
            .unwrap();
        assert!(second.deduplicated);
        assert_eq!(second.document_id, first.id);

        let docs = f.metadata.list_documents(&collection.id).await.unwrap();
        assert_eq!(docs.len(), 1);
        f.scheduler.stop();
    }

    #[tokio::test]
    async fn concurrent_submissions_create_one_document() {
        let (f, collection) = fixture().await;
        let body = "Raced content.";
        let (a, b) = tokio::join!(
            f.ingestion.submit(upload(&f, &collection, "x.txt", body)),
            f.ingestion.submit(upload(&f, &collection, "y.txt", body)),
        );
        let a = a.unwrap();
        let b = b.unwrap();
        assert_eq!(a.document_id, b.document_id);
        assert_eq!(
            f.metadata.list_documents(&collection.id).await.unwrap().len(),
            1
        );
        f.scheduler.stop();
    }

    #[tokio::test]
    async fn reprocess_with_unchanged_policy_is_a_no_op() {
        let (f, collection) = fixture().await;
        let body = "One sentence here. Two sentences here. Three sentences here. \
                    Four sentences here. Five sentences here. Six sentences here.";
        let doc = ingest_and_wait(&f, upload(&f, &collection, "p.txt", body)).await;
        let keys_before = f
            .vectors
            .document_keys(&collection.namespace, &doc.id)
            .await
            .unwrap();

        let response = f.ingestion.reprocess(&doc.id, &f.owner).await.unwrap();
        assert!(response.deduplicated);
        assert!(response.job_id.is_none());

        let after = f.metadata.get_document(&doc.id).await.unwrap().unwrap();
        assert_eq!(after.chunk_count, doc.chunk_count);
        let keys_after = f
            .vectors
            .document_keys(&collection.namespace, &doc.id)
            .await
            .unwrap();
        assert_eq!(keys_before, keys_after);
        f.scheduler.stop();
    }

    #[tokio::test]
    async fn reprocess_after_policy_change_rewrites_chunks() {
        let (f, collection) = fixture().await;
        let body = "Sentence one is here. Sentence two is here. Sentence three is here. \
                    Sentence four is here. Sentence five is here. Sentence six is here.";
        let doc = ingest_and_wait(&f, upload(&f, &collection, "p.txt", body)).await;
        let count_before = doc.chunk_count;

        // Halve the chunk size
        f.collections
            .update(
                &collection.id,
                &f.owner,
                crate::collections::CollectionPatch {
                    policy: Some(corpora_core::types::collection::ChunkPolicy::new(
                        32,
                        4,
                        "mock-embed-64",
                    )),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let response = f.ingestion.reprocess(&doc.id, &f.owner).await.unwrap();
        let job = response.job_id.unwrap();
        f.scheduler.wait(&job, Duration::from_secs(5)).await.unwrap();

        let after = f.metadata.get_document(&doc.id).await.unwrap().unwrap();
        assert_eq!(after.status, DocumentStatus::Indexed);
        assert!(after.chunk_count >= count_before, "smaller chunks, more of them");
        let keys = f
            .vectors
            .document_keys(&collection.namespace, &doc.id)
            .await
            .unwrap();
        assert_eq!(keys.len(), after.chunk_count);
        f.scheduler.stop();
    }

    #[tokio::test]
    async fn unsupported_format_fails_terminally() {
        let (f, collection) = fixture().await;
        let mut request = upload(&f, &collection, "scan.pdf", "%PDF-1.7 binary");
        request.mime_type = Some("application/pdf".into());
        let response = f.ingestion.submit(request).await.unwrap();
        let job = response.job_id.unwrap();
        f.scheduler.wait(&job, Duration::from_secs(5)).await.unwrap();

        let doc = f
            .metadata
            .get_document(&response.document_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(doc.status, DocumentStatus::Failed);
        assert!(doc.processing_error.as_deref().unwrap_or_default().contains("unsupported"));
        f.scheduler.stop();
    }

    #[tokio::test]
    async fn janitor_reclaims_vectors_of_failed_documents() {
        let (f, collection) = fixture().await;
        // Plant orphan vectors under a document id with no metadata row
        let ghost = DocumentId::new();
        f.vectors
            .upsert(
                &collection.namespace,
                vec![VectorEntry::new(
                    ChunkKey::new(ghost, 0),
                    vec![0.0; 64],
                    "orphan",
                )],
            )
            .await
            .unwrap();

        // And a healthy document that must survive
        let body = "Healthy content stays indexed.";
        let doc = ingest_and_wait(&f, upload(&f, &collection, "ok.txt", body)).await;

        let reclaimed = f.ingestion.run_janitor(&collection.id).await.unwrap();
        assert_eq!(reclaimed, 1);
        let remaining = f
            .vectors
            .document_ids(&collection.namespace)
            .await
            .unwrap();
        assert_eq!(remaining, vec![doc.id]);
        f.scheduler.stop();
    }
}
