//! Collection lifecycle service.
//!
//! Creation is atomic across the two stores: the vector namespace is
//! created first and compensated away if the metadata row fails to
//! commit, so either both exist or neither does. Deletion is two-phase:
//! the row is tombstoned synchronously, the data sweep runs as a
//! background job that tolerates partial vector-store failure.

use corpora_core::error::{Error, Result};
use corpora_core::identity::{CollectionId, UserId};
use corpora_core::traits::blob_store::BlobStore;
use corpora_core::traits::metadata_store::{CollectionFilter, MetadataStore};
use corpora_core::traits::vector_store::VectorStore;
use corpora_core::types::collection::{Collection, CollectionStatus, ChunkPolicy, Privacy};
use corpora_jobs::{JobHandler, JobKind, JobSpec, Scheduler};
use corpora_providers::ProviderRegistry;
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Parameters for creating a collection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateCollectionRequest {
    /// Owning user
    pub owner: UserId,
    /// Display name, unique per owner
    pub name: String,
    /// Chunk size in tokens
    pub chunk_size: usize,
    /// Overlap in tokens
    pub overlap: usize,
    /// Embedding model handle
    pub embedding_model: String,
    /// Visibility
    pub privacy: Privacy,
}

/// Fields a collection update may change
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CollectionPatch {
    /// Rename
    pub name: Option<String>,
    /// Change visibility
    pub privacy: Option<Privacy>,
    /// Change the chunking policy; marks the collection `needs_reprocess`
    pub policy: Option<ChunkPolicy>,
}

/// Collection lifecycle operations
pub struct CollectionService {
    metadata: Arc<dyn MetadataStore>,
    vectors: Arc<dyn VectorStore>,
    blobs: Arc<dyn BlobStore>,
    providers: Arc<ProviderRegistry>,
    scheduler: Arc<Scheduler>,
}

impl std::fmt::Debug for CollectionService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CollectionService").finish_non_exhaustive()
    }
}

impl CollectionService {
    /// Create the service and register its cleanup job handler
    #[must_use]
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        vectors: Arc<dyn VectorStore>,
        blobs: Arc<dyn BlobStore>,
        providers: Arc<ProviderRegistry>,
        scheduler: Arc<Scheduler>,
    ) -> Arc<Self> {
        let service = Arc::new(Self {
            metadata,
            vectors,
            blobs,
            providers,
            scheduler,
        });
        service.scheduler.register(
            JobKind::DeleteCollectionData,
            Arc::new(DeleteCollectionHandler {
                service: service.clone(),
            }),
        );
        service
    }

    /// Create a collection.
    ///
    /// # Errors
    ///
    /// `Error::Conflict` for a duplicate name,
    /// `Error::UnknownEmbeddingModel` for an unregistered model handle,
    /// `Error::Unavailable` when the vector namespace cannot be created.
    pub async fn create(&self, request: CreateCollectionRequest) -> Result<Collection> {
        let name = request.name.trim();
        if name.is_empty() {
            return Err(Error::validation("collection name must not be empty"));
        }

        let model_info = self.providers.model_info(&request.embedding_model)?;
        let policy = ChunkPolicy::new(request.chunk_size, request.overlap, request.embedding_model);
        policy.validate(model_info.max_input_tokens)?;

        if self
            .metadata
            .find_collection_by_name(&request.owner, &Collection::normalized_name(name))
            .await?
            .is_some()
        {
            return Err(Error::conflict(format!(
                "collection name already in use: {name}"
            )));
        }

        let collection = Collection::new(request.owner, name, policy, request.privacy);

        // Namespace first; compensate if the row fails to commit.
        self.vectors
            .create_namespace(&collection.namespace, model_info.dimensions)
            .await?;

        if let Err(err) = self.metadata.insert_collection(&collection).await {
            warn!(
                collection = %collection.id,
                "collection row failed to commit, dropping namespace: {err}"
            );
            if let Err(cleanup) = self.vectors.delete_namespace(&collection.namespace).await {
                warn!(
                    namespace = %collection.namespace,
                    "compensating namespace delete failed, janitor will retry: {cleanup}"
                );
            }
            return Err(err);
        }

        info!(collection = %collection.id, owner = %collection.owner, "created collection");
        Ok(collection)
    }

    /// Fetch a collection the requester may see.
    ///
    /// # Errors
    ///
    /// `Error::NotFound` when missing or deleted, `Error::Forbidden`
    /// when private and not owned.
    pub async fn get(&self, id: &CollectionId, requester: &UserId) -> Result<Collection> {
        let collection = self
            .metadata
            .get_collection(id)
            .await?
            .ok_or_else(|| Error::not_found("collection", id))?;
        if collection.status == CollectionStatus::Deleted {
            return Err(Error::not_found("collection", id));
        }
        if !collection.visible_to(requester) {
            return Err(Error::Forbidden {
                message: "collection is private".to_string(),
            });
        }
        Ok(collection)
    }

    /// List collections visible to the requester
    pub async fn list(
        &self,
        requester: &UserId,
        filter: &CollectionFilter,
    ) -> Result<Vec<Collection>> {
        let rows = self.metadata.list_collections(filter).await?;
        Ok(rows
            .into_iter()
            .filter(|c| c.visible_to(requester))
            .collect())
    }

    /// Apply a patch. A policy change only marks the collection
    /// `needs_reprocess`; documents stay indexed under the old policy
    /// until explicitly reprocessed.
    ///
    /// # Errors
    ///
    /// `Error::NotFound` / `Error::Forbidden` as for `get`;
    /// `Error::Validation` for an invalid policy.
    pub async fn update(
        &self,
        id: &CollectionId,
        requester: &UserId,
        patch: CollectionPatch,
    ) -> Result<Collection> {
        let mut collection = self.get(id, requester).await?;
        if collection.owner != *requester {
            return Err(Error::Forbidden {
                message: "only the owner may modify a collection".to_string(),
            });
        }

        if let Some(name) = patch.name {
            let name = name.trim().to_string();
            if name.is_empty() {
                return Err(Error::validation("collection name must not be empty"));
            }
            collection.name = name;
        }
        if let Some(privacy) = patch.privacy {
            collection.privacy = privacy;
        }
        if let Some(policy) = patch.policy {
            let model_info = self.providers.model_info(&policy.embedding_model)?;
            policy.validate(model_info.max_input_tokens)?;
            if policy != collection.policy {
                collection.policy = policy;
                collection.status = CollectionStatus::NeedsReprocess;
            }
        }
        collection.updated_at = Utc::now();
        self.metadata.update_collection(&collection).await?;
        Ok(collection)
    }

    /// Two-phase delete: tombstone the row, then sweep vectors, chunk
    /// rows, and blobs in the background. Sessions referencing the
    /// collection keep reading their messages; their searches return
    /// `CollectionDeleted`.
    ///
    /// # Errors
    ///
    /// `Error::NotFound` / `Error::Forbidden` as for `get`.
    pub async fn delete(&self, id: &CollectionId, requester: &UserId) -> Result<()> {
        let mut collection = self.get(id, requester).await?;
        if collection.owner != *requester {
            return Err(Error::Forbidden {
                message: "only the owner may delete a collection".to_string(),
            });
        }

        collection.status = CollectionStatus::Deleted;
        collection.updated_at = Utc::now();
        self.metadata.update_collection(&collection).await?;

        // Tombstone-mark the sessions bound to this collection
        for mut session in self.metadata.sessions_for_collection(id).await? {
            session.collection_deleted = true;
            self.metadata.update_session(&session).await?;
        }

        self.scheduler.submit(JobSpec::new(
            JobKind::DeleteCollectionData,
            format!("delete-collection:{id}"),
            serde_json::json!({ "collection_id": id.to_string() }),
        ))?;

        info!(collection = %id, "collection tombstoned, data sweep scheduled");
        Ok(())
    }

    /// The data sweep behind two-phase deletion. Separated so the job
    /// handler and tests share it.
    ///
    /// # Errors
    ///
    /// Propagates store failures; the scheduler retries transient ones.
    pub async fn sweep_deleted(&self, id: &CollectionId) -> Result<()> {
        let collection = self
            .metadata
            .get_collection(id)
            .await?
            .ok_or_else(|| Error::not_found("collection", id))?;
        if collection.status != CollectionStatus::Deleted {
            return Err(Error::conflict(format!(
                "collection {id} is not tombstoned"
            )));
        }

        let removed = self.vectors.delete_namespace(&collection.namespace).await?;

        let documents = self.metadata.list_documents(id).await?;
        for document in &documents {
            self.metadata.replace_chunks(&document.id, Vec::new()).await?;
            if self.blobs.delete(&document.content_address).await.is_err() {
                warn!(
                    document = %document.id,
                    "blob delete failed during sweep, leaving for retry"
                );
            }
        }
        let rows = self.metadata.delete_documents(id).await?;

        info!(
            collection = %id,
            vectors = removed,
            documents = rows,
            "collection data sweep complete"
        );
        Ok(())
    }
}

struct DeleteCollectionHandler {
    service: Arc<CollectionService>,
}

#[async_trait]
impl JobHandler for DeleteCollectionHandler {
    async fn run(&self, payload: &serde_json::Value, _cancel: &CancellationToken) -> Result<()> {
        let id: CollectionId = payload
            .get("collection_id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::validation("delete job payload missing collection_id"))?
            .parse()
            .map_err(|e| Error::validation(format!("bad collection_id: {e}")))?;
        self.service.sweep_deleted(&id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corpora_core::traits::vector_store::VectorStore as _;
    use corpora_jobs::SchedulerConfig;
    use corpora_providers::mock::MockEmbeddingProvider;
    use corpora_storage::{MemoryBlobStore, MemoryMetadataStore, MemoryVectorStore};

    struct Fixture {
        service: Arc<CollectionService>,
        vectors: Arc<MemoryVectorStore>,
        metadata: Arc<MemoryMetadataStore>,
        scheduler: Arc<Scheduler>,
    }

    fn fixture() -> Fixture {
        let metadata = Arc::new(MemoryMetadataStore::new());
        let vectors = Arc::new(MemoryVectorStore::new());
        let blobs = Arc::new(MemoryBlobStore::new());
        let providers = Arc::new(ProviderRegistry::new());
        providers.register(Arc::new(MockEmbeddingProvider::new(64)));
        let scheduler = Scheduler::new(SchedulerConfig::default());
        let service = CollectionService::new(
            metadata.clone(),
            vectors.clone(),
            blobs,
            providers,
            scheduler.clone(),
        );
        Fixture {
            service,
            vectors,
            metadata,
            scheduler,
        }
    }

    fn request(owner: UserId, name: &str) -> CreateCollectionRequest {
        CreateCollectionRequest {
            owner,
            name: name.to_string(),
            chunk_size: 128,
            overlap: 16,
            embedding_model: "mock-embed-64".to_string(),
            privacy: Privacy::Private,
        }
    }

    #[tokio::test]
    async fn create_provisions_the_namespace() {
        let f = fixture();
        let owner = UserId::new();
        let collection = f.service.create(request(owner, "reports")).await.unwrap();
        assert!(f
            .vectors
            .namespace_exists(&collection.namespace)
            .await
            .unwrap());
        assert_eq!(collection.status, CollectionStatus::Active);
    }

    #[tokio::test]
    async fn unknown_embedding_model_is_rejected_before_any_write() {
        let f = fixture();
        let owner = UserId::new();
        let mut req = request(owner, "reports");
        req.embedding_model = "no-such-model".into();
        let err = f.service.create(req).await.unwrap_err();
        assert!(matches!(err, Error::UnknownEmbeddingModel { .. }));
        assert!(f
            .metadata
            .list_collections(&CollectionFilter::default())
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn duplicate_name_compensates_the_namespace() {
        let f = fixture();
        let owner = UserId::new();
        let first = f.service.create(request(owner, "reports")).await.unwrap();
        let err = f
            .service
            .create(request(owner, "  REPORTS "))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Conflict { .. }));
        // only the first collection's namespace survives
        assert!(f
            .vectors
            .namespace_exists(&first.namespace)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn private_collections_are_forbidden_to_others() {
        let f = fixture();
        let owner = UserId::new();
        let collection = f.service.create(request(owner, "secret")).await.unwrap();
        let err = f
            .service
            .get(&collection.id, &UserId::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Forbidden { .. }));
    }

    #[tokio::test]
    async fn policy_change_marks_needs_reprocess() {
        let f = fixture();
        let owner = UserId::new();
        let collection = f.service.create(request(owner, "reports")).await.unwrap();
        let updated = f
            .service
            .update(
                &collection.id,
                &owner,
                CollectionPatch {
                    policy: Some(ChunkPolicy::new(64, 8, "mock-embed-64")),
                    ..CollectionPatch::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(updated.status, CollectionStatus::NeedsReprocess);
    }

    #[tokio::test]
    async fn delete_tombstones_then_sweeps() {
        let f = fixture();
        let owner = UserId::new();
        let collection = f.service.create(request(owner, "reports")).await.unwrap();
        f.service.delete(&collection.id, &owner).await.unwrap();

        // hidden from listings, fetchable as tombstone
        assert!(f
            .service
            .get(&collection.id, &owner)
            .await
            .is_err());
        let row = f
            .metadata
            .get_collection(&collection.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(row.status, CollectionStatus::Deleted);

        // wait for the sweep job
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        assert!(!f
            .vectors
            .namespace_exists(&collection.namespace)
            .await
            .unwrap());
        f.scheduler.stop();
    }
}
