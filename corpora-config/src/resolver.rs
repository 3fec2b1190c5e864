//! Self-healing user configuration resolution

use crate::templates::default_template;
use chrono::Utc;
use corpora_core::error::{Error, Result};
use corpora_core::identity::UserId;
use corpora_core::traits::metadata_store::MetadataStore;
use corpora_core::types::profile::{
    LlmParameters, PipelineDefaults, PromptTemplate, TemplateKind, UserProfile,
};
use std::sync::Arc;
use tracing::{debug, info};

/// Frozen view of a user's configuration, valid for one request.
///
/// Components never read live configuration mid-pipeline; they hold an
/// `Arc<ConfigSnapshot>` taken at request entry.
#[derive(Debug, Clone)]
pub struct ConfigSnapshot {
    /// The resolved user
    pub user_id: UserId,
    /// Generation parameters
    pub parameters: LlmParameters,
    /// Pipeline defaults
    pub pipeline: PipelineDefaults,
    templates: Vec<PromptTemplate>,
}

impl ConfigSnapshot {
    /// Template text for a slot. Every snapshot is complete by
    /// construction, so lookups always succeed.
    #[must_use]
    pub fn template(&self, kind: TemplateKind) -> &str {
        self.templates
            .iter()
            .find(|t| t.kind == kind)
            .map_or_else(|| default_template(kind), |t| t.text.as_str())
    }
}

/// Resolves users into frozen snapshots, creating missing configuration
/// on the way
pub struct ConfigService {
    metadata: Arc<dyn MetadataStore>,
}

impl std::fmt::Debug for ConfigService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigService").finish_non_exhaustive()
    }
}

impl ConfigService {
    /// Create the service over a metadata store
    #[must_use]
    pub fn new(metadata: Arc<dyn MetadataStore>) -> Self {
        Self { metadata }
    }

    /// Resolve a user into a frozen snapshot.
    ///
    /// Missing profiles and missing template slots are created before
    /// the snapshot is taken; the write happens once, so a failure
    /// leaves either the previous state or the fully healed one.
    ///
    /// # Errors
    ///
    /// Returns `Error::Configuration` when the profile cannot be read
    /// or the healed profile cannot be written.
    pub async fn resolve(&self, user_id: UserId) -> Result<Arc<ConfigSnapshot>> {
        let existing = self
            .metadata
            .get_profile(&user_id)
            .await
            .map_err(|e| Error::Configuration {
                message: format!("failed to load profile for {user_id}: {e}"),
            })?;

        let profile = match existing {
            Some(profile) if profile.is_complete() => profile,
            Some(mut profile) => {
                Self::heal(&mut profile);
                self.persist(&profile).await?;
                info!(user = %user_id, "healed incomplete user profile");
                profile
            }
            None => {
                let profile = Self::fresh_profile(user_id);
                self.persist(&profile).await?;
                debug!(user = %user_id, "initialized user profile");
                profile
            }
        };

        Ok(Arc::new(ConfigSnapshot {
            user_id,
            parameters: profile.parameters,
            pipeline: profile.pipeline,
            templates: profile.templates,
        }))
    }

    fn fresh_profile(user_id: UserId) -> UserProfile {
        let now = Utc::now();
        UserProfile {
            user_id,
            parameters: LlmParameters::default(),
            templates: TemplateKind::ALL
                .iter()
                .map(|kind| PromptTemplate {
                    kind: *kind,
                    text: default_template(*kind).to_string(),
                })
                .collect(),
            pipeline: PipelineDefaults::default(),
            created_at: now,
            updated_at: now,
        }
    }

    fn heal(profile: &mut UserProfile) {
        for kind in TemplateKind::ALL {
            if profile.template(kind).is_none() {
                profile.templates.push(PromptTemplate {
                    kind,
                    text: default_template(kind).to_string(),
                });
            }
        }
        profile.updated_at = Utc::now();
    }

    async fn persist(&self, profile: &UserProfile) -> Result<()> {
        self.metadata
            .put_profile(profile)
            .await
            .map_err(|e| Error::Configuration {
                message: format!("failed to persist profile for {}: {e}", profile.user_id),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use corpora_storage::MemoryMetadataStore;

    fn service() -> (ConfigService, Arc<MemoryMetadataStore>) {
        let store = Arc::new(MemoryMetadataStore::new());
        (ConfigService::new(store.clone()), store)
    }

    #[tokio::test]
    async fn first_contact_materializes_a_complete_profile() {
        let (service, store) = service();
        let user = UserId::new();
        let snapshot = service.resolve(user).await.unwrap();
        assert_eq!(snapshot.user_id, user);
        assert!(snapshot
            .template(TemplateKind::RagQuery)
            .contains("{question}"));

        let stored = store.get_profile(&user).await.unwrap().unwrap();
        assert!(stored.is_complete());
    }

    #[tokio::test]
    async fn missing_template_slots_are_healed() {
        let (service, store) = service();
        let user = UserId::new();
        let now = Utc::now();
        store
            .put_profile(&UserProfile {
                user_id: user,
                parameters: LlmParameters::default(),
                templates: vec![PromptTemplate {
                    kind: TemplateKind::RagQuery,
                    text: "custom {context} {question} {history}".into(),
                }],
                pipeline: PipelineDefaults::default(),
                created_at: now,
                updated_at: now,
            })
            .await
            .unwrap();

        let snapshot = service.resolve(user).await.unwrap();
        // the custom slot survives
        assert!(snapshot.template(TemplateKind::RagQuery).starts_with("custom"));
        // the missing slots were filled
        let stored = store.get_profile(&user).await.unwrap().unwrap();
        assert!(stored.is_complete());
    }

    #[tokio::test]
    async fn resolution_is_idempotent() {
        let (service, store) = service();
        let user = UserId::new();
        let first = service.resolve(user).await.unwrap();
        let second = service.resolve(user).await.unwrap();
        assert_eq!(first.pipeline, second.pipeline);
        let stored = store.get_profile(&user).await.unwrap().unwrap();
        assert_eq!(stored.templates.len(), TemplateKind::ALL.len());
    }
}
