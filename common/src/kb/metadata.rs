use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;
use tracing::warn;

use crate::{error::AppError, kb::layout::KnowledgeBaseLayout, kb::provider::RagProvider};

/// One entry in the append-only update history of a knowledge base.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateRecord {
    pub timestamp: DateTime<Utc>,
    pub action: String,
    pub count: usize,
    pub provider: RagProvider,
}

/// Durable record of a knowledge base's identity: which provider owns
/// it, which content has been canonically ingested, and when.
///
/// A file is canonically ingested iff its content hash appears among
/// `file_hashes` values. Presence in `raw/` alone means in-flight or
/// interrupted work, never completed ingestion.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KbMetadata {
    #[serde(default)]
    pub rag_provider: Option<RagProvider>,
    #[serde(default)]
    pub file_hashes: BTreeMap<String, String>,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(default)]
    pub update_history: Vec<UpdateRecord>,
}

impl KbMetadata {
    /// Content-identity membership: a hash match against any recorded
    /// filename means the bytes are already indexed, regardless of the
    /// name they were uploaded under.
    pub fn contains_hash(&self, hash: &str) -> bool {
        self.file_hashes.values().any(|existing| existing == hash)
    }
}

/// Read-modify-write access to `metadata.json` with atomic replace.
///
/// Every write lands in a temp file in the KB directory and is renamed
/// over the target, so a reader never observes a half-written document.
/// Concurrent writers may race; the last writer wins, which is
/// acceptable because ingestion is serialized per KB by the caller.
#[derive(Debug, Clone)]
pub struct MetadataStore {
    layout: KnowledgeBaseLayout,
}

impl MetadataStore {
    pub fn new(layout: &KnowledgeBaseLayout) -> Self {
        Self {
            layout: layout.clone(),
        }
    }

    /// Reads the current metadata. A missing file yields defaults; an
    /// unreadable or invalid file is treated the same but logged, since
    /// provider identity may then fall back to storage heuristics.
    pub async fn read(&self) -> KbMetadata {
        let path = self.layout.metadata_path();
        match tokio::fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice::<KbMetadata>(&bytes) {
                Ok(metadata) => metadata,
                Err(e) => {
                    warn!(
                        kb = self.layout.name(),
                        error = %e,
                        "metadata.json is corrupt; falling back to empty metadata"
                    );
                    KbMetadata::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => KbMetadata::default(),
            Err(e) => {
                warn!(
                    kb = self.layout.name(),
                    error = %e,
                    "failed to read metadata.json; falling back to empty metadata"
                );
                KbMetadata::default()
            }
        }
    }

    /// Records the hash of a successfully processed file. Called
    /// immediately after the provider store persisted the insert, so a
    /// crash after this point cannot lose the "already ingested" fact.
    pub async fn record_file_hash(&self, file_name: &str, hash: &str) -> Result<(), AppError> {
        self.mutate(|metadata| {
            metadata
                .file_hashes
                .insert(file_name.to_string(), hash.to_string());
        })
        .await
    }

    /// Binds the provider if none is recorded yet. Incremental adds must
    /// keep the original provider, so an existing value is left alone.
    pub async fn record_provider(&self, provider: RagProvider) -> Result<(), AppError> {
        self.mutate(|metadata| {
            if metadata.rag_provider.is_none() {
                metadata.rag_provider = Some(provider);
            }
        })
        .await
    }

    /// Appends an update-history record and bumps `last_updated`.
    pub async fn record_update(
        &self,
        action: &str,
        count: usize,
        provider: RagProvider,
    ) -> Result<(), AppError> {
        let now = Utc::now();
        self.mutate(|metadata| {
            metadata.last_updated = Some(now);
            metadata.update_history.push(UpdateRecord {
                timestamp: now,
                action: action.to_string(),
                count,
                provider,
            });
        })
        .await
    }

    async fn mutate<F>(&self, apply: F) -> Result<(), AppError>
    where
        F: FnOnce(&mut KbMetadata),
    {
        let mut metadata = self.read().await;
        apply(&mut metadata);
        self.write_atomic(&metadata).await
    }

    async fn write_atomic(&self, metadata: &KbMetadata) -> Result<(), AppError> {
        let kb_dir = self.layout.kb_dir();
        let target = self.layout.metadata_path();
        let serialized = serde_json::to_vec_pretty(metadata)?;

        // Temp file must live in the same directory as the target so the
        // rename stays atomic (same filesystem).
        let temp = NamedTempFile::new_in(&kb_dir)?;
        std::fs::write(temp.path(), &serialized)?;
        temp.persist(&target)?;
        Ok(())
    }
}
