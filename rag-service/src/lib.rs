#![allow(clippy::missing_docs_in_private_items)]

//! Facade over the provider engines: one entry point per knowledge-base
//! operation (ingest, search, delete), with provider resolution,
//! staging and dispatch composed behind it. The engine registry is an
//! owned map on the service instance; nothing global, nothing cached
//! across instances.

pub mod resolver;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_openai::Client;
use tracing::{info, warn};

use common::{
    error::AppError,
    kb::{
        engine::{RagEngine, SearchMode, SearchResponse},
        layout::KnowledgeBaseLayout,
        metadata::MetadataStore,
        provider::RagProvider,
    },
    utils::{config::AppConfig, embedding::EmbeddingProvider, hashing::sha256_file},
};
use graph_engine::{extractor::LlmGraphExtractor, GraphEngine};
use ingestion_pipeline::{IngestionDispatcher, StagedFile, StagingLog};
use multimodal_engine::MultimodalEngine;
use vector_engine::VectorEngine;

use crate::resolver::resolve_provider;

/// Per-call ingestion knobs. `provider` only matters for a KB that has
/// no bound provider yet; afterwards the bound value wins.
#[derive(Debug, Default, Clone, Copy)]
pub struct IngestOptions {
    pub provider: Option<RagProvider>,
    pub allow_duplicates: bool,
}

struct EngineFactory {
    client: Arc<Client<async_openai::config::OpenAIConfig>>,
    embedding: Arc<EmbeddingProvider>,
    chat_model: String,
}

impl EngineFactory {
    fn build(&self, provider: RagProvider) -> Arc<dyn RagEngine> {
        let client = Arc::clone(&self.client);
        let embedding = Arc::clone(&self.embedding);
        match provider {
            RagProvider::Vector => {
                Arc::new(VectorEngine::new(client, embedding, self.chat_model.clone()))
            }
            RagProvider::Graph => {
                let extractor = Arc::new(LlmGraphExtractor::new(
                    Arc::clone(&client),
                    self.chat_model.clone(),
                ));
                Arc::new(GraphEngine::new(
                    client,
                    embedding,
                    extractor,
                    self.chat_model.clone(),
                ))
            }
            RagProvider::MultimodalMineru => {
                Arc::new(MultimodalEngine::mineru(client, embedding, self.chat_model.clone()))
            }
            RagProvider::MultimodalDocling => {
                Arc::new(MultimodalEngine::docling(client, embedding, self.chat_model.clone()))
            }
        }
    }
}

pub struct RagService {
    base_dir: PathBuf,
    default_provider: RagProvider,
    factory: Option<EngineFactory>,
    engines: Mutex<HashMap<RagProvider, Arc<dyn RagEngine>>>,
}

impl RagService {
    pub fn new(config: &AppConfig) -> Result<Self, AppError> {
        let client = Arc::new(Client::with_config(
            async_openai::config::OpenAIConfig::new()
                .with_api_key(config.openai_api_key.clone())
                .with_api_base(config.openai_base_url.clone()),
        ));
        let embedding = Arc::new(EmbeddingProvider::from_config(config, Arc::clone(&client))?);

        Ok(Self {
            base_dir: PathBuf::from(&config.kb_base_dir),
            default_provider: config.rag_provider,
            factory: Some(EngineFactory {
                client,
                embedding,
                chat_model: config.chat_model.clone(),
            }),
            engines: Mutex::new(HashMap::new()),
        })
    }

    /// Builds a service around pre-constructed engines. Providers not in
    /// `engines` are unavailable.
    pub fn with_engines(
        base_dir: impl Into<PathBuf>,
        default_provider: RagProvider,
        engines: Vec<Arc<dyn RagEngine>>,
    ) -> Self {
        let registry = engines
            .into_iter()
            .map(|engine| (engine.provider(), engine))
            .collect();
        Self {
            base_dir: base_dir.into(),
            default_provider,
            factory: None,
            engines: Mutex::new(registry),
        }
    }

    pub fn layout(&self, kb_name: &str) -> KnowledgeBaseLayout {
        KnowledgeBaseLayout::new(&self.base_dir, kb_name)
    }

    pub fn list_providers(&self) -> Vec<RagProvider> {
        RagProvider::ALL
            .into_iter()
            .filter(|p| self.has_provider(*p))
            .collect()
    }

    pub fn has_provider(&self, provider: RagProvider) -> bool {
        self.factory.is_some()
            || self
                .engines
                .lock()
                .is_ok_and(|registry| registry.contains_key(&provider))
    }

    fn engine_for(&self, provider: RagProvider) -> Result<Arc<dyn RagEngine>, AppError> {
        let mut registry = self
            .engines
            .lock()
            .map_err(|_| AppError::InternalError("engine registry poisoned".into()))?;
        if let Some(engine) = registry.get(&provider) {
            return Ok(Arc::clone(engine));
        }
        let Some(factory) = &self.factory else {
            return Err(AppError::InternalError(format!(
                "no engine registered for provider '{provider}'"
            )));
        };
        let engine = factory.build(provider);
        registry.insert(provider, Arc::clone(&engine));
        Ok(engine)
    }

    /// Creates the KB if needed and incrementally ingests `files` into
    /// it. Returns `true` when at least one file was processed, or when
    /// there was nothing left to do (all candidates already indexed).
    #[tracing::instrument(skip_all, fields(kb = kb_name, candidates = files.len()))]
    pub async fn initialize(
        &self,
        kb_name: &str,
        files: &[PathBuf],
        options: IngestOptions,
    ) -> Result<bool, AppError> {
        let layout = self.layout(kb_name);
        layout.ensure_working_dirs().await?;

        let requested = options.provider.unwrap_or(self.default_provider);
        let provider = resolve_provider(&layout, requested).await?;
        if let Some(explicit) = options.provider {
            if explicit != provider {
                warn!(
                    requested = %explicit,
                    bound = %provider,
                    "requested provider conflicts with the KB's bound provider; using bound"
                );
            }
        }
        let engine = self.engine_for(provider)?;

        let staged = StagingLog::new(&layout)
            .stage(files, options.allow_duplicates)
            .await?;
        if staged.is_empty() {
            info!("no new content to process");
            return Ok(true);
        }

        let processed = IngestionDispatcher::new(engine)
            .process(&layout, &staged)
            .await?;
        if processed.is_empty() {
            return Ok(false);
        }

        let metadata = MetadataStore::new(&layout);
        metadata.record_provider(provider).await?;
        metadata
            .record_update("incremental_add", processed.len(), provider)
            .await?;
        info!(
            processed = processed.len(),
            staged = staged.len(),
            provider = %provider,
            "ingestion complete"
        );
        Ok(true)
    }

    /// Re-dispatches files already present in `raw/` whose content was
    /// never canonized. This is the recovery path after an interrupted
    /// or partially failed run; the caller does not need to re-supply
    /// the original source paths.
    #[tracing::instrument(skip_all, fields(kb = kb_name))]
    pub async fn refresh(&self, kb_name: &str) -> Result<bool, AppError> {
        let layout = self.layout(kb_name);
        let provider = resolve_provider(&layout, self.default_provider).await?;
        let engine = self.engine_for(provider)?;

        let metadata = MetadataStore::new(&layout);
        let recorded = metadata.read().await;

        let mut entries = match tokio::fs::read_dir(layout.raw_dir()).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("raw directory absent; nothing to refresh");
                return Ok(false);
            }
            Err(e) => return Err(e.into()),
        };
        let mut pending = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let path = entry.path();
            let content_hash = sha256_file(&path).await?;
            if recorded.contains_hash(&content_hash) {
                continue;
            }
            pending.push(StagedFile {
                source_path: path.clone(),
                dest_path: path,
                content_hash,
            });
        }
        pending.sort_by(|a, b| a.dest_path.cmp(&b.dest_path));

        if pending.is_empty() {
            info!("every raw file is already indexed");
            return Ok(true);
        }

        let processed = IngestionDispatcher::new(engine)
            .process(&layout, &pending)
            .await?;
        if processed.is_empty() {
            return Ok(false);
        }

        metadata.record_provider(provider).await?;
        metadata
            .record_update("refresh", processed.len(), provider)
            .await?;
        info!(
            processed = processed.len(),
            pending = pending.len(),
            provider = %provider,
            "refresh complete"
        );
        Ok(true)
    }

    /// Queries an existing KB with its own bound provider.
    #[tracing::instrument(skip_all, fields(kb = kb_name, mode = %mode))]
    pub async fn search(
        &self,
        kb_name: &str,
        query: &str,
        mode: SearchMode,
    ) -> Result<SearchResponse, AppError> {
        let layout = self.layout(kb_name);
        let provider = resolve_provider(&layout, self.default_provider).await?;
        let engine = self.engine_for(provider)?;

        match engine.search(&layout, query, mode).await {
            Ok(response) => Ok(response),
            Err(AppError::NotIndexed(name, _)) => {
                // Tell the caller whether ingestion is pending or was
                // never attempted.
                let detail = if KnowledgeBaseLayout::dir_has_content(&layout.raw_dir()) {
                    "documents are staged but not indexed; run a refresh".to_string()
                } else {
                    "no documents have been uploaded".to_string()
                };
                Err(AppError::NotIndexed(name, detail))
            }
            Err(e) => Err(e),
        }
    }

    /// Removes a KB entirely: the provider store first (best effort),
    /// then the whole KB directory tree.
    #[tracing::instrument(skip_all, fields(kb = kb_name))]
    pub async fn delete(&self, kb_name: &str) -> Result<bool, AppError> {
        let layout = self.layout(kb_name);
        if !layout.exists() {
            return Ok(false);
        }

        match resolve_provider(&layout, self.default_provider).await {
            Ok(provider) => match self.engine_for(provider) {
                Ok(engine) => {
                    if let Err(e) = engine.delete(&layout).await {
                        warn!(error = %e, "provider store deletion failed; removing tree anyway");
                    }
                }
                Err(e) => warn!(error = %e, "no engine for bound provider; removing tree anyway"),
            },
            Err(e) => warn!(error = %e, "provider resolution failed; removing tree anyway"),
        }

        tokio::fs::remove_dir_all(layout.kb_dir()).await?;
        info!("knowledge base removed");
        Ok(true)
    }
}
