#![allow(clippy::missing_docs_in_private_items)]

//! Multimodal provider engine: rich documents go through an external
//! heavy parser (MinerU or Docling) that extracts text, tables and
//! images; extracted blocks are embedded and appended to a JSON block
//! store inside `multimodal_storage/`, with images migrated into the
//! KB's canonical `images/` directory before insertion. After each
//! batch, newly parsed documents get a numbered-items extraction pass.

pub mod image_migration;
pub mod numbered_items;
pub mod parser;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_openai::Client;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use common::{
    error::AppError,
    kb::{
        engine::{FileKind, RagEngine, SearchMode, SearchResponse},
        layout::KnowledgeBaseLayout,
        provider::RagProvider,
    },
    utils::{
        embedding::EmbeddingProvider,
        json_store::{read_json_or_default, write_json_atomic},
        llm::generate_answer,
        scoring::{cosine_similarity, top_k_indices},
    },
};
use ingestion_pipeline::routing::read_text_file;

use crate::image_migration::{cleanup_parser_output_dirs, migrate_images_and_update_paths};
use crate::numbered_items::{
    extract_for_new_documents, LlmNumberedItemExtractor, NumberedItemExtractor,
};
use crate::parser::{ContentBlock, DoclingParser, DocumentParser, MineruParser};

const STORE_FILE: &str = "store.json";
const SEARCH_TOP_K: usize = 8;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct BlockRecord {
    id: String,
    source: String,
    block_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    img_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    page_idx: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    embedding: Option<Vec<f32>>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct BlockStore {
    blocks: Vec<BlockRecord>,
}

pub struct MultimodalEngine {
    provider: RagProvider,
    parser: Arc<dyn DocumentParser>,
    items: Arc<dyn NumberedItemExtractor>,
    client: Arc<Client<async_openai::config::OpenAIConfig>>,
    embedding: Arc<EmbeddingProvider>,
    chat_model: String,
}

impl MultimodalEngine {
    pub fn mineru(
        client: Arc<Client<async_openai::config::OpenAIConfig>>,
        embedding: Arc<EmbeddingProvider>,
        chat_model: impl Into<String>,
    ) -> Self {
        let chat_model = chat_model.into();
        let items = Arc::new(LlmNumberedItemExtractor::new(
            Arc::clone(&client),
            chat_model.clone(),
        ));
        Self::with_components(
            RagProvider::MultimodalMineru,
            Arc::new(MineruParser),
            items,
            client,
            embedding,
            chat_model,
        )
    }

    pub fn docling(
        client: Arc<Client<async_openai::config::OpenAIConfig>>,
        embedding: Arc<EmbeddingProvider>,
        chat_model: impl Into<String>,
    ) -> Self {
        let chat_model = chat_model.into();
        let items = Arc::new(LlmNumberedItemExtractor::new(
            Arc::clone(&client),
            chat_model.clone(),
        ));
        Self::with_components(
            RagProvider::MultimodalDocling,
            Arc::new(DoclingParser),
            items,
            client,
            embedding,
            chat_model,
        )
    }

    pub fn with_components(
        provider: RagProvider,
        parser: Arc<dyn DocumentParser>,
        items: Arc<dyn NumberedItemExtractor>,
        client: Arc<Client<async_openai::config::OpenAIConfig>>,
        embedding: Arc<EmbeddingProvider>,
        chat_model: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            parser,
            items,
            client,
            embedding,
            chat_model: chat_model.into(),
        }
    }

    fn store_path(&self, layout: &KnowledgeBaseLayout) -> PathBuf {
        layout.storage_dir(self.provider).join(STORE_FILE)
    }

    async fn load_store(&self, layout: &KnowledgeBaseLayout) -> Result<BlockStore, AppError> {
        read_json_or_default(&self.store_path(layout)).await
    }

    async fn persist_store(
        &self,
        layout: &KnowledgeBaseLayout,
        store: &BlockStore,
    ) -> Result<(), AppError> {
        write_json_atomic(&self.store_path(layout), store).await
    }

    /// Runs the heavy parser, migrates extracted images into the KB's
    /// `images/` directory and keeps a canonical copy of the content
    /// list under `content_list/<stem>.json`.
    async fn parse_rich_document(
        &self,
        layout: &KnowledgeBaseLayout,
        file: &Path,
    ) -> Result<Vec<ContentBlock>, AppError> {
        let output_dir = layout.content_list_dir();
        tokio::fs::create_dir_all(&output_dir).await?;

        let mut blocks = self.parser.parse(file, &output_dir).await?;
        migrate_images_and_update_paths(&mut blocks, &output_dir, &layout.images_dir()).await?;

        let stem = file
            .file_stem()
            .map(|stem| stem.to_string_lossy().into_owned())
            .ok_or_else(|| {
                AppError::Validation(format!("document has no file stem: {}", file.display()))
            })?;
        write_json_atomic(&output_dir.join(format!("{stem}.json")), &blocks).await?;

        Ok(blocks)
    }

    async fn insert_blocks(
        &self,
        layout: &KnowledgeBaseLayout,
        source: &str,
        blocks: Vec<ContentBlock>,
    ) -> Result<usize, AppError> {
        let texts: Vec<String> = blocks
            .iter()
            .filter_map(|block| block.text.clone())
            .filter(|text| !text.trim().is_empty())
            .collect();
        let mut embeddings = self.embedding.embed_batch(texts).await?.into_iter();

        let mut store = self.load_store(layout).await?;
        let mut inserted = 0usize;
        for block in blocks {
            let embedding = match &block.text {
                Some(text) if !text.trim().is_empty() => embeddings.next(),
                _ => None,
            };
            store.blocks.push(BlockRecord {
                id: Uuid::new_v4().to_string(),
                source: source.to_string(),
                block_type: block.block_type,
                text: block.text,
                img_path: block.img_path,
                page_idx: block.page_idx,
                embedding,
            });
            inserted = inserted.saturating_add(1);
        }
        self.persist_store(layout, &store).await?;
        Ok(inserted)
    }
}

#[async_trait]
impl RagEngine for MultimodalEngine {
    fn provider(&self) -> RagProvider {
        self.provider
    }

    async fn ingest_file(
        &self,
        layout: &KnowledgeBaseLayout,
        file: &Path,
        kind: FileKind,
    ) -> Result<(), AppError> {
        let source = file
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        let blocks = match kind {
            FileKind::RichDocument => self.parse_rich_document(layout, file).await?,
            FileKind::PlainText => {
                let text = read_text_file(file).await?;
                if text.trim().is_empty() {
                    return Err(AppError::Processing(format!(
                        "no text content in {}",
                        file.display()
                    )));
                }
                vec![ContentBlock::text_block(text)]
            }
        };
        if blocks.is_empty() {
            return Err(AppError::Processing(format!(
                "parser produced no content for {}",
                file.display()
            )));
        }

        let inserted = self.insert_blocks(layout, &source, blocks).await?;
        info!(
            file = %file.display(),
            blocks = inserted,
            parser = self.parser.name(),
            "inserted document into multimodal store"
        );
        Ok(())
    }

    async fn search(
        &self,
        layout: &KnowledgeBaseLayout,
        query: &str,
        mode: SearchMode,
    ) -> Result<SearchResponse, AppError> {
        let store = self.load_store(layout).await?;
        if store.blocks.is_empty() {
            return Err(AppError::NotIndexed(
                layout.name().to_string(),
                "multimodal store contains no blocks".into(),
            ));
        }

        let query_embedding = self.embedding.embed(query).await?;
        let embedded: Vec<&BlockRecord> = store
            .blocks
            .iter()
            .filter(|block| block.embedding.is_some())
            .collect();
        let scores: Vec<f32> = embedded
            .iter()
            .map(|block| {
                block
                    .embedding
                    .as_deref()
                    .map(|e| cosine_similarity(&query_embedding, e))
                    .unwrap_or(0.0)
            })
            .collect();

        let ranked: Vec<&BlockRecord> = top_k_indices(&scores, SEARCH_TOP_K)
            .into_iter()
            .filter_map(|idx| embedded.get(idx).copied())
            .collect();
        debug!(candidates = embedded.len(), returned = ranked.len(), "ranked blocks");

        let content = ranked
            .iter()
            .filter_map(|block| block.text.as_deref())
            .collect::<Vec<_>>()
            .join("\n\n");

        let answer = if mode == SearchMode::Naive {
            content.clone()
        } else {
            let context = serde_json::json!(ranked
                .iter()
                .map(|block| serde_json::json!({
                    "source": block.source,
                    "type": block.block_type,
                    "page": block.page_idx,
                    "content": block.text,
                }))
                .collect::<Vec<_>>());
            generate_answer(&self.client, &self.chat_model, &context, query).await?
        };

        Ok(SearchResponse {
            query: query.to_string(),
            answer,
            content,
            mode,
            provider: self.provider,
        })
    }

    async fn delete(&self, layout: &KnowledgeBaseLayout) -> Result<bool, AppError> {
        let storage = layout.storage_dir(self.provider);
        if storage.is_dir() {
            tokio::fs::remove_dir_all(&storage).await?;
            info!(kb = layout.name(), "removed multimodal storage");
            return Ok(true);
        }
        Ok(false)
    }

    async fn finish_batch(&self, layout: &KnowledgeBaseLayout) -> Result<(), AppError> {
        extract_for_new_documents(self.items.as_ref(), layout).await?;
        cleanup_parser_output_dirs(&layout.content_list_dir()).await?;
        Ok(())
    }
}
