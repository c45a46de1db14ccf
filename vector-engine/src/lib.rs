#![allow(clippy::missing_docs_in_private_items)]

//! Pure-vector provider engine: staged documents are chunked, embedded
//! and appended to a JSON chunk index inside `vector_storage/`; search
//! embeds the query, cosine-ranks the chunks and synthesizes an answer
//! with the chat model.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_openai::Client;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use text_splitter::{ChunkCapacity, ChunkConfig, TextSplitter};
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
use ingestion_pipeline::extraction::extract_text;

const CHUNK_MIN_CHARS: usize = 800;
const CHUNK_MAX_CHARS: usize = 2_400;
const SEARCH_TOP_K: usize = 8;
const INDEX_FILE: &str = "index.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChunkRecord {
    id: String,
    source: String,
    text: String,
    embedding: Vec<f32>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct VectorIndex {
    chunks: Vec<ChunkRecord>,
}

pub struct VectorEngine {
    client: Arc<Client<async_openai::config::OpenAIConfig>>,
    embedding: Arc<EmbeddingProvider>,
    chat_model: String,
}

impl VectorEngine {
    pub fn new(
        client: Arc<Client<async_openai::config::OpenAIConfig>>,
        embedding: Arc<EmbeddingProvider>,
        chat_model: impl Into<String>,
    ) -> Self {
        Self {
            client,
            embedding,
            chat_model: chat_model.into(),
        }
    }

    fn index_path(layout: &KnowledgeBaseLayout) -> PathBuf {
        layout
            .storage_dir(RagProvider::Vector)
            .join(INDEX_FILE)
    }

    async fn load_index(layout: &KnowledgeBaseLayout) -> Result<VectorIndex, AppError> {
        read_json_or_default(&Self::index_path(layout)).await
    }

    async fn persist_index(
        layout: &KnowledgeBaseLayout,
        index: &VectorIndex,
    ) -> Result<(), AppError> {
        write_json_atomic(&Self::index_path(layout), index).await
    }
}

fn split_into_chunks(text: &str) -> Result<Vec<String>, AppError> {
    let capacity = ChunkCapacity::new(CHUNK_MIN_CHARS)
        .with_max(CHUNK_MAX_CHARS)
        .map_err(|e| AppError::Validation(format!("invalid chunk bounds: {e}")))?;
    let splitter = TextSplitter::new(ChunkConfig::new(capacity));
    Ok(splitter.chunks(text).map(str::to_owned).collect())
}

#[async_trait]
impl RagEngine for VectorEngine {
    fn provider(&self) -> RagProvider {
        RagProvider::Vector
    }

    async fn ingest_file(
        &self,
        layout: &KnowledgeBaseLayout,
        file: &Path,
        kind: FileKind,
    ) -> Result<(), AppError> {
        let text = extract_text(file, kind).await?;
        if text.trim().is_empty() {
            return Err(AppError::Processing(format!(
                "no text content in {}",
                file.display()
            )));
        }

        let source = file
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let chunks = split_into_chunks(&text)?;
        let embeddings = self.embedding.embed_batch(chunks.clone()).await?;

        let mut index = Self::load_index(layout).await?;
        for (text, embedding) in chunks.into_iter().zip(embeddings) {
            index.chunks.push(ChunkRecord {
                id: Uuid::new_v4().to_string(),
                source: source.clone(),
                text,
                embedding,
            });
        }
        let total = index.chunks.len();
        Self::persist_index(layout, &index).await?;

        info!(file = %file.display(), total_chunks = total, "inserted document into vector index");
        Ok(())
    }

    async fn search(
        &self,
        layout: &KnowledgeBaseLayout,
        query: &str,
        mode: SearchMode,
    ) -> Result<SearchResponse, AppError> {
        let index = Self::load_index(layout).await?;
        if index.chunks.is_empty() {
            return Err(AppError::NotIndexed(
                layout.name().to_string(),
                "vector index contains no chunks".into(),
            ));
        }

        let query_embedding = self.embedding.embed(query).await?;
        let scores: Vec<f32> = index
            .chunks
            .iter()
            .map(|chunk| cosine_similarity(&query_embedding, &chunk.embedding))
            .collect();

        let ranked: Vec<&ChunkRecord> = top_k_indices(&scores, SEARCH_TOP_K)
            .into_iter()
            .filter_map(|idx| index.chunks.get(idx))
            .collect();
        debug!(candidates = index.chunks.len(), returned = ranked.len(), "ranked chunks");

        let content = ranked
            .iter()
            .map(|chunk| chunk.text.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");

        let answer = if mode == SearchMode::Naive {
            // Naive mode returns retrieved content without answer synthesis.
            content.clone()
        } else {
            let context = serde_json::json!(ranked
                .iter()
                .map(|chunk| serde_json::json!({
                    "source": chunk.source,
                    "content": chunk.text,
                }))
                .collect::<Vec<_>>());
            generate_answer(&self.client, &self.chat_model, &context, query).await?
        };

        Ok(SearchResponse {
            query: query.to_string(),
            answer,
            content,
            mode,
            provider: RagProvider::Vector,
        })
    }

    async fn delete(&self, layout: &KnowledgeBaseLayout) -> Result<bool, AppError> {
        let storage = layout.storage_dir(RagProvider::Vector);
        if storage.is_dir() {
            tokio::fs::remove_dir_all(&storage).await?;
            info!(kb = layout.name(), "removed vector storage");
            return Ok(true);
        }
        Ok(false)
    }
}
