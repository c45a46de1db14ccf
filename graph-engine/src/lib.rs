#![allow(clippy::missing_docs_in_private_items)]

//! Knowledge-graph provider engine. Documents are reduced to text
//! (native read for plain text, best-effort text layer for PDFs, no
//! OCR), handed to an LLM extractor that produces entities and
//! relationships, and stored in a JSON graph under `graph_storage/`.

pub mod extractor;

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
use ingestion_pipeline::extraction::extract_text;

use crate::extractor::GraphExtractor;

const SEARCH_TOP_K: usize = 10;
const GRAPH_FILE: &str = "graph.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct EntityNode {
    id: String,
    name: String,
    entity_type: String,
    description: String,
    source: String,
    embedding: Vec<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RelationshipEdge {
    from: String,
    to: String,
    relation: String,
    source: String,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct GraphStore {
    entities: Vec<EntityNode>,
    relationships: Vec<RelationshipEdge>,
}

pub struct GraphEngine {
    client: Arc<Client<async_openai::config::OpenAIConfig>>,
    embedding: Arc<EmbeddingProvider>,
    extractor: Arc<dyn GraphExtractor>,
    chat_model: String,
}

impl GraphEngine {
    pub fn new(
        client: Arc<Client<async_openai::config::OpenAIConfig>>,
        embedding: Arc<EmbeddingProvider>,
        extractor: Arc<dyn GraphExtractor>,
        chat_model: impl Into<String>,
    ) -> Self {
        Self {
            client,
            embedding,
            extractor,
            chat_model: chat_model.into(),
        }
    }

    fn graph_path(layout: &KnowledgeBaseLayout) -> PathBuf {
        layout.storage_dir(RagProvider::Graph).join(GRAPH_FILE)
    }

    async fn load_graph(layout: &KnowledgeBaseLayout) -> Result<GraphStore, AppError> {
        read_json_or_default(&Self::graph_path(layout)).await
    }

    async fn persist_graph(
        layout: &KnowledgeBaseLayout,
        graph: &GraphStore,
    ) -> Result<(), AppError> {
        write_json_atomic(&Self::graph_path(layout), graph).await
    }

    /// Neighbor edges of the given entity names, for search context.
    fn edges_touching<'a>(
        graph: &'a GraphStore,
        names: &[&str],
    ) -> Vec<&'a RelationshipEdge> {
        graph
            .relationships
            .iter()
            .filter(|edge| {
                names.iter().any(|name| {
                    edge.from.eq_ignore_ascii_case(name) || edge.to.eq_ignore_ascii_case(name)
                })
            })
            .collect()
    }
}

#[async_trait]
impl RagEngine for GraphEngine {
    fn provider(&self) -> RagProvider {
        RagProvider::Graph
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
        let extracted = self.extractor.extract(&text).await?;
        debug!(
            entities = extracted.entities.len(),
            relationships = extracted.relationships.len(),
            "extracted graph from document"
        );

        let descriptions: Vec<String> = extracted
            .entities
            .iter()
            .map(|entity| format!("{}: {}", entity.name, entity.description))
            .collect();
        let embeddings = self.embedding.embed_batch(descriptions).await?;

        let mut graph = Self::load_graph(layout).await?;
        for (entity, embedding) in extracted.entities.into_iter().zip(embeddings) {
            graph.entities.push(EntityNode {
                id: Uuid::new_v4().to_string(),
                name: entity.name,
                entity_type: entity.entity_type,
                description: entity.description,
                source: source.clone(),
                embedding,
            });
        }
        for relationship in extracted.relationships {
            graph.relationships.push(RelationshipEdge {
                from: relationship.from,
                to: relationship.to,
                relation: relationship.relation,
                source: source.clone(),
            });
        }
        Self::persist_graph(layout, &graph).await?;

        info!(
            file = %file.display(),
            total_entities = graph.entities.len(),
            "inserted document into knowledge graph"
        );
        Ok(())
    }

    async fn search(
        &self,
        layout: &KnowledgeBaseLayout,
        query: &str,
        mode: SearchMode,
    ) -> Result<SearchResponse, AppError> {
        let graph = Self::load_graph(layout).await?;
        if graph.entities.is_empty() {
            return Err(AppError::NotIndexed(
                layout.name().to_string(),
                "knowledge graph contains no entities".into(),
            ));
        }

        let query_embedding = self.embedding.embed(query).await?;
        let scores: Vec<f32> = graph
            .entities
            .iter()
            .map(|entity| cosine_similarity(&query_embedding, &entity.embedding))
            .collect();

        let ranked: Vec<&EntityNode> = top_k_indices(&scores, SEARCH_TOP_K)
            .into_iter()
            .filter_map(|idx| graph.entities.get(idx))
            .collect();
        let names: Vec<&str> = ranked.iter().map(|entity| entity.name.as_str()).collect();
        let edges = Self::edges_touching(&graph, &names);

        let content = ranked
            .iter()
            .map(|entity| format!("{} ({}): {}", entity.name, entity.entity_type, entity.description))
            .collect::<Vec<_>>()
            .join("\n");

        let answer = if mode == SearchMode::Naive {
            content.clone()
        } else {
            let context = serde_json::json!({
                "entities": ranked
                    .iter()
                    .map(|entity| serde_json::json!({
                        "name": entity.name,
                        "type": entity.entity_type,
                        "description": entity.description,
                        "source": entity.source,
                    }))
                    .collect::<Vec<_>>(),
                "relationships": edges
                    .iter()
                    .map(|edge| serde_json::json!({
                        "from": edge.from,
                        "to": edge.to,
                        "relation": edge.relation,
                    }))
                    .collect::<Vec<_>>(),
            });
            generate_answer(&self.client, &self.chat_model, &context, query).await?
        };

        Ok(SearchResponse {
            query: query.to_string(),
            answer,
            content,
            mode,
            provider: RagProvider::Graph,
        })
    }

    async fn delete(&self, layout: &KnowledgeBaseLayout) -> Result<bool, AppError> {
        let storage = layout.storage_dir(RagProvider::Graph);
        if storage.is_dir() {
            tokio::fs::remove_dir_all(&storage).await?;
            info!(kb = layout.name(), "removed graph storage");
            return Ok(true);
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extractor::{ExtractedEntity, ExtractedGraph, ExtractedRelationship};

    struct StubExtractor;

    #[async_trait]
    impl GraphExtractor for StubExtractor {
        async fn extract(&self, text: &str) -> Result<ExtractedGraph, AppError> {
            // One entity per line: "Name - description".
            let entities = text
                .lines()
                .filter_map(|line| {
                    let (name, description) = line.split_once(" - ")?;
                    Some(ExtractedEntity {
                        name: name.trim().to_string(),
                        entity_type: "concept".to_string(),
                        description: description.trim().to_string(),
                    })
                })
                .collect::<Vec<_>>();
            let relationships = if entities.len() >= 2 {
                vec![ExtractedRelationship {
                    from: entities[0].name.clone(),
                    to: entities[1].name.clone(),
                    relation: "related_to".to_string(),
                }]
            } else {
                Vec::new()
            };
            Ok(ExtractedGraph {
                entities,
                relationships,
            })
        }
    }

    fn test_engine() -> GraphEngine {
        let client = Arc::new(Client::with_config(
            async_openai::config::OpenAIConfig::new().with_api_key("test-key"),
        ));
        GraphEngine::new(
            client,
            Arc::new(EmbeddingProvider::new_hashed(64)),
            Arc::new(StubExtractor),
            "gpt-4o-mini",
        )
    }

    async fn test_layout(base: &Path) -> KnowledgeBaseLayout {
        let layout = KnowledgeBaseLayout::new(base, "demo");
        layout.ensure_working_dirs().await.expect("dirs");
        layout
    }

    #[tokio::test]
    async fn ingest_builds_entities_and_edges() {
        let base = tempfile::tempdir().expect("tempdir");
        let layout = test_layout(base.path()).await;
        let engine = test_engine();

        let doc = layout.raw_dir().join("physics.md");
        std::fs::write(
            &doc,
            "Gravity - attractive force between masses\nMass - amount of matter in a body",
        )
        .expect("write");
        engine
            .ingest_file(&layout, &doc, FileKind::PlainText)
            .await
            .expect("ingest");

        let graph = GraphEngine::load_graph(&layout).await.expect("load");
        assert_eq!(graph.entities.len(), 2);
        assert_eq!(graph.relationships.len(), 1);
        assert_eq!(graph.entities[0].source, "physics.md");
        assert_eq!(graph.entities[0].embedding.len(), 64);
    }

    #[tokio::test]
    async fn naive_search_surfaces_the_matching_entity() {
        let base = tempfile::tempdir().expect("tempdir");
        let layout = test_layout(base.path()).await;
        let engine = test_engine();

        let doc = layout.raw_dir().join("physics.md");
        std::fs::write(
            &doc,
            "Gravity - attractive force between masses\nEntropy - measure of disorder",
        )
        .expect("write");
        engine
            .ingest_file(&layout, &doc, FileKind::PlainText)
            .await
            .expect("ingest");

        let response = engine
            .search(&layout, "gravity force masses", SearchMode::Naive)
            .await
            .expect("search");
        assert!(response.content.starts_with("Gravity"));
        assert_eq!(response.provider, RagProvider::Graph);
    }

    #[tokio::test]
    async fn search_without_entities_reports_not_indexed() {
        let base = tempfile::tempdir().expect("tempdir");
        let layout = test_layout(base.path()).await;
        let engine = test_engine();

        let result = engine.search(&layout, "anything", SearchMode::Naive).await;
        assert!(matches!(result, Err(AppError::NotIndexed(_, _))));
    }

    #[tokio::test]
    async fn delete_removes_graph_storage() {
        let base = tempfile::tempdir().expect("tempdir");
        let layout = test_layout(base.path()).await;
        let engine = test_engine();

        let doc = layout.raw_dir().join("a.md");
        std::fs::write(&doc, "Topic - description").expect("write");
        engine
            .ingest_file(&layout, &doc, FileKind::PlainText)
            .await
            .expect("ingest");

        assert!(engine.delete(&layout).await.expect("delete"));
        assert!(!layout.storage_dir(RagProvider::Graph).exists());
    }

    #[test]
    fn edges_touching_matches_either_endpoint() {
        let graph = GraphStore {
            entities: Vec::new(),
            relationships: vec![
                RelationshipEdge {
                    from: "Gravity".into(),
                    to: "Mass".into(),
                    relation: "acts_on".into(),
                    source: "a.md".into(),
                },
                RelationshipEdge {
                    from: "Entropy".into(),
                    to: "Heat".into(),
                    relation: "increases_with".into(),
                    source: "a.md".into(),
                },
            ],
        };
        let edges = GraphEngine::edges_touching(&graph, &["mass"]);
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].relation, "acts_on");
    }
}
