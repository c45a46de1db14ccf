use std::sync::Arc;

use async_openai::{
    types::{
        ChatCompletionRequestSystemMessage, ChatCompletionRequestUserMessage,
        CreateChatCompletionRequestArgs, ResponseFormat, ResponseFormatJsonSchema,
    },
    Client,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use common::error::AppError;

const EXTRACTION_SYSTEM_MESSAGE: &str = "You extract a knowledge graph from study material. \
Identify the concepts, definitions, people and methods the text introduces, and the \
relationships between them. Descriptions must be self-contained so they can be retrieved \
without the original passage.";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedEntity {
    pub name: String,
    pub entity_type: String,
    pub description: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedRelationship {
    pub from: String,
    pub to: String,
    pub relation: String,
}

/// LLM output for one document: the entities it introduces plus the
/// relationships among them.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExtractedGraph {
    pub entities: Vec<ExtractedEntity>,
    pub relationships: Vec<ExtractedRelationship>,
}

/// Seam for graph construction so the engine can be exercised without a
/// live chat model.
#[async_trait]
pub trait GraphExtractor: Send + Sync {
    async fn extract(&self, text: &str) -> Result<ExtractedGraph, AppError>;
}

pub struct LlmGraphExtractor {
    client: Arc<Client<async_openai::config::OpenAIConfig>>,
    model: String,
}

impl LlmGraphExtractor {
    pub fn new(
        client: Arc<Client<async_openai::config::OpenAIConfig>>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            client,
            model: model.into(),
        }
    }
}

fn extraction_schema() -> Value {
    json!({
        "type": "object",
        "properties": {
            "entities": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "name": { "type": "string" },
                        "entity_type": { "type": "string" },
                        "description": { "type": "string" }
                    },
                    "required": ["name", "entity_type", "description"],
                    "additionalProperties": false
                }
            },
            "relationships": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "from": { "type": "string" },
                        "to": { "type": "string" },
                        "relation": { "type": "string" }
                    },
                    "required": ["from", "to", "relation"],
                    "additionalProperties": false
                }
            }
        },
        "required": ["entities", "relationships"],
        "additionalProperties": false
    })
}

#[async_trait]
impl GraphExtractor for LlmGraphExtractor {
    async fn extract(&self, text: &str) -> Result<ExtractedGraph, AppError> {
        let response_format = ResponseFormat::JsonSchema {
            json_schema: ResponseFormatJsonSchema {
                description: Some("Knowledge graph extracted from the document".into()),
                name: "graph_extraction".into(),
                schema: Some(extraction_schema()),
                strict: Some(true),
            },
        };

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages([
                ChatCompletionRequestSystemMessage::from(EXTRACTION_SYSTEM_MESSAGE).into(),
                ChatCompletionRequestUserMessage::from(format!("Document:\n{text}")).into(),
            ])
            .response_format(response_format)
            .build()?;

        let response = self.client.chat().create(request).await?;

        let content = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.as_ref())
            .ok_or(AppError::LLMParsing(
                "No content found in LLM response".into(),
            ))?;

        serde_json::from_str::<ExtractedGraph>(content).map_err(|e| {
            AppError::LLMParsing(format!("Failed to parse LLM response into graph: {e}"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_constrains_both_collections() {
        let schema = extraction_schema();
        assert_eq!(schema["required"], json!(["entities", "relationships"]));
        assert_eq!(
            schema["properties"]["entities"]["items"]["required"],
            json!(["name", "entity_type", "description"])
        );
    }

    #[test]
    fn extracted_graph_deserializes_from_llm_payload() {
        let payload = r#"{
            "entities": [
                {"name": "Gravity", "entity_type": "concept", "description": "Attractive force between masses."}
            ],
            "relationships": [
                {"from": "Gravity", "to": "Mass", "relation": "acts_on"}
            ]
        }"#;
        let graph: ExtractedGraph = serde_json::from_str(payload).expect("parse");
        assert_eq!(graph.entities.len(), 1);
        assert_eq!(graph.relationships[0].relation, "acts_on");
    }
}
