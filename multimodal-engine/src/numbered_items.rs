//! Post-ingestion pass over parsed documents that pulls explicitly
//! numbered material (exercises, theorems, definitions, worked
//! examples) into a per-KB `numbered_items.json`, so a tutor can cite
//! "exercise 3.2" without a retrieval round-trip.
//!
//! Runs after a batch from the parser cleanup hook, over the canonical
//! `content_list/<stem>.json` copies. The output file is merged
//! incrementally: a document already represented there is never
//! re-extracted.

use std::collections::BTreeMap;
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
use tracing::{info, warn};

use common::{
    error::AppError,
    kb::layout::KnowledgeBaseLayout,
    utils::json_store::{read_json_or_default, write_json_atomic},
};

use crate::parser::ContentBlock;

/// Text blocks sent to the model per request.
pub const EXTRACTION_BATCH_SIZE: usize = 20;

const EXTRACTION_SYSTEM_MESSAGE: &str = "You extract explicitly numbered items from study \
material: exercises, problems, theorems, definitions, worked examples and similar. Report \
each item's visible label exactly as printed (for example '3.2' or 'Problem 7') and its \
full text. Ignore prose that carries no number.";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NumberedItem {
    pub label: String,
    pub text: String,
}

/// On-disk shape of `numbered_items.json`, keyed by document stem.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct NumberedItemsFile {
    pub documents: BTreeMap<String, Vec<NumberedItem>>,
}

/// Seam for the item extraction so the pass can run without a live
/// chat model.
#[async_trait]
pub trait NumberedItemExtractor: Send + Sync {
    async fn extract(&self, texts: &[String]) -> Result<Vec<NumberedItem>, AppError>;
}

pub struct LlmNumberedItemExtractor {
    client: Arc<Client<async_openai::config::OpenAIConfig>>,
    model: String,
}

impl LlmNumberedItemExtractor {
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
            "items": {
                "type": "array",
                "items": {
                    "type": "object",
                    "properties": {
                        "label": { "type": "string" },
                        "text": { "type": "string" }
                    },
                    "required": ["label", "text"],
                    "additionalProperties": false
                }
            }
        },
        "required": ["items"],
        "additionalProperties": false
    })
}

#[derive(Debug, Deserialize)]
struct ExtractionPayload {
    items: Vec<NumberedItem>,
}

#[async_trait]
impl NumberedItemExtractor for LlmNumberedItemExtractor {
    async fn extract(&self, texts: &[String]) -> Result<Vec<NumberedItem>, AppError> {
        let response_format = ResponseFormat::JsonSchema {
            json_schema: ResponseFormatJsonSchema {
                description: Some("Numbered items found in the passages".into()),
                name: "numbered_item_extraction".into(),
                schema: Some(extraction_schema()),
                strict: Some(true),
            },
        };

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages([
                ChatCompletionRequestSystemMessage::from(EXTRACTION_SYSTEM_MESSAGE).into(),
                ChatCompletionRequestUserMessage::from(format!(
                    "Passages:\n{}",
                    texts.join("\n---\n")
                ))
                .into(),
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

        serde_json::from_str::<ExtractionPayload>(content)
            .map(|payload| payload.items)
            .map_err(|e| {
                AppError::LLMParsing(format!("Failed to parse LLM response into items: {e}"))
            })
    }
}

/// Extracts numbered items for every document under `content_list/`
/// that is not yet represented in `numbered_items.json`, merging the
/// results in atomically. One document's failure never blocks the
/// others; its entry stays absent and the next batch retries it.
/// Returns the number of documents processed.
pub async fn extract_for_new_documents(
    extractor: &dyn NumberedItemExtractor,
    layout: &KnowledgeBaseLayout,
) -> Result<usize, AppError> {
    let output_path = layout.numbered_items_path();
    let mut output: NumberedItemsFile = read_json_or_default(&output_path).await?;

    let mut entries = match tokio::fs::read_dir(layout.content_list_dir()).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e.into()),
    };

    let mut processed = 0usize;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let is_content_list =
            path.is_file() && path.extension().is_some_and(|ext| ext == "json");
        if !is_content_list {
            continue;
        }
        let Some(stem) = path.file_stem().map(|s| s.to_string_lossy().into_owned()) else {
            continue;
        };
        if output.documents.contains_key(&stem) {
            continue;
        }

        let blocks: Vec<ContentBlock> = match read_json_or_default(&path).await {
            Ok(blocks) => blocks,
            Err(e) => {
                warn!(doc = stem, error = %e, "unreadable content list; skipping");
                continue;
            }
        };
        let texts: Vec<String> = blocks
            .iter()
            .filter_map(|block| block.text.clone())
            .filter(|text| !text.trim().is_empty())
            .collect();

        let mut items = Vec::new();
        let mut failed = false;
        for batch in texts.chunks(EXTRACTION_BATCH_SIZE) {
            match extractor.extract(batch).await {
                Ok(batch_items) => items.extend(batch_items),
                Err(e) => {
                    warn!(doc = stem, error = %e, "numbered-item extraction failed");
                    failed = true;
                    break;
                }
            }
        }
        if failed {
            continue;
        }

        output.documents.insert(stem, items);
        processed = processed.saturating_add(1);
    }

    if processed > 0 {
        write_json_atomic(&output_path, &output).await?;
        info!(documents = processed, "extracted numbered items");
    }
    Ok(processed)
}
