use std::fmt;
use std::path::Path;
use std::str::FromStr;

use anyhow::anyhow;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{error::AppError, kb::layout::KnowledgeBaseLayout, kb::provider::RagProvider};

/// Processing path a staged file needs, decided by classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    /// PDF/DOCX/image-bearing document that needs heavy parsing.
    RichDocument,
    /// Plain-text document that can be read directly.
    PlainText,
}

/// Retrieval mode requested by the caller, passed through to engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    Hybrid,
    Local,
    Global,
    Naive,
}

impl Default for SearchMode {
    fn default() -> Self {
        Self::Hybrid
    }
}

impl SearchMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hybrid => "hybrid",
            Self::Local => "local",
            Self::Global => "global",
            Self::Naive => "naive",
        }
    }
}

impl fmt::Display for SearchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SearchMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "hybrid" => Ok(Self::Hybrid),
            "local" => Ok(Self::Local),
            "global" => Ok(Self::Global),
            "naive" => Ok(Self::Naive),
            other => Err(anyhow!(
                "unknown search mode '{other}'. Expected hybrid, local, global or naive."
            )),
        }
    }
}

/// Normalized result shape all engines return from `search`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub query: String,
    pub answer: String,
    pub content: String,
    pub mode: SearchMode,
    pub provider: RagProvider,
}

/// Narrow interface every provider engine implements. The engine owns
/// everything behind its storage directory (index format, embedding
/// calls, answer generation); the core only routes files and records
/// provenance once an insert is durably persisted.
#[async_trait]
pub trait RagEngine: Send + Sync {
    fn provider(&self) -> RagProvider;

    /// Ingests a single staged file. Must only return `Ok` once the
    /// insert is durably persisted in the provider store, because the
    /// dispatcher records the file's hash right after.
    async fn ingest_file(
        &self,
        layout: &KnowledgeBaseLayout,
        file: &Path,
        kind: FileKind,
    ) -> Result<(), AppError>;

    async fn search(
        &self,
        layout: &KnowledgeBaseLayout,
        query: &str,
        mode: SearchMode,
    ) -> Result<SearchResponse, AppError>;

    async fn delete(&self, layout: &KnowledgeBaseLayout) -> Result<bool, AppError>;

    /// Post-batch hook. Multimodal engines clean up temporary parser
    /// output directories here; other engines have nothing to do.
    async fn finish_batch(&self, _layout: &KnowledgeBaseLayout) -> Result<(), AppError> {
        Ok(())
    }
}
