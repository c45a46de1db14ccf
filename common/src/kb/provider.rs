use std::fmt;
use std::str::FromStr;

use anyhow::anyhow;
use serde::{Deserialize, Serialize};

/// Closed set of RAG provider engines. A knowledge base is bound to
/// exactly one provider at creation and keeps it for its whole life;
/// mixing index formats inside one knowledge base is never allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RagProvider {
    /// Pure vector retrieval: chunk, embed, cosine search.
    Vector,
    /// Knowledge-graph retrieval over LLM-extracted entities, text only.
    Graph,
    /// Multimodal retrieval with the MinerU document parser.
    MultimodalMineru,
    /// Multimodal retrieval with the Docling document parser.
    MultimodalDocling,
}

impl Default for RagProvider {
    fn default() -> Self {
        Self::Vector
    }
}

impl RagProvider {
    pub const ALL: [RagProvider; 4] = [
        RagProvider::Vector,
        RagProvider::Graph,
        RagProvider::MultimodalMineru,
        RagProvider::MultimodalDocling,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Vector => "vector",
            Self::Graph => "graph",
            Self::MultimodalMineru => "multimodal_mineru",
            Self::MultimodalDocling => "multimodal_docling",
        }
    }

    /// Name of the provider-specific storage directory inside the KB.
    /// Both multimodal parser variants share one store; they differ only
    /// in which parser produced the inserted content.
    pub fn storage_dir_name(self) -> &'static str {
        match self {
            Self::Vector => "vector_storage",
            Self::Graph => "graph_storage",
            Self::MultimodalMineru | Self::MultimodalDocling => "multimodal_storage",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::Vector => "Pure vector retrieval (chunk + embed + cosine search)",
            Self::Graph => "Knowledge graph built from LLM entity extraction (text only)",
            Self::MultimodalMineru => "Multimodal parsing via MinerU (text, tables, images)",
            Self::MultimodalDocling => "Multimodal parsing via Docling (text, tables, images)",
        }
    }
}

impl fmt::Display for RagProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RagProvider {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "vector" => Ok(Self::Vector),
            "graph" => Ok(Self::Graph),
            "multimodal_mineru" | "multimodal-mineru" => Ok(Self::MultimodalMineru),
            "multimodal_docling" | "multimodal-docling" => Ok(Self::MultimodalDocling),
            other => Err(anyhow!(
                "unknown RAG provider '{other}'. Expected one of: vector, graph, multimodal_mineru, multimodal_docling."
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_round_trip() {
        for provider in RagProvider::ALL {
            let parsed: RagProvider = provider.as_str().parse().expect("round trip");
            assert_eq!(parsed, provider);
        }
    }

    #[test]
    fn serde_uses_snake_case_strings() {
        let json = serde_json::to_string(&RagProvider::MultimodalMineru).expect("serialize");
        assert_eq!(json, "\"multimodal_mineru\"");
        let back: RagProvider = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, RagProvider::MultimodalMineru);
    }

    #[test]
    fn multimodal_variants_share_storage_dir() {
        assert_eq!(
            RagProvider::MultimodalMineru.storage_dir_name(),
            RagProvider::MultimodalDocling.storage_dir_name()
        );
        assert_ne!(
            RagProvider::Vector.storage_dir_name(),
            RagProvider::Graph.storage_dir_name()
        );
    }

    #[test]
    fn unknown_provider_is_rejected() {
        assert!("llamaindex".parse::<RagProvider>().is_err());
    }
}
