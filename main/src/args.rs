use std::path::PathBuf;

use clap::{Parser, Subcommand};

use common::kb::{engine::SearchMode, provider::RagProvider};

#[derive(Debug, Parser)]
#[command(name = "kb", about = "Manage and query RAG knowledge bases")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Ingest documents into a knowledge base, creating it if needed
    Ingest {
        /// Knowledge base name
        kb: String,

        /// Document files to ingest
        #[arg(long = "docs", num_args = 1..)]
        docs: Vec<PathBuf>,

        /// Directory whose files are ingested (non-recursive)
        #[arg(long = "docs-dir")]
        docs_dir: Option<PathBuf>,

        /// Provider for a new KB; an existing KB keeps its bound provider
        #[arg(long, value_parser = parse_provider)]
        provider: Option<RagProvider>,

        /// Re-ingest content that is already indexed
        #[arg(long, action = clap::ArgAction::SetTrue, default_value_t = false)]
        allow_duplicates: bool,
    },

    /// Re-index staged files that were never successfully processed
    Refresh {
        /// Knowledge base name
        kb: String,
    },

    /// Query a knowledge base
    Search {
        /// Knowledge base name
        kb: String,

        /// The question to answer
        query: String,

        /// Retrieval mode: hybrid, local, global or naive
        #[arg(long, value_parser = parse_mode, default_value = "hybrid")]
        mode: SearchMode,

        /// Also print the retrieved source content
        #[arg(long, action = clap::ArgAction::SetTrue, default_value_t = false)]
        show_content: bool,
    },

    /// Delete a knowledge base and all of its stored data
    Delete {
        /// Knowledge base name
        kb: String,
    },

    /// List the available providers
    Providers,
}

fn parse_provider(s: &str) -> Result<RagProvider, String> {
    s.parse().map_err(|e: anyhow::Error| e.to_string())
}

fn parse_mode(s: &str) -> Result<SearchMode, String> {
    s.parse().map_err(|e: anyhow::Error| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ingest_arguments_parse() {
        let cli = Cli::parse_from([
            "kb",
            "ingest",
            "demo",
            "--docs",
            "a.md",
            "b.pdf",
            "--provider",
            "graph",
            "--allow-duplicates",
        ]);
        match cli.command {
            Command::Ingest {
                kb,
                docs,
                provider,
                allow_duplicates,
                ..
            } => {
                assert_eq!(kb, "demo");
                assert_eq!(docs.len(), 2);
                assert_eq!(provider, Some(RagProvider::Graph));
                assert!(allow_duplicates);
            }
            other => panic!("expected ingest, got {other:?}"),
        }
    }

    #[test]
    fn search_mode_defaults_to_hybrid() {
        let cli = Cli::parse_from(["kb", "search", "demo", "what is gravity?"]);
        match cli.command {
            Command::Search { mode, .. } => assert_eq!(mode, SearchMode::Hybrid),
            other => panic!("expected search, got {other:?}"),
        }
    }

    #[test]
    fn unknown_provider_is_rejected() {
        let result = Cli::try_parse_from([
            "kb",
            "ingest",
            "demo",
            "--docs",
            "a.md",
            "--provider",
            "llamaindex",
        ]);
        assert!(result.is_err());
    }
}
