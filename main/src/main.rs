mod args;

use std::path::PathBuf;

use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use common::utils::config::get_config;
use rag_service::{IngestOptions, RagService};

use crate::args::{Cli, Command};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Set up tracing
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    let cli = Cli::parse();
    let config = get_config()?;
    let service = RagService::new(&config)?;

    match cli.command {
        Command::Ingest {
            kb,
            docs,
            docs_dir,
            provider,
            allow_duplicates,
        } => {
            let files = collect_documents(docs, docs_dir).await?;
            if files.is_empty() {
                anyhow::bail!("no documents given; use --docs and/or --docs-dir");
            }
            info!(kb, candidates = files.len(), "starting ingestion");

            let options = IngestOptions {
                provider,
                allow_duplicates,
            };
            if service.initialize(&kb, &files, options).await? {
                println!("ingestion into '{kb}' complete");
            } else {
                warn!(kb, "no files were successfully processed");
                anyhow::bail!("ingestion into '{kb}' processed no files");
            }
        }
        Command::Refresh { kb } => {
            if service.refresh(&kb).await? {
                println!("refresh of '{kb}' complete");
            } else {
                warn!(kb, "no staged files could be processed");
                anyhow::bail!("refresh of '{kb}' processed no files");
            }
        }
        Command::Search {
            kb,
            query,
            mode,
            show_content,
        } => {
            let response = service.search(&kb, &query, mode).await?;
            println!("{}", response.answer);
            if show_content {
                println!("\n--- retrieved content ({}) ---", response.provider);
                println!("{}", response.content);
            }
        }
        Command::Delete { kb } => {
            if service.delete(&kb).await? {
                println!("knowledge base '{kb}' deleted");
            } else {
                println!("knowledge base '{kb}' does not exist");
            }
        }
        Command::Providers => {
            for provider in service.list_providers() {
                println!("{provider}\t{}", provider.description());
            }
        }
    }

    Ok(())
}

/// Explicit files plus the top-level files of `docs_dir`, deduplicated
/// and in deterministic order.
async fn collect_documents(
    docs: Vec<PathBuf>,
    docs_dir: Option<PathBuf>,
) -> Result<Vec<PathBuf>, std::io::Error> {
    let mut files = docs;
    if let Some(dir) = docs_dir {
        let mut entries = tokio::fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                files.push(entry.path());
            }
        }
    }
    files.sort();
    files.dedup();
    Ok(files)
}
