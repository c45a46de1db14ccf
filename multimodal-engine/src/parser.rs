use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, info};

use common::error::AppError;

/// One block of extracted document structure, in the shared
/// content-list format both parser backends produce.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentBlock {
    #[serde(rename = "type")]
    pub block_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub img_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_idx: Option<u32>,
}

impl ContentBlock {
    pub fn text_block(text: impl Into<String>) -> Self {
        Self {
            block_type: "text".to_string(),
            text: Some(text.into()),
            img_path: None,
            page_idx: None,
        }
    }
}

/// Interchangeable heavy-parsing backend. Implementations run the
/// external parser against a rich document and return the extracted
/// content list; image blocks reference files under `output_dir`.
#[async_trait]
pub trait DocumentParser: Send + Sync {
    fn name(&self) -> &'static str;

    /// Scratch subdirectory the backend writes under each document's
    /// output directory; cleaned up after image migration.
    fn scratch_dir_name(&self) -> &'static str;

    async fn parse(&self, file: &Path, output_dir: &Path) -> Result<Vec<ContentBlock>, AppError>;
}

/// MinerU CLI backend. Writes `<stem>/auto/<stem>_content_list.json`.
pub struct MineruParser;

/// Docling CLI backend. Writes `<stem>/docling/<stem>_content_list.json`.
pub struct DoclingParser;

async fn run_parser_command(
    program: &str,
    args: &[&str],
    file: &Path,
) -> Result<(), AppError> {
    debug!(program, file = %file.display(), "running document parser");
    let output = Command::new(program).args(args).output().await.map_err(|e| {
        AppError::Processing(format!("failed to launch {program}: {e}"))
    })?;

    if !output.status.success() {
        return Err(AppError::Processing(format!(
            "{program} failed for {}: {}",
            file.display(),
            String::from_utf8_lossy(&output.stderr)
        )));
    }
    Ok(())
}

fn content_list_path(output_dir: &Path, file: &Path, scratch: &str) -> Result<PathBuf, AppError> {
    let stem = file
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .ok_or_else(|| {
            AppError::Validation(format!("document has no file stem: {}", file.display()))
        })?;
    Ok(output_dir
        .join(&stem)
        .join(scratch)
        .join(format!("{stem}_content_list.json")))
}

async fn read_content_list(path: &Path) -> Result<Vec<ContentBlock>, AppError> {
    let bytes = tokio::fs::read(path).await.map_err(|e| {
        AppError::Processing(format!(
            "parser produced no content list at {}: {e}",
            path.display()
        ))
    })?;
    let blocks: Vec<ContentBlock> = serde_json::from_slice(&bytes)?;
    info!(blocks = blocks.len(), list = %path.display(), "read parser content list");
    Ok(blocks)
}

#[async_trait]
impl DocumentParser for MineruParser {
    fn name(&self) -> &'static str {
        "mineru"
    }

    fn scratch_dir_name(&self) -> &'static str {
        "auto"
    }

    async fn parse(&self, file: &Path, output_dir: &Path) -> Result<Vec<ContentBlock>, AppError> {
        let file_arg = file.to_string_lossy().into_owned();
        let out_arg = output_dir.to_string_lossy().into_owned();
        run_parser_command(
            "mineru",
            &["-p", &file_arg, "-o", &out_arg, "-m", "auto"],
            file,
        )
        .await?;
        read_content_list(&content_list_path(output_dir, file, self.scratch_dir_name())?).await
    }
}

#[async_trait]
impl DocumentParser for DoclingParser {
    fn name(&self) -> &'static str {
        "docling"
    }

    fn scratch_dir_name(&self) -> &'static str {
        "docling"
    }

    async fn parse(&self, file: &Path, output_dir: &Path) -> Result<Vec<ContentBlock>, AppError> {
        let file_arg = file.to_string_lossy().into_owned();
        let out_arg = output_dir.to_string_lossy().into_owned();
        run_parser_command(
            "docling",
            &["--output", &out_arg, "--to", "json", &file_arg],
            file,
        )
        .await?;
        read_content_list(&content_list_path(output_dir, file, self.scratch_dir_name())?).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn content_list_path_follows_parser_convention() {
        let path = content_list_path(
            Path::new("/kb/content_list"),
            Path::new("/kb/raw/thesis.pdf"),
            "auto",
        )
        .expect("path");
        assert_eq!(
            path,
            PathBuf::from("/kb/content_list/thesis/auto/thesis_content_list.json")
        );
    }

    #[test]
    fn content_block_tolerates_sparse_fields() {
        let block: ContentBlock =
            serde_json::from_str(r#"{"type": "image", "img_path": "images/fig1.png"}"#)
                .expect("parse");
        assert_eq!(block.block_type, "image");
        assert!(block.text.is_none());
        assert_eq!(block.img_path.as_deref(), Some("images/fig1.png"));
    }
}
