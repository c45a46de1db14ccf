use std::path::Path;

use tracing::debug;

use common::{error::AppError, kb::engine::FileKind};

use crate::routing::read_text_file;

/// Extracts plain text from a staged file for the text-only engines.
///
/// Plain-text files are read natively. PDFs get a best-effort text-layer
/// extraction; there is deliberately no OCR fallback, so a scanned PDF
/// without a text layer fails with a processing error and is excluded
/// from the success list.
pub async fn extract_text(path: &Path, kind: FileKind) -> Result<String, AppError> {
    match kind {
        FileKind::PlainText => read_text_file(path).await,
        FileKind::RichDocument => {
            let extension = path
                .extension()
                .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
                .unwrap_or_default();
            if extension != "pdf" {
                return Err(AppError::Processing(format!(
                    "no text-layer extraction available for '{}' files",
                    extension
                )));
            }
            extract_pdf_text_layer(path).await
        }
    }
}

async fn extract_pdf_text_layer(path: &Path) -> Result<String, AppError> {
    let path = path.to_path_buf();
    let text = tokio::task::spawn_blocking(move || {
        pdf_extract::extract_text(&path)
            .map_err(|e| AppError::Processing(format!("PDF text extraction failed: {e}")))
    })
    .await??;

    if text.trim().is_empty() {
        return Err(AppError::Processing(
            "PDF has no extractable text layer".into(),
        ));
    }

    debug!(chars = text.len(), "extracted PDF text layer");
    Ok(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn plain_text_is_read_natively() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("notes.md");
        std::fs::write(&path, "# Heading\nbody").expect("write");

        let text = extract_text(&path, FileKind::PlainText).await.expect("read");
        assert!(text.contains("Heading"));
    }

    #[tokio::test]
    async fn non_pdf_rich_documents_are_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("slides.pptx");
        std::fs::write(&path, b"fake").expect("write");

        let result = extract_text(&path, FileKind::RichDocument).await;
        assert!(matches!(result, Err(AppError::Processing(_))));
    }

    #[tokio::test]
    async fn broken_pdf_fails_without_ocr_fallback() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("broken.pdf");
        std::fs::write(&path, b"not a pdf at all").expect("write");

        let result = extract_text(&path, FileKind::RichDocument).await;
        assert!(matches!(result, Err(AppError::Processing(_))));
    }
}
