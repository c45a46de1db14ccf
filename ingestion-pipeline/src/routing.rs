use std::path::{Path, PathBuf};

use mime_guess::from_path;
use tracing::warn;

use common::{error::AppError, kb::engine::FileKind};

/// Partition of a staged batch by required processing path. Transient;
/// recomputed on every ingestion call.
#[derive(Debug, Default)]
pub struct ClassifiedBatch {
    /// PDF/DOCX/image-bearing documents that need heavy parsing.
    pub needs_parsing: Vec<PathBuf>,
    /// Plain-text documents read directly.
    pub text_files: Vec<PathBuf>,
    /// Everything else; logged and dropped, never retried automatically.
    pub unsupported: Vec<PathBuf>,
}

impl ClassifiedBatch {
    pub fn supported_count(&self) -> usize {
        self.needs_parsing.len().saturating_add(self.text_files.len())
    }
}

const PARSER_EXTENSIONS: [&str; 9] = [
    "pdf", "doc", "docx", "ppt", "pptx", "png", "jpg", "jpeg", "webp",
];
const TEXT_EXTENSIONS: [&str; 7] = ["txt", "md", "markdown", "rst", "csv", "json", "tex"];

/// Classifies files by extension with a MIME-based fallback for
/// extensions outside the known tables.
pub fn classify_files(files: &[PathBuf]) -> ClassifiedBatch {
    let mut batch = ClassifiedBatch::default();

    for file in files {
        let extension = file
            .extension()
            .map(|ext| ext.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();

        if PARSER_EXTENSIONS.contains(&extension.as_str()) {
            batch.needs_parsing.push(file.clone());
        } else if TEXT_EXTENSIONS.contains(&extension.as_str()) || sniffs_as_text(file) {
            batch.text_files.push(file.clone());
        } else {
            batch.unsupported.push(file.clone());
        }
    }

    batch
}

fn sniffs_as_text(path: &Path) -> bool {
    from_path(path)
        .first()
        .is_some_and(|mime| mime.type_() == mime::TEXT)
}

/// Reads a staged file as text, falling back to lossy UTF-8 conversion
/// for content with a legacy encoding.
pub async fn read_text_file(path: &Path) -> Result<String, AppError> {
    match tokio::fs::read_to_string(path).await {
        Ok(content) => Ok(content),
        Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
            warn!(file = %path.display(), "file is not valid UTF-8; reading lossily");
            let bytes = tokio::fs::read(path).await?;
            Ok(String::from_utf8_lossy(&bytes).into_owned())
        }
        Err(e) => Err(e.into()),
    }
}

/// Maps a classified file to the processing path handed to the engine.
pub fn kind_for(batch: &ClassifiedBatch, file: &Path) -> Option<FileKind> {
    if batch.needs_parsing.iter().any(|p| p == file) {
        Some(FileKind::RichDocument)
    } else if batch.text_files.iter().any(|p| p == file) {
        Some(FileKind::PlainText)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths(names: &[&str]) -> Vec<PathBuf> {
        names.iter().map(PathBuf::from).collect()
    }

    #[test]
    fn classifies_by_processing_path() {
        let batch = classify_files(&paths(&[
            "report.pdf",
            "slides.pptx",
            "diagram.png",
            "notes.md",
            "data.csv",
            "archive.zip",
            "binary.exe",
        ]));

        assert_eq!(batch.needs_parsing, paths(&["report.pdf", "slides.pptx", "diagram.png"]));
        assert_eq!(batch.text_files, paths(&["notes.md", "data.csv"]));
        assert_eq!(batch.unsupported, paths(&["archive.zip", "binary.exe"]));
        assert_eq!(batch.supported_count(), 5);
    }

    #[test]
    fn extension_case_is_ignored() {
        let batch = classify_files(&paths(&["Thesis.PDF", "README.MD"]));
        assert_eq!(batch.needs_parsing.len(), 1);
        assert_eq!(batch.text_files.len(), 1);
    }

    #[test]
    fn extensionless_files_are_unsupported() {
        let batch = classify_files(&paths(&["Makefile"]));
        assert_eq!(batch.unsupported.len(), 1);
    }

    #[tokio::test]
    async fn reads_utf8_and_falls_back_lossily() {
        let dir = tempfile::tempdir().expect("tempdir");
        let utf8 = dir.path().join("ok.txt");
        std::fs::write(&utf8, "plain text").expect("write");
        assert_eq!(read_text_file(&utf8).await.expect("read"), "plain text");

        let latin1 = dir.path().join("legacy.txt");
        std::fs::write(&latin1, [0x63, 0x61, 0x66, 0xE9]).expect("write"); // "café" in latin-1
        let content = read_text_file(&latin1).await.expect("read lossily");
        assert!(content.starts_with("caf"));
    }

    #[test]
    fn kind_lookup_matches_partition() {
        let batch = classify_files(&paths(&["a.pdf", "b.md", "c.zip"]));
        assert_eq!(kind_for(&batch, Path::new("a.pdf")), Some(FileKind::RichDocument));
        assert_eq!(kind_for(&batch, Path::new("b.md")), Some(FileKind::PlainText));
        assert_eq!(kind_for(&batch, Path::new("c.zip")), None);
    }
}
