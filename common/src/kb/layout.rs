use std::path::{Path, PathBuf};

use crate::{error::AppError, kb::provider::RagProvider};

/// Filesystem layout of a single knowledge base.
///
/// ```text
/// <base_dir>/<name>/
///   raw/                  write-ahead log of all submitted source files
///   images/               canonical migrated images (multimodal only)
///   content_list/         per-document extracted structure (multimodal only)
///   <provider>_storage/   provider-specific index/graph/vector store
///   metadata.json         provider, file hashes, update history
/// ```
#[derive(Debug, Clone)]
pub struct KnowledgeBaseLayout {
    base_dir: PathBuf,
    name: String,
}

impl KnowledgeBaseLayout {
    pub fn new(base_dir: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self {
            base_dir: base_dir.into(),
            name: name.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    pub fn kb_dir(&self) -> PathBuf {
        self.base_dir.join(&self.name)
    }

    pub fn raw_dir(&self) -> PathBuf {
        self.kb_dir().join("raw")
    }

    pub fn images_dir(&self) -> PathBuf {
        self.kb_dir().join("images")
    }

    pub fn content_list_dir(&self) -> PathBuf {
        self.kb_dir().join("content_list")
    }

    pub fn storage_dir(&self, provider: RagProvider) -> PathBuf {
        self.kb_dir().join(provider.storage_dir_name())
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.kb_dir().join("metadata.json")
    }

    pub fn numbered_items_path(&self) -> PathBuf {
        self.kb_dir().join("numbered_items.json")
    }

    pub fn exists(&self) -> bool {
        self.kb_dir().is_dir()
    }

    /// Creates the working directories used by staging and ingestion.
    /// Provider storage directories are created by the engines themselves
    /// on first insert, so an interrupted run never leaves behind an
    /// empty storage directory that the resolver could mistake for an
    /// initialized index.
    pub async fn ensure_working_dirs(&self) -> Result<(), AppError> {
        for dir in [self.raw_dir(), self.images_dir(), self.content_list_dir()] {
            tokio::fs::create_dir_all(&dir).await?;
        }
        Ok(())
    }

    /// True when the directory exists and contains at least one entry.
    /// An empty directory left over from a failed attempt does not count.
    pub fn dir_has_content(dir: &Path) -> bool {
        std::fs::read_dir(dir)
            .map(|mut entries| entries.next().is_some())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ensure_working_dirs_creates_staging_tree() {
        let base = tempfile::tempdir().expect("tempdir");
        let layout = KnowledgeBaseLayout::new(base.path(), "physics");

        assert!(!layout.exists());
        layout.ensure_working_dirs().await.expect("create dirs");

        assert!(layout.exists());
        assert!(layout.raw_dir().is_dir());
        assert!(layout.images_dir().is_dir());
        assert!(layout.content_list_dir().is_dir());
        // Provider storage is intentionally not pre-created.
        assert!(!layout.storage_dir(RagProvider::Vector).exists());
    }

    #[test]
    fn dir_has_content_ignores_empty_dirs() {
        let base = tempfile::tempdir().expect("tempdir");
        let empty = base.path().join("empty");
        std::fs::create_dir(&empty).expect("mkdir");
        assert!(!KnowledgeBaseLayout::dir_has_content(&empty));

        std::fs::write(empty.join("entry.json"), b"{}").expect("write");
        assert!(KnowledgeBaseLayout::dir_has_content(&empty));

        assert!(!KnowledgeBaseLayout::dir_has_content(
            &base.path().join("missing")
        ));
    }

    #[test]
    fn paths_are_rooted_under_kb_dir() {
        let layout = KnowledgeBaseLayout::new("/tmp/kbs", "demo");
        assert_eq!(layout.kb_dir(), PathBuf::from("/tmp/kbs/demo"));
        assert_eq!(layout.metadata_path(), PathBuf::from("/tmp/kbs/demo/metadata.json"));
        assert_eq!(
            layout.storage_dir(RagProvider::Graph),
            PathBuf::from("/tmp/kbs/demo/graph_storage")
        );
    }
}
