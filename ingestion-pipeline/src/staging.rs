use std::path::{Path, PathBuf};

use tracing::{info, warn};

use common::{
    error::AppError,
    kb::{layout::KnowledgeBaseLayout, metadata::MetadataStore},
    utils::hashing::sha256_file,
};

/// A source file copied into the `raw/` staging area and awaiting
/// provider processing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedFile {
    pub source_path: PathBuf,
    pub dest_path: PathBuf,
    pub content_hash: String,
}

impl StagedFile {
    pub fn file_name(&self) -> String {
        self.dest_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Manages the write-ahead `raw/` directory of a knowledge base.
///
/// Files exist in `raw/` before they are canonized in metadata, so any
/// file present there without a recorded hash is in-flight work from an
/// interrupted run and is safely re-submitted on the next invocation.
/// The directory is append-only; staged files are never deleted.
pub struct StagingLog<'a> {
    layout: &'a KnowledgeBaseLayout,
    metadata: MetadataStore,
}

impl<'a> StagingLog<'a> {
    pub fn new(layout: &'a KnowledgeBaseLayout) -> Self {
        Self {
            layout,
            metadata: MetadataStore::new(layout),
        }
    }

    /// Validates and stages candidate source files, returning the ones
    /// that still need processing, in source order.
    ///
    /// Per file:
    /// - missing sources are logged and skipped;
    /// - content already recorded in metadata under any filename is
    ///   skipped (canon check), unless `allow_duplicates`;
    /// - a destination with the same hash is a recovered in-flight file
    ///   and is returned without re-copying;
    /// - a destination with a different hash is a name collision and is
    ///   skipped unless `allow_duplicates`, which overwrites.
    #[tracing::instrument(skip_all, fields(kb = self.layout.name(), candidates = sources.len()))]
    pub async fn stage(
        &self,
        sources: &[PathBuf],
        allow_duplicates: bool,
    ) -> Result<Vec<StagedFile>, AppError> {
        let ingested = self.metadata.read().await;
        let raw_dir = self.layout.raw_dir();
        tokio::fs::create_dir_all(&raw_dir).await?;

        let mut needs_processing = Vec::new();
        for source in sources {
            if !tokio::fs::try_exists(source).await.unwrap_or(false) {
                warn!(source = %source.display(), "skipping missing source file");
                continue;
            }

            let content_hash = sha256_file(source).await?;

            // Canon check: a hash match against any recorded filename
            // means this content is already indexed.
            if ingested.contains_hash(&content_hash) && !allow_duplicates {
                info!(
                    source = %source.display(),
                    "skipping source; content already indexed"
                );
                continue;
            }

            let dest_path = raw_dir.join(file_name_of(source)?);

            let mut should_copy = true;
            if tokio::fs::try_exists(&dest_path).await.unwrap_or(false) {
                let dest_hash = sha256_file(&dest_path).await?;
                if dest_hash == content_hash {
                    // Same bytes already staged: an interrupted prior run
                    // left this file in raw/ without a recorded hash.
                    should_copy = false;
                    info!(
                        file = %dest_path.display(),
                        "recovering staged file from interrupted run"
                    );
                } else if allow_duplicates {
                    info!(file = %dest_path.display(), "overwriting existing raw file");
                } else {
                    info!(
                        file = %dest_path.display(),
                        "skipping source; filename collision with different content"
                    );
                    continue;
                }
            }

            if should_copy {
                copy_preserving_mtime(source, &dest_path).await?;
                info!(source = %source.display(), dest = %dest_path.display(), "staged to raw");
            }

            needs_processing.push(StagedFile {
                source_path: source.clone(),
                dest_path,
                content_hash,
            });
        }

        Ok(needs_processing)
    }
}

/// Copies a source file into `raw/`, carrying the source's modification
/// time over to the staged copy so the log reflects upload provenance.
async fn copy_preserving_mtime(source: &Path, dest: &Path) -> Result<(), AppError> {
    let modified = tokio::fs::metadata(source).await?.modified().ok();
    tokio::fs::copy(source, dest).await?;
    if let Some(modified) = modified {
        let dest = dest.to_path_buf();
        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            let file = std::fs::File::options().write(true).open(&dest)?;
            file.set_times(std::fs::FileTimes::new().set_modified(modified))
        })
        .await??;
    }
    Ok(())
}

fn file_name_of(path: &Path) -> Result<&std::ffi::OsStr, AppError> {
    path.file_name().ok_or_else(|| {
        AppError::Validation(format!(
            "source path has no file name: {}",
            path.display()
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::kb::provider::RagProvider;

    struct Fixture {
        _base: tempfile::TempDir,
        sources: tempfile::TempDir,
        layout: KnowledgeBaseLayout,
    }

    impl Fixture {
        async fn new() -> Self {
            let base = tempfile::tempdir().expect("tempdir");
            let sources = tempfile::tempdir().expect("tempdir");
            let layout = KnowledgeBaseLayout::new(base.path(), "demo");
            layout.ensure_working_dirs().await.expect("dirs");
            Self {
                _base: base,
                sources,
                layout,
            }
        }

        fn source(&self, name: &str, content: &[u8]) -> PathBuf {
            let path = self.sources.path().join(name);
            std::fs::write(&path, content).expect("write source");
            path
        }
    }

    #[tokio::test]
    async fn stages_new_files_and_copies_bytes() {
        let fx = Fixture::new().await;
        let a = fx.source("a.md", b"alpha");
        let b = fx.source("b.md", b"beta");

        let staged = StagingLog::new(&fx.layout)
            .stage(&[a.clone(), b.clone()], false)
            .await
            .expect("stage");

        assert_eq!(staged.len(), 2);
        assert_eq!(staged[0].source_path, a);
        assert_eq!(staged[1].source_path, b);
        assert_eq!(
            std::fs::read(&staged[0].dest_path).expect("read staged"),
            b"alpha"
        );
    }

    #[tokio::test]
    async fn staged_copies_keep_the_source_modification_time() {
        let fx = Fixture::new().await;
        let a = fx.source("a.md", b"alpha");
        let past = std::time::SystemTime::now() - std::time::Duration::from_secs(86_400);
        let source_file = std::fs::File::options().write(true).open(&a).expect("open");
        source_file
            .set_times(std::fs::FileTimes::new().set_modified(past))
            .expect("set mtime");

        let staged = StagingLog::new(&fx.layout)
            .stage(&[a.clone()], false)
            .await
            .expect("stage");

        let source_mtime = std::fs::metadata(&a).expect("meta").modified().expect("mtime");
        let staged_mtime = std::fs::metadata(&staged[0].dest_path)
            .expect("meta")
            .modified()
            .expect("mtime");
        assert_eq!(staged_mtime, source_mtime);
    }

    #[tokio::test]
    async fn missing_sources_are_skipped_without_aborting() {
        let fx = Fixture::new().await;
        let present = fx.source("present.md", b"content");
        let missing = fx.sources.path().join("missing.md");

        let staged = StagingLog::new(&fx.layout)
            .stage(&[missing, present], false)
            .await
            .expect("stage");

        assert_eq!(staged.len(), 1);
        assert_eq!(staged[0].file_name(), "present.md");
    }

    #[tokio::test]
    async fn restaging_without_ingestion_is_idempotent() {
        let fx = Fixture::new().await;
        let a = fx.source("a.md", b"alpha");
        let log = StagingLog::new(&fx.layout);

        let first = log.stage(&[a.clone()], false).await.expect("stage");
        let second = log.stage(&[a.clone()], false).await.expect("restage");

        // Still needs processing each call, exactly once, and raw/ holds
        // a single copy.
        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 1);
        let entries: Vec<_> = std::fs::read_dir(fx.layout.raw_dir())
            .expect("read raw")
            .collect();
        assert_eq!(entries.len(), 1);
    }

    #[tokio::test]
    async fn canonically_ingested_content_is_skipped_across_filenames() {
        let fx = Fixture::new().await;
        let a = fx.source("a.md", b"identical bytes");
        let log = StagingLog::new(&fx.layout);

        let staged = log.stage(&[a.clone()], false).await.expect("stage");
        let hash = staged[0].content_hash.clone();
        MetadataStore::new(&fx.layout)
            .record_file_hash("a.md", &hash)
            .await
            .expect("record");

        // Same bytes, different name: content-identity dedup wins.
        let renamed = fx.source("a_copy.md", b"identical bytes");
        let staged = log.stage(&[renamed], false).await.expect("stage");
        assert!(staged.is_empty());

        // Original name too, of course.
        let staged = log.stage(&[a], false).await.expect("stage");
        assert!(staged.is_empty());
    }

    #[tokio::test]
    async fn allow_duplicates_bypasses_canon_check() {
        let fx = Fixture::new().await;
        let a = fx.source("a.md", b"alpha");
        let log = StagingLog::new(&fx.layout);

        let staged = log.stage(&[a.clone()], false).await.expect("stage");
        MetadataStore::new(&fx.layout)
            .record_file_hash("a.md", &staged[0].content_hash)
            .await
            .expect("record");

        let staged = log.stage(&[a], true).await.expect("stage");
        assert_eq!(staged.len(), 1);
    }

    #[tokio::test]
    async fn name_collision_with_different_content_is_skipped() {
        let fx = Fixture::new().await;
        let log = StagingLog::new(&fx.layout);

        let original = fx.source("notes.md", b"first version");
        log.stage(&[original], false).await.expect("stage");

        // Same destination name, different bytes.
        let conflicting = fx.source("notes.md", b"second version");
        let staged = log.stage(&[conflicting.clone()], false).await.expect("stage");
        assert!(staged.is_empty());
        assert_eq!(
            std::fs::read(fx.layout.raw_dir().join("notes.md")).expect("read"),
            b"first version"
        );

        // allow_duplicates overwrites instead.
        let staged = log.stage(&[conflicting], true).await.expect("stage");
        assert_eq!(staged.len(), 1);
        assert_eq!(
            std::fs::read(fx.layout.raw_dir().join("notes.md")).expect("read"),
            b"second version"
        );
    }

    #[tokio::test]
    async fn interrupted_run_recovers_without_second_copy() {
        let fx = Fixture::new().await;
        let a = fx.source("a.md", b"alpha");
        let log = StagingLog::new(&fx.layout);

        // First run staged the file but crashed before its hash was
        // recorded: raw/ has the copy, metadata does not.
        log.stage(&[a.clone()], false).await.expect("stage");

        let staged = log.stage(&[a], false).await.expect("restage");
        assert_eq!(staged.len(), 1, "recovered file still needs processing");
        let entries: Vec<_> = std::fs::read_dir(fx.layout.raw_dir())
            .expect("read raw")
            .collect();
        assert_eq!(entries.len(), 1, "no duplicate copy accumulated");
        // Provider storage untouched by staging.
        assert!(!fx.layout.storage_dir(RagProvider::Vector).exists());
    }
}
