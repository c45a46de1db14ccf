use std::path::PathBuf;
use std::sync::Arc;

use tracing::{error, info, warn};

use common::{
    error::AppError,
    kb::{engine::RagEngine, layout::KnowledgeBaseLayout, metadata::MetadataStore},
};

use crate::{
    routing::{classify_files, kind_for},
    staging::StagedFile,
};

/// Routes a staged batch to the provider-specific ingestion routine and
/// tracks per-file success.
///
/// The engine passed in is the knowledge base's bound provider; the
/// facade resolves it before constructing the dispatcher, so a caller's
/// conflicting provider request never reaches this point.
pub struct IngestionDispatcher {
    engine: Arc<dyn RagEngine>,
}

impl IngestionDispatcher {
    pub fn new(engine: Arc<dyn RagEngine>) -> Self {
        Self { engine }
    }

    /// Processes staged files in batch order, returning exactly the
    /// files that succeeded. A single file's failure never aborts the
    /// batch; its hash stays unrecorded so the next ingestion call
    /// retries it.
    #[tracing::instrument(
        skip_all,
        fields(kb = layout.name(), provider = %self.engine.provider(), batch = staged.len())
    )]
    pub async fn process(
        &self,
        layout: &KnowledgeBaseLayout,
        staged: &[StagedFile],
    ) -> Result<Vec<StagedFile>, AppError> {
        if staged.is_empty() {
            return Ok(Vec::new());
        }

        let metadata = MetadataStore::new(layout);
        let files: Vec<PathBuf> = staged.iter().map(|f| f.dest_path.clone()).collect();
        let batch = classify_files(&files);

        info!(
            needs_parsing = batch.needs_parsing.len(),
            text_files = batch.text_files.len(),
            unsupported = batch.unsupported.len(),
            "classified staged batch"
        );
        for file in &batch.unsupported {
            warn!(file = %file.display(), "skipping unsupported file");
        }

        let mut processed = Vec::new();
        for file in staged {
            let Some(kind) = kind_for(&batch, &file.dest_path) else {
                continue;
            };

            // Defend against concurrent external deletion of raw/ files.
            if !tokio::fs::try_exists(&file.dest_path).await.unwrap_or(false) {
                error!(file = %file.dest_path.display(), "staged file vanished before processing");
                continue;
            }

            match self.engine.ingest_file(layout, &file.dest_path, kind).await {
                Ok(()) => {
                    // The insert is durably persisted; record the hash now
                    // so a crash cannot lose the "already ingested" fact.
                    if let Err(e) = metadata
                        .record_file_hash(&file.file_name(), &file.content_hash)
                        .await
                    {
                        warn!(
                            file = %file.dest_path.display(),
                            error = %e,
                            "could not update hash metadata"
                        );
                    }
                    info!(file = %file.dest_path.display(), "processed file");
                    processed.push(file.clone());
                }
                Err(e) => {
                    error!(
                        file = %file.dest_path.display(),
                        error = %e,
                        "failed to process file; continuing batch"
                    );
                }
            }
        }

        if let Err(e) = self.engine.finish_batch(layout).await {
            warn!(error = %e, "post-batch cleanup failed");
        }

        Ok(processed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use tokio::sync::Mutex;

    use common::kb::engine::{FileKind, SearchMode, SearchResponse};
    use common::kb::provider::RagProvider;

    struct MockEngine {
        fail_on: Vec<String>,
        ingested: Mutex<Vec<(String, FileKind)>>,
        batches_finished: AtomicUsize,
    }

    impl MockEngine {
        fn new(fail_on: &[&str]) -> Self {
            Self {
                fail_on: fail_on.iter().map(|s| (*s).to_string()).collect(),
                ingested: Mutex::new(Vec::new()),
                batches_finished: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl RagEngine for MockEngine {
        fn provider(&self) -> RagProvider {
            RagProvider::Vector
        }

        async fn ingest_file(
            &self,
            _layout: &KnowledgeBaseLayout,
            file: &Path,
            kind: FileKind,
        ) -> Result<(), AppError> {
            let name = file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            if self.fail_on.contains(&name) {
                return Err(AppError::Processing(format!("simulated failure for {name}")));
            }
            self.ingested.lock().await.push((name, kind));
            Ok(())
        }

        async fn search(
            &self,
            _layout: &KnowledgeBaseLayout,
            query: &str,
            mode: SearchMode,
        ) -> Result<SearchResponse, AppError> {
            Ok(SearchResponse {
                query: query.to_string(),
                answer: String::new(),
                content: String::new(),
                mode,
                provider: RagProvider::Vector,
            })
        }

        async fn delete(&self, _layout: &KnowledgeBaseLayout) -> Result<bool, AppError> {
            Ok(true)
        }

        async fn finish_batch(&self, _layout: &KnowledgeBaseLayout) -> Result<(), AppError> {
            self.batches_finished.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Fixture {
        _base: tempfile::TempDir,
        layout: KnowledgeBaseLayout,
    }

    impl Fixture {
        async fn new() -> Self {
            let base = tempfile::tempdir().expect("tempdir");
            let layout = KnowledgeBaseLayout::new(base.path(), "demo");
            layout.ensure_working_dirs().await.expect("dirs");
            Self {
                _base: base,
                layout,
            }
        }

        fn staged(&self, name: &str, content: &[u8]) -> StagedFile {
            let dest = self.layout.raw_dir().join(name);
            std::fs::write(&dest, content).expect("write staged");
            StagedFile {
                source_path: PathBuf::from(name),
                dest_path: dest,
                content_hash: format!("hash-{name}"),
            }
        }
    }

    #[tokio::test]
    async fn partial_batch_failure_keeps_going() {
        let fx = Fixture::new().await;
        let staged = vec![
            fx.staged("one.md", b"1"),
            fx.staged("two.md", b"2"),
            fx.staged("three.md", b"3"),
        ];

        let engine = Arc::new(MockEngine::new(&["two.md"]));
        let dispatcher = IngestionDispatcher::new(Arc::clone(&engine) as Arc<dyn RagEngine>);
        let processed = dispatcher.process(&fx.layout, &staged).await.expect("process");

        let names: Vec<_> = processed.iter().map(StagedFile::file_name).collect();
        assert_eq!(names, vec!["one.md", "three.md"]);

        // Only successful files are canonized.
        let metadata = MetadataStore::new(&fx.layout).read().await;
        assert!(metadata.contains_hash("hash-one.md"));
        assert!(!metadata.contains_hash("hash-two.md"));
        assert!(metadata.contains_hash("hash-three.md"));
    }

    #[tokio::test]
    async fn unsupported_files_are_dropped_not_failed() {
        let fx = Fixture::new().await;
        let staged = vec![fx.staged("data.bin", b"binary"), fx.staged("notes.md", b"text")];

        let engine = Arc::new(MockEngine::new(&[]));
        let dispatcher = IngestionDispatcher::new(Arc::clone(&engine) as Arc<dyn RagEngine>);
        let processed = dispatcher.process(&fx.layout, &staged).await.expect("process");

        assert_eq!(processed.len(), 1);
        assert_eq!(processed[0].file_name(), "notes.md");
        let metadata = MetadataStore::new(&fx.layout).read().await;
        assert_eq!(metadata.file_hashes.len(), 1);
    }

    #[tokio::test]
    async fn classification_drives_the_processing_path() {
        let fx = Fixture::new().await;
        let staged = vec![fx.staged("paper.pdf", b"%PDF"), fx.staged("notes.md", b"text")];

        let engine = Arc::new(MockEngine::new(&[]));
        let dispatcher = IngestionDispatcher::new(Arc::clone(&engine) as Arc<dyn RagEngine>);
        dispatcher.process(&fx.layout, &staged).await.expect("process");

        let ingested = engine.ingested.lock().await;
        assert_eq!(
            *ingested,
            vec![
                ("paper.pdf".to_string(), FileKind::RichDocument),
                ("notes.md".to_string(), FileKind::PlainText),
            ]
        );
    }

    #[tokio::test]
    async fn vanished_staged_file_is_skipped() {
        let fx = Fixture::new().await;
        let mut staged = vec![fx.staged("gone.md", b"bytes"), fx.staged("kept.md", b"bytes2")];
        std::fs::remove_file(&staged[0].dest_path).expect("delete out from under");
        staged[0].content_hash = "hash-gone.md".to_string();

        let engine = Arc::new(MockEngine::new(&[]));
        let dispatcher = IngestionDispatcher::new(Arc::clone(&engine) as Arc<dyn RagEngine>);
        let processed = dispatcher.process(&fx.layout, &staged).await.expect("process");

        assert_eq!(processed.len(), 1);
        assert_eq!(processed[0].file_name(), "kept.md");
    }

    #[tokio::test]
    async fn finish_batch_runs_once_per_process_call() {
        let fx = Fixture::new().await;
        let staged = vec![fx.staged("a.md", b"a")];

        let engine = Arc::new(MockEngine::new(&[]));
        let dispatcher = IngestionDispatcher::new(Arc::clone(&engine) as Arc<dyn RagEngine>);
        dispatcher.process(&fx.layout, &staged).await.expect("process");

        assert_eq!(engine.batches_finished.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_batch_short_circuits() {
        let fx = Fixture::new().await;
        let engine = Arc::new(MockEngine::new(&[]));
        let dispatcher = IngestionDispatcher::new(Arc::clone(&engine) as Arc<dyn RagEngine>);
        let processed = dispatcher.process(&fx.layout, &[]).await.expect("process");

        assert!(processed.is_empty());
        assert_eq!(engine.batches_finished.load(Ordering::SeqCst), 0);
    }
}
