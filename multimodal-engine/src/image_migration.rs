use std::path::Path;

use tracing::{debug, info, warn};

use common::error::AppError;

use crate::parser::ContentBlock;

/// Moves parser-extracted images into the KB's canonical `images/`
/// directory and rewrites their paths inside the content blocks.
///
/// Runs before insertion so the provider store only ever sees final
/// canonical paths, never temporary parser-output paths. Returns the
/// number of images migrated.
pub async fn migrate_images_and_update_paths(
    blocks: &mut [ContentBlock],
    parser_output_dir: &Path,
    images_dir: &Path,
) -> Result<usize, AppError> {
    tokio::fs::create_dir_all(images_dir).await?;

    let mut migrated = 0usize;
    for block in blocks.iter_mut() {
        let Some(rel_path) = block.img_path.clone() else {
            continue;
        };

        let source = parser_output_dir.join(&rel_path);
        let Some(file_name) = source.file_name() else {
            warn!(img_path = rel_path, "image path has no file name; leaving untouched");
            continue;
        };
        let target = images_dir.join(file_name);

        if tokio::fs::try_exists(&source).await.unwrap_or(false) {
            // Rename when possible; fall back to copy across filesystems.
            if tokio::fs::rename(&source, &target).await.is_err() {
                tokio::fs::copy(&source, &target).await?;
                tokio::fs::remove_file(&source).await.ok();
            }
            migrated = migrated.saturating_add(1);
        } else if !tokio::fs::try_exists(&target).await.unwrap_or(false) {
            warn!(img_path = rel_path, "extracted image missing; keeping rewritten path anyway");
        }

        block.img_path = Some(target.to_string_lossy().into_owned());
    }

    if migrated > 0 {
        info!(migrated, images_dir = %images_dir.display(), "migrated parser images");
    }
    Ok(migrated)
}

/// Removes now-empty parser scratch directories under `content_list/`
/// after images have been migrated out of them.
pub async fn cleanup_parser_output_dirs(content_list_dir: &Path) -> Result<usize, AppError> {
    const SCRATCH_DIRS: [&str; 2] = ["auto", "docling"];

    let mut cleaned = 0usize;
    let mut doc_dirs = match tokio::fs::read_dir(content_list_dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e.into()),
    };

    while let Some(entry) = doc_dirs.next_entry().await? {
        let doc_dir = entry.path();
        if !doc_dir.is_dir() {
            continue;
        }

        for scratch in SCRATCH_DIRS {
            let subdir = doc_dir.join(scratch);
            if subdir.is_dir() && !has_files(&subdir) {
                match tokio::fs::remove_dir_all(&subdir).await {
                    Ok(()) => cleaned = cleaned.saturating_add(1),
                    Err(e) => debug!(dir = %subdir.display(), error = %e, "could not clean up"),
                }
            }
        }

        // Drop the per-document dir once nothing is left inside.
        if !has_files(&doc_dir) {
            tokio::fs::remove_dir_all(&doc_dir).await.ok();
        }
    }

    if cleaned > 0 {
        info!(cleaned, "cleaned up empty parser directories");
    }
    Ok(cleaned)
}

/// True when the directory (recursively) contains at least one file.
fn has_files(dir: &Path) -> bool {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return false;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_file() || (path.is_dir() && has_files(&path)) {
            return true;
        }
    }
    false
}
