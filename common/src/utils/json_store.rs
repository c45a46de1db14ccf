use std::path::Path;

use serde::{de::DeserializeOwned, Serialize};
use tempfile::NamedTempFile;

use crate::error::AppError;

/// Reads a JSON document, returning defaults when the file is absent.
/// Unlike metadata reads, a corrupt store is a hard error: silently
/// replacing a damaged index would drop previously inserted content.
pub async fn read_json_or_default<T>(path: &Path) -> Result<T, AppError>
where
    T: DeserializeOwned + Default,
{
    match tokio::fs::read(path).await {
        Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(T::default()),
        Err(e) => Err(e.into()),
    }
}

/// Writes a JSON document atomically: serialize to a temp file in the
/// target's directory, then rename over the target.
pub async fn write_json_atomic<T>(path: &Path, value: &T) -> Result<(), AppError>
where
    T: Serialize,
{
    let dir = path.parent().ok_or_else(|| {
        AppError::Validation(format!("store path has no parent: {}", path.display()))
    })?;
    tokio::fs::create_dir_all(dir).await?;

    let serialized = serde_json::to_vec_pretty(value)?;
    let temp = NamedTempFile::new_in(dir)?;
    std::fs::write(temp.path(), &serialized)?;
    temp.persist(path)?;
    Ok(())
}
