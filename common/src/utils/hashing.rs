use std::path::Path;

use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;

use crate::error::AppError;

/// Block size for streamed hashing. 64KB gives good throughput on SSDs
/// while keeping memory bounded regardless of file size.
const HASH_BLOCK_SIZE: usize = 65_536;

/// Calculates the SHA-256 digest of a file's content as a hex string.
///
/// The digest depends only on the file bytes, never on the file name,
/// which makes it usable as a content-identity key for dedup.
pub async fn sha256_file(path: &Path) -> Result<String, AppError> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; HASH_BLOCK_SIZE];

    loop {
        let n = file.read(&mut buffer).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    let digest = hasher.finalize();
    Ok(format!("{digest:x}"))
}
