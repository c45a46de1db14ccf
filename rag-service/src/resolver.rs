//! Decides which provider owns an existing knowledge base.
//!
//! The recorded metadata value is the sole source of truth. KBs created
//! before provider tracking existed have no record, so a storage-layout
//! heuristic covers them: the first provider whose storage directory
//! holds content claims the KB. Only when both sources are silent does
//! the supplied default apply.

use tracing::{debug, info};

use common::{
    error::AppError,
    kb::{layout::KnowledgeBaseLayout, metadata::MetadataStore, provider::RagProvider},
};

pub async fn resolve_provider(
    layout: &KnowledgeBaseLayout,
    default: RagProvider,
) -> Result<RagProvider, AppError> {
    if !layout.exists() {
        return Err(AppError::KnowledgeBaseNotFound(layout.name().to_string()));
    }

    let metadata = MetadataStore::new(layout).read().await;
    if let Some(provider) = metadata.rag_provider {
        debug!(kb = layout.name(), provider = %provider, "resolved provider from metadata");
        return Ok(provider);
    }

    // Legacy KBs predate provider tracking; infer from what is on disk.
    // The multimodal variants share a storage directory, so the first
    // match in declaration order wins for them.
    for provider in RagProvider::ALL {
        if KnowledgeBaseLayout::dir_has_content(&layout.storage_dir(provider)) {
            info!(
                kb = layout.name(),
                provider = %provider,
                "inferred provider from storage layout"
            );
            return Ok(provider);
        }
    }

    debug!(kb = layout.name(), provider = %default, "falling back to default provider");
    Ok(default)
}
