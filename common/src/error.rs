use async_openai::error::OpenAIError;
use thiserror::Error;
use tokio::task::JoinError;

// Core internal errors
#[derive(Error, Debug)]
pub enum AppError {
    #[error("IoError: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("OpenAI error: {0}")]
    OpenAI(#[from] OpenAIError),
    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),
    #[error("Task join error: {0}")]
    Join(#[from] JoinError),
    #[error("Failed to persist file: {0}")]
    Persist(#[from] tempfile::PersistError),
    #[error("Knowledge base '{0}' does not exist")]
    KnowledgeBaseNotFound(String),
    #[error("Knowledge base '{0}' has not been indexed: {1}")]
    NotIndexed(String, String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("LLM parsing error: {0}")]
    LLMParsing(String),
    #[error("Ingestion Processing error: {0}")]
    Processing(String),
    #[error("Anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
    #[error("Internal service error: {0}")]
    InternalError(String),
}
