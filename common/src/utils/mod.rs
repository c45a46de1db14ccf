pub mod config;
pub mod embedding;
pub mod hashing;
pub mod json_store;
pub mod llm;
pub mod scoring;
