pub mod engine;
pub mod layout;
pub mod metadata;
pub mod provider;
