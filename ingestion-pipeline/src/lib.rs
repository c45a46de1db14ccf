#![allow(clippy::missing_docs_in_private_items)]

pub mod dispatcher;
pub mod extraction;
pub mod routing;
pub mod staging;

pub use dispatcher::IngestionDispatcher;
pub use staging::{StagedFile, StagingLog};
