//! FormDesk Core Library
//!
//! This crate provides the domain models, error types, configuration, keyword extraction
//! and upload validation shared by all FormDesk crates.

pub mod clock;
pub mod config;
pub mod constants;
pub mod error;
pub mod format;
pub mod keywords;
pub mod models;
pub mod storage_types;
pub mod validation;

// Re-export commonly used types
pub use config::Config;
pub use error::{AppError, ErrorMetadata, LogLevel};
pub use format::format_file_size;
pub use keywords::{extract_keywords, tokenize_query, KeywordSource};
pub use storage_types::StorageBackend;
// Note: Storage and StorageError live in formdesk-storage
