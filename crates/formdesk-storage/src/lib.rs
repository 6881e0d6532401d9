//! FormDesk Storage Library
//!
//! This crate provides the blob storage abstraction for form files and its
//! implementations for S3, the local filesystem and memory.
//!
//! # Storage key format
//!
//! All backends use the same key layout: `forms/{form_id}/{file_name}`. Each object has a
//! sibling `{key}.metadata.json` holding its content type and custom metadata.
//!
//! Keys must not contain `..` or a leading `/`. Key generation is centralized in the
//! `keys` module so all backends stay consistent.

pub mod factory;
pub mod keys;
#[cfg(feature = "storage-local")]
pub mod local;
pub mod memory;
#[cfg(feature = "storage-s3")]
pub mod s3;
pub mod traits;

// Re-export commonly used types
pub use factory::create_storage;
pub use formdesk_core::StorageBackend;
pub use keys::form_file_key;
#[cfg(feature = "storage-local")]
pub use local::LocalStorage;
pub use memory::MemoryStorage;
#[cfg(feature = "storage-s3")]
pub use s3::S3Storage;
pub use traits::{
    ObjectMetadata, Storage, StorageError, StorageResult, TransferControl, UploadReader,
};
