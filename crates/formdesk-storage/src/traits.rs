//! Storage abstraction trait
//!
//! This module defines the Storage trait that all blob storage backends must implement,
//! together with [`TransferControl`], the cancel/pause switch shared between a caller and
//! an in-flight upload.

use crate::StorageBackend;
use formdesk_core::AppError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncRead;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// Storage operation errors
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Upload cancelled")]
    Cancelled,

    #[error("Download failed: {0}")]
    DownloadFailed(String),

    #[error("Delete failed: {0}")]
    DeleteFailed(String),

    #[error("File not found: {0}")]
    NotFound(String),

    #[error("Invalid storage key: {0}")]
    InvalidKey(String),

    #[error("Storage backend error: {0}")]
    BackendError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Cancelled => AppError::Cancelled("Upload cancelled by user".to_string()),
            StorageError::NotFound(key) => AppError::NotFound(format!("File {} not found", key)),
            StorageError::InvalidKey(msg) => AppError::Validation(msg),
            StorageError::ConfigError(msg) => AppError::Config(msg),
            other => AppError::Transfer(other.to_string()),
        }
    }
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Byte source for a streamed upload
pub type UploadReader = Pin<Box<dyn AsyncRead + Send + Unpin>>;

/// Description of a stored object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMetadata {
    /// Final path segment of the key
    pub name: String,
    pub size: u64,
    pub content_type: String,
    pub last_modified: DateTime<Utc>,
    pub custom_metadata: BTreeMap<String, String>,
    /// Hex SHA-256 of the stored bytes, when the backend recorded one.
    #[serde(default)]
    pub checksum: Option<String>,
}

/// Content type, checksum and custom metadata written next to each object.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct MetadataSidecar {
    pub content_type: String,
    #[serde(default)]
    pub custom_metadata: BTreeMap<String, String>,
    #[serde(default)]
    pub checksum: Option<String>,
}

/// Running SHA-256 of an upload, fed chunk by chunk from the copy loops.
#[derive(Default)]
pub(crate) struct Checksum(Sha256);

impl Checksum {
    pub fn update(&mut self, chunk: &[u8]) {
        self.0.update(chunk);
    }

    pub fn finish(self) -> String {
        hex::encode(self.0.finalize())
    }
}

/// Cancel and pause switch for an in-flight transfer.
///
/// Clones share state. Backends call [`TransferControl::checkpoint`] before every chunk.
#[derive(Debug, Clone)]
pub struct TransferControl {
    cancel: CancellationToken,
    paused: watch::Sender<bool>,
}

impl Default for TransferControl {
    fn default() -> Self {
        Self::new()
    }
}

impl TransferControl {
    pub fn new() -> Self {
        let (paused, _) = watch::channel(false);
        TransferControl {
            cancel: CancellationToken::new(),
            paused,
        }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Returns false when the transfer was already paused.
    pub fn pause(&self) -> bool {
        !self.paused.send_replace(true)
    }

    /// Returns false when the transfer was not paused.
    pub fn resume(&self) -> bool {
        self.paused.send_replace(false)
    }

    pub fn is_paused(&self) -> bool {
        *self.paused.borrow()
    }

    /// Fail with [`StorageError::Cancelled`] once cancelled; wait here while paused.
    pub async fn checkpoint(&self) -> StorageResult<()> {
        if self.cancel.is_cancelled() {
            return Err(StorageError::Cancelled);
        }
        if !self.is_paused() {
            return Ok(());
        }

        let mut paused = self.paused.subscribe();
        tokio::select! {
            _ = self.cancel.cancelled() => Err(StorageError::Cancelled),
            resumed = paused.wait_for(|p| !*p) => match resumed {
                Ok(_) if self.cancel.is_cancelled() => Err(StorageError::Cancelled),
                Ok(_) => Ok(()),
                Err(_) => Err(StorageError::Cancelled),
            },
        }
    }
}

/// Storage abstraction trait
///
/// All blob storage backends (S3, local filesystem, memory) implement this trait so the
/// upload pipeline can work with any of them.
///
/// **Key format:** form files live under `forms/{form_id}/{file_name}`. See the `keys`
/// module.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Stream `reader` to `storage_key` and return the number of bytes stored.
    ///
    /// `on_progress` receives the cumulative byte count after every chunk. The transfer
    /// stops with [`StorageError::Cancelled`] as soon as `control` is cancelled and leaves
    /// no partial object behind.
    #[allow(clippy::too_many_arguments)]
    async fn upload_stream(
        &self,
        storage_key: &str,
        content_type: &str,
        custom_metadata: &BTreeMap<String, String>,
        content_length: Option<u64>,
        reader: UploadReader,
        on_progress: &(dyn Fn(u64) + Send + Sync),
        control: &TransferControl,
    ) -> StorageResult<u64>;

    /// Download a file by its storage key
    async fn download(&self, storage_key: &str) -> StorageResult<Vec<u8>>;

    /// Delete a file by its storage key. Deleting a missing file succeeds.
    async fn delete(&self, storage_key: &str) -> StorageResult<()>;

    /// Durable URL for reading the object. Backends that sign URLs honour `expires_in`.
    async fn get_presigned_url(
        &self,
        storage_key: &str,
        expires_in: Duration,
    ) -> StorageResult<String>;

    /// Check if a file exists
    async fn exists(&self, storage_key: &str) -> StorageResult<bool>;

    /// Get the size in bytes of an object, if it exists.
    async fn content_length(&self, storage_key: &str) -> StorageResult<u64>;

    /// Size, content type and custom metadata of an object.
    async fn metadata(&self, storage_key: &str) -> StorageResult<ObjectMetadata>;

    /// Merge `custom_metadata` into the object's custom metadata, overwriting keys that
    /// are already set, and return the updated description. The content is not touched.
    async fn update_metadata(
        &self,
        storage_key: &str,
        custom_metadata: &BTreeMap<String, String>,
    ) -> StorageResult<ObjectMetadata>;

    /// Get the storage backend type
    fn backend_type(&self) -> StorageBackend;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn storage_errors_map_onto_app_errors() {
        assert!(matches!(
            AppError::from(StorageError::Cancelled),
            AppError::Cancelled(_)
        ));
        assert!(matches!(
            AppError::from(StorageError::UploadFailed("reset".to_string())),
            AppError::Transfer(_)
        ));
        assert!(matches!(
            AppError::from(StorageError::NotFound("forms/x".to_string())),
            AppError::NotFound(_)
        ));
    }

    #[test]
    fn checksum_is_hex_sha256() {
        let mut checksum = Checksum::default();
        checksum.update(b"hel");
        checksum.update(b"lo");
        assert_eq!(
            checksum.finish(),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[tokio::test]
    async fn checkpoint_passes_when_running() {
        let control = TransferControl::new();
        assert!(control.checkpoint().await.is_ok());
    }

    #[tokio::test]
    async fn checkpoint_fails_after_cancel() {
        let control = TransferControl::new();
        control.clone().cancel();
        assert!(matches!(
            control.checkpoint().await,
            Err(StorageError::Cancelled)
        ));
    }

    #[tokio::test]
    async fn checkpoint_waits_while_paused() {
        let control = Arc::new(TransferControl::new());
        assert!(control.pause());
        assert!(!control.pause());

        let waiter = {
            let control = control.clone();
            tokio::spawn(async move { control.checkpoint().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        assert!(control.resume());
        assert!(waiter.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn cancel_releases_a_paused_transfer() {
        let control = TransferControl::new();
        control.pause();
        let waiter = {
            let control = control.clone();
            tokio::spawn(async move { control.checkpoint().await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        control.cancel();
        assert!(matches!(
            waiter.await.unwrap(),
            Err(StorageError::Cancelled)
        ));
    }
}
