//! In-process storage backend
//!
//! Keeps objects in a map. Used by tests and by deployments configured with
//! `STORAGE_BACKEND=memory`. Uploads can be made to fail on demand.

use crate::keys::{object_name, validate_key};
use crate::traits::{
    Checksum, ObjectMetadata, Storage, StorageError, StorageResult, TransferControl,
    UploadReader,
};
use crate::StorageBackend;
use async_trait::async_trait;
use bytes::Bytes;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::sync::RwLock;

const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    metadata: ObjectMetadata,
}

/// Map-backed storage implementation
pub struct MemoryStorage {
    base_url: String,
    chunk_size: usize,
    objects: RwLock<HashMap<String, StoredObject>>,
    fail_uploads: AtomicBool,
    upload_calls: AtomicUsize,
}

impl MemoryStorage {
    pub fn new(base_url: impl Into<String>) -> Self {
        MemoryStorage {
            base_url: base_url.into(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            objects: RwLock::new(HashMap::new()),
            fail_uploads: AtomicBool::new(false),
            upload_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Make every following upload fail after its first chunk.
    pub fn set_fail_uploads(&self, fail: bool) {
        self.fail_uploads.store(fail, Ordering::SeqCst);
    }

    /// Number of `upload_stream` calls received, successful or not.
    pub fn upload_calls(&self) -> usize {
        self.upload_calls.load(Ordering::SeqCst)
    }

    pub async fn object_count(&self) -> usize {
        self.objects.read().await.len()
    }

    fn generate_url(&self, key: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), key)
    }

    async fn object(&self, storage_key: &str) -> StorageResult<StoredObject> {
        validate_key(storage_key)?;
        self.objects
            .read()
            .await
            .get(storage_key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(storage_key.to_string()))
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn upload_stream(
        &self,
        storage_key: &str,
        content_type: &str,
        custom_metadata: &BTreeMap<String, String>,
        content_length: Option<u64>,
        mut reader: UploadReader,
        on_progress: &(dyn Fn(u64) + Send + Sync),
        control: &TransferControl,
    ) -> StorageResult<u64> {
        self.upload_calls.fetch_add(1, Ordering::SeqCst);
        validate_key(storage_key)?;

        let mut data = Vec::with_capacity(content_length.unwrap_or(0) as usize);
        let mut buf = vec![0u8; self.chunk_size];
        let mut checksum = Checksum::default();

        loop {
            control.checkpoint().await?;

            let read = reader.read(&mut buf).await.map_err(|e| {
                StorageError::UploadFailed(format!("Failed to read from stream: {}", e))
            })?;
            if read == 0 {
                break;
            }
            data.extend_from_slice(&buf[..read]);
            checksum.update(&buf[..read]);
            on_progress(data.len() as u64);

            if self.fail_uploads.load(Ordering::SeqCst) {
                return Err(StorageError::UploadFailed(
                    "Simulated storage outage".to_string(),
                ));
            }
            // Let other tasks observe progress between chunks.
            tokio::task::yield_now().await;
        }

        let size = data.len() as u64;
        let metadata = ObjectMetadata {
            name: object_name(storage_key),
            size,
            content_type: content_type.to_string(),
            last_modified: Utc::now(),
            custom_metadata: custom_metadata.clone(),
            checksum: Some(checksum.finish()),
        };
        self.objects.write().await.insert(
            storage_key.to_string(),
            StoredObject {
                data: Bytes::from(data),
                metadata,
            },
        );

        tracing::debug!(key = %storage_key, size_bytes = size, "Memory storage upload successful");
        Ok(size)
    }

    async fn download(&self, storage_key: &str) -> StorageResult<Vec<u8>> {
        Ok(self.object(storage_key).await?.data.to_vec())
    }

    async fn delete(&self, storage_key: &str) -> StorageResult<()> {
        validate_key(storage_key)?;
        self.objects.write().await.remove(storage_key);
        Ok(())
    }

    async fn get_presigned_url(
        &self,
        storage_key: &str,
        _expires_in: Duration,
    ) -> StorageResult<String> {
        self.object(storage_key).await?;
        Ok(self.generate_url(storage_key))
    }

    async fn exists(&self, storage_key: &str) -> StorageResult<bool> {
        validate_key(storage_key)?;
        Ok(self.objects.read().await.contains_key(storage_key))
    }

    async fn content_length(&self, storage_key: &str) -> StorageResult<u64> {
        Ok(self.object(storage_key).await?.metadata.size)
    }

    async fn metadata(&self, storage_key: &str) -> StorageResult<ObjectMetadata> {
        Ok(self.object(storage_key).await?.metadata)
    }

    async fn update_metadata(
        &self,
        storage_key: &str,
        custom_metadata: &BTreeMap<String, String>,
    ) -> StorageResult<ObjectMetadata> {
        validate_key(storage_key)?;
        let mut objects = self.objects.write().await;
        let object = objects
            .get_mut(storage_key)
            .ok_or_else(|| StorageError::NotFound(storage_key.to_string()))?;
        object.metadata.custom_metadata.extend(
            custom_metadata
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        Ok(object.metadata.clone())
    }

    fn backend_type(&self) -> StorageBackend {
        StorageBackend::Memory
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn upload_then_read_back() {
        let storage = MemoryStorage::new("memory://forms").with_chunk_size(3);
        let size = storage
            .upload_stream(
                "forms/a/b.pdf",
                "application/pdf",
                &BTreeMap::new(),
                Some(5),
                Box::pin(std::io::Cursor::new(b"hello".to_vec())),
                &|_| {},
                &TransferControl::new(),
            )
            .await
            .unwrap();

        assert_eq!(size, 5);
        assert_eq!(storage.download("forms/a/b.pdf").await.unwrap(), b"hello");
        assert_eq!(
            storage
                .get_presigned_url("forms/a/b.pdf", Duration::from_secs(1))
                .await
                .unwrap(),
            "memory://forms/forms/a/b.pdf"
        );
        assert_eq!(storage.upload_calls(), 1);
    }

    #[tokio::test]
    async fn update_metadata_merges_custom_keys() {
        let storage = MemoryStorage::new("memory://forms");
        let custom = BTreeMap::from([
            ("formId".to_string(), "a".to_string()),
            ("version".to_string(), "1".to_string()),
        ]);
        storage
            .upload_stream(
                "forms/a/b.pdf",
                "application/pdf",
                &custom,
                None,
                Box::pin(std::io::Cursor::new(b"hello".to_vec())),
                &|_| {},
                &TransferControl::new(),
            )
            .await
            .unwrap();

        let updated = storage
            .update_metadata(
                "forms/a/b.pdf",
                &BTreeMap::from([
                    ("version".to_string(), "2".to_string()),
                    ("reviewedBy".to_string(), "ops".to_string()),
                ]),
            )
            .await
            .unwrap();

        assert_eq!(updated.custom_metadata.get("formId").map(String::as_str), Some("a"));
        assert_eq!(updated.custom_metadata.get("version").map(String::as_str), Some("2"));
        assert_eq!(updated.custom_metadata.get("reviewedBy").map(String::as_str), Some("ops"));
        assert_eq!(
            updated.checksum.as_deref(),
            Some("2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824")
        );
        assert_eq!(storage.metadata("forms/a/b.pdf").await.unwrap(), updated);

        assert!(matches!(
            storage.update_metadata("forms/a/none.pdf", &BTreeMap::new()).await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn failing_uploads_store_nothing() {
        let storage = MemoryStorage::new("memory://forms").with_chunk_size(2);
        storage.set_fail_uploads(true);
        let result = storage
            .upload_stream(
                "forms/a/b.pdf",
                "application/pdf",
                &BTreeMap::new(),
                None,
                Box::pin(std::io::Cursor::new(b"hello".to_vec())),
                &|_| {},
                &TransferControl::new(),
            )
            .await;

        assert!(matches!(result, Err(StorageError::UploadFailed(_))));
        assert_eq!(storage.object_count().await, 0);
    }
}
