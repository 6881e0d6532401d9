use crate::keys::{metadata_key, object_name, validate_key};
use crate::traits::{
    Checksum, MetadataSidecar, ObjectMetadata, Storage, StorageError, StorageResult, TransferControl,
    UploadReader,
};
use crate::StorageBackend;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

const DEFAULT_CHUNK_SIZE: usize = 256 * 1024;

/// Local filesystem storage implementation
#[derive(Clone)]
pub struct LocalStorage {
    base_path: PathBuf,
    base_url: String,
    chunk_size: usize,
}

impl LocalStorage {
    /// Create a new LocalStorage instance
    ///
    /// # Arguments
    /// * `base_path` - Root directory for file storage (e.g., "/var/lib/formdesk/files")
    /// * `base_url` - Base URL for serving files (e.g., "http://localhost:3000/files")
    pub async fn new(base_path: impl Into<PathBuf>, base_url: String) -> StorageResult<Self> {
        let base_path = base_path.into();

        fs::create_dir_all(&base_path).await.map_err(|e| {
            StorageError::ConfigError(format!(
                "Failed to create storage directory {}: {}",
                base_path.display(),
                e
            ))
        })?;

        Ok(LocalStorage {
            base_path,
            base_url,
            chunk_size: DEFAULT_CHUNK_SIZE,
        })
    }

    /// Bytes copied between progress reports and cancellation checks.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Convert storage key to filesystem path with security validation
    ///
    /// This function validates that the storage key doesn't contain path traversal
    /// sequences that could escape the base storage directory.
    fn key_to_path(&self, storage_key: &str) -> StorageResult<PathBuf> {
        validate_key(storage_key)?;

        let path = self.base_path.join(storage_key);

        let base_canonical = self.base_path.canonicalize().map_err(|e| {
            StorageError::ConfigError(format!("Failed to canonicalize base path: {}", e))
        })?;

        if let Ok(canonical) = path.canonicalize() {
            if canonical.strip_prefix(&base_canonical).is_err() {
                return Err(StorageError::InvalidKey(
                    "Storage key resolves outside storage directory".to_string(),
                ));
            }
        }

        Ok(path)
    }

    /// Generate public URL for file
    fn generate_url(&self, key: &str) -> String {
        let encoded: Vec<String> = key
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect();
        format!("{}/{}", self.base_url.trim_end_matches('/'), encoded.join("/"))
    }

    /// Ensure parent directory exists
    async fn ensure_parent_dir(&self, path: &Path) -> StorageResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    async fn copy_chunks(
        &self,
        file: &mut fs::File,
        mut reader: UploadReader,
        on_progress: &(dyn Fn(u64) + Send + Sync),
        control: &TransferControl,
    ) -> StorageResult<(u64, String)> {
        let mut buf = vec![0u8; self.chunk_size];
        let mut written: u64 = 0;
        let mut checksum = Checksum::default();

        loop {
            control.checkpoint().await?;

            let read = reader.read(&mut buf).await.map_err(|e| {
                StorageError::UploadFailed(format!("Failed to read from stream: {}", e))
            })?;
            if read == 0 {
                break;
            }

            file.write_all(&buf[..read]).await.map_err(|e| {
                StorageError::UploadFailed(format!("Failed to write chunk: {}", e))
            })?;
            checksum.update(&buf[..read]);
            written += read as u64;
            on_progress(written);
        }

        file.sync_all().await.map_err(|e| {
            StorageError::UploadFailed(format!("Failed to sync file: {}", e))
        })?;
        Ok((written, checksum.finish()))
    }

    async fn write_sidecar(
        &self,
        storage_key: &str,
        sidecar: &MetadataSidecar,
    ) -> StorageResult<()> {
        let raw = serde_json::to_vec(sidecar)
            .map_err(|e| StorageError::BackendError(e.to_string()))?;
        fs::write(self.key_to_path(&metadata_key(storage_key))?, raw).await?;
        Ok(())
    }

    async fn read_sidecar(&self, storage_key: &str) -> MetadataSidecar {
        let Ok(path) = self.key_to_path(&metadata_key(storage_key)) else {
            return MetadataSidecar::default();
        };
        match fs::read(&path).await {
            Ok(raw) => serde_json::from_slice(&raw).unwrap_or_else(|e| {
                tracing::warn!(
                    error = %e,
                    key = %storage_key,
                    "Ignoring unreadable metadata sidecar"
                );
                MetadataSidecar::default()
            }),
            Err(_) => MetadataSidecar::default(),
        }
    }
}

#[async_trait]
impl Storage for LocalStorage {
    async fn upload_stream(
        &self,
        storage_key: &str,
        content_type: &str,
        custom_metadata: &BTreeMap<String, String>,
        _content_length: Option<u64>,
        reader: UploadReader,
        on_progress: &(dyn Fn(u64) + Send + Sync),
        control: &TransferControl,
    ) -> StorageResult<u64> {
        let path = self.key_to_path(storage_key)?;
        let partial = path.with_extension("part");
        let start = std::time::Instant::now();

        self.ensure_parent_dir(&path).await?;

        let mut file = fs::File::create(&partial).await.map_err(|e| {
            StorageError::UploadFailed(format!(
                "Failed to create file {}: {}",
                partial.display(),
                e
            ))
        })?;

        let (bytes_copied, checksum) = match self
            .copy_chunks(&mut file, reader, on_progress, control)
            .await
        {
            Ok(n) => n,
            Err(e) => {
                drop(file);
                if let Err(cleanup) = fs::remove_file(&partial).await {
                    tracing::warn!(
                        error = %cleanup,
                        path = %partial.display(),
                        "Failed to remove partial upload"
                    );
                }
                tracing::info!(
                    key = %storage_key,
                    error = %e,
                    duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                    "Local storage stream upload stopped"
                );
                return Err(e);
            }
        };

        fs::rename(&partial, &path).await.map_err(|e| {
            StorageError::UploadFailed(format!(
                "Failed to move upload into place {}: {}",
                path.display(),
                e
            ))
        })?;

        let sidecar = MetadataSidecar {
            content_type: content_type.to_string(),
            custom_metadata: custom_metadata.clone(),
            checksum: Some(checksum),
        };
        self.write_sidecar(storage_key, &sidecar).await?;

        tracing::info!(
            path = %path.display(),
            key = %storage_key,
            size_bytes = bytes_copied,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Local storage stream upload successful"
        );

        Ok(bytes_copied)
    }

    async fn download(&self, storage_key: &str) -> StorageResult<Vec<u8>> {
        let path = self.key_to_path(storage_key)?;
        let start = std::time::Instant::now();

        if !fs::try_exists(&path).await.unwrap_or(false) {
            return Err(StorageError::NotFound(storage_key.to_string()));
        }

        let data = fs::read(&path).await.map_err(|e| {
            StorageError::DownloadFailed(format!("Failed to read file {}: {}", path.display(), e))
        })?;

        tracing::debug!(
            key = %storage_key,
            size_bytes = data.len(),
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Local storage download successful"
        );

        Ok(data)
    }

    async fn delete(&self, storage_key: &str) -> StorageResult<()> {
        let path = self.key_to_path(storage_key)?;

        if !fs::try_exists(&path).await.unwrap_or(false) {
            return Ok(());
        }

        fs::remove_file(&path).await.map_err(|e| {
            StorageError::DeleteFailed(format!("Failed to delete file {}: {}", path.display(), e))
        })?;

        let sidecar = self.key_to_path(&metadata_key(storage_key))?;
        if fs::try_exists(&sidecar).await.unwrap_or(false) {
            fs::remove_file(&sidecar).await.map_err(|e| {
                StorageError::DeleteFailed(format!("Failed to delete metadata: {}", e))
            })?;
        }

        tracing::info!(key = %storage_key, "Local storage delete successful");

        Ok(())
    }

    async fn get_presigned_url(
        &self,
        storage_key: &str,
        _expires_in: Duration,
    ) -> StorageResult<String> {
        let path = self.key_to_path(storage_key)?;
        if !fs::try_exists(&path).await.unwrap_or(false) {
            return Err(StorageError::NotFound(storage_key.to_string()));
        }
        Ok(self.generate_url(storage_key))
    }

    async fn exists(&self, storage_key: &str) -> StorageResult<bool> {
        let path = self.key_to_path(storage_key)?;
        Ok(fs::try_exists(&path).await.unwrap_or(false))
    }

    async fn content_length(&self, storage_key: &str) -> StorageResult<u64> {
        let path = self.key_to_path(storage_key)?;
        let meta = fs::metadata(&path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => StorageError::NotFound(storage_key.to_string()),
            _ => StorageError::BackendError(e.to_string()),
        })?;
        Ok(meta.len())
    }

    async fn metadata(&self, storage_key: &str) -> StorageResult<ObjectMetadata> {
        let path = self.key_to_path(storage_key)?;
        let meta = fs::metadata(&path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => StorageError::NotFound(storage_key.to_string()),
            _ => StorageError::BackendError(e.to_string()),
        })?;
        let last_modified = meta
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());
        let sidecar = self.read_sidecar(storage_key).await;

        Ok(ObjectMetadata {
            name: object_name(storage_key),
            size: meta.len(),
            content_type: sidecar.content_type,
            last_modified,
            custom_metadata: sidecar.custom_metadata,
            checksum: sidecar.checksum,
        })
    }

    async fn update_metadata(
        &self,
        storage_key: &str,
        custom_metadata: &BTreeMap<String, String>,
    ) -> StorageResult<ObjectMetadata> {
        if !self.exists(storage_key).await? {
            return Err(StorageError::NotFound(storage_key.to_string()));
        }

        let mut sidecar = self.read_sidecar(storage_key).await;
        sidecar.custom_metadata.extend(
            custom_metadata
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        self.write_sidecar(storage_key, &sidecar).await?;

        tracing::debug!(key = %storage_key, "Local storage metadata updated");
        self.metadata(storage_key).await
    }

    fn backend_type(&self) -> StorageBackend {
        StorageBackend::Local
    }
}
