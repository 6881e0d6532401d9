use crate::keys::{metadata_key, object_name, validate_key};
use crate::traits::{
    Checksum, MetadataSidecar, ObjectMetadata, Storage, StorageError, StorageResult, TransferControl,
    UploadReader,
};
use crate::StorageBackend;
use async_trait::async_trait;
use bytes::Bytes;
use http::Method;
use object_store::aws::{AmazonS3, AmazonS3Builder};
use object_store::path::Path;
use object_store::signer::Signer;
use object_store::Error as ObjectStoreError;
use object_store::{
    Attribute, AttributeValue, Attributes, MultipartUpload, ObjectStore, ObjectStoreExt,
    PutMultipartOptions, PutPayload, Result as ObjectResult,
};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::io::AsyncReadExt;

const DEFAULT_CHUNK_SIZE: usize = 5 * 1024 * 1024;

/// S3 storage implementation
#[derive(Clone)]
pub struct S3Storage {
    store: AmazonS3,
    bucket: String,
    chunk_size: usize,
}

impl S3Storage {
    /// Create a new S3Storage instance
    ///
    /// # Arguments
    /// * `bucket` - S3 bucket name
    /// * `region` - AWS region (or region identifier for S3-compatible providers)
    /// * `endpoint_url` - Optional custom endpoint URL for S3-compatible providers
    ///   (e.g., "http://localhost:9000" for MinIO)
    pub async fn new(
        bucket: String,
        region: String,
        endpoint_url: Option<String>,
    ) -> StorageResult<Self> {
        let mut builder = AmazonS3Builder::from_env()
            .with_region(region)
            .with_bucket_name(bucket.clone());

        if let Some(ref endpoint) = endpoint_url {
            let allow_http = endpoint.starts_with("http://");
            builder = builder
                .with_endpoint(endpoint.clone())
                .with_allow_http(allow_http);
        }

        let store = builder
            .build()
            .map_err(|e| StorageError::ConfigError(e.to_string()))?;

        Ok(S3Storage {
            store,
            bucket,
            chunk_size: DEFAULT_CHUNK_SIZE,
        })
    }

    /// Multipart part size. S3 requires at least 5 MiB for all but the last part.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(DEFAULT_CHUNK_SIZE);
        self
    }

    /// Upload the stream one full part at a time. Progress counts bytes S3 has accepted.
    async fn copy_parts(
        &self,
        upload: &mut dyn MultipartUpload,
        storage_key: &str,
        mut reader: UploadReader,
        on_progress: &(dyn Fn(u64) + Send + Sync),
        control: &TransferControl,
    ) -> StorageResult<(u64, String)> {
        let mut buf = vec![0u8; self.chunk_size];
        let mut uploaded: u64 = 0;
        let mut checksum = Checksum::default();
        let mut part_number = 0u32;

        loop {
            control.checkpoint().await?;

            let read = read_part(&mut reader, &mut buf).await?;
            // S3 needs at least one part, even for an empty object.
            if read == 0 && part_number > 0 {
                break;
            }
            part_number += 1;
            checksum.update(&buf[..read]);

            upload
                .put_part(PutPayload::from(Bytes::copy_from_slice(&buf[..read])))
                .await
                .map_err(|e| {
                    tracing::error!(
                        error = %e,
                        bucket = %self.bucket,
                        key = %storage_key,
                        part_number = part_number,
                        "Failed to upload part"
                    );
                    StorageError::UploadFailed(e.to_string())
                })?;
            uploaded += read as u64;
            on_progress(uploaded);

            // A short part means the stream is exhausted
            if read < buf.len() {
                break;
            }
        }

        Ok((uploaded, checksum.finish()))
    }

    async fn read_sidecar(&self, storage_key: &str) -> StorageResult<MetadataSidecar> {
        match self.download(&metadata_key(storage_key)).await {
            Ok(raw) => Ok(serde_json::from_slice(&raw).unwrap_or_else(|e| {
                tracing::warn!(
                    error = %e,
                    bucket = %self.bucket,
                    key = %storage_key,
                    "Ignoring unreadable metadata sidecar"
                );
                MetadataSidecar::default()
            })),
            Err(StorageError::NotFound(_)) => Ok(MetadataSidecar::default()),
            Err(e) => Err(e),
        }
    }

    async fn write_sidecar(
        &self,
        storage_key: &str,
        sidecar: &MetadataSidecar,
    ) -> StorageResult<()> {
        let raw = serde_json::to_vec(sidecar)
            .map_err(|e| StorageError::BackendError(e.to_string()))?;
        self.store
            .put(
                &Path::from(metadata_key(storage_key)),
                PutPayload::from(Bytes::from(raw)),
            )
            .await
            .map_err(|e| StorageError::UploadFailed(e.to_string()))?;
        Ok(())
    }
}

/// Fill `buf` from `reader`. Returns less than `buf.len()` only at end of stream.
async fn read_part(reader: &mut UploadReader, buf: &mut [u8]) -> StorageResult<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let read = reader.read(&mut buf[filled..]).await.map_err(|e| {
            StorageError::UploadFailed(format!("Failed to read from stream: {}", e))
        })?;
        if read == 0 {
            break;
        }
        filled += read;
    }
    Ok(filled)
}

#[async_trait]
impl Storage for S3Storage {
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
        validate_key(storage_key)?;
        let location = Path::from(storage_key.to_string());
        let start = std::time::Instant::now();

        let mut attributes = Attributes::new();
        attributes.insert(
            Attribute::ContentType,
            AttributeValue::from(content_type.to_string()),
        );
        let options = PutMultipartOptions {
            attributes,
            ..Default::default()
        };
        let mut upload = self
            .store
            .put_multipart_opts(&location, options)
            .await
            .map_err(|e| StorageError::UploadFailed(e.to_string()))?;

        let (size, checksum) = match self
            .copy_parts(upload.as_mut(), storage_key, reader, on_progress, control)
            .await
        {
            Ok(done) => done,
            Err(e) => {
                if let Err(abort) = upload.abort().await {
                    tracing::warn!(
                        error = %abort,
                        bucket = %self.bucket,
                        key = %storage_key,
                        "Failed to abort S3 multipart upload"
                    );
                }
                return Err(e);
            }
        };

        let result: ObjectResult<_> = upload.complete().await;
        result.map_err(|e| {
            tracing::error!(
                error = %e,
                bucket = %self.bucket,
                key = %storage_key,
                size_bytes = size,
                duration_ms = start.elapsed().as_secs_f64() * 1000.0,
                "S3 stream upload failed"
            );
            StorageError::UploadFailed(e.to_string())
        })?;

        let sidecar = MetadataSidecar {
            content_type: content_type.to_string(),
            custom_metadata: custom_metadata.clone(),
            checksum: Some(checksum),
        };
        self.write_sidecar(storage_key, &sidecar).await?;

        tracing::info!(
            bucket = %self.bucket,
            key = %storage_key,
            size_bytes = size,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "S3 stream upload successful"
        );

        Ok(size)
    }

    async fn download(&self, storage_key: &str) -> StorageResult<Vec<u8>> {
        let location = Path::from(storage_key.to_string());

        let result: ObjectResult<_> = self.store.get(&location).await;
        let result = result.map_err(|e| match e {
            ObjectStoreError::NotFound { .. } => StorageError::NotFound(storage_key.to_string()),
            other => StorageError::DownloadFailed(other.to_string()),
        })?;

        let bytes = result
            .bytes()
            .await
            .map_err(|e| StorageError::DownloadFailed(e.to_string()))?;
        Ok(bytes.to_vec())
    }

    async fn delete(&self, storage_key: &str) -> StorageResult<()> {
        for key in [storage_key.to_string(), metadata_key(storage_key)] {
            let location = Path::from(key);
            match self.store.delete(&location).await {
                Ok(()) | Err(ObjectStoreError::NotFound { .. }) => {}
                Err(e) => {
                    tracing::error!(
                        error = %e,
                        bucket = %self.bucket,
                        key = %storage_key,
                        "S3 delete failed"
                    );
                    return Err(StorageError::DeleteFailed(e.to_string()));
                }
            }
        }
        Ok(())
    }

    async fn get_presigned_url(
        &self,
        storage_key: &str,
        expires_in: Duration,
    ) -> StorageResult<String> {
        let location = Path::from(storage_key.to_string());
        let url_result: ObjectResult<_> = self
            .store
            .signed_url(Method::GET, &location, expires_in)
            .await;

        let url = url_result
            .map_err(|e| StorageError::BackendError(e.to_string()))?
            .to_string();

        Ok(url)
    }

    async fn exists(&self, storage_key: &str) -> StorageResult<bool> {
        let location = Path::from(storage_key.to_string());
        match self.store.head(&location).await {
            Ok(_) => Ok(true),
            Err(ObjectStoreError::NotFound { .. }) => Ok(false),
            Err(e) => Err(StorageError::BackendError(e.to_string())),
        }
    }

    async fn content_length(&self, storage_key: &str) -> StorageResult<u64> {
        Ok(self.metadata(storage_key).await?.size)
    }

    async fn metadata(&self, storage_key: &str) -> StorageResult<ObjectMetadata> {
        let location = Path::from(storage_key.to_string());
        let head = self.store.head(&location).await.map_err(|e| match e {
            ObjectStoreError::NotFound { .. } => StorageError::NotFound(storage_key.to_string()),
            other => StorageError::BackendError(other.to_string()),
        })?;

        let sidecar = self.read_sidecar(storage_key).await?;

        Ok(ObjectMetadata {
            name: object_name(storage_key),
            size: head.size as u64,
            content_type: sidecar.content_type,
            last_modified: head.last_modified,
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

        let mut sidecar = self.read_sidecar(storage_key).await?;
        sidecar.custom_metadata.extend(
            custom_metadata
                .iter()
                .map(|(k, v)| (k.clone(), v.clone())),
        );
        self.write_sidecar(storage_key, &sidecar).await?;

        tracing::debug!(bucket = %self.bucket, key = %storage_key, "S3 metadata updated");
        self.metadata(storage_key).await
    }

    fn backend_type(&self) -> StorageBackend {
        StorageBackend::S3
    }
}
