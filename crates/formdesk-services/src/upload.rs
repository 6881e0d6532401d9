//! Form upload pipeline
//!
//! Validates a PDF, creates its form record, streams the file to blob storage under
//! `forms/{form_id}/{generated_name}` and finally links the stored file to the record.
//! Progress is reported through an [`UploadHandle`], which is also the caller's cancel and
//! pause switch.
//!
//! A record created before a failed or cancelled transfer is left in place.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use formdesk_core::models::{FormMetadata, FormPatch, UploadProgress, UploadState};
use formdesk_core::validation::{generate_file_name, normalize_mime_type, validate_form_file};
use formdesk_core::{format_file_size, AppError, Config};
use formdesk_storage::{
    form_file_key, ObjectMetadata, Storage, StorageError, TransferControl, UploadReader,
};
use tokio::io::AsyncReadExt;
use uuid::Uuid;

use crate::error::log_error;
use crate::forms::FormsRepository;

/// A file picked for upload.
pub struct UploadFile {
    pub name: String,
    pub content_type: String,
    /// Declared size in bytes.
    pub size: u64,
    pub reader: UploadReader,
}

impl UploadFile {
    pub fn new(
        name: impl Into<String>,
        content_type: impl Into<String>,
        size: u64,
        reader: UploadReader,
    ) -> Self {
        Self {
            name: name.into(),
            content_type: content_type.into(),
            size,
            reader,
        }
    }

    /// In-memory file, mostly useful in tests and small imports.
    pub fn from_bytes(
        name: impl Into<String>,
        content_type: impl Into<String>,
        data: Vec<u8>,
    ) -> Self {
        let size = data.len() as u64;
        Self::new(name, content_type, size, Box::pin(std::io::Cursor::new(data)))
    }
}

impl fmt::Debug for UploadFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UploadFile")
            .field("name", &self.name)
            .field("content_type", &self.content_type)
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

pub type ProgressCallback = Arc<dyn Fn(UploadProgress) + Send + Sync>;

#[derive(Default)]
struct Reporter {
    callback: Option<ProgressCallback>,
    total_bytes: u64,
    bytes_transferred: u64,
    started: bool,
    finished: bool,
}

impl Reporter {
    fn emit(&mut self, state: UploadState) {
        if self.finished {
            return;
        }
        self.finished = state.is_terminal();
        if let Some(callback) = &self.callback {
            callback(UploadProgress::new(
                self.bytes_transferred,
                self.total_bytes,
                state,
            ));
        }
    }
}

/// Caller-side handle of one upload: progress callback plus cancel and pause.
///
/// Events arrive in order with non-decreasing `bytes_transferred`, and nothing follows a
/// terminal event. The callback runs while the handle is locked, so it may cancel the
/// upload but must not pause or resume it.
#[derive(Clone, Default)]
pub struct UploadHandle {
    control: TransferControl,
    reporter: Arc<Mutex<Reporter>>,
}

impl UploadHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_progress<F>(callback: F) -> Self
    where
        F: Fn(UploadProgress) + Send + Sync + 'static,
    {
        let handle = Self::new();
        handle.reporter().callback = Some(Arc::new(callback));
        handle
    }

    fn reporter(&self) -> MutexGuard<'_, Reporter> {
        match self.reporter.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Abort the transfer at its next chunk boundary.
    pub fn cancel(&self) {
        self.control.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.control.is_cancelled()
    }

    /// Suspend the transfer between chunks. Returns false when already paused.
    pub fn pause(&self) -> bool {
        let paused = self.control.pause();
        if paused {
            let mut reporter = self.reporter();
            if reporter.started {
                reporter.emit(UploadState::Paused);
            }
        }
        paused
    }

    pub fn resume(&self) -> bool {
        let resumed = self.control.resume();
        if resumed {
            let mut reporter = self.reporter();
            if reporter.started {
                reporter.emit(UploadState::Running);
            }
        }
        resumed
    }

    pub fn is_paused(&self) -> bool {
        self.control.is_paused()
    }

    fn start(&self, total_bytes: u64) {
        let mut reporter = self.reporter();
        reporter.total_bytes = total_bytes;
        reporter.started = true;
        reporter.emit(UploadState::Running);
    }

    fn transferred(&self, bytes: u64) {
        let mut reporter = self.reporter();
        if bytes < reporter.bytes_transferred {
            return;
        }
        reporter.bytes_transferred = bytes;
        reporter.total_bytes = reporter.total_bytes.max(bytes);
        reporter.emit(UploadState::Running);
    }

    fn finish(&self, state: UploadState) {
        self.reporter().emit(state);
    }

    fn succeed(&self, stored_bytes: u64) {
        let mut reporter = self.reporter();
        reporter.bytes_transferred = reporter.bytes_transferred.max(stored_bytes);
        reporter.total_bytes = reporter.total_bytes.max(stored_bytes);
        reporter.emit(UploadState::Success);
    }
}

/// A file written to blob storage under a form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    pub key: String,
    pub url: String,
    pub metadata: ObjectMetadata,
}

#[derive(Clone)]
pub struct UploadPipeline {
    repository: FormsRepository,
    storage: Arc<dyn Storage>,
    max_upload_size: u64,
    allowed_content_types: Vec<String>,
    url_expiry: Duration,
}

impl UploadPipeline {
    pub fn new(repository: FormsRepository, storage: Arc<dyn Storage>, config: &Config) -> Self {
        Self {
            repository,
            storage,
            max_upload_size: config.max_upload_size_bytes,
            allowed_content_types: config.allowed_content_types.clone(),
            url_expiry: config.download_url_expiry(),
        }
    }

    pub fn repository(&self) -> &FormsRepository {
        &self.repository
    }

    fn validate(&self, file: &UploadFile, size: u64) -> Result<(), AppError> {
        validate_form_file(
            &file.name,
            &file.content_type,
            size,
            self.max_upload_size,
            &self.allowed_content_types,
        )
    }

    /// Create a form record, uploading its file first when one is given.
    ///
    /// Without a file this is [`FormsRepository::create_form`] and the record has no
    /// `file_url`.
    pub async fn submit_form(
        &self,
        file: Option<UploadFile>,
        metadata: FormMetadata,
        user_id: &str,
        handle: &UploadHandle,
    ) -> Result<Uuid, AppError> {
        match file {
            Some(file) => self.upload_form(file, metadata, user_id, handle).await,
            None => self.repository.create_form(metadata, user_id).await,
        }
    }

    /// Upload a form file and create its record. Returns the new form id.
    ///
    /// Validation failures are reported before the record is created or storage is
    /// touched. A cancelled upload fails with [`AppError::Cancelled`] and keeps the record.
    #[tracing::instrument(
        skip(self, file, metadata, handle),
        fields(file.name = %file.name, file.size = file.size, storage.backend = %self.storage.backend_type())
    )]
    pub async fn upload_form(
        &self,
        file: UploadFile,
        metadata: FormMetadata,
        user_id: &str,
        handle: &UploadHandle,
    ) -> Result<Uuid, AppError> {
        self.validate(&file, file.size)?;

        let version = metadata.version.clone();
        let form_id = self.repository.create_form(metadata, user_id).await?;
        let stored = self.transfer(form_id, file, &version, handle).await?;

        let file_size = match i64::try_from(stored.metadata.size) {
            Ok(size) => size,
            Err(_) => {
                handle.finish(UploadState::Error);
                return Err(AppError::Internal(format!(
                    "File size {} out of range",
                    stored.metadata.size
                )));
            }
        };
        let linked = self
            .repository
            .update_form(
                form_id,
                FormPatch::file_link(stored.url.clone(), file_size),
                user_id,
            )
            .await;
        match linked {
            Ok(_) => {
                handle.succeed(stored.metadata.size);
                tracing::info!(
                    form_id = %form_id,
                    key = %stored.key,
                    size = %format_file_size(stored.metadata.size),
                    "Form uploaded"
                );
                Ok(form_id)
            }
            Err(e) => {
                handle.finish(UploadState::Error);
                log_error(&e, "Failed to link uploaded file");
                Err(e)
            }
        }
    }

    /// Store several files under an existing form at once.
    ///
    /// File `n` (counting from 1) is stored as version `{version}_{n}` and reports through
    /// its own handle. Every file is validated before any transfer starts. If one transfer
    /// fails, the files already stored by the batch are removed again and the first error
    /// is returned. The form record is not modified.
    #[tracing::instrument(skip(self, files), fields(form.id = %form_id, files = files.len()))]
    pub async fn upload_files(
        &self,
        form_id: Uuid,
        files: Vec<(UploadFile, UploadHandle)>,
        version: &str,
    ) -> Result<Vec<StoredFile>, AppError> {
        for (file, _) in &files {
            self.validate(file, file.size)?;
        }
        self.repository.live_form(form_id).await?;

        let handles: Vec<UploadHandle> = files.iter().map(|(_, h)| h.clone()).collect();
        let transfers = files.into_iter().enumerate().map(|(index, (file, handle))| {
            let version = format!("{}_{}", version, index + 1);
            async move { self.transfer(form_id, file, &version, &handle).await }
        });
        let results = futures::future::join_all(transfers).await;

        if results.iter().all(Result::is_ok) {
            let stored: Vec<StoredFile> = results.into_iter().flatten().collect();
            for (handle, file) in handles.iter().zip(&stored) {
                handle.succeed(file.metadata.size);
            }
            tracing::info!(form_id = %form_id, files = stored.len(), "Form files uploaded");
            return Ok(stored);
        }

        let mut first_error = None;
        for (handle, result) in handles.iter().zip(results) {
            match result {
                Ok(stored) => {
                    handle.finish(UploadState::Canceled);
                    self.remove_object(&stored.key).await;
                }
                Err(e) => {
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }
        Err(first_error
            .unwrap_or_else(|| AppError::Internal("Batch upload failed".to_string())))
    }

    /// Stream one file to `forms/{form_id}/...`, enforcing the size limit on the bytes
    /// actually read. Emits `Running` events and, on failure, the terminal event.
    async fn transfer(
        &self,
        form_id: Uuid,
        file: UploadFile,
        version: &str,
        handle: &UploadHandle,
    ) -> Result<StoredFile, AppError> {
        let UploadFile {
            name,
            content_type,
            size: declared_size,
            reader,
        } = file;

        let uploaded_at = Utc::now();
        let file_name = generate_file_name(&name, version, uploaded_at.timestamp_millis());
        let key = form_file_key(form_id, &file_name);
        let custom_metadata = BTreeMap::from([
            ("formId".to_string(), form_id.to_string()),
            ("version".to_string(), version.to_string()),
            ("originalName".to_string(), name.clone()),
            ("uploadedAt".to_string(), uploaded_at.to_rfc3339()),
        ]);

        // One byte past the limit is enough to tell an oversized stream apart.
        let limited: UploadReader = Box::pin(reader.take(self.max_upload_size.saturating_add(1)));

        handle.start(declared_size);
        let uploaded = self
            .storage
            .upload_stream(
                &key,
                &normalize_mime_type(&content_type),
                &custom_metadata,
                Some(declared_size),
                limited,
                &|bytes| handle.transferred(bytes),
                &handle.control,
            )
            .await;

        let bytes = match uploaded {
            Ok(bytes) => bytes,
            Err(StorageError::Cancelled) => {
                handle.finish(UploadState::Canceled);
                let err = AppError::Cancelled(format!("Upload of {} was cancelled", name));
                log_error(&err, "Form upload cancelled, record kept");
                return Err(err);
            }
            Err(e) => {
                handle.finish(UploadState::Error);
                let err = AppError::Transfer(e.to_string());
                log_error(&err, "Form upload failed");
                return Err(err);
            }
        };
        tracing::debug!(form_id = %form_id, key = %key, bytes, "Form file transferred");

        let described = match self.validate_stored(&name, &content_type, bytes, declared_size) {
            Ok(()) => self.describe(&key).await,
            Err(e) => Err(e),
        };
        match described {
            Ok((url, metadata)) => Ok(StoredFile { key, url, metadata }),
            Err(e) => {
                handle.finish(UploadState::Error);
                log_error(&e, "Stored form file rejected");
                self.remove_object(&key).await;
                Err(e)
            }
        }
    }

    /// The stream, not the declared size, decides whether a file is acceptable.
    fn validate_stored(
        &self,
        name: &str,
        content_type: &str,
        stored: u64,
        declared: u64,
    ) -> Result<(), AppError> {
        validate_form_file(
            name,
            content_type,
            stored,
            self.max_upload_size,
            &self.allowed_content_types,
        )?;
        if stored != declared {
            return Err(AppError::Validation(format!(
                "File size {} does not match the declared size {}",
                stored, declared
            )));
        }
        Ok(())
    }

    async fn describe(&self, key: &str) -> Result<(String, ObjectMetadata), AppError> {
        let url = self.storage.get_presigned_url(key, self.url_expiry).await?;
        let metadata = self.storage.metadata(key).await?;
        Ok((url, metadata))
    }

    async fn remove_object(&self, key: &str) {
        if let Err(e) = self.storage.delete(key).await {
            tracing::warn!(error = %e, key = %key, "Failed to remove rejected form file");
        }
    }

    /// Remove a stored form file. The form record is not touched.
    #[tracing::instrument(skip(self), fields(form.id = %form_id))]
    pub async fn delete_form_file(&self, form_id: Uuid, file_name: &str) -> Result<(), AppError> {
        self.storage
            .delete(&form_file_key(form_id, file_name))
            .await?;
        tracing::info!(form_id = %form_id, file_name = %file_name, "Form file deleted");
        Ok(())
    }

    pub async fn file_metadata(
        &self,
        form_id: Uuid,
        file_name: &str,
    ) -> Result<ObjectMetadata, AppError> {
        Ok(self
            .storage
            .metadata(&form_file_key(form_id, file_name))
            .await?)
    }

    /// Merge `custom_metadata` into a stored file's custom metadata.
    #[tracing::instrument(skip(self, custom_metadata), fields(form.id = %form_id))]
    pub async fn update_file_metadata(
        &self,
        form_id: Uuid,
        file_name: &str,
        custom_metadata: &BTreeMap<String, String>,
    ) -> Result<ObjectMetadata, AppError> {
        let metadata = self
            .storage
            .update_metadata(&form_file_key(form_id, file_name), custom_metadata)
            .await?;
        tracing::info!(
            form_id = %form_id,
            file_name = %file_name,
            keys = ?custom_metadata.keys().collect::<Vec<_>>(),
            "Form file metadata updated"
        );
        Ok(metadata)
    }

    pub async fn download_url(&self, form_id: Uuid, file_name: &str) -> Result<String, AppError> {
        Ok(self
            .storage
            .get_presigned_url(&form_file_key(form_id, file_name), self.url_expiry)
            .await?)
    }
}
