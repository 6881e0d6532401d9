//! Shared key generation for storage backends.
//!
//! Key format: `forms/{form_id}/{file_name}`.

use formdesk_core::constants::FORMS_STORAGE_PREFIX;
use uuid::Uuid;

use crate::traits::{StorageError, StorageResult};

/// Suffix of the object holding an object's content type and custom metadata.
pub(crate) const METADATA_SUFFIX: &str = ".metadata.json";

/// Generate the storage key of a form file.
///
/// All backends must use this format so files can be found again from a form id and a
/// file name alone.
pub fn form_file_key(form_id: Uuid, file_name: &str) -> String {
    format!("{}/{}/{}", FORMS_STORAGE_PREFIX, form_id, file_name)
}

/// Reject keys that could escape the storage root.
pub(crate) fn validate_key(storage_key: &str) -> StorageResult<()> {
    if storage_key.is_empty()
        || storage_key.contains("..")
        || storage_key.starts_with('/')
        || storage_key.contains('\\')
    {
        return Err(StorageError::InvalidKey(
            "Storage key contains invalid characters".to_string(),
        ));
    }
    Ok(())
}

pub(crate) fn metadata_key(storage_key: &str) -> String {
    format!("{}{}", storage_key, METADATA_SUFFIX)
}

/// Final path segment, used as the object name.
pub(crate) fn object_name(storage_key: &str) -> String {
    storage_key
        .rsplit('/')
        .next()
        .unwrap_or(storage_key)
        .to_string()
}
