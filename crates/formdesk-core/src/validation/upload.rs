//! Upload validation and storage file naming

use std::path::Path;

use crate::error::AppError;

const MAX_BASE_NAME_LENGTH: usize = 200;
const DEFAULT_EXTENSION: &str = "pdf";

/// Normalize MIME type by stripping parameters (e.g. "application/pdf; charset=binary" -> "application/pdf").
pub fn normalize_mime_type(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .map(|s| s.trim())
        .unwrap_or(content_type)
        .to_lowercase()
}

/// Validate content type against allowlist. Compares normalized MIME type only.
pub fn validate_content_type(content_type: &str, allowed_types: &[String]) -> Result<(), AppError> {
    let normalized = normalize_mime_type(content_type);
    if !allowed_types
        .iter()
        .any(|ct| normalized == ct.to_lowercase())
    {
        return Err(AppError::Validation(
            "Only PDF files are allowed".to_string(),
        ));
    }
    Ok(())
}

/// Validate file size. Empty files are rejected too.
pub fn validate_file_size(file_size: u64, max_size: u64) -> Result<(), AppError> {
    if file_size == 0 {
        return Err(AppError::Validation("File is empty".to_string()));
    }
    if file_size > max_size {
        return Err(AppError::Validation(format!(
            "File size must be less than {} MB",
            max_size / 1024 / 1024
        )));
    }
    Ok(())
}

pub fn validate_file_name(name: &str) -> Result<(), AppError> {
    if name.trim().is_empty() {
        return Err(AppError::Validation(
            "File must have a valid name".to_string(),
        ));
    }
    Ok(())
}

/// Run every upload check in order: media type, size, name.
pub fn validate_form_file(
    name: &str,
    content_type: &str,
    size: u64,
    max_size: u64,
    allowed_types: &[String],
) -> Result<(), AppError> {
    validate_content_type(content_type, allowed_types)?;
    validate_file_size(size, max_size)?;
    validate_file_name(name)?;
    Ok(())
}

/// Base name of an uploaded file with every character outside `[A-Za-z0-9_-]` replaced by `_`.
///
/// Directory components and the final extension are dropped first.
pub fn sanitize_base_name(original_name: &str) -> String {
    let path = Path::new(original_name.trim());
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default();

    let sanitized: String = stem
        .chars()
        .take(MAX_BASE_NAME_LENGTH)
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect();

    if sanitized.is_empty() {
        return "file".to_string();
    }
    sanitized
}

fn file_extension(original_name: &str) -> String {
    Path::new(original_name.trim())
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            e.chars()
                .filter(|c| c.is_ascii_alphanumeric())
                .collect::<String>()
        })
        .filter(|e| !e.is_empty())
        .unwrap_or_else(|| DEFAULT_EXTENSION.to_string())
}

/// Unique storage file name: `{base}_v{version}_{timestamp_millis}.{ext}`.
pub fn generate_file_name(original_name: &str, version: &str, timestamp_millis: i64) -> String {
    let version: String = version
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect();
    format!(
        "{}_v{}_{}.{}",
        sanitize_base_name(original_name),
        version,
        timestamp_millis,
        file_extension(original_name)
    )
}
