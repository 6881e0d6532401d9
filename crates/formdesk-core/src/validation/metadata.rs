//! Form metadata validation

use crate::error::AppError;
use crate::models::FormMetadata;

pub const MAX_TITLE_LENGTH: usize = 500;
pub const MAX_TAGS: usize = 50;

/// Two-letter postal code, e.g. `TX`.
pub fn validate_state_code(code: &str) -> Result<(), AppError> {
    if code.len() != 2 || !code.chars().all(|c| c.is_ascii_uppercase()) {
        return Err(AppError::Validation(format!(
            "Invalid state code '{}': expected two uppercase letters",
            code
        )));
    }
    Ok(())
}

/// Check caller-supplied form metadata before it is written.
pub fn validate_form_metadata(metadata: &FormMetadata) -> Result<(), AppError> {
    if metadata.title.trim().is_empty() {
        return Err(AppError::Validation("Form title is required".to_string()));
    }
    if metadata.title.chars().count() > MAX_TITLE_LENGTH {
        return Err(AppError::Validation(format!(
            "Form title cannot exceed {} characters",
            MAX_TITLE_LENGTH
        )));
    }
    if metadata.form_number.trim().is_empty() {
        return Err(AppError::Validation("Form number is required".to_string()));
    }
    if metadata.version.trim().is_empty() {
        return Err(AppError::Validation("Form version is required".to_string()));
    }
    if metadata.tags.len() > MAX_TAGS {
        return Err(AppError::Validation(format!(
            "A form cannot have more than {} tags",
            MAX_TAGS
        )));
    }
    for state in &metadata.state_applicability {
        validate_state_code(state)?;
    }
    if let Some(expiration) = metadata.expiration_date {
        if expiration < metadata.effective_date {
            return Err(AppError::Validation(
                "Expiration date cannot be before the effective date".to_string(),
            ));
        }
    }
    Ok(())
}
