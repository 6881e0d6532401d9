//! Validation modules

pub mod metadata;
pub mod upload;

pub use metadata::{validate_form_metadata, validate_state_code, MAX_TAGS, MAX_TITLE_LENGTH};
pub use upload::{
    generate_file_name, normalize_mime_type, sanitize_base_name, validate_content_type,
    validate_file_name, validate_file_size, validate_form_file,
};
