//! Shared constants for the forms subsystem.

/// Largest accepted form file (50 MiB).
pub const MAX_UPLOAD_SIZE_BYTES: u64 = 50 * 1024 * 1024;

/// The only media type accepted for form files.
pub const PDF_CONTENT_TYPE: &str = "application/pdf";

/// Default page size for structured listing.
pub const DEFAULT_PAGE_SIZE: usize = 20;

/// Default cap on keyword search results.
pub const DEFAULT_SEARCH_PAGE_SIZE: usize = 20;

/// Maximum number of records pushed per realtime snapshot.
pub const DEFAULT_SUBSCRIPTION_LIMIT: usize = 50;

/// Window used for `recent_uploads` in statistics.
pub const DEFAULT_RECENT_UPLOAD_DAYS: i64 = 30;

/// Title and description words must be longer than this to become keywords.
pub const MIN_KEYWORD_WORD_LEN: usize = 2;

/// Top-level prefix for form files in blob storage.
pub const FORMS_STORAGE_PREFIX: &str = "forms";
