//! Error types module
//!
//! All fallible operations in FormDesk return [`AppError`]. The variants follow the
//! failure taxonomy of the forms subsystem: validation problems are detected before any
//! network call, persistence and transfer failures come from the backing services, and
//! cancellation is always user initiated.
//!
//! `From<sqlx::Error>` is gated behind the `sqlx` feature.

use std::io;

#[cfg(feature = "sqlx")]
use sqlx::Error as SqlxError;

/// Log level for error reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    /// Debug level - for expected errors like validation failures
    Debug,
    /// Warning level - for user-initiated aborts and recoverable issues
    Warn,
    /// Error level - for unexpected failures
    Error,
}

/// Metadata describing how an error should be presented to callers.
pub trait ErrorMetadata {
    /// Machine-readable error code (e.g., "PERSISTENCE_ERROR")
    fn error_code(&self) -> &'static str;

    /// Whether re-submitting the same request may succeed
    fn is_recoverable(&self) -> bool;

    /// Suggested action for the caller
    fn suggested_action(&self) -> Option<&'static str>;

    /// Human-readable message shown to the caller
    fn client_message(&self) -> String;

    /// Log level for this error
    fn log_level(&self) -> LogLevel;
}

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Transfer error: {0}")]
    Transfer(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Internal error with source")]
    InternalWithSource {
        message: String,
        #[source]
        source: anyhow::Error,
    },
}

#[cfg(feature = "sqlx")]
impl From<SqlxError> for AppError {
    fn from(err: SqlxError) -> Self {
        AppError::Persistence(err.to_string())
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::InternalWithSource {
            message: err.to_string(),
            source: err,
        }
    }
}

impl From<io::Error> for AppError {
    fn from(err: io::Error) -> Self {
        AppError::Internal(format!("IO error: {}", err))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Persistence(format!("Malformed stored document: {}", err))
    }
}

/// Static metadata for each variant: (error_code, recoverable, suggested_action, log_level).
fn app_error_static_metadata(err: &AppError) -> (&'static str, bool, Option<&'static str>, LogLevel) {
    match err {
        AppError::Validation(_) => (
            "VALIDATION_ERROR",
            false,
            Some("Correct the file or form details and submit again"),
            LogLevel::Debug,
        ),
        AppError::Persistence(_) => (
            "PERSISTENCE_ERROR",
            true,
            Some("Retry after a short delay"),
            LogLevel::Error,
        ),
        AppError::Transfer(_) => (
            "TRANSFER_ERROR",
            true,
            Some("Check the connection and upload the file again"),
            LogLevel::Error,
        ),
        AppError::Cancelled(_) => ("CANCELLED", true, None, LogLevel::Warn),
        AppError::NotFound(_) => (
            "NOT_FOUND",
            false,
            Some("Verify the form ID exists"),
            LogLevel::Debug,
        ),
        AppError::Config(_) => (
            "CONFIG_ERROR",
            false,
            Some("Check the environment configuration"),
            LogLevel::Error,
        ),
        AppError::Internal(_) | AppError::InternalWithSource { .. } => (
            "INTERNAL_ERROR",
            true,
            Some("Retry after a short delay"),
            LogLevel::Error,
        ),
    }
}

impl AppError {
    /// Get the error type name for detailed error reporting
    pub fn error_type(&self) -> &str {
        match self {
            AppError::Validation(_) => "ValidationError",
            AppError::Persistence(_) => "PersistenceError",
            AppError::Transfer(_) => "TransferError",
            AppError::Cancelled(_) => "CancelledError",
            AppError::NotFound(_) => "NotFoundError",
            AppError::Config(_) => "ConfigError",
            AppError::Internal(_) | AppError::InternalWithSource { .. } => "InternalError",
        }
    }

    /// Get detailed error information including error chain
    pub fn detailed_message(&self) -> String {
        use std::error::Error;

        let mut details = self.to_string();

        let mut source = self.source();
        let mut depth = 0;
        while let Some(err) = source {
            depth += 1;
            if depth > 5 {
                details.push_str("\n  ... (truncated)");
                break;
            }
            details.push_str(&format!("\n  Caused by: {}", err));
            source = err.source();
        }

        details
    }
}

impl ErrorMetadata for AppError {
    fn error_code(&self) -> &'static str {
        app_error_static_metadata(self).0
    }

    fn is_recoverable(&self) -> bool {
        app_error_static_metadata(self).1
    }

    fn suggested_action(&self) -> Option<&'static str> {
        app_error_static_metadata(self).2
    }

    fn log_level(&self) -> LogLevel {
        app_error_static_metadata(self).3
    }

    fn client_message(&self) -> String {
        match self {
            AppError::Validation(ref msg) => msg.clone(),
            AppError::Persistence(_) => "Failed to access the forms database".to_string(),
            AppError::Transfer(ref msg) => format!("Upload failed: {}", msg),
            AppError::Cancelled(_) => "Upload cancelled".to_string(),
            AppError::NotFound(ref msg) => msg.clone(),
            AppError::Config(_) => "Service is misconfigured".to_string(),
            AppError::Internal(_) | AppError::InternalWithSource { .. } => {
                "Internal error".to_string()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_metadata_persistence() {
        let err = AppError::Persistence("connection reset".to_string());
        assert_eq!(err.error_code(), "PERSISTENCE_ERROR");
        assert!(err.is_recoverable());
        assert_eq!(err.client_message(), "Failed to access the forms database");
        assert_eq!(err.log_level(), LogLevel::Error);
    }

    #[cfg(feature = "sqlx")]
    #[test]
    fn test_sqlx_error_becomes_persistence() {
        let err = AppError::from(sqlx::Error::PoolClosed);
        assert!(matches!(err, AppError::Persistence(_)));
        assert_eq!(err.error_type(), "PersistenceError");
    }

    #[test]
    fn test_error_metadata_validation_keeps_message() {
        let err = AppError::Validation("Only PDF files are allowed".to_string());
        assert_eq!(err.error_code(), "VALIDATION_ERROR");
        assert!(!err.is_recoverable());
        assert_eq!(err.client_message(), "Only PDF files are allowed");
        assert_eq!(err.log_level(), LogLevel::Debug);
    }

    #[test]
    fn test_error_metadata_cancelled() {
        let err = AppError::Cancelled("upload aborted".to_string());
        assert_eq!(err.error_code(), "CANCELLED");
        assert_eq!(err.suggested_action(), None);
        assert_eq!(err.client_message(), "Upload cancelled");
    }

    #[test]
    fn test_detailed_message_includes_source_chain() {
        let err = AppError::from(anyhow::anyhow!("inner").context("outer"));
        let details = err.detailed_message();
        assert!(details.contains("Internal error with source"));
        assert!(details.contains("outer"));
    }
}
