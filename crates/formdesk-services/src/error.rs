//! Error logging for service operations

use formdesk_core::{AppError, ErrorMetadata, LogLevel};

/// Log `error` at the level its metadata asks for, with its code and error chain.
pub(crate) fn log_error(error: &AppError, message: &'static str) {
    let code = error.error_code();
    let error_type = error.error_type();
    let recoverable = error.is_recoverable();
    let suggested_action = error.suggested_action().unwrap_or("none");
    let details = error.detailed_message();

    match error.log_level() {
        LogLevel::Debug => {
            tracing::debug!(
                error = %details,
                error_code = %code,
                error_type = %error_type,
                recoverable,
                suggested_action = %suggested_action,
                "{}",
                message
            );
        }
        LogLevel::Warn => {
            tracing::warn!(
                error = %details,
                error_code = %code,
                error_type = %error_type,
                recoverable,
                suggested_action = %suggested_action,
                "{}",
                message
            );
        }
        LogLevel::Error => {
            tracing::error!(
                error = %details,
                error_code = %code,
                error_type = %error_type,
                recoverable,
                suggested_action = %suggested_action,
                "{}",
                message
            );
        }
    }
}
