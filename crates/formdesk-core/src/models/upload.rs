use serde::{Deserialize, Serialize};

/// State of an in-flight upload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UploadState {
    Running,
    Paused,
    Success,
    Canceled,
    Error,
}

impl UploadState {
    /// No further progress events follow a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            UploadState::Success | UploadState::Canceled | UploadState::Error
        )
    }
}

/// Snapshot of an upload's progress. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadProgress {
    pub bytes_transferred: u64,
    pub total_bytes: u64,
    pub state: UploadState,
}

impl UploadProgress {
    pub fn new(bytes_transferred: u64, total_bytes: u64, state: UploadState) -> Self {
        UploadProgress {
            bytes_transferred,
            total_bytes,
            state,
        }
    }

    /// Share of the file transferred, 0 to 100.
    pub fn percentage(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        (self.bytes_transferred as f64 / self.total_bytes as f64) * 100.0
    }
}
