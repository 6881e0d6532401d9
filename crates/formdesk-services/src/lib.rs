//! FormDesk Services Layer
//!
//! This crate is the **business service layer** of FormDesk: the forms repository, the
//! upload pipeline and the query controller, plus the wiring that builds them from a
//! [`Config`](formdesk_core::Config). Persistence lives in `formdesk-db`, blob storage in
//! `formdesk-storage`.

pub mod activity;
pub mod app;
mod error;
pub mod forms;
pub mod query;
pub mod subscription;
pub mod telemetry;
pub mod upload;

pub use activity::ActivityRecorder;
pub use app::FormDesk;
pub use forms::FormsRepository;
pub use query::{QueryController, QueryState};
pub use subscription::FormSubscription;
pub use telemetry::init_tracing;
pub use upload::{ProgressCallback, StoredFile, UploadFile, UploadHandle, UploadPipeline};

pub use formdesk_core::{AppError, Config};
pub use formdesk_storage::{create_storage, Storage, StorageBackend, StorageError};
