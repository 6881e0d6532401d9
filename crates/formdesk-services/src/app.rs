//! Service wiring
//!
//! Builds the store, blob storage, repository and upload pipeline from a [`Config`].

use std::sync::Arc;

use formdesk_core::{AppError, Config};
use formdesk_db::{create_form_store, FormStore};
use formdesk_storage::{create_storage, Storage};

use crate::forms::FormsRepository;
use crate::query::QueryController;
use crate::upload::UploadPipeline;

#[derive(Clone)]
pub struct FormDesk {
    config: Arc<Config>,
    repository: FormsRepository,
    uploads: UploadPipeline,
}

impl FormDesk {
    /// Connect to the configured backends.
    pub async fn connect(config: Config) -> Result<Self, AppError> {
        config
            .validate()
            .map_err(|e| AppError::Config(e.to_string()))?;

        let store = create_form_store(&config).await?;
        let storage = create_storage(&config).await?;
        tracing::info!(
            environment = %config.environment,
            storage.backend = %storage.backend_type(),
            "FormDesk services ready"
        );
        Ok(Self::with_backends(config, store, storage))
    }

    /// Wire already constructed backends.
    pub fn with_backends(
        config: Config,
        store: Arc<dyn FormStore>,
        storage: Arc<dyn Storage>,
    ) -> Self {
        let repository = FormsRepository::new(store, &config);
        let uploads = UploadPipeline::new(repository.clone(), storage, &config);
        Self {
            config: Arc::new(config),
            repository,
            uploads,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn forms(&self) -> &FormsRepository {
        &self.repository
    }

    pub fn uploads(&self) -> &UploadPipeline {
        &self.uploads
    }

    /// A fresh controller with its own state.
    pub fn query_controller(&self) -> QueryController {
        QueryController::new(self.repository.clone(), &self.config)
    }

    /// Wait for outstanding side effects before the process exits.
    pub async fn shutdown(&self) {
        self.repository.flush_side_effects().await;
        tracing::info!("FormDesk services stopped");
    }
}
