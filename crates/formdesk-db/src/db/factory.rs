use std::sync::Arc;
use std::time::Duration;

use formdesk_core::{AppError, Config};
use sqlx::postgres::PgPoolOptions;

use super::forms::{FormStore, InMemoryFormStore, PostgresFormStore};

/// Create the forms store selected by configuration.
///
/// With a `DATABASE_URL` this connects, runs migrations and returns the PostgreSQL store;
/// without one it returns an empty in-memory store.
pub async fn create_form_store(config: &Config) -> Result<Arc<dyn FormStore>, AppError> {
    let Some(database_url) = config.database_url.as_deref() else {
        tracing::warn!("DATABASE_URL not set; using in-memory forms store");
        return Ok(Arc::new(InMemoryFormStore::new()));
    };

    let pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .acquire_timeout(Duration::from_secs(config.db_timeout_seconds))
        .connect(database_url)
        .await
        .map_err(|e| AppError::Persistence(format!("Failed to connect to database: {}", e)))?;

    let store = PostgresFormStore::new(pool);
    store.migrate().await?;

    tracing::info!(
        max_connections = config.db_max_connections,
        "Connected to PostgreSQL forms store"
    );
    Ok(Arc::new(store))
}
