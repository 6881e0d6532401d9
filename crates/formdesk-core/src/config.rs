//! Configuration module
//!
//! Settings for the document store, blob storage, upload limits and the query layer.
//! Everything is read from the environment (optionally seeded from a `.env` file).

use std::env;
use std::time::Duration;

use crate::constants::{
    DEFAULT_PAGE_SIZE, DEFAULT_RECENT_UPLOAD_DAYS, DEFAULT_SEARCH_PAGE_SIZE,
    DEFAULT_SUBSCRIPTION_LIMIT, MAX_UPLOAD_SIZE_BYTES, PDF_CONTENT_TYPE,
};
use crate::storage_types::StorageBackend;

const MAX_CONNECTIONS: u32 = 10;
const CONNECTION_TIMEOUT_SECS: u64 = 30;
const DOWNLOAD_URL_EXPIRY_SECS: u64 = 3600;
const UPLOAD_CHUNK_SIZE_KB: usize = 256;
const QUERY_DEBOUNCE_MS: u64 = 300;

/// Application configuration
#[derive(Clone, Debug)]
pub struct Config {
    pub environment: String,
    /// Absent means the in-memory document store is used.
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub db_timeout_seconds: u64,
    // Storage configuration
    pub storage_backend: StorageBackend,
    pub local_storage_path: Option<String>,
    pub local_storage_base_url: Option<String>,
    pub s3_bucket: Option<String>,
    pub s3_region: Option<String>,
    pub s3_endpoint: Option<String>, // Custom endpoint for S3-compatible providers (MinIO etc.)
    pub download_url_expiry_secs: u64,
    // Upload configuration
    pub max_upload_size_bytes: u64,
    pub allowed_content_types: Vec<String>,
    pub upload_chunk_size_bytes: usize,
    // Query configuration
    pub forms_page_size: usize,
    pub search_page_size: usize,
    pub subscription_limit: usize,
    pub recent_upload_days: i64,
    pub query_debounce_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            environment: "development".to_string(),
            database_url: None,
            db_max_connections: MAX_CONNECTIONS,
            db_timeout_seconds: CONNECTION_TIMEOUT_SECS,
            storage_backend: StorageBackend::Memory,
            local_storage_path: None,
            local_storage_base_url: None,
            s3_bucket: None,
            s3_region: None,
            s3_endpoint: None,
            download_url_expiry_secs: DOWNLOAD_URL_EXPIRY_SECS,
            max_upload_size_bytes: MAX_UPLOAD_SIZE_BYTES,
            allowed_content_types: vec![PDF_CONTENT_TYPE.to_string()],
            upload_chunk_size_bytes: UPLOAD_CHUNK_SIZE_KB * 1024,
            forms_page_size: DEFAULT_PAGE_SIZE,
            search_page_size: DEFAULT_SEARCH_PAGE_SIZE,
            subscription_limit: DEFAULT_SUBSCRIPTION_LIMIT,
            recent_upload_days: DEFAULT_RECENT_UPLOAD_DAYS,
            query_debounce_ms: QUERY_DEBOUNCE_MS,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, anyhow::Error> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, anyhow::Error>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();
        let var = |key: &str| lookup(key).filter(|s| !s.trim().is_empty());

        let storage_backend = match var("STORAGE_BACKEND") {
            Some(raw) => raw.parse::<StorageBackend>()?,
            None => defaults.storage_backend,
        };

        let max_upload_size_mb = var("MAX_UPLOAD_SIZE_MB")
            .unwrap_or_else(|| (MAX_UPLOAD_SIZE_BYTES / 1024 / 1024).to_string())
            .parse::<u64>()
            .unwrap_or(MAX_UPLOAD_SIZE_BYTES / 1024 / 1024);

        let allowed_content_types = var("ALLOWED_CONTENT_TYPES")
            .unwrap_or_else(|| PDF_CONTENT_TYPE.to_string())
            .split(',')
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect();

        let upload_chunk_size_kb = var("UPLOAD_CHUNK_SIZE_KB")
            .unwrap_or_else(|| UPLOAD_CHUNK_SIZE_KB.to_string())
            .parse::<usize>()
            .unwrap_or(UPLOAD_CHUNK_SIZE_KB);

        let config = Config {
            environment: var("ENVIRONMENT")
                .or_else(|| var("APP_ENV"))
                .unwrap_or(defaults.environment),
            database_url: var("DATABASE_URL"),
            db_max_connections: var("DB_MAX_CONNECTIONS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(MAX_CONNECTIONS),
            db_timeout_seconds: var("DB_TIMEOUT_SECONDS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(CONNECTION_TIMEOUT_SECS),
            storage_backend,
            local_storage_path: var("LOCAL_STORAGE_PATH"),
            local_storage_base_url: var("LOCAL_STORAGE_BASE_URL"),
            s3_bucket: var("S3_BUCKET"),
            s3_region: var("S3_REGION").or_else(|| var("AWS_REGION")),
            s3_endpoint: var("S3_ENDPOINT"),
            download_url_expiry_secs: var("DOWNLOAD_URL_EXPIRY_SECS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(DOWNLOAD_URL_EXPIRY_SECS),
            max_upload_size_bytes: max_upload_size_mb * 1024 * 1024,
            allowed_content_types,
            upload_chunk_size_bytes: upload_chunk_size_kb * 1024,
            forms_page_size: var("FORMS_PAGE_SIZE")
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_PAGE_SIZE),
            search_page_size: var("SEARCH_PAGE_SIZE")
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_SEARCH_PAGE_SIZE),
            subscription_limit: var("SUBSCRIPTION_LIMIT")
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_SUBSCRIPTION_LIMIT),
            recent_upload_days: var("RECENT_UPLOAD_DAYS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(DEFAULT_RECENT_UPLOAD_DAYS),
            query_debounce_ms: var("QUERY_DEBOUNCE_MS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(QUERY_DEBOUNCE_MS),
        };

        config.validate()?;
        Ok(config)
    }

    /// Check if the application is running in production mode
    pub fn is_production(&self) -> bool {
        let env = self.environment.to_lowercase();
        env == "production" || env == "prod"
    }

    pub fn query_debounce(&self) -> Duration {
        Duration::from_millis(self.query_debounce_ms)
    }

    pub fn download_url_expiry(&self) -> Duration {
        Duration::from_secs(self.download_url_expiry_secs)
    }

    pub fn validate(&self) -> Result<(), anyhow::Error> {
        if let Some(url) = &self.database_url {
            if !url.starts_with("postgres://") && !url.starts_with("postgresql://") {
                return Err(anyhow::anyhow!(
                    "DATABASE_URL must be a valid PostgreSQL connection string"
                ));
            }
        }

        if self.allowed_content_types.is_empty() {
            return Err(anyhow::anyhow!(
                "ALLOWED_CONTENT_TYPES must list at least one media type"
            ));
        }

        if self.max_upload_size_bytes == 0 {
            return Err(anyhow::anyhow!("MAX_UPLOAD_SIZE_MB must be greater than 0"));
        }

        if self.upload_chunk_size_bytes == 0 {
            return Err(anyhow::anyhow!("UPLOAD_CHUNK_SIZE_KB must be greater than 0"));
        }

        if self.forms_page_size == 0 || self.search_page_size == 0 || self.subscription_limit == 0 {
            return Err(anyhow::anyhow!(
                "FORMS_PAGE_SIZE, SEARCH_PAGE_SIZE and SUBSCRIPTION_LIMIT must be greater than 0"
            ));
        }

        if self.recent_upload_days < 0 {
            return Err(anyhow::anyhow!("RECENT_UPLOAD_DAYS cannot be negative"));
        }

        // Validate storage backend configuration
        match self.storage_backend {
            StorageBackend::S3 => {
                if self.s3_bucket.is_none() {
                    return Err(anyhow::anyhow!(
                        "S3_BUCKET must be set when using S3 storage backend"
                    ));
                }
                if self.s3_region.is_none() {
                    return Err(anyhow::anyhow!(
                        "S3_REGION or AWS_REGION must be set when using S3 storage backend"
                    ));
                }
            }
            StorageBackend::Local => {
                if self.local_storage_path.is_none() {
                    return Err(anyhow::anyhow!(
                        "LOCAL_STORAGE_PATH must be set when using local storage backend"
                    ));
                }
                if self.local_storage_base_url.is_none() {
                    return Err(anyhow::anyhow!(
                        "LOCAL_STORAGE_BASE_URL must be set when using local storage backend"
                    ));
                }
            }
            StorageBackend::Memory => {
                if self.is_production() {
                    return Err(anyhow::anyhow!(
                        "The memory storage backend cannot be used in production"
                    ));
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn empty_environment_gives_defaults() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.storage_backend, StorageBackend::Memory);
        assert!(config.database_url.is_none());
        assert_eq!(config.max_upload_size_bytes, 50 * 1024 * 1024);
        assert_eq!(config.allowed_content_types, vec!["application/pdf"]);
        assert_eq!(config.forms_page_size, 20);
        assert_eq!(config.subscription_limit, 50);
        assert_eq!(config.query_debounce(), Duration::from_millis(300));
    }

    #[test]
    fn reads_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("STORAGE_BACKEND", "local"),
            ("LOCAL_STORAGE_PATH", "/tmp/forms"),
            ("LOCAL_STORAGE_BASE_URL", "http://localhost:3000/files"),
            ("MAX_UPLOAD_SIZE_MB", "10"),
            ("FORMS_PAGE_SIZE", "5"),
            ("DATABASE_URL", "postgresql://localhost/formdesk"),
        ]))
        .unwrap();
        assert_eq!(config.storage_backend, StorageBackend::Local);
        assert_eq!(config.max_upload_size_bytes, 10 * 1024 * 1024);
        assert_eq!(config.forms_page_size, 5);
        assert_eq!(config.database_url.as_deref(), Some("postgresql://localhost/formdesk"));
    }

    #[test]
    fn unparsable_numbers_fall_back() {
        let config = Config::from_lookup(lookup(&[("SEARCH_PAGE_SIZE", "lots")])).unwrap();
        assert_eq!(config.search_page_size, 20);
    }

    #[test]
    fn local_backend_requires_path() {
        let err = Config::from_lookup(lookup(&[("STORAGE_BACKEND", "local")])).unwrap_err();
        assert!(err.to_string().contains("LOCAL_STORAGE_PATH"));
    }

    #[test]
    fn s3_backend_requires_bucket() {
        let err = Config::from_lookup(lookup(&[("STORAGE_BACKEND", "s3")])).unwrap_err();
        assert!(err.to_string().contains("S3_BUCKET"));
    }

    #[test]
    fn rejects_non_postgres_url() {
        assert!(Config::from_lookup(lookup(&[("DATABASE_URL", "mysql://x")])).is_err());
    }

    #[test]
    fn memory_storage_not_allowed_in_production() {
        assert!(Config::from_lookup(lookup(&[("ENVIRONMENT", "production")])).is_err());
    }
}
