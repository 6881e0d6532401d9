//! Test helpers: wire FormDesk services over in-memory backends.
//!
//! Run from workspace root: `cargo test -p formdesk-services`.

pub mod fixtures;

use std::sync::Arc;
use std::time::Duration;

use formdesk_core::Config;
use formdesk_db::InMemoryFormStore;
use formdesk_services::FormDesk;
use formdesk_storage::{MemoryStorage, Storage};

pub const MEMORY_BASE_URL: &str = "memory://formdesk";

/// Test application: services plus direct handles on the backends.
pub struct TestApp {
    pub app: FormDesk,
    pub store: Arc<InMemoryFormStore>,
    pub storage: Arc<MemoryStorage>,
}

impl TestApp {
    pub fn forms(&self) -> &formdesk_services::FormsRepository {
        self.app.forms()
    }

    pub fn uploads(&self) -> &formdesk_services::UploadPipeline {
        self.app.uploads()
    }
}

/// Defaults with a short debounce so controller tests stay fast.
pub fn test_config() -> Config {
    Config {
        query_debounce_ms: 20,
        ..Config::default()
    }
}

pub fn setup_test_app() -> TestApp {
    setup_test_app_with(test_config(), MemoryStorage::new(MEMORY_BASE_URL))
}

pub fn setup_test_app_with(config: Config, storage: MemoryStorage) -> TestApp {
    let store = Arc::new(InMemoryFormStore::new());
    let storage = Arc::new(storage);
    let app = FormDesk::with_backends(config, store.clone(), storage.clone() as Arc<dyn Storage>);
    TestApp {
        app,
        store,
        storage,
    }
}

/// Poll `check` until it holds or a second has passed.
pub async fn eventually<F>(mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
