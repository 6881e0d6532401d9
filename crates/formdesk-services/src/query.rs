//! Query controller
//!
//! Request-scoped holder of a form list view: the current records, loading and error
//! flags, the search text, the structured filter and the pagination cursor. Instances are
//! independent and cheap to clone; clones share state.
//!
//! Every reload takes a new generation number. A response is applied only if no newer
//! reload started while it was in flight.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use formdesk_core::models::{FormCursor, FormFilter, FormRecord};
use formdesk_core::{AppError, Config, ErrorMetadata};

use crate::error::log_error;
use crate::forms::FormsRepository;

#[derive(Debug, Clone, Default)]
pub struct QueryState {
    pub records: Vec<FormRecord>,
    pub loading: bool,
    pub error: Option<String>,
    pub has_more: bool,
    pub search_text: String,
    pub filter: FormFilter,
    cursor: Option<FormCursor>,
}

#[derive(Clone)]
pub struct QueryController {
    repository: FormsRepository,
    page_size: usize,
    debounce: Duration,
    state: Arc<Mutex<QueryState>>,
    generation: Arc<AtomicU64>,
    search_generation: Arc<AtomicU64>,
}

impl QueryController {
    pub fn new(repository: FormsRepository, config: &Config) -> Self {
        Self::with_filter(repository, config, FormFilter::default())
    }

    pub fn with_filter(repository: FormsRepository, config: &Config, filter: FormFilter) -> Self {
        Self {
            repository,
            page_size: config.forms_page_size,
            debounce: config.query_debounce(),
            state: Arc::new(Mutex::new(QueryState {
                filter,
                ..Default::default()
            })),
            generation: Arc::new(AtomicU64::new(0)),
            search_generation: Arc::new(AtomicU64::new(0)),
        }
    }

    fn state(&self) -> MutexGuard<'_, QueryState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn snapshot(&self) -> QueryState {
        self.state().clone()
    }

    pub fn records(&self) -> Vec<FormRecord> {
        self.state().records.clone()
    }

    pub fn loading(&self) -> bool {
        self.state().loading
    }

    pub fn error(&self) -> Option<String> {
        self.state().error.clone()
    }

    pub fn has_more(&self) -> bool {
        self.state().has_more
    }

    pub fn search_text(&self) -> String {
        self.state().search_text.clone()
    }

    pub fn filter(&self) -> FormFilter {
        self.state().filter.clone()
    }

    /// Change the search text and reload once it has been stable for the debounce delay.
    ///
    /// A call superseded by a later one returns without querying. Pagination stops as
    /// soon as the text changes, so no page of the old listing is appended meanwhile.
    pub async fn set_search_text(&self, text: impl Into<String>) {
        let ticket = self.search_generation.fetch_add(1, Ordering::SeqCst) + 1;
        {
            let mut state = self.state();
            state.search_text = text.into();
            state.has_more = false;
            state.cursor = None;
            self.generation.fetch_add(1, Ordering::SeqCst);
        }

        tokio::time::sleep(self.debounce).await;
        if self.search_generation.load(Ordering::SeqCst) != ticket {
            tracing::trace!("Search text superseded before debounce elapsed");
            return;
        }
        self.reload().await;
    }

    pub async fn set_filter(&self, filter: FormFilter) {
        self.state().filter = filter;
        self.reload().await;
    }

    /// Reload from the first page, replacing the current records.
    pub async fn refresh(&self) {
        self.reload().await;
    }

    /// Append the next page. Does nothing while loading or when no page is left.
    pub async fn load_more(&self) {
        let (filter, cursor, generation) = {
            let mut state = self.state();
            if state.loading || !state.has_more {
                return;
            }
            state.loading = true;
            (
                state.filter.clone(),
                state.cursor.clone(),
                self.generation.load(Ordering::SeqCst),
            )
        };

        let result = self
            .repository
            .list_forms(&filter, self.page_size, cursor.as_ref())
            .await;

        if self.generation.load(Ordering::SeqCst) != generation {
            tracing::debug!("Discarding stale page");
            return;
        }
        let mut state = self.state();
        state.loading = false;
        match result {
            Ok(page) => {
                state.records.extend(page.records);
                state.cursor = page.next_cursor;
                state.has_more = page.has_more;
                state.error = None;
            }
            Err(e) => Self::fail(&mut state, &e),
        }
    }

    async fn reload(&self) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let (filter, text) = {
            let mut state = self.state();
            state.loading = true;
            state.error = None;
            (state.filter.clone(), state.search_text.trim().to_string())
        };

        let result = if text.is_empty() {
            self.repository
                .list_forms(&filter, self.page_size, None)
                .await
                .map(|page| (page.records, page.next_cursor, page.has_more))
        } else {
            self.repository
                .search_forms(&text, &filter)
                .await
                .map(|records| (records, None, false))
        };

        if self.generation.load(Ordering::SeqCst) != generation {
            tracing::debug!(generation, "Discarding stale query response");
            return;
        }
        let mut state = self.state();
        state.loading = false;
        match result {
            Ok((records, cursor, has_more)) => {
                state.records = records;
                state.cursor = cursor;
                state.has_more = has_more;
            }
            Err(e) => {
                state.records.clear();
                state.cursor = None;
                state.has_more = false;
                Self::fail(&mut state, &e);
            }
        }
    }

    fn fail(state: &mut QueryState, error: &AppError) {
        log_error(error, "Form query failed");
        state.error = Some(error.client_message());
    }
}
