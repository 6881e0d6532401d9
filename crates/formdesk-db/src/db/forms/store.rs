use std::collections::BTreeSet;
use std::pin::Pin;

use chrono::{DateTime, NaiveDate, Utc};
use formdesk_core::models::{
    ActivityEvent, AnalyticsCounter, DailyFormAnalytics, FormFilter, FormRecord,
};
use formdesk_core::AppError;
use futures::Stream;
use uuid::Uuid;

/// Notification that a form document was written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormChange {
    /// `None` when the feed lost track of individual changes and the consumer must resync.
    pub form_id: Option<Uuid>,
}

/// Stream of change notifications for the forms collection
pub type ChangeFeed = Pin<Box<dyn Stream<Item = FormChange> + Send>>;

/// Per-form counters bumped outside the normal update path
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormCounter {
    Views,
    Downloads,
}

/// Trait for the forms document store
///
/// Covers the `forms` collection plus the `user_activity` and `form_analytics` side
/// collections. Implementations return records exactly as stored; soft-delete semantics
/// are applied by the caller except where a method says otherwise.
#[async_trait::async_trait]
pub trait FormStore: Send + Sync {
    /// Insert a new record and return the id the store assigned to it.
    async fn insert_form(&self, record: FormRecord) -> Result<Uuid, AppError>;

    /// Fetch a record by id, deleted or not.
    async fn get_form(&self, id: Uuid) -> Result<Option<FormRecord>, AppError>;

    /// Overwrite every mutable field of an existing record. Last write wins.
    async fn replace_form(&self, record: &FormRecord) -> Result<(), AppError>;

    /// Non-deleted records matching the structured part of `filter`, ordered
    /// `updated_at DESC, id DESC`, strictly after `after` when given.
    async fn list_forms(
        &self,
        filter: &FormFilter,
        limit: usize,
        after: Option<(DateTime<Utc>, Uuid)>,
    ) -> Result<Vec<FormRecord>, AppError>;

    /// Non-deleted records whose keywords contain ANY of `tokens`, narrowed by `narrowing`,
    /// newest first.
    async fn search_forms(
        &self,
        tokens: &BTreeSet<String>,
        narrowing: &FormFilter,
        limit: usize,
    ) -> Result<Vec<FormRecord>, AppError>;

    /// Every non-deleted record.
    async fn scan_forms(&self) -> Result<Vec<FormRecord>, AppError>;

    async fn increment_counter(&self, id: Uuid, counter: FormCounter) -> Result<(), AppError>;

    async fn record_activity(&self, event: &ActivityEvent) -> Result<(), AppError>;

    /// Most recent activity entries, newest first.
    async fn recent_activity(&self, limit: usize) -> Result<Vec<ActivityEvent>, AppError>;

    /// Bump one counter of the `{form_id}_{date}` aggregate, creating it when missing.
    async fn bump_daily_analytics(
        &self,
        form_id: Uuid,
        date: NaiveDate,
        counter: AnalyticsCounter,
        user_id: &str,
    ) -> Result<(), AppError>;

    async fn get_daily_analytics(
        &self,
        form_id: Uuid,
        date: NaiveDate,
    ) -> Result<Option<DailyFormAnalytics>, AppError>;

    /// Open a fresh change feed. Every call gets an independent feed.
    async fn watch_changes(&self) -> Result<ChangeFeed, AppError>;
}
