//! Forms repository
//!
//! Business operations over the forms collection: creation, listing, keyword search,
//! partial updates, soft delete, statistics and realtime subscriptions. Primary operations
//! propagate store failures. Counters, activity and analytics are handed to the
//! [`ActivityRecorder`] and never fail the caller.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::NaiveDate;
use formdesk_core::clock;
use formdesk_core::models::{
    ActivityAction, ActivityEvent, AnalyticsCounter, DailyFormAnalytics, FormCursor, FormFilter,
    FormMetadata, FormPage, FormPatch, FormRecord, FormStats,
};
use formdesk_core::validation::validate_form_metadata;
use formdesk_core::{tokenize_query, AppError, Config};
use formdesk_db::{FormCounter, FormStore};
use uuid::Uuid;

use crate::activity::ActivityRecorder;
use crate::subscription::FormSubscription;

#[derive(Clone)]
pub struct FormsRepository {
    store: Arc<dyn FormStore>,
    activity: ActivityRecorder,
    page_size: usize,
    search_page_size: usize,
    subscription_limit: usize,
    recent_upload_days: i64,
    active_subscriptions: Arc<AtomicUsize>,
}

impl FormsRepository {
    pub fn new(store: Arc<dyn FormStore>, config: &Config) -> Self {
        Self {
            activity: ActivityRecorder::new(store.clone()),
            store,
            page_size: config.forms_page_size,
            search_page_size: config.search_page_size,
            subscription_limit: config.subscription_limit,
            recent_upload_days: config.recent_upload_days,
            active_subscriptions: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Default page size for [`FormsRepository::list_forms`].
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Create a new form record and return its id.
    #[tracing::instrument(skip(self, metadata), fields(form.number = %metadata.form_number))]
    pub async fn create_form(
        &self,
        metadata: FormMetadata,
        user_id: &str,
    ) -> Result<Uuid, AppError> {
        validate_form_metadata(&metadata)?;

        let record = FormRecord::new(metadata, user_id, clock::now());
        let form_id = self.store.insert_form(record).await?;

        self.activity
            .record(user_id, ActivityAction::Upload, Some(form_id), None);
        tracing::info!(form_id = %form_id, user_id = %user_id, "Form created");
        Ok(form_id)
    }

    /// One page of non-deleted records matching the structured part of `filter`.
    #[tracing::instrument(skip(self, filter, cursor))]
    pub async fn list_forms(
        &self,
        filter: &FormFilter,
        page_size: usize,
        cursor: Option<&FormCursor>,
    ) -> Result<FormPage, AppError> {
        if page_size == 0 {
            return Err(AppError::Validation(
                "Page size must be at least 1".to_string(),
            ));
        }
        let after = cursor.map(FormCursor::position).transpose()?;
        let records = self.store.list_forms(filter, page_size, after).await?;
        Ok(FormPage::from_records(records, page_size))
    }

    /// Records whose keywords contain ANY token of `text`, narrowed by category and
    /// activity, newest first.
    ///
    /// Blank text returns the first page of [`FormsRepository::list_forms`].
    #[tracing::instrument(skip(self, filter))]
    pub async fn search_forms(
        &self,
        text: &str,
        filter: &FormFilter,
    ) -> Result<Vec<FormRecord>, AppError> {
        let tokens = tokenize_query(text);
        if tokens.is_empty() {
            return Ok(self.list_forms(filter, self.page_size, None).await?.records);
        }

        let records = self
            .store
            .search_forms(&tokens, &filter.search_narrowing(), self.search_page_size)
            .await?;
        tracing::debug!(
            tokens = tokens.len(),
            results = records.len(),
            "Form search completed"
        );
        Ok(records)
    }

    /// Fetch a live record. Missing and soft-deleted records both come back as `None`.
    #[tracing::instrument(skip(self), fields(form.id = %id))]
    pub async fn get_form(
        &self,
        id: Uuid,
        user_id: Option<&str>,
    ) -> Result<Option<FormRecord>, AppError> {
        let record = match self.store.get_form(id).await? {
            Some(record) if !record.is_deleted => record,
            _ => return Ok(None),
        };

        self.activity.bump_counter(id, FormCounter::Views);
        if let Some(user_id) = user_id {
            self.activity
                .record(user_id, ActivityAction::View, Some(id), None);
            self.activity
                .bump_analytics(id, AnalyticsCounter::Views, user_id);
        }
        Ok(Some(record))
    }

    pub(crate) async fn live_form(&self, id: Uuid) -> Result<FormRecord, AppError> {
        match self.store.get_form(id).await? {
            Some(record) if !record.is_deleted => Ok(record),
            _ => Err(AppError::NotFound(format!("Form {} not found", id))),
        }
    }

    /// Merge `patch` into a live record. Concurrent updates resolve as last write wins.
    #[tracing::instrument(skip(self, patch), fields(form.id = %id))]
    pub async fn update_form(
        &self,
        id: Uuid,
        patch: FormPatch,
        user_id: &str,
    ) -> Result<FormRecord, AppError> {
        let mut record = self.live_form(id).await?;
        let fields = patch.changed_fields();

        record.apply_patch(patch, user_id, clock::now());
        validate_form_metadata(&record.metadata())?;
        self.store.replace_form(&record).await?;

        self.activity.record(
            user_id,
            ActivityAction::Edit,
            Some(id),
            Some(serde_json::json!({ "fields": fields })),
        );
        tracing::info!(form_id = %id, user_id = %user_id, fields = ?fields, "Form updated");
        Ok(record)
    }

    /// Soft delete. The record and its file stay in place with `is_deleted` set.
    #[tracing::instrument(skip(self), fields(form.id = %id))]
    pub async fn delete_form(&self, id: Uuid, user_id: &str) -> Result<(), AppError> {
        let mut record = self.live_form(id).await?;
        let now = clock::now();

        record.is_deleted = true;
        record.deleted_at = Some(now);
        record.deleted_by = Some(user_id.to_string());
        record.modified_by = user_id.to_string();
        record.updated_at = now;
        self.store.replace_form(&record).await?;

        self.activity
            .record(user_id, ActivityAction::Delete, Some(id), None);
        tracing::info!(form_id = %id, user_id = %user_id, "Form soft-deleted");
        Ok(())
    }

    /// Count a download of a live record.
    #[tracing::instrument(skip(self), fields(form.id = %id))]
    pub async fn record_download(&self, id: Uuid, user_id: &str) -> Result<(), AppError> {
        self.live_form(id).await?;

        self.activity.bump_counter(id, FormCounter::Downloads);
        self.activity
            .record(user_id, ActivityAction::Download, Some(id), None);
        self.activity
            .bump_analytics(id, AnalyticsCounter::Downloads, user_id);
        Ok(())
    }

    /// Aggregate statistics over every non-deleted record.
    #[tracing::instrument(skip(self))]
    pub async fn get_stats(&self) -> Result<FormStats, AppError> {
        let records = self.store.scan_forms().await?;
        Ok(FormStats::from_records(
            &records,
            clock::now(),
            self.recent_upload_days,
        ))
    }

    pub async fn get_form_analytics(
        &self,
        id: Uuid,
        date: NaiveDate,
    ) -> Result<Option<DailyFormAnalytics>, AppError> {
        self.store.get_daily_analytics(id, date).await
    }

    pub async fn recent_activity(&self, limit: usize) -> Result<Vec<ActivityEvent>, AppError> {
        self.store.recent_activity(limit).await
    }

    /// Watch the records matching `filter`.
    ///
    /// The first item is the current snapshot; later items are pushed whenever the matching
    /// set changes. Free-text queries cannot be watched.
    #[tracing::instrument(skip(self, filter))]
    pub async fn subscribe_to_forms(
        &self,
        filter: FormFilter,
    ) -> Result<FormSubscription, AppError> {
        if filter.text_query().is_some() {
            return Err(AppError::Validation(
                "Text queries are not supported for realtime subscriptions".to_string(),
            ));
        }
        FormSubscription::start(
            self.store.clone(),
            filter,
            self.subscription_limit,
            self.active_subscriptions.clone(),
        )
        .await
    }

    /// Number of subscriptions whose background task is still running.
    pub fn active_subscriptions(&self) -> usize {
        self.active_subscriptions.load(Ordering::SeqCst)
    }

    /// Wait for every in-flight counter, activity and analytics write.
    pub async fn flush_side_effects(&self) {
        self.activity.flush().await;
    }
}
