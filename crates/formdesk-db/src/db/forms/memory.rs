//! In-process forms store
//!
//! Backs the repository when no `DATABASE_URL` is configured and in tests. Writes are
//! broadcast to change feeds; reads and writes can be made to fail on demand.

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, NaiveDate, Utc};
use formdesk_core::models::{
    newest_first, ActivityEvent, AnalyticsCounter, DailyFormAnalytics, FormFilter, FormRecord,
};
use formdesk_core::AppError;
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

use super::store::{ChangeFeed, FormChange, FormCounter, FormStore};

const CHANGE_CHANNEL_CAPACITY: usize = 256;

#[derive(Default)]
struct State {
    forms: HashMap<Uuid, FormRecord>,
    activity: Vec<ActivityEvent>,
    analytics: HashMap<String, DailyFormAnalytics>,
}

pub struct InMemoryFormStore {
    state: RwLock<State>,
    changes: broadcast::Sender<FormChange>,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    fail_side_effects: AtomicBool,
}

impl Default for InMemoryFormStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryFormStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        InMemoryFormStore {
            state: RwLock::new(State::default()),
            changes,
            fail_reads: AtomicBool::new(false),
            fail_writes: AtomicBool::new(false),
            fail_side_effects: AtomicBool::new(false),
        }
    }

    /// Fail every form read with a persistence error.
    pub fn set_fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    /// Fail every form insert or replace with a persistence error.
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Fail counter, activity and analytics writes.
    pub fn set_fail_side_effects(&self, fail: bool) {
        self.fail_side_effects.store(fail, Ordering::SeqCst);
    }

    fn check(flag: &AtomicBool, what: &str) -> Result<(), AppError> {
        if flag.load(Ordering::SeqCst) {
            return Err(AppError::Persistence(format!(
                "Simulated store failure during {}",
                what
            )));
        }
        Ok(())
    }

    fn notify(&self, form_id: Uuid) {
        // No receivers just means nobody is subscribed.
        let _ = self.changes.send(FormChange {
            form_id: Some(form_id),
        });
    }
}

#[async_trait::async_trait]
impl FormStore for InMemoryFormStore {
    async fn insert_form(&self, mut record: FormRecord) -> Result<Uuid, AppError> {
        Self::check(&self.fail_writes, "insert")?;
        let id = Uuid::new_v4();
        record.id = id;
        self.state.write().await.forms.insert(id, record);
        self.notify(id);
        Ok(id)
    }

    async fn get_form(&self, id: Uuid) -> Result<Option<FormRecord>, AppError> {
        Self::check(&self.fail_reads, "read")?;
        Ok(self.state.read().await.forms.get(&id).cloned())
    }

    async fn replace_form(&self, record: &FormRecord) -> Result<(), AppError> {
        Self::check(&self.fail_writes, "update")?;
        let mut state = self.state.write().await;
        match state.forms.get_mut(&record.id) {
            Some(existing) => *existing = record.clone(),
            None => return Err(AppError::NotFound(format!("Form {}", record.id))),
        }
        drop(state);
        self.notify(record.id);
        Ok(())
    }

    async fn list_forms(
        &self,
        filter: &FormFilter,
        limit: usize,
        after: Option<(DateTime<Utc>, Uuid)>,
    ) -> Result<Vec<FormRecord>, AppError> {
        Self::check(&self.fail_reads, "list")?;
        let state = self.state.read().await;
        let mut records: Vec<FormRecord> = state
            .forms
            .values()
            .filter(|r| !r.is_deleted && filter.matches(r))
            .filter(|r| match after {
                Some((updated_at, id)) => {
                    r.updated_at < updated_at || (r.updated_at == updated_at && r.id < id)
                }
                None => true,
            })
            .cloned()
            .collect();
        records.sort_by(newest_first);
        records.truncate(limit);
        Ok(records)
    }

    async fn search_forms(
        &self,
        tokens: &BTreeSet<String>,
        narrowing: &FormFilter,
        limit: usize,
    ) -> Result<Vec<FormRecord>, AppError> {
        Self::check(&self.fail_reads, "search")?;
        let state = self.state.read().await;
        let mut records: Vec<FormRecord> = state
            .forms
            .values()
            .filter(|r| !r.is_deleted && narrowing.matches(r))
            .filter(|r| tokens.iter().any(|t| r.search_keywords.contains(t)))
            .cloned()
            .collect();
        records.sort_by(newest_first);
        records.truncate(limit);
        Ok(records)
    }

    async fn scan_forms(&self) -> Result<Vec<FormRecord>, AppError> {
        Self::check(&self.fail_reads, "scan")?;
        let state = self.state.read().await;
        Ok(state
            .forms
            .values()
            .filter(|r| !r.is_deleted)
            .cloned()
            .collect())
    }

    async fn increment_counter(&self, id: Uuid, counter: FormCounter) -> Result<(), AppError> {
        Self::check(&self.fail_side_effects, "counter increment")?;
        let mut state = self.state.write().await;
        let record = state
            .forms
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("Form {}", id)))?;
        match counter {
            FormCounter::Views => record.view_count += 1,
            FormCounter::Downloads => record.download_count += 1,
        }
        drop(state);
        self.notify(id);
        Ok(())
    }

    async fn record_activity(&self, event: &ActivityEvent) -> Result<(), AppError> {
        Self::check(&self.fail_side_effects, "activity write")?;
        self.state.write().await.activity.push(event.clone());
        Ok(())
    }

    async fn recent_activity(&self, limit: usize) -> Result<Vec<ActivityEvent>, AppError> {
        Self::check(&self.fail_reads, "activity read")?;
        let state = self.state.read().await;
        Ok(state.activity.iter().rev().take(limit).cloned().collect())
    }

    async fn bump_daily_analytics(
        &self,
        form_id: Uuid,
        date: NaiveDate,
        counter: AnalyticsCounter,
        user_id: &str,
    ) -> Result<(), AppError> {
        Self::check(&self.fail_side_effects, "analytics write")?;
        let mut state = self.state.write().await;
        state
            .analytics
            .entry(DailyFormAnalytics::document_id(form_id, date))
            .or_insert_with(|| DailyFormAnalytics::empty(form_id, date))
            .record(counter, user_id);
        Ok(())
    }

    async fn get_daily_analytics(
        &self,
        form_id: Uuid,
        date: NaiveDate,
    ) -> Result<Option<DailyFormAnalytics>, AppError> {
        Self::check(&self.fail_reads, "analytics read")?;
        let state = self.state.read().await;
        Ok(state
            .analytics
            .get(&DailyFormAnalytics::document_id(form_id, date))
            .cloned())
    }

    async fn watch_changes(&self) -> Result<ChangeFeed, AppError> {
        let receiver = self.changes.subscribe();
        let feed = futures::stream::unfold(receiver, |mut receiver| async move {
            match receiver.recv().await {
                Ok(change) => Some((change, receiver)),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "Change feed lagged, forcing resync");
                    Some((FormChange { form_id: None }, receiver))
                }
                Err(broadcast::error::RecvError::Closed) => None,
            }
        });
        Ok(Box::pin(feed))
    }
}
