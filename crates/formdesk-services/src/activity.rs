//! Best-effort side effects
//!
//! View counters, activity entries and daily analytics never block or fail the operation
//! that triggered them. Each write is spawned on a [`TaskTracker`] so shutdown and tests can
//! wait for the in-flight ones with [`ActivityRecorder::flush`].

use std::sync::Arc;

use chrono::Utc;
use formdesk_core::models::{ActivityAction, ActivityEvent, AnalyticsCounter};
use formdesk_db::{FormCounter, FormStore};
use tokio_util::task::TaskTracker;
use uuid::Uuid;

#[derive(Clone)]
pub struct ActivityRecorder {
    store: Arc<dyn FormStore>,
    tracker: TaskTracker,
}

impl ActivityRecorder {
    pub fn new(store: Arc<dyn FormStore>) -> Self {
        Self {
            store,
            tracker: TaskTracker::new(),
        }
    }

    /// Append a `user_activity` entry.
    pub fn record(
        &self,
        user_id: &str,
        action: ActivityAction,
        form_id: Option<Uuid>,
        metadata: Option<serde_json::Value>,
    ) {
        let event = ActivityEvent {
            user_id: user_id.to_string(),
            action,
            form_id,
            metadata,
            timestamp: Utc::now(),
        };
        let store = self.store.clone();
        self.tracker.spawn(async move {
            if let Err(e) = store.record_activity(&event).await {
                tracing::warn!(
                    error = %e,
                    user_id = %event.user_id,
                    action = %event.action,
                    "Failed to record user activity"
                );
            }
        });
    }

    /// Increment a per-form counter.
    pub fn bump_counter(&self, form_id: Uuid, counter: FormCounter) {
        let store = self.store.clone();
        self.tracker.spawn(async move {
            if let Err(e) = store.increment_counter(form_id, counter).await {
                tracing::warn!(error = %e, form_id = %form_id, ?counter, "Failed to increment form counter");
            }
        });
    }

    /// Bump today's `{form_id}_{date}` aggregate and add `user_id` to its unique users.
    pub fn bump_analytics(&self, form_id: Uuid, counter: AnalyticsCounter, user_id: &str) {
        let store = self.store.clone();
        let user_id = user_id.to_string();
        let today = Utc::now().date_naive();
        self.tracker.spawn(async move {
            if let Err(e) = store
                .bump_daily_analytics(form_id, today, counter, &user_id)
                .await
            {
                tracing::warn!(
                    error = %e,
                    form_id = %form_id,
                    ?counter,
                    "Failed to update form analytics"
                );
            }
        });
    }

    /// Wait until every side effect spawned so far has finished.
    pub async fn flush(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }

    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use formdesk_db::InMemoryFormStore;

    #[tokio::test]
    async fn failures_are_swallowed() {
        let store = Arc::new(InMemoryFormStore::new());
        store.set_fail_side_effects(true);
        let recorder = ActivityRecorder::new(store.clone());

        recorder.record("u1", ActivityAction::Search, None, None);
        recorder.bump_counter(Uuid::new_v4(), FormCounter::Views);
        recorder.bump_analytics(Uuid::new_v4(), AnalyticsCounter::Views, "u1");
        recorder.flush().await;

        assert_eq!(recorder.in_flight(), 0);
        store.set_fail_side_effects(false);
        assert!(store.recent_activity(10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn flush_waits_for_writes() {
        let store = Arc::new(InMemoryFormStore::new());
        let recorder = ActivityRecorder::new(store.clone());
        let form_id = Uuid::new_v4();

        recorder.record(
            "u1",
            ActivityAction::Download,
            Some(form_id),
            Some(serde_json::json!({ "source": "test" })),
        );
        recorder.flush().await;

        let activity = store.recent_activity(10).await.unwrap();
        assert_eq!(activity.len(), 1);
        assert_eq!(activity[0].action, ActivityAction::Download);
        assert_eq!(activity[0].form_id, Some(form_id));

        // the tracker stays usable after a flush
        recorder.record("u2", ActivityAction::Search, None, None);
        recorder.flush().await;
        assert_eq!(store.recent_activity(10).await.unwrap().len(), 2);
    }
}
