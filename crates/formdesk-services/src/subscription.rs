//! Realtime form subscriptions
//!
//! A subscription owns one change feed and one background task. The task pushes a fresh
//! snapshot of the matching set whenever a change alters it. Ending the subscription,
//! either through [`FormSubscription::unsubscribe`] or by dropping it, stops the task and
//! releases the feed.

use std::fmt;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use formdesk_core::models::{FormFilter, FormRecord};
use formdesk_core::AppError;
use formdesk_db::FormStore;
use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

const SNAPSHOT_BUFFER: usize = 16;

/// Decrements the live subscription count when the background task ends.
struct ActiveGuard(Arc<AtomicUsize>);

impl ActiveGuard {
    fn new(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        ActiveGuard(counter)
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Stream of form snapshots, newest first.
pub struct FormSubscription {
    id: Uuid,
    receiver: mpsc::Receiver<Vec<FormRecord>>,
    token: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl FormSubscription {
    /// Open the change feed, take the initial snapshot and start watching.
    ///
    /// The feed is opened before the first query so no change between the two is lost.
    pub(crate) async fn start(
        store: Arc<dyn FormStore>,
        filter: FormFilter,
        limit: usize,
        active: Arc<AtomicUsize>,
    ) -> Result<Self, AppError> {
        let mut feed = store.watch_changes().await?;
        let initial = store.list_forms(&filter, limit, None).await?;

        let id = Uuid::new_v4();
        let (sender, receiver) = mpsc::channel(SNAPSHOT_BUFFER);
        // The buffer is empty, so this cannot fail for lack of capacity.
        let _ = sender.try_send(initial.clone());

        let token = CancellationToken::new();
        let task_token = token.clone();
        let guard = ActiveGuard::new(active);

        let task = tokio::spawn(async move {
            let _guard = guard;
            let mut last = initial;
            tracing::debug!(subscription_id = %id, "Form subscription started");

            loop {
                let change = tokio::select! {
                    _ = task_token.cancelled() => break,
                    _ = sender.closed() => break,
                    change = feed.next() => change,
                };
                let Some(change) = change else {
                    tracing::warn!(subscription_id = %id, "Form change feed ended");
                    break;
                };

                let snapshot = match store.list_forms(&filter, limit, None).await {
                    Ok(snapshot) => snapshot,
                    Err(e) => {
                        tracing::warn!(
                            error = %e,
                            subscription_id = %id,
                            form_id = ?change.form_id,
                            "Failed to refresh form subscription"
                        );
                        continue;
                    }
                };
                if snapshot == last {
                    continue;
                }
                last = snapshot.clone();
                if sender.send(snapshot).await.is_err() {
                    break;
                }
            }

            tracing::debug!(subscription_id = %id, "Form subscription stopped");
        });

        Ok(FormSubscription {
            id,
            receiver,
            token,
            task: Some(task),
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Whether the background task is still expected to push snapshots.
    pub fn is_active(&self) -> bool {
        !self.token.is_cancelled() && self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Stop listening and wait for the background task to release its feed.
    pub async fn unsubscribe(&mut self) {
        self.token.cancel();
        self.receiver.close();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!(error = %e, subscription_id = %self.id, "Form subscription task failed");
            }
        }
    }
}

impl fmt::Debug for FormSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FormSubscription")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish_non_exhaustive()
    }
}

impl Stream for FormSubscription {
    type Item = Vec<FormRecord>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}

impl Drop for FormSubscription {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
