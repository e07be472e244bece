//! crates/bookshelf_core/src/subscription.rs
//!
//! Live-update subscriptions. Each subscription is a background task draining a
//! `ChangeFeed` into a callback, scoped to a cancellation token owned by the
//! returned handle. Dropping the handle stops the task, so a listener cannot
//! outlive the view that registered it.

use futures::StreamExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::ports::ChangeFeed;

#[must_use = "dropping the handle immediately ends the subscription"]
pub struct SubscriptionHandle {
    label: String,
    token: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl SubscriptionHandle {
    /// Spawns the listener task. Requires a running Tokio runtime.
    pub(crate) fn spawn<T, F>(label: impl Into<String>, mut feed: ChangeFeed<T>, mut on_change: F) -> Self
    where
        T: Send + 'static,
        F: FnMut(T) + Send + 'static,
    {
        let label = label.into();
        let token = CancellationToken::new();
        let cancelled = token.clone();
        let task_label = label.clone();

        let task = tokio::spawn(async move {
            debug!(subscription = %task_label, "Subscription started.");
            loop {
                tokio::select! {
                    biased;
                    _ = cancelled.cancelled() => break,
                    item = feed.next() => match item {
                        Some(Ok(value)) => on_change(value),
                        Some(Err(e)) => {
                            warn!(subscription = %task_label, error = %e, "Change feed failed; subscription ended.");
                            break;
                        }
                        None => break,
                    },
                }
            }
            debug!(subscription = %task_label, "Subscription stopped.");
        });

        Self {
            label,
            token,
            task: Some(task),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// False once released, or once the backend closed or failed the feed.
    pub fn is_active(&self) -> bool {
        !self.token.is_cancelled() && self.task.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Stops the listener and waits for its task to wind down. No callback runs
    /// after this returns.
    pub async fn release(mut self) {
        self.token.cancel();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                warn!(subscription = %self.label, error = %e, "Subscription task did not shut down cleanly.");
            }
        }
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

impl std::fmt::Debug for SubscriptionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionHandle")
            .field("label", &self.label)
            .field("active", &self.is_active())
            .finish()
    }
}
