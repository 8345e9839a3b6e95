//! A signed-in user's inbox.
//!
//! [`InboxSession`] wraps a [`RealtimeSubscription`] and applies every user
//! mutation optimistically: the live view changes at once, the store call
//! runs through the retry executor, and a terminal failure rolls the view
//! back to what it was before that mutation. `read` and `clicked`
//! engagement is recorded on a detached task after the store commit and
//! never fails the mutation; `dismissed` is written by the store together
//! with the delete.

use std::sync::Arc;

use herald_core::engagement::EngagementAction;
use herald_core::error::CoreError;
use herald_core::notification::Notification;
use herald_core::optimistic::{optimistic, try_optimistic};
use herald_core::retry::{RetryExecutor, RetryPolicy};
use herald_core::types::DbId;
use tokio::sync::watch;

use crate::engagement::EngagementRecorder;
use crate::realtime::{RealtimeDispatcher, RealtimeSubscription};
use crate::store::NotificationStore;

pub struct InboxSession {
    user_id: DbId,
    store: Arc<dyn NotificationStore>,
    subscription: RealtimeSubscription,
    recorder: EngagementRecorder,
    retry: RetryExecutor,
}

impl InboxSession {
    pub async fn open(
        user_id: DbId,
        realtime: &RealtimeDispatcher,
        recorder: EngagementRecorder,
        policy: RetryPolicy,
    ) -> Result<Self, CoreError> {
        let subscription = realtime.subscribe(user_id).await?;
        Ok(Self {
            user_id,
            store: Arc::clone(realtime.store()),
            subscription,
            recorder,
            retry: RetryExecutor::new(policy),
        })
    }

    pub fn user_id(&self) -> DbId {
        self.user_id
    }

    pub async fn items(&self) -> Vec<Notification> {
        self.subscription.items().await
    }

    pub async fn unread_count(&self) -> u64 {
        self.subscription.unread_count().await
    }

    /// `true` while a store call is backing off before another attempt.
    pub fn retrying(&self) -> watch::Receiver<bool> {
        self.retry.subscribe()
    }

    pub fn updates(&self) -> watch::Receiver<u64> {
        self.subscription.updates()
    }

    // -- mutations ----------------------------------------------------------

    /// Returns whether the stored row changed.
    pub async fn mark_read(&self, id: DbId) -> Result<bool, CoreError> {
        let user_id = self.user_id;
        let changed = optimistic(
            self.subscription.inbox(),
            |inbox| inbox.mark_read_local(id),
            self.retry.run(|| {
                let store = Arc::clone(&self.store);
                async move { store.mark_read(user_id, id).await }
            }),
            |inbox, undo| {
                if let Some(undo) = undo {
                    inbox.rollback_read(undo);
                }
            },
        )
        .await
        .inspect_err(|e| tracing::warn!(user_id, notification_id = id, error = %e, "Mark read failed, reverted"))?;

        self.recorder
            .record_detached(id, user_id, EngagementAction::Read);
        Ok(changed)
    }

    /// Returns the number of rows the store changed.
    pub async fn mark_all_read(&self) -> Result<u64, CoreError> {
        let user_id = self.user_id;
        optimistic(
            self.subscription.inbox(),
            |inbox| inbox.mark_all_read_local(),
            self.retry.run(|| {
                let store = Arc::clone(&self.store);
                async move { store.mark_all_read(user_id).await }
            }),
            |inbox, undo| inbox.rollback_read(undo),
        )
        .await
        .inspect_err(|e| tracing::warn!(user_id, error = %e, "Mark all read failed, reverted"))
    }

    /// Delete one row. The store records the `dismissed` engagement in the
    /// same write, so the ledger keeps it after the row is gone.
    pub async fn delete(&self, id: DbId) -> Result<bool, CoreError> {
        let user_id = self.user_id;
        optimistic(
            self.subscription.inbox(),
            |inbox| inbox.remove_local(id),
            self.retry.run(|| {
                let store = Arc::clone(&self.store);
                async move { store.delete(user_id, id).await }
            }),
            |inbox, undo| {
                if let Some(undo) = undo {
                    inbox.rollback_remove(undo);
                }
            },
        )
        .await
        .inspect_err(|e| tracing::warn!(user_id, notification_id = id, error = %e, "Delete failed, reverted"))
    }

    /// Delete every read row. Refused while anything is unread.
    ///
    /// The unread check and the local clear happen under one lock, and the
    /// store only deletes read rows, so a notification delivered meanwhile
    /// survives.
    pub async fn clear_all(&self) -> Result<u64, CoreError> {
        let user_id = self.user_id;
        try_optimistic(
            self.subscription.inbox(),
            |inbox| match inbox.unread_count() {
                0 => Ok(inbox.clear_local()),
                unread => Err(CoreError::Conflict(format!(
                    "{unread} unread notification(s); mark them read before clearing"
                ))),
            },
            self.retry.run(|| {
                let store = Arc::clone(&self.store);
                async move { store.delete_all_read(user_id).await }
            }),
            |inbox, undo| inbox.rollback_clear(undo),
        )
        .await
        .inspect_err(|e| tracing::warn!(user_id, error = %e, "Clear all failed"))
    }

    /// Open a notification: mark it read, record `clicked`, and return the
    /// link to follow, if any.
    pub async fn click(&self, id: DbId) -> Result<Option<String>, CoreError> {
        let shown = self
            .subscription
            .inbox()
            .read()
            .await
            .get(id)
            .map(|n| n.payload.action_url().map(str::to_owned));

        let action_url = match shown {
            Some(url) => url,
            None => {
                let stored = self
                    .store
                    .find_for_recipient(self.user_id, id)
                    .await?
                    .ok_or(CoreError::NotFound {
                        entity: "notification",
                        id,
                    })?;
                stored.payload.action_url().map(str::to_owned)
            }
        };

        self.mark_read(id).await?;
        self.recorder
            .record_detached(id, self.user_id, EngagementAction::Clicked);
        Ok(action_url)
    }

    /// Stop the live view.
    pub async fn close(self) {
        self.subscription.unsubscribe().await;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
