//! PostgreSQL implementation of the storage ports.
//!
//! Every write publishes the committed change on the [`ChangeFeed`] so
//! live sessions in this process see it.

use async_trait::async_trait;
use herald_core::audience::{AudienceSpec, DirectoryUser};
use herald_core::engagement::{ActionTotals, EngagementAction, EngagementKey};
use herald_core::error::CoreError;
use herald_core::notification::{NewNotification, Notification, NotificationType, Priority};
use herald_core::types::{DbId, DispatchId, Timestamp};
use herald_db::models::notification::into_notifications;
use herald_db::models::reminder::Reminder;
use herald_db::repositories::{
    AnalyticsRepo, EngagementRepo, NotificationPreferenceRepo, NotificationRepo, ReminderRepo,
    UserRepo,
};
use herald_db::DbPool;

use super::{
    AnalyticsSource, EngagementLedger, MailContact, MailRecipients, NotificationStore,
    ReminderSource, StoreResult, UserDirectory,
};
use crate::analytics::{ContentEngagement, DispatchEngagement};
use crate::feed::{ChangeEvent, ChangeFeed};
use crate::reminder::{ReminderJob, ReminderSchedule};

/// SQLSTATE for `unique_violation`.
const UNIQUE_VIOLATION: &str = "23505";

/// Classify a database error for the retry executor.
///
/// Connectivity failures are transient; everything else is not.
pub fn classify(err: sqlx::Error) -> CoreError {
    match err {
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => CoreError::Network(err.to_string()),
        sqlx::Error::Database(ref db) if db.code().as_deref() == Some(UNIQUE_VIOLATION) => {
            CoreError::Conflict(db.message().to_string())
        }
        other => CoreError::Store(other.to_string()),
    }
}

// ---------------------------------------------------------------------------
// PgStore
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct PgStore {
    pool: DbPool,
    feed: ChangeFeed,
}

impl PgStore {
    pub fn new(pool: DbPool, feed: ChangeFeed) -> Self {
        Self { pool, feed }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    pub fn feed(&self) -> &ChangeFeed {
        &self.feed
    }
}

#[async_trait]
impl NotificationStore for PgStore {
    async fn insert_many(&self, rows: Vec<NewNotification>) -> StoreResult<Vec<Notification>> {
        let stored = NotificationRepo::insert_many(&self.pool, &rows)
            .await
            .map_err(classify)?;
        let notifications = into_notifications(stored)?;
        for n in &notifications {
            self.feed.publish(ChangeEvent::Inserted(n.clone()));
        }
        Ok(notifications)
    }

    async fn find(&self, id: DbId) -> StoreResult<Option<Notification>> {
        NotificationRepo::find_by_id(&self.pool, id)
            .await
            .map_err(classify)?
            .map(Notification::try_from)
            .transpose()
    }

    async fn find_for_recipient(
        &self,
        recipient_id: DbId,
        id: DbId,
    ) -> StoreResult<Option<Notification>> {
        NotificationRepo::find_for_recipient(&self.pool, id, recipient_id)
            .await
            .map_err(classify)?
            .map(Notification::try_from)
            .transpose()
    }

    async fn list_recent(&self, recipient_id: DbId, limit: usize) -> StoreResult<Vec<Notification>> {
        let rows = NotificationRepo::list_recent(&self.pool, recipient_id, limit as i64)
            .await
            .map_err(classify)?;
        into_notifications(rows)
    }

    async fn unread_count(&self, recipient_id: DbId) -> StoreResult<u64> {
        let count = NotificationRepo::unread_count(&self.pool, recipient_id)
            .await
            .map_err(classify)?;
        Ok(count.max(0) as u64)
    }

    async fn mark_read(&self, recipient_id: DbId, id: DbId) -> StoreResult<bool> {
        let row = NotificationRepo::mark_read(&self.pool, id, recipient_id)
            .await
            .map_err(classify)?;
        match row {
            Some(row) => {
                self.feed.publish(ChangeEvent::Updated {
                    previous_read: false,
                    notification: Notification::try_from(row)?,
                });
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn mark_all_read(&self, recipient_id: DbId) -> StoreResult<u64> {
        let rows = NotificationRepo::mark_all_read(&self.pool, recipient_id)
            .await
            .map_err(classify)?;
        let changed = into_notifications(rows)?;
        for notification in &changed {
            self.feed.publish(ChangeEvent::Updated {
                previous_read: false,
                notification: notification.clone(),
            });
        }
        Ok(changed.len() as u64)
    }

    async fn delete(&self, recipient_id: DbId, id: DbId) -> StoreResult<bool> {
        let removed = NotificationRepo::delete(&self.pool, id, recipient_id)
            .await
            .map_err(classify)?;
        if removed {
            self.feed.publish(ChangeEvent::Deleted { recipient_id, id });
        }
        Ok(removed)
    }

    async fn delete_all_read(&self, recipient_id: DbId) -> StoreResult<u64> {
        let removed = NotificationRepo::delete_all_read(&self.pool, recipient_id)
            .await
            .map_err(classify)?;
        if removed > 0 {
            self.feed.publish(ChangeEvent::Cleared { recipient_id });
        }
        Ok(removed)
    }

    async fn count_by_dispatch(&self, dispatch_id: DispatchId) -> StoreResult<u64> {
        let count = NotificationRepo::count_by_dispatch(&self.pool, dispatch_id)
            .await
            .map_err(classify)?;
        Ok(count.max(0) as u64)
    }

    async fn count_similar(
        &self,
        title: &str,
        message: &str,
        from: Timestamp,
        to: Timestamp,
    ) -> StoreResult<u64> {
        let count = NotificationRepo::count_similar(&self.pool, title, message, from, to)
            .await
            .map_err(classify)?;
        Ok(count.max(0) as u64)
    }
}

#[async_trait]
impl UserDirectory for PgStore {
    async fn snapshot(&self) -> StoreResult<Vec<DirectoryUser>> {
        let rows = UserRepo::directory(&self.pool).await.map_err(classify)?;
        Ok(rows.into_iter().map(DirectoryUser::from).collect())
    }

    async fn count_active(&self) -> StoreResult<u64> {
        let count = UserRepo::count_active(&self.pool).await.map_err(classify)?;
        Ok(count.max(0) as u64)
    }
}

#[async_trait]
impl MailRecipients for PgStore {
    async fn contact(
        &self,
        user_id: DbId,
        kind: NotificationType,
    ) -> StoreResult<Option<MailContact>> {
        let row = NotificationPreferenceRepo::contact_for(&self.pool, user_id, kind.as_str())
            .await
            .map_err(classify)?;
        Ok(row.map(|row| MailContact {
            display_name: row.display_name,
            email: row.email.filter(|e| !e.trim().is_empty()),
            email_enabled: row.email_enabled,
        }))
    }
}

#[async_trait]
impl EngagementLedger for PgStore {
    async fn upsert(&self, key: EngagementKey) -> StoreResult<bool> {
        EngagementRepo::insert(
            &self.pool,
            key.notification_id,
            key.user_id,
            key.action.as_str(),
        )
        .await
        .map_err(classify)
    }
}

#[async_trait]
impl AnalyticsSource for PgStore {
    async fn action_totals_since(&self, since: Timestamp) -> StoreResult<ActionTotals> {
        let rows = AnalyticsRepo::action_totals_since(&self.pool, since)
            .await
            .map_err(classify)?;
        let mut totals = ActionTotals::default();
        for row in rows {
            match row.action.parse::<EngagementAction>() {
                Ok(action) => totals.add(action, row.count),
                Err(e) => tracing::warn!(action = %row.action, error = %e, "Skipping unknown action"),
            }
        }
        Ok(totals)
    }

    async fn content_engagement_since(
        &self,
        since: Timestamp,
        limit: usize,
    ) -> StoreResult<Vec<ContentEngagement>> {
        let rows = AnalyticsRepo::top_content_since(&self.pool, since, limit as i64)
            .await
            .map_err(classify)?;
        Ok(rows
            .into_iter()
            .map(|row| ContentEngagement {
                content_id: row.content_id,
                kind: row.kind,
                title: row.title,
                views: row.views,
                likes: row.likes,
                comments: row.comments,
                completions: row.completions,
            })
            .collect())
    }

    async fn dispatch_engagement_since(
        &self,
        since: Timestamp,
        limit: usize,
    ) -> StoreResult<Vec<DispatchEngagement>> {
        let rows = AnalyticsRepo::dispatch_summaries(&self.pool, since, limit as i64)
            .await
            .map_err(classify)?;
        Ok(rows
            .into_iter()
            .map(|row| {
                let mut totals = ActionTotals::default();
                totals.add(EngagementAction::Read, row.read);
                totals.add(EngagementAction::Clicked, row.clicked);
                totals.add(EngagementAction::Dismissed, row.dismissed);
                DispatchEngagement {
                    dispatch_id: row.dispatch_id,
                    title: row.title,
                    recipients: row.recipients.max(0) as u64,
                    totals,
                    created_at: row.created_at,
                }
            })
            .collect())
    }
}

#[async_trait]
impl ReminderSource for PgStore {
    async fn due_reminders(&self, now: Timestamp) -> StoreResult<Vec<ReminderJob>> {
        let rows = ReminderRepo::list_due(&self.pool, now)
            .await
            .map_err(classify)?;

        let mut jobs = Vec::with_capacity(rows.len());
        for row in rows {
            let id = row.id;
            match reminder_job(row) {
                Ok(job) => jobs.push(job),
                Err(e) => tracing::error!(reminder_id = id, error = %e, "Skipping malformed reminder"),
            }
        }
        Ok(jobs)
    }

    async fn advance(&self, id: DbId, next_run_at: Option<Timestamp>) -> StoreResult<()> {
        ReminderRepo::advance(&self.pool, id, next_run_at)
            .await
            .map_err(classify)
    }
}

fn reminder_job(row: Reminder) -> Result<ReminderJob, CoreError> {
    let audience: AudienceSpec = serde_json::from_value(row.audience).map_err(|e| {
        CoreError::Validation(format!("Invalid audience on reminder {}: {e}", row.id))
    })?;
    Ok(ReminderJob {
        id: row.id,
        title: row.title,
        message: row.message,
        audience,
        schedule: row.schedule.parse::<ReminderSchedule>()?,
        priority: row.priority.parse::<Priority>()?,
        next_run_at: row.next_run_at,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connectivity_errors_are_transient() {
        assert!(classify(sqlx::Error::PoolTimedOut).is_transient());
        assert!(classify(sqlx::Error::PoolClosed).is_transient());
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset");
        assert!(classify(sqlx::Error::Io(io)).is_transient());
    }

    #[test]
    fn other_errors_are_not_transient() {
        let err = classify(sqlx::Error::RowNotFound);
        assert!(matches!(err, CoreError::Store(_)));
        assert!(!err.is_transient());
        assert!(!classify(sqlx::Error::Protocol("bad".into())).is_transient());
    }

    #[test]
    fn malformed_reminder_audience_is_rejected() {
        let now = chrono::Utc::now();
        let row = Reminder {
            id: 1,
            title: "t".into(),
            message: "m".into(),
            audience: serde_json::json!({"kind": "everybody"}),
            schedule: "daily".into(),
            priority: "low".into(),
            next_run_at: now,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        assert!(matches!(reminder_job(row), Err(CoreError::Validation(_))));
    }
}
