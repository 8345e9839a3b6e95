//! Storage ports used by the services in this crate.
//!
//! Each trait covers one collaborator: notification rows, the user
//! directory, mail contacts, the engagement ledger, analytics rollups and
//! scheduled reminders. [`pg::PgStore`] implements all of them on top of
//! `herald-db`; [`memory::MemoryStore`] implements them in process.
//!
//! All methods return [`CoreError`] so callers can hand failures straight
//! to the retry executor, which only repeats [`CoreError::Network`].

use async_trait::async_trait;
use herald_core::audience::DirectoryUser;
use herald_core::engagement::{ActionTotals, EngagementKey};
use herald_core::error::CoreError;
use herald_core::notification::{
    NewNotification, Notification, NotificationTemplate, NotificationType,
};
use herald_core::types::{DbId, DispatchId, Timestamp};

use crate::analytics::{ContentEngagement, DispatchEngagement};
use crate::reminder::ReminderJob;

pub mod memory;
pub mod pg;

pub type StoreResult<T> = Result<T, CoreError>;

// ---------------------------------------------------------------------------
// Notifications
// ---------------------------------------------------------------------------

/// Durable notification rows.
///
/// Mutations are scoped by recipient: a row belonging to another user is
/// treated as missing.
#[async_trait]
pub trait NotificationStore: Send + Sync {
    /// Insert all rows atomically, returning them in input order.
    async fn insert_many(&self, rows: Vec<NewNotification>) -> StoreResult<Vec<Notification>>;

    /// One row per recipient from a shared template, in a single insert.
    async fn create_batch(
        &self,
        dispatch_id: DispatchId,
        recipients: &[DbId],
        template: &NotificationTemplate,
    ) -> StoreResult<Vec<Notification>> {
        template.check()?;
        self.insert_many(template.rows_for(dispatch_id, recipients))
            .await
    }

    async fn find(&self, id: DbId) -> StoreResult<Option<Notification>>;

    /// `None` when the row is missing or belongs to another recipient.
    async fn find_for_recipient(
        &self,
        recipient_id: DbId,
        id: DbId,
    ) -> StoreResult<Option<Notification>>;

    /// Newest first, at most `limit` rows.
    async fn list_recent(&self, recipient_id: DbId, limit: usize) -> StoreResult<Vec<Notification>>;

    async fn unread_count(&self, recipient_id: DbId) -> StoreResult<u64>;

    /// Returns `true` if the row went from unread to read.
    async fn mark_read(&self, recipient_id: DbId, id: DbId) -> StoreResult<bool>;

    /// Returns the number of rows that went from unread to read.
    async fn mark_all_read(&self, recipient_id: DbId) -> StoreResult<u64>;

    /// Remove a row and record its `dismissed` engagement in the same write.
    /// Returns `true` if a row was removed.
    async fn delete(&self, recipient_id: DbId, id: DbId) -> StoreResult<bool>;

    /// Remove every read row of the recipient. Unread rows survive even if
    /// they arrived after the caller checked the unread count.
    async fn delete_all_read(&self, recipient_id: DbId) -> StoreResult<u64>;

    async fn count_by_dispatch(&self, dispatch_id: DispatchId) -> StoreResult<u64>;

    /// Rows with identical title and message created within `[from, to]`.
    async fn count_similar(
        &self,
        title: &str,
        message: &str,
        from: Timestamp,
        to: Timestamp,
    ) -> StoreResult<u64>;
}

// ---------------------------------------------------------------------------
// Directory and contacts
// ---------------------------------------------------------------------------

/// Read-only view of portal users for targeting.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn snapshot(&self) -> StoreResult<Vec<DirectoryUser>>;

    async fn count_active(&self) -> StoreResult<u64> {
        let users = self.snapshot().await?;
        Ok(users.iter().filter(|u| u.is_active).count() as u64)
    }
}

/// How to reach a user by email about one notification type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailContact {
    pub display_name: String,
    pub email: Option<String>,
    /// `false` when the user opted out of email for this type.
    pub email_enabled: bool,
}

#[async_trait]
pub trait MailRecipients: Send + Sync {
    /// `None` when the user does not exist.
    async fn contact(
        &self,
        user_id: DbId,
        kind: NotificationType,
    ) -> StoreResult<Option<MailContact>>;
}

// ---------------------------------------------------------------------------
// Engagement and analytics
// ---------------------------------------------------------------------------

#[async_trait]
pub trait EngagementLedger: Send + Sync {
    /// Store the key unless it already exists. Returns `true` when stored.
    async fn upsert(&self, key: EngagementKey) -> StoreResult<bool>;
}

#[async_trait]
pub trait AnalyticsSource: Send + Sync {
    async fn action_totals_since(&self, since: Timestamp) -> StoreResult<ActionTotals>;

    /// Content items by interaction count since `since`, descending.
    async fn content_engagement_since(
        &self,
        since: Timestamp,
        limit: usize,
    ) -> StoreResult<Vec<ContentEngagement>>;

    /// Per-dispatch recipient and engagement counts, newest first.
    async fn dispatch_engagement_since(
        &self,
        since: Timestamp,
        limit: usize,
    ) -> StoreResult<Vec<DispatchEngagement>>;
}

// ---------------------------------------------------------------------------
// Reminders
// ---------------------------------------------------------------------------

#[async_trait]
pub trait ReminderSource: Send + Sync {
    /// Active reminders due at or before `now`.
    async fn due_reminders(&self, now: Timestamp) -> StoreResult<Vec<ReminderJob>>;

    /// Set the next run, or deactivate the reminder when `next_run_at` is `None`.
    async fn advance(&self, id: DbId, next_run_at: Option<Timestamp>) -> StoreResult<()>;
}
