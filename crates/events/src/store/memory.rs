//! In-process implementation of the storage ports.
//!
//! Backs local development and the pipeline tests. Writes publish on the
//! [`ChangeFeed`] exactly like [`PgStore`](super::pg::PgStore), and
//! [`MemoryStore::fail_next_writes`] simulates an unreachable backend.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use herald_core::audience::DirectoryUser;
use herald_core::engagement::{ActionTotals, EngagementAction, EngagementKey};
use herald_core::error::CoreError;
use herald_core::notification::{
    NewNotification, Notification, NotificationPayload, NotificationType, Priority,
};
use herald_core::types::{DbId, DispatchId, Timestamp};

use super::{
    AnalyticsSource, EngagementLedger, MailContact, MailRecipients, NotificationStore,
    ReminderSource, StoreResult, UserDirectory,
};
use crate::analytics::{ContentEngagement, ContentInteraction, DispatchEngagement};
use crate::feed::{ChangeEvent, ChangeFeed};
use crate::reminder::ReminderJob;

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// A directory entry with contact details.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryUser {
    pub id: DbId,
    pub display_name: String,
    pub email: Option<String>,
    pub is_active: bool,
    pub is_admin: bool,
    pub last_login_at: Option<Timestamp>,
}

impl MemoryUser {
    /// An active, non-admin user without an email address.
    pub fn new(id: DbId, display_name: impl Into<String>) -> Self {
        Self {
            id,
            display_name: display_name.into(),
            email: None,
            is_active: true,
            is_admin: false,
            last_login_at: None,
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn admin(mut self) -> Self {
        self.is_admin = true;
        self
    }

    pub fn inactive(mut self) -> Self {
        self.is_active = false;
        self
    }

    pub fn logged_in_at(mut self, at: Timestamp) -> Self {
        self.last_login_at = Some(at);
        self
    }

    fn directory_entry(&self) -> DirectoryUser {
        DirectoryUser {
            id: self.id,
            is_active: self.is_active,
            is_admin: self.is_admin,
            last_login_at: self.last_login_at,
        }
    }
}

#[derive(Debug, Clone)]
struct Interaction {
    content_id: DbId,
    kind: String,
    title: String,
    interaction: ContentInteraction,
    at: Timestamp,
}

/// Ledger row. `dispatch` is copied from the notification when recorded.
#[derive(Debug, Clone)]
struct LedgerEntry {
    at: Timestamp,
    dispatch: Option<DispatchRef>,
}

#[derive(Debug, Clone)]
struct DispatchRef {
    dispatch_id: DispatchId,
    title: String,
    created_at: Timestamp,
}

#[derive(Debug, Clone)]
struct StoredReminder {
    job: ReminderJob,
    active: bool,
}

#[derive(Default)]
struct State {
    last_id: DbId,
    users: Vec<MemoryUser>,
    opt_outs: HashSet<(DbId, NotificationType)>,
    notifications: Vec<Notification>,
    engagements: HashMap<EngagementKey, LedgerEntry>,
    interactions: Vec<Interaction>,
    reminders: Vec<StoredReminder>,
    failures_left: u32,
    failure: Option<CoreError>,
    write_attempts: u64,
}

impl State {
    /// Count a write and return the injected failure, if one is pending.
    fn begin_write(&mut self) -> StoreResult<()> {
        self.write_attempts += 1;
        if self.failures_left > 0 {
            self.failures_left -= 1;
            let err = self
                .failure
                .clone()
                .unwrap_or_else(|| CoreError::Network("simulated outage".into()));
            return Err(err);
        }
        Ok(())
    }

    fn next_id(&mut self) -> DbId {
        self.last_id += 1;
        self.last_id
    }

    fn ledger_entry(&self, notification_id: DbId) -> LedgerEntry {
        let dispatch = self
            .notifications
            .iter()
            .find(|n| n.id == notification_id)
            .and_then(dispatch_ref);
        LedgerEntry {
            at: Utc::now(),
            dispatch,
        }
    }

    /// Returns `true` when the key was new.
    fn record(&mut self, key: EngagementKey, entry: LedgerEntry) -> bool {
        if self.engagements.contains_key(&key) {
            return false;
        }
        self.engagements.insert(key, entry);
        true
    }
}

fn dispatch_ref(n: &Notification) -> Option<DispatchRef> {
    n.dispatch_id.map(|dispatch_id| DispatchRef {
        dispatch_id,
        title: n.title.clone(),
        created_at: n.created_at,
    })
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

pub struct MemoryStore {
    state: Mutex<State>,
    feed: ChangeFeed,
}

impl MemoryStore {
    pub fn new(feed: ChangeFeed) -> Self {
        Self {
            state: Mutex::new(State::default()),
            feed,
        }
    }

    pub fn feed(&self) -> &ChangeFeed {
        &self.feed
    }

    pub fn add_user(&self, user: MemoryUser) {
        self.lock().users.push(user);
    }

    pub fn set_email_enabled(&self, user_id: DbId, kind: NotificationType, enabled: bool) {
        let mut state = self.lock();
        if enabled {
            state.opt_outs.remove(&(user_id, kind));
        } else {
            state.opt_outs.insert((user_id, kind));
        }
    }

    /// Make the next `count` writes fail with `error`.
    pub fn fail_next_writes(&self, count: u32, error: CoreError) {
        let mut state = self.lock();
        state.failures_left = count;
        state.failure = Some(error);
    }

    /// Writes attempted so far, including failed ones.
    pub fn write_attempts(&self) -> u64 {
        self.lock().write_attempts
    }

    /// Insert a row without a dispatch id at a chosen time, as rows written
    /// before dispatch ids existed look.
    pub fn insert_legacy(
        &self,
        recipient_id: DbId,
        title: &str,
        message: &str,
        payload: NotificationPayload,
        created_at: Timestamp,
    ) -> Notification {
        let mut state = self.lock();
        let notification = Notification {
            id: state.next_id(),
            recipient_id,
            dispatch_id: None,
            title: title.to_string(),
            message: message.to_string(),
            payload,
            priority: Priority::Medium,
            read: false,
            created_at,
        };
        state.notifications.push(notification.clone());
        notification
    }

    pub fn record_interaction(
        &self,
        content_id: DbId,
        kind: &str,
        title: &str,
        interaction: ContentInteraction,
        at: Timestamp,
    ) {
        self.lock().interactions.push(Interaction {
            content_id,
            kind: kind.to_string(),
            title: title.to_string(),
            interaction,
            at,
        });
    }

    pub fn add_reminder(&self, job: ReminderJob) {
        self.lock().reminders.push(StoredReminder { job, active: true });
    }

    /// The stored reminder and whether it is still active.
    pub fn reminder(&self, id: DbId) -> Option<(ReminderJob, bool)> {
        self.lock()
            .reminders
            .iter()
            .find(|r| r.job.id == id)
            .map(|r| (r.job.clone(), r.active))
    }

    /// Every row of a recipient in insertion order.
    pub fn notifications_for(&self, recipient_id: DbId) -> Vec<Notification> {
        self.lock()
            .notifications
            .iter()
            .filter(|n| n.recipient_id == recipient_id)
            .cloned()
            .collect()
    }

    pub fn engagement_count(&self) -> usize {
        self.lock().engagements.len()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(ChangeFeed::default())
    }
}

#[async_trait]
impl NotificationStore for MemoryStore {
    async fn insert_many(&self, rows: Vec<NewNotification>) -> StoreResult<Vec<Notification>> {
        let inserted = {
            let mut state = self.lock();
            state.begin_write()?;
            let now = Utc::now();
            let inserted: Vec<Notification> = rows
                .into_iter()
                .map(|row| Notification {
                    id: state.next_id(),
                    recipient_id: row.recipient_id,
                    dispatch_id: Some(row.dispatch_id),
                    title: row.title,
                    message: row.message,
                    payload: row.payload,
                    priority: row.priority,
                    read: false,
                    created_at: now,
                })
                .collect();
            state.notifications.extend(inserted.iter().cloned());
            inserted
        };
        for n in &inserted {
            self.feed.publish(ChangeEvent::Inserted(n.clone()));
        }
        Ok(inserted)
    }

    async fn find(&self, id: DbId) -> StoreResult<Option<Notification>> {
        Ok(self
            .lock()
            .notifications
            .iter()
            .find(|n| n.id == id)
            .cloned())
    }

    async fn find_for_recipient(
        &self,
        recipient_id: DbId,
        id: DbId,
    ) -> StoreResult<Option<Notification>> {
        Ok(self
            .lock()
            .notifications
            .iter()
            .find(|n| n.id == id && n.recipient_id == recipient_id)
            .cloned())
    }

    async fn list_recent(&self, recipient_id: DbId, limit: usize) -> StoreResult<Vec<Notification>> {
        let mut rows = self.notifications_for(recipient_id);
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        rows.truncate(limit);
        Ok(rows)
    }

    async fn unread_count(&self, recipient_id: DbId) -> StoreResult<u64> {
        Ok(self
            .lock()
            .notifications
            .iter()
            .filter(|n| n.recipient_id == recipient_id && !n.read)
            .count() as u64)
    }

    async fn mark_read(&self, recipient_id: DbId, id: DbId) -> StoreResult<bool> {
        let changed = {
            let mut state = self.lock();
            state.begin_write()?;
            state
                .notifications
                .iter_mut()
                .find(|n| n.id == id && n.recipient_id == recipient_id && !n.read)
                .map(|n| {
                    n.read = true;
                    n.clone()
                })
        };
        match changed {
            Some(notification) => {
                self.feed.publish(ChangeEvent::Updated {
                    previous_read: false,
                    notification,
                });
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn mark_all_read(&self, recipient_id: DbId) -> StoreResult<u64> {
        let changed: Vec<Notification> = {
            let mut state = self.lock();
            state.begin_write()?;
            state
                .notifications
                .iter_mut()
                .filter(|n| n.recipient_id == recipient_id && !n.read)
                .map(|n| {
                    n.read = true;
                    n.clone()
                })
                .collect()
        };
        for notification in &changed {
            self.feed.publish(ChangeEvent::Updated {
                previous_read: false,
                notification: notification.clone(),
            });
        }
        Ok(changed.len() as u64)
    }

    async fn delete(&self, recipient_id: DbId, id: DbId) -> StoreResult<bool> {
        let removed = {
            let mut state = self.lock();
            state.begin_write()?;
            let position = state
                .notifications
                .iter()
                .position(|n| n.id == id && n.recipient_id == recipient_id);
            match position {
                Some(index) => {
                    let row = state.notifications.remove(index);
                    let key = EngagementKey {
                        notification_id: id,
                        user_id: recipient_id,
                        action: EngagementAction::Dismissed,
                    };
                    let entry = LedgerEntry {
                        at: Utc::now(),
                        dispatch: dispatch_ref(&row),
                    };
                    state.record(key, entry);
                    true
                }
                None => false,
            }
        };
        if removed {
            self.feed.publish(ChangeEvent::Deleted { recipient_id, id });
        }
        Ok(removed)
    }

    async fn delete_all_read(&self, recipient_id: DbId) -> StoreResult<u64> {
        let removed = {
            let mut state = self.lock();
            state.begin_write()?;
            let before = state.notifications.len();
            state
                .notifications
                .retain(|n| !(n.recipient_id == recipient_id && n.read));
            (before - state.notifications.len()) as u64
        };
        if removed > 0 {
            self.feed.publish(ChangeEvent::Cleared { recipient_id });
        }
        Ok(removed)
    }

    async fn count_by_dispatch(&self, dispatch_id: DispatchId) -> StoreResult<u64> {
        Ok(self
            .lock()
            .notifications
            .iter()
            .filter(|n| n.dispatch_id == Some(dispatch_id))
            .count() as u64)
    }

    async fn count_similar(
        &self,
        title: &str,
        message: &str,
        from: Timestamp,
        to: Timestamp,
    ) -> StoreResult<u64> {
        Ok(self
            .lock()
            .notifications
            .iter()
            .filter(|n| {
                n.title == title && n.message == message && n.created_at >= from && n.created_at <= to
            })
            .count() as u64)
    }
}

#[async_trait]
impl UserDirectory for MemoryStore {
    async fn snapshot(&self) -> StoreResult<Vec<DirectoryUser>> {
        let mut users: Vec<DirectoryUser> =
            self.lock().users.iter().map(MemoryUser::directory_entry).collect();
        users.sort_by_key(|u| u.id);
        Ok(users)
    }
}

#[async_trait]
impl MailRecipients for MemoryStore {
    async fn contact(
        &self,
        user_id: DbId,
        kind: NotificationType,
    ) -> StoreResult<Option<MailContact>> {
        let state = self.lock();
        Ok(state.users.iter().find(|u| u.id == user_id).map(|u| MailContact {
            display_name: u.display_name.clone(),
            email: u.email.clone().filter(|e| !e.trim().is_empty()),
            email_enabled: !state.opt_outs.contains(&(user_id, kind)),
        }))
    }
}

#[async_trait]
impl EngagementLedger for MemoryStore {
    async fn upsert(&self, key: EngagementKey) -> StoreResult<bool> {
        let mut state = self.lock();
        state.begin_write()?;
        let entry = state.ledger_entry(key.notification_id);
        Ok(state.record(key, entry))
    }
}

#[async_trait]
impl AnalyticsSource for MemoryStore {
    async fn action_totals_since(&self, since: Timestamp) -> StoreResult<ActionTotals> {
        let state = self.lock();
        let mut totals = ActionTotals::default();
        for (key, entry) in &state.engagements {
            if entry.at >= since {
                totals.add(key.action, 1);
            }
        }
        Ok(totals)
    }

    async fn content_engagement_since(
        &self,
        since: Timestamp,
        limit: usize,
    ) -> StoreResult<Vec<ContentEngagement>> {
        let state = self.lock();
        let mut by_content: HashMap<DbId, ContentEngagement> = HashMap::new();
        for i in state.interactions.iter().filter(|i| i.at >= since) {
            let entry = by_content.entry(i.content_id).or_insert_with(|| ContentEngagement {
                content_id: i.content_id,
                kind: i.kind.clone(),
                title: i.title.clone(),
                views: 0,
                likes: 0,
                comments: 0,
                completions: 0,
            });
            entry.add(i.interaction, 1);
        }
        let mut rows: Vec<ContentEngagement> = by_content.into_values().collect();
        rows.sort_by(|a, b| b.total().cmp(&a.total()).then(a.content_id.cmp(&b.content_id)));
        rows.truncate(limit);
        Ok(rows)
    }

    async fn dispatch_engagement_since(
        &self,
        since: Timestamp,
        limit: usize,
    ) -> StoreResult<Vec<DispatchEngagement>> {
        let state = self.lock();
        let mut by_dispatch: HashMap<DispatchId, (DispatchEngagement, HashSet<DbId>)> =
            HashMap::new();

        let delivered = state
            .notifications
            .iter()
            .filter_map(|n| dispatch_ref(n).map(|d| (n.id, d)))
            .chain(state.engagements.iter().filter_map(|(key, entry)| {
                entry.dispatch.clone().map(|d| (key.notification_id, d))
            }));
        for (notification_id, d) in delivered {
            let (summary, ids) = by_dispatch.entry(d.dispatch_id).or_insert_with(|| {
                let summary = DispatchEngagement {
                    dispatch_id: d.dispatch_id,
                    title: d.title.clone(),
                    recipients: 0,
                    totals: ActionTotals::default(),
                    created_at: d.created_at,
                };
                (summary, HashSet::new())
            });
            if ids.insert(notification_id) {
                summary.recipients += 1;
            }
            summary.created_at = summary.created_at.min(d.created_at);
        }
        for (key, entry) in &state.engagements {
            if let Some((summary, _)) = entry
                .dispatch
                .as_ref()
                .and_then(|d| by_dispatch.get_mut(&d.dispatch_id))
            {
                summary.totals.add(key.action, 1);
            }
        }

        let mut rows: Vec<DispatchEngagement> = by_dispatch
            .into_values()
            .map(|(summary, _)| summary)
            .filter(|summary| summary.created_at >= since)
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        rows.truncate(limit);
        Ok(rows)
    }
}

#[async_trait]
impl ReminderSource for MemoryStore {
    async fn due_reminders(&self, now: Timestamp) -> StoreResult<Vec<ReminderJob>> {
        let mut due: Vec<ReminderJob> = self
            .lock()
            .reminders
            .iter()
            .filter(|r| r.active && r.job.next_run_at <= now)
            .map(|r| r.job.clone())
            .collect();
        due.sort_by(|a, b| a.next_run_at.cmp(&b.next_run_at).then(a.id.cmp(&b.id)));
        Ok(due)
    }

    async fn advance(&self, id: DbId, next_run_at: Option<Timestamp>) -> StoreResult<()> {
        let mut state = self.lock();
        state.begin_write()?;
        if let Some(stored) = state.reminders.iter_mut().find(|r| r.job.id == id) {
            match next_run_at {
                Some(at) => stored.job.next_run_at = at,
                None => stored.active = false,
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use herald_core::notification::NotificationTemplate;
    use herald_core::types::new_dispatch_id;

    fn template() -> NotificationTemplate {
        NotificationTemplate::new(
            "Maintenance window",
            "The portal is read-only tonight",
            NotificationPayload::Announcement { action_url: None },
        )
    }

    #[tokio::test]
    async fn create_batch_rejects_invalid_template_without_writing() {
        let store = MemoryStore::default();
        let mut bad = template();
        bad.title = "   ".into();

        let result = store.create_batch(new_dispatch_id(), &[1, 2], &bad).await;
        assert!(matches!(result, Err(CoreError::Validation(_))));
        assert_eq!(store.write_attempts(), 0);
    }

    #[tokio::test]
    async fn injected_failures_leave_no_rows() {
        let store = MemoryStore::default();
        store.fail_next_writes(1, CoreError::Network("offline".into()));

        let first = store.create_batch(new_dispatch_id(), &[1, 2, 3], &template()).await;
        assert!(matches!(first, Err(CoreError::Network(_))));
        assert!(store.notifications_for(1).is_empty());

        let second = store
            .create_batch(new_dispatch_id(), &[1, 2, 3], &template())
            .await
            .unwrap();
        assert_eq!(second.len(), 3);
        assert_eq!(store.write_attempts(), 2);
    }

    #[tokio::test]
    async fn list_recent_is_newest_first_and_limited() {
        let store = MemoryStore::default();
        for _ in 0..5 {
            store
                .create_batch(new_dispatch_id(), &[9], &template())
                .await
                .unwrap();
        }
        let recent = store.list_recent(9, 3).await.unwrap();
        let ids: Vec<DbId> = recent.iter().map(|n| n.id).collect();
        assert_eq!(ids, vec![5, 4, 3]);
    }

    #[tokio::test]
    async fn mark_read_reports_only_transitions() {
        let store = MemoryStore::default();
        let rows = store
            .create_batch(new_dispatch_id(), &[1], &template())
            .await
            .unwrap();

        assert!(store.mark_read(1, rows[0].id).await.unwrap());
        assert!(!store.mark_read(1, rows[0].id).await.unwrap());
        // Another recipient cannot touch the row.
        assert!(!store.mark_read(2, rows[0].id).await.unwrap());
        assert_eq!(store.unread_count(1).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn engagement_upsert_is_idempotent() {
        let store = MemoryStore::default();
        let key = EngagementKey {
            notification_id: 1,
            user_id: 2,
            action: EngagementAction::Clicked,
        };
        assert!(store.upsert(key).await.unwrap());
        assert!(!store.upsert(key).await.unwrap());
        assert_eq!(store.engagement_count(), 1);
    }

    #[tokio::test]
    async fn delete_records_dismissal_and_keeps_history() {
        let store = MemoryStore::default();
        let dispatch_id = new_dispatch_id();
        let rows = store
            .create_batch(dispatch_id, &[1, 2], &template())
            .await
            .unwrap();
        let key = EngagementKey {
            notification_id: rows[0].id,
            user_id: 1,
            action: EngagementAction::Read,
        };
        store.upsert(key).await.unwrap();

        assert!(store.delete(1, rows[0].id).await.unwrap());
        assert!(!store.delete(1, rows[0].id).await.unwrap());

        let since = Utc::now() - chrono::Duration::days(1);
        let totals = store.action_totals_since(since).await.unwrap();
        assert_eq!(totals.read, 1);
        assert_eq!(totals.dismissed, 1);

        let summaries = store.dispatch_engagement_since(since, 10).await.unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].dispatch_id, dispatch_id);
        assert_eq!(summaries[0].recipients, 2);
        assert_eq!(summaries[0].totals.dismissed, 1);
        assert_eq!(summaries[0].totals.read, 1);
    }

    #[tokio::test]
    async fn delete_all_read_spares_unread_rows() {
        let store = MemoryStore::default();
        for _ in 0..3 {
            store
                .create_batch(new_dispatch_id(), &[1], &template())
                .await
                .unwrap();
        }
        store.mark_all_read(1).await.unwrap();
        let late = store
            .create_batch(new_dispatch_id(), &[1], &template())
            .await
            .unwrap();

        assert_eq!(store.delete_all_read(1).await.unwrap(), 3);
        let left = store.notifications_for(1);
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].id, late[0].id);
    }

    #[tokio::test]
    async fn find_for_recipient_hides_other_users_rows() {
        let store = MemoryStore::default();
        let rows = store
            .create_batch(new_dispatch_id(), &[1], &template())
            .await
            .unwrap();
        assert!(store.find_for_recipient(1, rows[0].id).await.unwrap().is_some());
        assert!(store.find_for_recipient(2, rows[0].id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn contact_reflects_opt_out() {
        let store = MemoryStore::default();
        store.add_user(MemoryUser::new(1, "Ada").with_email("ada@example.com"));
        store.set_email_enabled(1, NotificationType::Feedback, false);

        let feedback = store.contact(1, NotificationType::Feedback).await.unwrap().unwrap();
        assert!(!feedback.email_enabled);
        let news = store.contact(1, NotificationType::NewsPublished).await.unwrap().unwrap();
        assert!(news.email_enabled);
        assert!(store.contact(2, NotificationType::Feedback).await.unwrap().is_none());
    }
}
