//! Read-side rollups over the engagement ledger.
//!
//! [`AnalyticsAggregator::report`] totals engagement actions and ranks
//! content for a trailing window. [`AnalyticsAggregator::dispatch_scope`]
//! classifies a notification's dispatch as reaching all users or a subset:
//! rows with a dispatch id are counted exactly, legacy rows fall back to
//! counting same-content siblings created within a minute of the row.

use std::sync::Arc;

use chrono::{Duration, Utc};
use herald_core::engagement::ActionTotals;
use herald_core::error::CoreError;
use herald_core::scope::{self, DispatchScope, ScopeBasis, DEFAULT_ALL_USERS_RATIO};
use herald_core::types::{DbId, DispatchId, Timestamp};
use serde::{Deserialize, Serialize};

use crate::store::{AnalyticsSource, NotificationStore, UserDirectory};

pub const DEFAULT_WINDOW_DAYS: i64 = 30;
pub const DEFAULT_TOP_N: usize = 10;

// ---------------------------------------------------------------------------
// Rollup types
// ---------------------------------------------------------------------------

/// A user interaction with a training module or news article.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentInteraction {
    View,
    Like,
    Comment,
    Completion,
}

impl ContentInteraction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContentInteraction::View => "view",
            ContentInteraction::Like => "like",
            ContentInteraction::Comment => "comment",
            ContentInteraction::Completion => "completion",
        }
    }
}

/// Interaction counts for one content item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContentEngagement {
    pub content_id: DbId,
    /// `training` or `news`.
    pub kind: String,
    pub title: String,
    pub views: i64,
    pub likes: i64,
    pub comments: i64,
    pub completions: i64,
}

impl ContentEngagement {
    pub fn add(&mut self, interaction: ContentInteraction, count: i64) {
        match interaction {
            ContentInteraction::View => self.views += count,
            ContentInteraction::Like => self.likes += count,
            ContentInteraction::Comment => self.comments += count,
            ContentInteraction::Completion => self.completions += count,
        }
    }

    pub fn total(&self) -> i64 {
        self.views + self.likes + self.comments + self.completions
    }
}

/// Recipient and engagement counts for one dispatch.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DispatchEngagement {
    pub dispatch_id: DispatchId,
    pub title: String,
    pub recipients: u64,
    pub totals: ActionTotals,
    pub created_at: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngagementReport {
    pub since: Timestamp,
    pub totals: ActionTotals,
    /// Descending by total interactions, at most `top_n` entries.
    pub top_content: Vec<ContentEngagement>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScopeReport {
    pub notification_id: DbId,
    pub dispatch_id: Option<DispatchId>,
    pub recipients: u64,
    pub active_users: u64,
    pub scope: DispatchScope,
    pub basis: ScopeBasis,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DispatchSummary {
    #[serde(flatten)]
    pub engagement: DispatchEngagement,
    pub scope: DispatchScope,
}

// ---------------------------------------------------------------------------
// AnalyticsConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnalyticsConfig {
    pub window_days: i64,
    pub top_n: usize,
    /// Share of active users a dispatch must reach to count as "all users".
    pub all_users_ratio: f64,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            window_days: DEFAULT_WINDOW_DAYS,
            top_n: DEFAULT_TOP_N,
            all_users_ratio: DEFAULT_ALL_USERS_RATIO,
        }
    }
}

impl AnalyticsConfig {
    /// | Variable                | Default |
    /// |-------------------------|---------|
    /// | `ANALYTICS_WINDOW_DAYS` | `30`    |
    /// | `ANALYTICS_TOP_N`       | `10`    |
    /// | `SCOPE_ALL_USERS_RATIO` | `0.9`   |
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            window_days: std::env::var("ANALYTICS_WINDOW_DAYS")
                .ok()
                .and_then(|v| v.parse::<i64>().ok())
                .filter(|d| *d > 0)
                .unwrap_or(defaults.window_days),
            top_n: std::env::var("ANALYTICS_TOP_N")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.top_n),
            all_users_ratio: std::env::var("SCOPE_ALL_USERS_RATIO")
                .ok()
                .and_then(|v| v.parse::<f64>().ok())
                .filter(|r| (0.0..=1.0).contains(r))
                .unwrap_or(defaults.all_users_ratio),
        }
    }
}

// ---------------------------------------------------------------------------
// AnalyticsAggregator
// ---------------------------------------------------------------------------

pub struct AnalyticsAggregator {
    source: Arc<dyn AnalyticsSource>,
    notifications: Arc<dyn NotificationStore>,
    directory: Arc<dyn UserDirectory>,
    config: AnalyticsConfig,
}

impl AnalyticsAggregator {
    pub fn new(
        source: Arc<dyn AnalyticsSource>,
        notifications: Arc<dyn NotificationStore>,
        directory: Arc<dyn UserDirectory>,
        config: AnalyticsConfig,
    ) -> Self {
        Self {
            source,
            notifications,
            directory,
            config,
        }
    }

    pub fn config(&self) -> &AnalyticsConfig {
        &self.config
    }

    /// Report over the configured window and top-N.
    pub async fn report(&self) -> Result<EngagementReport, CoreError> {
        self.report_for(self.config.window_days, self.config.top_n)
            .await
    }

    pub async fn report_for(
        &self,
        window_days: i64,
        top_n: usize,
    ) -> Result<EngagementReport, CoreError> {
        let since = Utc::now() - Duration::days(window_days.max(0));
        let (totals, mut top_content) = futures::try_join!(
            self.source.action_totals_since(since),
            self.source.content_engagement_since(since, top_n),
        )?;

        top_content.sort_by(|a, b| b.total().cmp(&a.total()).then(a.content_id.cmp(&b.content_id)));
        top_content.truncate(top_n);

        Ok(EngagementReport {
            since,
            totals,
            top_content,
        })
    }

    /// Classify the dispatch that created `notification_id`.
    pub async fn dispatch_scope(&self, notification_id: DbId) -> Result<ScopeReport, CoreError> {
        let notification = self
            .notifications
            .find(notification_id)
            .await?
            .ok_or(CoreError::NotFound {
                entity: "notification",
                id: notification_id,
            })?;

        let (recipients, basis) = match notification.dispatch_id {
            Some(dispatch_id) => (
                self.notifications.count_by_dispatch(dispatch_id).await?,
                ScopeBasis::DispatchId,
            ),
            None => {
                let (from, to) = scope::sibling_range(notification.created_at);
                let count = self
                    .notifications
                    .count_similar(&notification.title, &notification.message, from, to)
                    .await?;
                (count, ScopeBasis::InferredSiblings)
            }
        };

        let active_users = self.directory.count_active().await?;
        let scope = scope::classify(recipients, active_users, self.config.all_users_ratio);

        tracing::debug!(
            notification_id,
            recipients,
            active_users,
            ?scope,
            ?basis,
            "Classified dispatch scope"
        );

        Ok(ScopeReport {
            notification_id,
            dispatch_id: notification.dispatch_id,
            recipients,
            active_users,
            scope,
            basis,
        })
    }

    /// Recent dispatches with engagement counts and scope, newest first.
    pub async fn dispatch_summaries(&self, limit: usize) -> Result<Vec<DispatchSummary>, CoreError> {
        let since = Utc::now() - Duration::days(self.config.window_days.max(0));
        let (rows, active_users) = futures::try_join!(
            self.source.dispatch_engagement_since(since, limit),
            self.directory.count_active(),
        )?;

        Ok(rows
            .into_iter()
            .map(|engagement| DispatchSummary {
                scope: scope::classify(
                    engagement.recipients,
                    active_users,
                    self.config.all_users_ratio,
                ),
                engagement,
            })
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use herald_core::engagement::{EngagementAction, EngagementKey};
    use herald_core::notification::{NotificationPayload, NotificationTemplate};
    use herald_core::types::new_dispatch_id;

    use crate::store::memory::{MemoryStore, MemoryUser};
    use crate::store::EngagementLedger;

    fn aggregator(store: &Arc<MemoryStore>) -> AnalyticsAggregator {
        AnalyticsAggregator::new(
            store.clone(),
            store.clone(),
            store.clone(),
            AnalyticsConfig {
                window_days: 30,
                top_n: 2,
                all_users_ratio: 0.9,
            },
        )
    }

    fn seeded(users: DbId) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::default());
        for id in 1..=users {
            store.add_user(MemoryUser::new(id, format!("User {id}")));
        }
        store
    }

    fn template() -> NotificationTemplate {
        NotificationTemplate::new(
            "Policy update",
            "Please review the new travel policy",
            NotificationPayload::Announcement { action_url: None },
        )
    }

    #[tokio::test]
    async fn top_content_is_sorted_and_truncated() {
        let store = seeded(1);
        let now = Utc::now();
        for _ in 0..3 {
            store.record_interaction(1, "news", "A", ContentInteraction::View, now);
        }
        store.record_interaction(2, "training", "B", ContentInteraction::Completion, now);
        for _ in 0..5 {
            store.record_interaction(3, "news", "C", ContentInteraction::Like, now);
        }
        // Outside the window.
        for _ in 0..9 {
            store.record_interaction(2, "training", "B", ContentInteraction::View, now - Duration::days(40));
        }

        let report = aggregator(&store).report().await.unwrap();
        let ids: Vec<DbId> = report.top_content.iter().map(|c| c.content_id).collect();
        assert_eq!(ids, vec![3, 1]);
        assert_eq!(report.top_content[0].likes, 5);
    }

    #[tokio::test]
    async fn duplicate_engagement_is_counted_once() {
        let store = seeded(1);
        let key = EngagementKey {
            notification_id: 1,
            user_id: 1,
            action: EngagementAction::Read,
        };
        store.upsert(key).await.unwrap();
        store.upsert(key).await.unwrap();

        let report = aggregator(&store).report().await.unwrap();
        assert_eq!(report.totals.read, 1);
        assert_eq!(report.totals.total(), 1);
    }

    #[tokio::test]
    async fn dispatch_to_everyone_is_all_users() {
        let store = seeded(10);
        let recipients: Vec<DbId> = (1..=10).collect();
        let rows = store
            .create_batch(new_dispatch_id(), &recipients, &template())
            .await
            .unwrap();

        let report = aggregator(&store).dispatch_scope(rows[0].id).await.unwrap();
        assert_eq!(report.scope, DispatchScope::AllUsers);
        assert_eq!(report.basis, ScopeBasis::DispatchId);
        assert_eq!(report.recipients, 10);
    }

    #[tokio::test]
    async fn same_content_dispatches_are_not_merged_when_ids_exist() {
        let store = seeded(10);
        let first: Vec<DbId> = (1..=5).collect();
        let second: Vec<DbId> = (6..=10).collect();
        let rows = store
            .create_batch(new_dispatch_id(), &first, &template())
            .await
            .unwrap();
        store
            .create_batch(new_dispatch_id(), &second, &template())
            .await
            .unwrap();

        let report = aggregator(&store).dispatch_scope(rows[0].id).await.unwrap();
        assert_eq!(report.recipients, 5);
        assert_eq!(report.scope, DispatchScope::SpecificUsers);
    }

    #[tokio::test]
    async fn legacy_rows_use_sibling_window() {
        let store = seeded(4);
        let at = Utc::now() - Duration::days(1);
        let payload = NotificationPayload::Announcement { action_url: None };
        let target = store.insert_legacy(1, "Hi", "All hands", payload.clone(), at);
        for (user, offset) in [(2, 30), (3, -59), (4, 61)] {
            store.insert_legacy(user, "Hi", "All hands", payload.clone(), at + Duration::seconds(offset));
        }

        let report = aggregator(&store).dispatch_scope(target.id).await.unwrap();
        assert_eq!(report.basis, ScopeBasis::InferredSiblings);
        assert_eq!(report.recipients, 3);
        assert_eq!(report.scope, DispatchScope::SpecificUsers);
    }

    #[tokio::test]
    async fn unknown_notification_is_not_found() {
        let store = seeded(1);
        let err = aggregator(&store).dispatch_scope(404).await.unwrap_err();
        assert!(matches!(err, CoreError::NotFound { id: 404, .. }));
    }

    #[tokio::test]
    async fn summaries_carry_engagement_and_scope() {
        let store = seeded(2);
        let rows = store
            .create_batch(new_dispatch_id(), &[1, 2], &template())
            .await
            .unwrap();
        store
            .upsert(EngagementKey {
                notification_id: rows[0].id,
                user_id: 1,
                action: EngagementAction::Clicked,
            })
            .await
            .unwrap();

        let summaries = aggregator(&store).dispatch_summaries(10).await.unwrap();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].engagement.recipients, 2);
        assert_eq!(summaries[0].engagement.totals.clicked, 1);
        assert_eq!(summaries[0].scope, DispatchScope::AllUsers);
    }
}
