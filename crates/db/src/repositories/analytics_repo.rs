//! Aggregate queries backing the engagement dashboard.

use herald_core::types::Timestamp;
use sqlx::PgPool;

use crate::models::analytics::{ActionCountRow, ContentEngagementRow, DispatchEngagementRow};

pub struct AnalyticsRepo;

impl AnalyticsRepo {
    /// Ledger row counts per action since `since`.
    pub async fn action_totals_since(
        pool: &PgPool,
        since: Timestamp,
    ) -> Result<Vec<ActionCountRow>, sqlx::Error> {
        sqlx::query_as::<_, ActionCountRow>(
            "SELECT action, COUNT(*) AS count \
             FROM notification_engagements \
             WHERE created_at >= $1 \
             GROUP BY action",
        )
        .bind(since)
        .fetch_all(pool)
        .await
    }

    /// Content items with the most interactions since `since`, descending.
    pub async fn top_content_since(
        pool: &PgPool,
        since: Timestamp,
        limit: i64,
    ) -> Result<Vec<ContentEngagementRow>, sqlx::Error> {
        sqlx::query_as::<_, ContentEngagementRow>(
            "SELECT c.id AS content_id, c.kind, c.title, \
                    COUNT(*) FILTER (WHERE i.kind = 'view') AS views, \
                    COUNT(*) FILTER (WHERE i.kind = 'like') AS likes, \
                    COUNT(*) FILTER (WHERE i.kind = 'comment') AS comments, \
                    COUNT(*) FILTER (WHERE i.kind = 'completion') AS completions, \
                    COUNT(*) AS total \
             FROM content_interactions i \
             JOIN content_items c ON c.id = i.content_id \
             WHERE i.created_at >= $1 \
             GROUP BY c.id, c.kind, c.title \
             ORDER BY total DESC, c.id \
             LIMIT $2",
        )
        .bind(since)
        .bind(limit)
        .fetch_all(pool)
        .await
    }

    /// Recipient and engagement counts per dispatch created since `since`,
    /// newest first.
    ///
    /// Recipients are the dispatch's surviving rows plus deleted rows the
    /// ledger still references; engagement counts come from the ledger
    /// alone, so neither shrinks when users delete notifications.
    pub async fn dispatch_summaries(
        pool: &PgPool,
        since: Timestamp,
        limit: i64,
    ) -> Result<Vec<DispatchEngagementRow>, sqlx::Error> {
        sqlx::query_as::<_, DispatchEngagementRow>(
            "WITH delivered AS ( \
                 SELECT id AS notification_id, dispatch_id, title, created_at \
                 FROM notifications WHERE dispatch_id IS NOT NULL \
                 UNION \
                 SELECT notification_id, dispatch_id, title, dispatched_at \
                 FROM notification_engagements WHERE dispatch_id IS NOT NULL \
             ), dispatches AS ( \
                 SELECT dispatch_id, \
                        MIN(title) AS title, \
                        COUNT(DISTINCT notification_id) AS recipients, \
                        MIN(created_at) AS created_at \
                 FROM delivered \
                 GROUP BY dispatch_id \
                 HAVING MIN(created_at) >= $1 \
             ), actions AS ( \
                 SELECT dispatch_id, \
                        COUNT(*) FILTER (WHERE action = 'read') AS read, \
                        COUNT(*) FILTER (WHERE action = 'clicked') AS clicked, \
                        COUNT(*) FILTER (WHERE action = 'dismissed') AS dismissed \
                 FROM notification_engagements \
                 WHERE dispatch_id IS NOT NULL \
                 GROUP BY dispatch_id \
             ) \
             SELECT d.dispatch_id, d.title, d.recipients, \
                    COALESCE(a.read, 0) AS read, \
                    COALESCE(a.clicked, 0) AS clicked, \
                    COALESCE(a.dismissed, 0) AS dismissed, \
                    d.created_at \
             FROM dispatches d \
             LEFT JOIN actions a ON a.dispatch_id = d.dispatch_id \
             ORDER BY d.created_at DESC \
             LIMIT $2",
        )
        .bind(since)
        .bind(limit)
        .fetch_all(pool)
        .await
    }
}
