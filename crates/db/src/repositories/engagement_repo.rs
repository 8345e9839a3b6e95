//! Repository for the `notification_engagements` ledger.

use herald_core::types::DbId;
use sqlx::PgPool;

use crate::models::engagement::EngagementRow;

const COLUMNS: &str =
    "id, notification_id, user_id, action, dispatch_id, title, dispatched_at, created_at";

pub struct EngagementRepo;

impl EngagementRepo {
    /// Record an action unless the same (notification, user, action) exists.
    ///
    /// The dispatch columns are copied from the notification while it still
    /// exists; a row recorded after the notification is gone keeps them
    /// `NULL`. Returns `true` when a new row was stored.
    pub async fn insert(
        pool: &PgPool,
        notification_id: DbId,
        user_id: DbId,
        action: &str,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "INSERT INTO notification_engagements \
                 (notification_id, user_id, action, dispatch_id, title, dispatched_at) \
             SELECT target.id, $2, $3, n.dispatch_id, n.title, n.created_at \
             FROM (SELECT $1::BIGINT AS id) AS target \
             LEFT JOIN notifications n ON n.id = target.id \
             ON CONFLICT (notification_id, user_id, action) DO NOTHING",
        )
        .bind(notification_id)
        .bind(user_id)
        .bind(action)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Ledger rows for one notification, oldest first.
    pub async fn list_for_notification(
        pool: &PgPool,
        notification_id: DbId,
    ) -> Result<Vec<EngagementRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM notification_engagements \
             WHERE notification_id = $1 \
             ORDER BY created_at, id"
        );
        sqlx::query_as::<_, EngagementRow>(&query)
            .bind(notification_id)
            .fetch_all(pool)
            .await
    }
}
