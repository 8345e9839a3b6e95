//! Repository for per-type email preferences.

use herald_core::types::DbId;
use sqlx::PgPool;

use crate::models::notification_preference::{MailContactRow, NotificationPreference};

const COLUMNS: &str = "id, user_id, notification_type, email_enabled, created_at, updated_at";

pub struct NotificationPreferenceRepo;

impl NotificationPreferenceRepo {
    pub async fn list_for_user(
        pool: &PgPool,
        user_id: DbId,
    ) -> Result<Vec<NotificationPreference>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM notification_preferences \
             WHERE user_id = $1 ORDER BY notification_type"
        );
        sqlx::query_as::<_, NotificationPreference>(&query)
            .bind(user_id)
            .fetch_all(pool)
            .await
    }

    /// Insert or update the email preference for one notification type.
    pub async fn upsert(
        pool: &PgPool,
        user_id: DbId,
        notification_type: &str,
        email_enabled: bool,
    ) -> Result<NotificationPreference, sqlx::Error> {
        let query = format!(
            "INSERT INTO notification_preferences (user_id, notification_type, email_enabled) \
             VALUES ($1, $2, $3) \
             ON CONFLICT (user_id, notification_type) \
             DO UPDATE SET email_enabled = EXCLUDED.email_enabled, updated_at = NOW() \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, NotificationPreference>(&query)
            .bind(user_id)
            .bind(notification_type)
            .bind(email_enabled)
            .fetch_one(pool)
            .await
    }

    /// Address and opt-in state for mailing `user_id` about `notification_type`.
    ///
    /// Returns `None` when the user does not exist.
    pub async fn contact_for(
        pool: &PgPool,
        user_id: DbId,
        notification_type: &str,
    ) -> Result<Option<MailContactRow>, sqlx::Error> {
        sqlx::query_as::<_, MailContactRow>(
            "SELECT u.display_name, u.email, COALESCE(p.email_enabled, true) AS email_enabled \
             FROM users u \
             LEFT JOIN notification_preferences p \
                 ON p.user_id = u.id AND p.notification_type = $2 \
             WHERE u.id = $1",
        )
        .bind(user_id)
        .bind(notification_type)
        .fetch_optional(pool)
        .await
    }
}
