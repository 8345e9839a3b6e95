//! Repository for the `reminders` table.

use herald_core::types::{DbId, Timestamp};
use sqlx::PgPool;

use crate::models::reminder::{CreateReminder, Reminder};

const COLUMNS: &str = "id, title, message, audience, schedule, priority, next_run_at, \
                       is_active, created_at, updated_at";

pub struct ReminderRepo;

impl ReminderRepo {
    pub async fn create(pool: &PgPool, input: &CreateReminder) -> Result<Reminder, sqlx::Error> {
        let query = format!(
            "INSERT INTO reminders (title, message, audience, schedule, priority, next_run_at) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Reminder>(&query)
            .bind(&input.title)
            .bind(&input.message)
            .bind(&input.audience)
            .bind(&input.schedule)
            .bind(&input.priority)
            .bind(input.next_run_at)
            .fetch_one(pool)
            .await
    }

    /// Active reminders whose `next_run_at` is at or before `now`.
    pub async fn list_due(pool: &PgPool, now: Timestamp) -> Result<Vec<Reminder>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM reminders \
             WHERE is_active = true AND next_run_at <= $1 \
             ORDER BY next_run_at, id"
        );
        sqlx::query_as::<_, Reminder>(&query)
            .bind(now)
            .fetch_all(pool)
            .await
    }

    /// Move a reminder to its next run, or deactivate it when `next_run_at`
    /// is `None`.
    pub async fn advance(
        pool: &PgPool,
        id: DbId,
        next_run_at: Option<Timestamp>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE reminders \
             SET next_run_at = COALESCE($2, next_run_at), \
                 is_active = ($2 IS NOT NULL), \
                 updated_at = NOW() \
             WHERE id = $1",
        )
        .bind(id)
        .bind(next_run_at)
        .execute(pool)
        .await?;
        Ok(())
    }
}
