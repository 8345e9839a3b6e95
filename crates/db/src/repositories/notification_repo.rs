//! Repository for the `notifications` table.

use herald_core::notification::NewNotification;
use herald_core::types::{DbId, DispatchId, Timestamp};
use sqlx::PgPool;

use crate::models::notification::NotificationRow;

/// Column list for `notifications` queries.
const COLUMNS: &str = "id, recipient_id, dispatch_id, notification_type, title, message, \
                       payload, priority, is_read, read_at, created_at";

/// Provides insert, read-state and query operations for notifications.
pub struct NotificationRepo;

impl NotificationRepo {
    /// Insert every row in one statement, returning the stored rows.
    ///
    /// The insert is all-or-nothing: on error no row is persisted.
    pub async fn insert_many(
        pool: &PgPool,
        rows: &[NewNotification],
    ) -> Result<Vec<NotificationRow>, sqlx::Error> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let mut recipient_ids = Vec::with_capacity(rows.len());
        let mut dispatch_ids = Vec::with_capacity(rows.len());
        let mut types = Vec::with_capacity(rows.len());
        let mut titles = Vec::with_capacity(rows.len());
        let mut messages = Vec::with_capacity(rows.len());
        let mut payloads = Vec::with_capacity(rows.len());
        let mut priorities = Vec::with_capacity(rows.len());

        for row in rows {
            recipient_ids.push(row.recipient_id);
            dispatch_ids.push(row.dispatch_id);
            types.push(row.payload.kind().as_str().to_string());
            titles.push(row.title.clone());
            messages.push(row.message.clone());
            payloads.push(
                serde_json::to_value(&row.payload).map_err(|e| sqlx::Error::Encode(Box::new(e)))?,
            );
            priorities.push(row.priority.as_str().to_string());
        }

        let query = format!(
            "INSERT INTO notifications \
                 (recipient_id, dispatch_id, notification_type, title, message, payload, priority) \
             SELECT * FROM UNNEST(\
                 $1::BIGINT[], $2::UUID[], $3::TEXT[], $4::TEXT[], $5::TEXT[], $6::JSONB[], $7::TEXT[]) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, NotificationRow>(&query)
            .bind(&recipient_ids)
            .bind(&dispatch_ids)
            .bind(&types)
            .bind(&titles)
            .bind(&messages)
            .bind(&payloads)
            .bind(&priorities)
            .fetch_all(pool)
            .await
    }

    /// Find a notification owned by `recipient_id`.
    pub async fn find_for_recipient(
        pool: &PgPool,
        id: DbId,
        recipient_id: DbId,
    ) -> Result<Option<NotificationRow>, sqlx::Error> {
        let query =
            format!("SELECT {COLUMNS} FROM notifications WHERE id = $1 AND recipient_id = $2");
        sqlx::query_as::<_, NotificationRow>(&query)
            .bind(id)
            .bind(recipient_id)
            .fetch_optional(pool)
            .await
    }

    /// Find a notification by id regardless of recipient.
    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<NotificationRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM notifications WHERE id = $1");
        sqlx::query_as::<_, NotificationRow>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Most recent notifications for a recipient, newest first.
    pub async fn list_recent(
        pool: &PgPool,
        recipient_id: DbId,
        limit: i64,
    ) -> Result<Vec<NotificationRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM notifications \
             WHERE recipient_id = $1 \
             ORDER BY created_at DESC, id DESC \
             LIMIT $2"
        );
        sqlx::query_as::<_, NotificationRow>(&query)
            .bind(recipient_id)
            .bind(limit)
            .fetch_all(pool)
            .await
    }

    /// Number of unread notifications for a recipient.
    pub async fn unread_count(pool: &PgPool, recipient_id: DbId) -> Result<i64, sqlx::Error> {
        let count: Option<i64> = sqlx::query_scalar(
            "SELECT COUNT(*) FROM notifications WHERE recipient_id = $1 AND is_read = false",
        )
        .bind(recipient_id)
        .fetch_one(pool)
        .await?;
        Ok(count.unwrap_or(0))
    }

    /// Mark a single notification as read.
    ///
    /// Returns the updated row only when it transitioned from unread to
    /// read; an already-read or missing row yields `None`.
    pub async fn mark_read(
        pool: &PgPool,
        id: DbId,
        recipient_id: DbId,
    ) -> Result<Option<NotificationRow>, sqlx::Error> {
        let query = format!(
            "UPDATE notifications \
             SET is_read = true, read_at = NOW() \
             WHERE id = $1 AND recipient_id = $2 AND is_read = false \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, NotificationRow>(&query)
            .bind(id)
            .bind(recipient_id)
            .fetch_optional(pool)
            .await
    }

    /// Mark every unread notification of a recipient as read.
    ///
    /// Returns the rows that transitioned.
    pub async fn mark_all_read(
        pool: &PgPool,
        recipient_id: DbId,
    ) -> Result<Vec<NotificationRow>, sqlx::Error> {
        let query = format!(
            "UPDATE notifications \
             SET is_read = true, read_at = NOW() \
             WHERE recipient_id = $1 AND is_read = false \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, NotificationRow>(&query)
            .bind(recipient_id)
            .fetch_all(pool)
            .await
    }

    /// Delete one notification and record its `dismissed` engagement in the
    /// same statement. Returns `true` if a row was removed.
    pub async fn delete(pool: &PgPool, id: DbId, recipient_id: DbId) -> Result<bool, sqlx::Error> {
        let removed: Option<i64> = sqlx::query_scalar(
            "WITH removed AS ( \
                 DELETE FROM notifications WHERE id = $1 AND recipient_id = $2 \
                 RETURNING id, recipient_id, dispatch_id, title, created_at \
             ), dismissed AS ( \
                 INSERT INTO notification_engagements \
                     (notification_id, user_id, action, dispatch_id, title, dispatched_at) \
                 SELECT id, recipient_id, 'dismissed', dispatch_id, title, created_at FROM removed \
                 ON CONFLICT (notification_id, user_id, action) DO NOTHING \
             ) \
             SELECT COUNT(*) FROM removed",
        )
        .bind(id)
        .bind(recipient_id)
        .fetch_one(pool)
        .await?;
        Ok(removed.unwrap_or(0) > 0)
    }

    /// Delete every read notification of a recipient, returning the count
    /// removed. Unread rows are never touched.
    pub async fn delete_all_read(pool: &PgPool, recipient_id: DbId) -> Result<u64, sqlx::Error> {
        let result =
            sqlx::query("DELETE FROM notifications WHERE recipient_id = $1 AND is_read = true")
                .bind(recipient_id)
                .execute(pool)
                .await?;
        Ok(result.rows_affected())
    }

    /// Number of rows created by one dispatch.
    pub async fn count_by_dispatch(
        pool: &PgPool,
        dispatch_id: DispatchId,
    ) -> Result<i64, sqlx::Error> {
        let count: Option<i64> =
            sqlx::query_scalar("SELECT COUNT(*) FROM notifications WHERE dispatch_id = $1")
                .bind(dispatch_id)
                .fetch_one(pool)
                .await?;
        Ok(count.unwrap_or(0))
    }

    /// Number of rows with identical title and message created in `[from, to]`.
    pub async fn count_similar(
        pool: &PgPool,
        title: &str,
        message: &str,
        from: Timestamp,
        to: Timestamp,
    ) -> Result<i64, sqlx::Error> {
        let count: Option<i64> = sqlx::query_scalar(
            "SELECT COUNT(*) FROM notifications \
             WHERE title = $1 AND message = $2 AND created_at BETWEEN $3 AND $4",
        )
        .bind(title)
        .bind(message)
        .bind(from)
        .bind(to)
        .fetch_one(pool)
        .await?;
        Ok(count.unwrap_or(0))
    }
}
