//! Notification rows.

use herald_core::error::CoreError;
use herald_core::notification::{Notification, NotificationPayload, Priority};
use herald_core::types::{DbId, DispatchId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

/// A row from the `notifications` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct NotificationRow {
    pub id: DbId,
    pub recipient_id: DbId,
    pub dispatch_id: Option<DispatchId>,
    pub notification_type: String,
    pub title: String,
    pub message: String,
    pub payload: serde_json::Value,
    pub priority: String,
    pub is_read: bool,
    pub read_at: Option<Timestamp>,
    pub created_at: Timestamp,
}

impl TryFrom<NotificationRow> for Notification {
    type Error = CoreError;

    fn try_from(row: NotificationRow) -> Result<Self, Self::Error> {
        let payload: NotificationPayload = serde_json::from_value(row.payload).map_err(|e| {
            CoreError::Internal(format!("Malformed payload on notification {}: {e}", row.id))
        })?;
        Ok(Notification {
            id: row.id,
            recipient_id: row.recipient_id,
            dispatch_id: row.dispatch_id,
            title: row.title,
            message: row.message,
            payload,
            priority: row.priority.parse::<Priority>()?,
            read: row.is_read,
            created_at: row.created_at,
        })
    }
}

/// Convert a batch of rows, failing on the first malformed one.
pub fn into_notifications(rows: Vec<NotificationRow>) -> Result<Vec<Notification>, CoreError> {
    rows.into_iter().map(Notification::try_from).collect()
}
