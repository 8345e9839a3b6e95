//! Scheduled reminder rows.

use herald_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A row from the `reminders` table.
///
/// `audience` holds a serialised `AudienceSpec`; `schedule` is one of
/// `once`, `daily`, `weekly`.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Reminder {
    pub id: DbId,
    pub title: String,
    pub message: String,
    pub audience: serde_json::Value,
    pub schedule: String,
    pub priority: String,
    pub next_run_at: Timestamp,
    pub is_active: bool,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// DTO for creating a reminder.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateReminder {
    pub title: String,
    pub message: String,
    pub audience: serde_json::Value,
    pub schedule: String,
    pub priority: String,
    pub next_run_at: Timestamp,
}
