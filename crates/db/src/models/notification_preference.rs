//! Per-user, per-type email preferences.

use herald_core::types::{DbId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

/// A row from the `notification_preferences` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct NotificationPreference {
    pub id: DbId,
    pub user_id: DbId,
    pub notification_type: String,
    pub email_enabled: bool,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// Everything the email channel needs to reach one user about one type.
///
/// `email_enabled` is `true` when the user has no stored preference.
#[derive(Debug, Clone, FromRow)]
pub struct MailContactRow {
    pub display_name: String,
    pub email: Option<String>,
    pub email_enabled: bool,
}
