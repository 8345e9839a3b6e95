//! Engagement ledger rows.

use herald_core::engagement::{EngagementAction, EngagementEvent};
use herald_core::error::CoreError;
use herald_core::types::{DbId, DispatchId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

/// A row from the `notification_engagements` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct EngagementRow {
    pub id: DbId,
    pub notification_id: DbId,
    pub user_id: DbId,
    pub action: String,
    /// Copied from the notification when the action was recorded.
    pub dispatch_id: Option<DispatchId>,
    pub title: Option<String>,
    pub dispatched_at: Option<Timestamp>,
    pub created_at: Timestamp,
}

impl TryFrom<EngagementRow> for EngagementEvent {
    type Error = CoreError;

    fn try_from(row: EngagementRow) -> Result<Self, Self::Error> {
        Ok(EngagementEvent {
            notification_id: row.notification_id,
            user_id: row.user_id,
            action: row.action.parse::<EngagementAction>()?,
            created_at: row.created_at,
        })
    }
}
