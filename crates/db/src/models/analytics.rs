//! Read-side rollup rows.

use herald_core::types::{DbId, DispatchId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

/// Engagement count for one action type.
#[derive(Debug, Clone, FromRow)]
pub struct ActionCountRow {
    pub action: String,
    pub count: i64,
}

/// Interaction totals for one training module or news article.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ContentEngagementRow {
    pub content_id: DbId,
    pub kind: String,
    pub title: String,
    pub views: i64,
    pub likes: i64,
    pub comments: i64,
    pub completions: i64,
    pub total: i64,
}

/// Recipient and engagement counts for one dispatch.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct DispatchEngagementRow {
    pub dispatch_id: DispatchId,
    pub title: String,
    pub recipients: i64,
    pub read: i64,
    pub clicked: i64,
    pub dismissed: i64,
    pub created_at: Timestamp,
}
