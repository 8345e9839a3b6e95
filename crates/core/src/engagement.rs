//! Engagement ledger types.
//!
//! An [`EngagementEvent`] is identified by `(notification_id, user_id,
//! action)`; the ledger holds at most one row per identity.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::{DbId, Timestamp};

/// A user action against one notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngagementAction {
    Read,
    Clicked,
    Dismissed,
}

impl EngagementAction {
    pub const ALL: [EngagementAction; 3] = [
        EngagementAction::Read,
        EngagementAction::Clicked,
        EngagementAction::Dismissed,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EngagementAction::Read => "read",
            EngagementAction::Clicked => "clicked",
            EngagementAction::Dismissed => "dismissed",
        }
    }
}

impl fmt::Display for EngagementAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EngagementAction {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "read" => Ok(EngagementAction::Read),
            "clicked" => Ok(EngagementAction::Clicked),
            "dismissed" => Ok(EngagementAction::Dismissed),
            other => Err(CoreError::Validation(format!(
                "unknown engagement action '{other}'"
            ))),
        }
    }
}

/// Identity of one ledger row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EngagementKey {
    pub notification_id: DbId,
    pub user_id: DbId,
    pub action: EngagementAction,
}

/// A recorded engagement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngagementEvent {
    pub notification_id: DbId,
    pub user_id: DbId,
    pub action: EngagementAction,
    pub created_at: Timestamp,
}

impl EngagementEvent {
    pub fn key(&self) -> EngagementKey {
        EngagementKey {
            notification_id: self.notification_id,
            user_id: self.user_id,
            action: self.action,
        }
    }
}

/// Per-action totals over some window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ActionTotals {
    pub read: i64,
    pub clicked: i64,
    pub dismissed: i64,
}

impl ActionTotals {
    pub fn add(&mut self, action: EngagementAction, count: i64) {
        match action {
            EngagementAction::Read => self.read += count,
            EngagementAction::Clicked => self.clicked += count,
            EngagementAction::Dismissed => self.dismissed += count,
        }
    }

    pub fn total(&self) -> i64 {
        self.read + self.clicked + self.dismissed
    }
}
