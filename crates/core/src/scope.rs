//! Dispatch scope classification.
//!
//! A dispatch is reported as reaching "all users" when its recipient count
//! covers at least `threshold` of the active user base, otherwise as
//! reaching "specific users".
//!
//! Rows carry a `dispatch_id`, so the recipient count is exact. Rows
//! created without one fall back to counting siblings: rows with identical
//! title and message created within [`SIBLING_WINDOW_SECS`] of the target row.

use serde::Serialize;

use crate::types::Timestamp;

/// Default share of active users a dispatch must reach to count as
/// "all users".
pub const DEFAULT_ALL_USERS_RATIO: f64 = 0.9;

/// Half-width, in seconds, of the time window used to find sibling rows of
/// legacy notifications without a dispatch id.
pub const SIBLING_WINDOW_SECS: i64 = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchScope {
    AllUsers,
    SpecificUsers,
}

/// How the recipient count behind a classification was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeBasis {
    DispatchId,
    InferredSiblings,
}

/// Classify a dispatch that reached `recipients` users out of `active_users`.
pub fn classify(recipients: u64, active_users: u64, threshold: f64) -> DispatchScope {
    if active_users == 0 || recipients == 0 {
        return DispatchScope::SpecificUsers;
    }
    let ratio = recipients as f64 / active_users as f64;
    if ratio >= threshold {
        DispatchScope::AllUsers
    } else {
        DispatchScope::SpecificUsers
    }
}

/// Inclusive `[from, to]` range searched for sibling rows of `created_at`.
pub fn sibling_range(created_at: Timestamp) -> (Timestamp, Timestamp) {
    let window = chrono::Duration::seconds(SIBLING_WINDOW_SECS);
    (created_at - window, created_at + window)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn full_coverage_is_all_users() {
        assert_eq!(classify(50, 50, 0.9), DispatchScope::AllUsers);
    }

    #[test]
    fn threshold_is_inclusive() {
        assert_eq!(classify(45, 50, 0.9), DispatchScope::AllUsers);
        assert_eq!(classify(44, 50, 0.9), DispatchScope::SpecificUsers);
    }

    #[test]
    fn more_recipients_than_active_users_is_all_users() {
        // Inactive users were targeted too.
        assert_eq!(classify(60, 50, 0.9), DispatchScope::AllUsers);
    }

    #[test]
    fn empty_bases_are_specific() {
        assert_eq!(classify(0, 50, 0.9), DispatchScope::SpecificUsers);
        assert_eq!(classify(5, 0, 0.9), DispatchScope::SpecificUsers);
    }

    #[test]
    fn sibling_range_spans_sixty_seconds_each_way() {
        let now = Utc::now();
        let (from, to) = sibling_range(now);
        assert_eq!((now - from).num_seconds(), 60);
        assert_eq!((to - now).num_seconds(), 60);
    }
}
