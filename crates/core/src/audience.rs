//! Audience targeting.
//!
//! [`resolve`] turns an [`AudienceSpec`] into a deduplicated recipient list
//! plus [`AudienceStats`], both computed from the same directory snapshot so
//! a confirmation screen and the dispatch that follows it never disagree.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::types::{DbId, Timestamp};

// ---------------------------------------------------------------------------
// Directory
// ---------------------------------------------------------------------------

/// The fields of a user that targeting depends on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DirectoryUser {
    pub id: DbId,
    pub is_active: bool,
    pub is_admin: bool,
    pub last_login_at: Option<Timestamp>,
}

// ---------------------------------------------------------------------------
// AudienceSpec
// ---------------------------------------------------------------------------

/// A single declarative predicate over a [`DirectoryUser`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "filter", content = "value", rename_all = "snake_case")]
pub enum AudienceFilter {
    AdminsOnly,
    NonAdminsOnly,
    EverLoggedIn,
    NeverLoggedIn,
    /// Last login at or after the given instant.
    LoggedInSince(Timestamp),
    /// Never logged in, or last login before the given instant.
    InactiveSince(Timestamp),
}

impl AudienceFilter {
    pub fn matches(&self, user: &DirectoryUser) -> bool {
        match self {
            AudienceFilter::AdminsOnly => user.is_admin,
            AudienceFilter::NonAdminsOnly => !user.is_admin,
            AudienceFilter::EverLoggedIn => user.last_login_at.is_some(),
            AudienceFilter::NeverLoggedIn => user.last_login_at.is_none(),
            AudienceFilter::LoggedInSince(since) => {
                user.last_login_at.is_some_and(|at| at >= *since)
            }
            AudienceFilter::InactiveSince(since) => {
                user.last_login_at.map_or(true, |at| at < *since)
            }
        }
    }
}

/// Who should receive a dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum AudienceSpec {
    /// Every user in the directory.
    All,
    /// Every user with `is_active = true`.
    ActiveOnly,
    /// The listed ids. Unknown ids are dropped, repeats collapse.
    Explicit(Vec<DbId>),
    /// Users matching every filter (an empty list matches everyone).
    Filtered(Vec<AudienceFilter>),
}

impl AudienceSpec {
    fn admits(&self, user: &DirectoryUser, explicit: Option<&HashSet<DbId>>) -> bool {
        match self {
            AudienceSpec::All => true,
            AudienceSpec::ActiveOnly => user.is_active,
            AudienceSpec::Explicit(_) => explicit.is_some_and(|ids| ids.contains(&user.id)),
            AudienceSpec::Filtered(filters) => filters.iter().all(|f| f.matches(user)),
        }
    }
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

/// Directory counts taken from the snapshot used for resolution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudienceStats {
    pub total: u64,
    pub active: u64,
    pub ever_logged_in: u64,
    pub admins: u64,
}

impl AudienceStats {
    /// A user listed more than once is counted once, like in the recipients.
    pub fn from_snapshot(snapshot: &[DirectoryUser]) -> Self {
        let mut seen = HashSet::with_capacity(snapshot.len());
        snapshot
            .iter()
            .filter(|user| seen.insert(user.id))
            .fold(Self::default(), |mut stats, user| {
                stats.total += 1;
                stats.active += u64::from(user.is_active);
                stats.ever_logged_in += u64::from(user.last_login_at.is_some());
                stats.admins += u64::from(user.is_admin);
                stats
            })
    }
}

/// An immutable, deduplicated recipient list.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedAudience {
    pub spec: AudienceSpec,
    pub recipients: Vec<DbId>,
    pub stats: AudienceStats,
}

impl ResolvedAudience {
    pub fn len(&self) -> usize {
        self.recipients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.recipients.is_empty()
    }
}

/// The spec matched nobody; callers skip the dispatch.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("audience resolved to zero recipients ({} users in directory)", stats.total)]
pub struct NoRecipients {
    pub stats: AudienceStats,
}

/// Resolve `spec` against a directory snapshot.
///
/// Recipients keep snapshot order; a user id appearing twice in the snapshot
/// is still returned once.
pub fn resolve(
    spec: &AudienceSpec,
    snapshot: &[DirectoryUser],
) -> Result<ResolvedAudience, NoRecipients> {
    let stats = AudienceStats::from_snapshot(snapshot);

    let explicit: Option<HashSet<DbId>> = match spec {
        AudienceSpec::Explicit(ids) => Some(ids.iter().copied().collect()),
        _ => None,
    };

    let mut seen = HashSet::with_capacity(snapshot.len());
    let recipients: Vec<DbId> = snapshot
        .iter()
        .filter(|user| spec.admits(user, explicit.as_ref()))
        .filter(|user| seen.insert(user.id))
        .map(|user| user.id)
        .collect();

    if recipients.is_empty() {
        return Err(NoRecipients { stats });
    }

    Ok(ResolvedAudience {
        spec: spec.clone(),
        recipients,
        stats,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn user(id: DbId, is_active: bool, is_admin: bool, logged_in: bool) -> DirectoryUser {
        DirectoryUser {
            id,
            is_active,
            is_admin,
            last_login_at: logged_in.then(|| Utc::now() - Duration::days(id)),
        }
    }

    fn directory() -> Vec<DirectoryUser> {
        vec![
            user(1, true, true, true),
            user(2, true, false, true),
            user(3, false, false, false),
            user(4, true, false, false),
            user(5, false, false, true),
        ]
    }

    #[test]
    fn all_includes_inactive_users() {
        let resolved = resolve(&AudienceSpec::All, &directory()).unwrap();
        assert_eq!(resolved.recipients, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn active_only_excludes_inactive_users() {
        let resolved = resolve(&AudienceSpec::ActiveOnly, &directory()).unwrap();
        assert_eq!(resolved.recipients, vec![1, 2, 4]);
    }

    #[test]
    fn explicit_drops_unknown_ids_and_collapses_repeats() {
        let spec = AudienceSpec::Explicit(vec![2, 2, 99, 5, 2, 100]);
        let resolved = resolve(&spec, &directory()).unwrap();
        assert_eq!(resolved.recipients, vec![2, 5]);
    }

    #[test]
    fn explicit_with_only_unknown_ids_is_no_recipients() {
        let spec = AudienceSpec::Explicit(vec![42, 43]);
        let err = resolve(&spec, &directory()).unwrap_err();
        assert_eq!(err.stats.total, 5);
    }

    #[test]
    fn filters_are_a_conjunction() {
        let spec = AudienceSpec::Filtered(vec![
            AudienceFilter::NonAdminsOnly,
            AudienceFilter::EverLoggedIn,
        ]);
        let resolved = resolve(&spec, &directory()).unwrap();
        assert_eq!(resolved.recipients, vec![2, 5]);
    }

    #[test]
    fn inactive_since_includes_never_logged_in() {
        let cutoff = Utc::now() - Duration::days(3);
        let spec = AudienceSpec::Filtered(vec![AudienceFilter::InactiveSince(cutoff)]);
        let resolved = resolve(&spec, &directory()).unwrap();
        // user 5 logged in 5 days ago, users 3/4 never did
        assert_eq!(resolved.recipients, vec![3, 4, 5]);
    }

    #[test]
    fn logged_in_since_only_counts_recent_logins() {
        let cutoff = Utc::now() - Duration::days(3);
        let spec = AudienceSpec::Filtered(vec![AudienceFilter::LoggedInSince(cutoff)]);
        let resolved = resolve(&spec, &directory()).unwrap();
        assert_eq!(resolved.recipients, vec![1, 2]);
    }

    #[test]
    fn stats_describe_the_snapshot() {
        let resolved = resolve(&AudienceSpec::ActiveOnly, &directory()).unwrap();
        assert_eq!(
            resolved.stats,
            AudienceStats {
                total: 5,
                active: 3,
                ever_logged_in: 3,
                admins: 1,
            }
        );
    }

    #[test]
    fn duplicate_directory_rows_resolve_once() {
        let mut snapshot = directory();
        snapshot.push(user(2, true, false, true));
        let resolved = resolve(&AudienceSpec::All, &snapshot).unwrap();
        assert_eq!(resolved.len(), 5);
        assert_eq!(resolved.stats.total, 5);
        assert_eq!(resolved.stats.active, 3);
    }

    #[test]
    fn empty_directory_is_no_recipients() {
        assert!(resolve(&AudienceSpec::All, &[]).is_err());
    }

    #[test]
    fn spec_serializes_as_tagged_json() {
        let spec = AudienceSpec::Filtered(vec![AudienceFilter::AdminsOnly]);
        let json = serde_json::to_value(&spec).unwrap();
        assert_eq!(json["kind"], "filtered");
        assert_eq!(json["value"][0]["filter"], "admins_only");
        let back: AudienceSpec = serde_json::from_value(json).unwrap();
        assert_eq!(back, spec);
    }
}
