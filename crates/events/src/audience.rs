//! Audience resolution against the live user directory.

use std::sync::Arc;

use herald_core::audience::{self, AudienceSpec, AudienceStats, ResolvedAudience};
use herald_core::error::CoreError;

use crate::store::UserDirectory;

#[derive(Debug, thiserror::Error)]
pub enum AudienceError {
    /// The spec matched nobody. Callers skip the dispatch.
    #[error("No recipients matched ({} users in directory)", stats.total)]
    NoRecipients { stats: AudienceStats },

    #[error("User directory unavailable: {0}")]
    Directory(#[from] CoreError),
}

/// Resolves an [`AudienceSpec`] into a deduplicated recipient list.
///
/// Recipients and stats come from one directory snapshot, so a preview
/// shown for confirmation matches what [`ResolvedAudience`] later sends to.
pub struct AudienceResolver {
    directory: Arc<dyn UserDirectory>,
}

impl AudienceResolver {
    pub fn new(directory: Arc<dyn UserDirectory>) -> Self {
        Self { directory }
    }

    pub async fn resolve(&self, spec: &AudienceSpec) -> Result<ResolvedAudience, AudienceError> {
        let snapshot = self.directory.snapshot().await?;
        let resolved = audience::resolve(spec, &snapshot)
            .map_err(|e| AudienceError::NoRecipients { stats: e.stats })?;

        tracing::debug!(
            recipients = resolved.len(),
            directory_total = resolved.stats.total,
            "Resolved audience"
        );
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use chrono::Utc;
    use herald_core::audience::AudienceFilter;

    use crate::store::memory::{MemoryStore, MemoryUser};

    fn resolver() -> AudienceResolver {
        let store = MemoryStore::default();
        store.add_user(MemoryUser::new(1, "Ada").admin().logged_in_at(Utc::now()));
        store.add_user(MemoryUser::new(2, "Brook"));
        store.add_user(MemoryUser::new(3, "Cy").inactive());
        AudienceResolver::new(Arc::new(store))
    }

    #[tokio::test]
    async fn explicit_ids_are_intersected_and_deduplicated() {
        let resolved = resolver()
            .resolve(&AudienceSpec::Explicit(vec![2, 2, 99, 1, 2]))
            .await
            .unwrap();
        assert_eq!(resolved.recipients, vec![1, 2]);
        assert_eq!(resolved.stats.total, 3);
    }

    #[tokio::test]
    async fn stats_describe_the_directory_snapshot() {
        let resolved = resolver().resolve(&AudienceSpec::ActiveOnly).await.unwrap();
        assert_eq!(resolved.recipients, vec![1, 2]);
        assert_eq!(resolved.stats.active, 2);
        assert_eq!(resolved.stats.admins, 1);
        assert_eq!(resolved.stats.ever_logged_in, 1);
    }

    #[tokio::test]
    async fn empty_result_is_a_signal_not_a_failure() {
        let err = resolver()
            .resolve(&AudienceSpec::Filtered(vec![
                AudienceFilter::AdminsOnly,
                AudienceFilter::NeverLoggedIn,
            ]))
            .await
            .unwrap_err();
        assert_matches!(err, AudienceError::NoRecipients { stats } if stats.total == 3);
    }
}
