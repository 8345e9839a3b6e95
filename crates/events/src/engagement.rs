//! Idempotent engagement recording.
//!
//! Recording never fails the caller: store errors are logged and reported
//! as [`RecordOutcome::Failed`] so navigation and UI flows continue.

use std::sync::Arc;

use herald_core::engagement::{EngagementAction, EngagementKey};
use herald_core::types::DbId;
use tokio::task::JoinHandle;

use crate::store::EngagementLedger;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    Recorded,
    /// The same (notification, user, action) was already in the ledger.
    AlreadyRecorded,
    Failed,
}

#[derive(Clone)]
pub struct EngagementRecorder {
    ledger: Arc<dyn EngagementLedger>,
}

impl EngagementRecorder {
    pub fn new(ledger: Arc<dyn EngagementLedger>) -> Self {
        Self { ledger }
    }

    pub async fn record(
        &self,
        notification_id: DbId,
        user_id: DbId,
        action: EngagementAction,
    ) -> RecordOutcome {
        let key = EngagementKey {
            notification_id,
            user_id,
            action,
        };
        match self.ledger.upsert(key).await {
            Ok(true) => RecordOutcome::Recorded,
            Ok(false) => {
                tracing::debug!(notification_id, user_id, %action, "Engagement already recorded");
                RecordOutcome::AlreadyRecorded
            }
            Err(e) => {
                tracing::warn!(
                    notification_id,
                    user_id,
                    %action,
                    error = %e,
                    "Failed to record engagement"
                );
                RecordOutcome::Failed
            }
        }
    }

    /// Record on a spawned task; the caller does not wait.
    pub fn record_detached(
        &self,
        notification_id: DbId,
        user_id: DbId,
        action: EngagementAction,
    ) -> JoinHandle<RecordOutcome> {
        let recorder = self.clone();
        tokio::spawn(async move { recorder.record(notification_id, user_id, action).await })
    }
}
