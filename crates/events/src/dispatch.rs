//! Dispatch: resolve an audience, persist one row per recipient, relay by
//! email.
//!
//! A dispatch is all-or-nothing at the store: either every recipient gets
//! a row sharing one `dispatch_id`, or the error is returned and nothing
//! was written. The email relay runs afterwards on its own task and never
//! affects the dispatch result.

use std::sync::Arc;

use herald_core::audience::{AudienceSpec, AudienceStats, ResolvedAudience};
use herald_core::error::CoreError;
use herald_core::notification::{Notification, NotificationTemplate, Priority};
use herald_core::types::{new_dispatch_id, DispatchId};
use tokio::task::JoinHandle;

use crate::audience::{AudienceError, AudienceResolver};
use crate::delivery::email::{BatchReport, EmailChannel};
use crate::store::NotificationStore;

// ---------------------------------------------------------------------------
// DispatcherConfig
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatcherConfig {
    /// Rows at or above this priority are relayed by email.
    pub email_min_priority: Priority,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            email_min_priority: Priority::Medium,
        }
    }
}

impl DispatcherConfig {
    /// | Variable             | Default  |
    /// |----------------------|----------|
    /// | `EMAIL_MIN_PRIORITY` | `medium` |
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            email_min_priority: std::env::var("EMAIL_MIN_PRIORITY")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.email_min_priority),
        }
    }
}

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct DispatchReceipt {
    pub dispatch_id: DispatchId,
    pub notifications: Vec<Notification>,
    pub stats: AudienceStats,
    /// Present when at least one row qualified for the email relay.
    pub email: Option<JoinHandle<BatchReport>>,
}

#[derive(Debug)]
pub enum DispatchOutcome {
    /// The audience matched nobody; no rows were written.
    NoRecipients(AudienceStats),
    Dispatched(DispatchReceipt),
}

// ---------------------------------------------------------------------------
// NotificationDispatcher
// ---------------------------------------------------------------------------

pub struct NotificationDispatcher {
    resolver: AudienceResolver,
    store: Arc<dyn NotificationStore>,
    email: Option<Arc<EmailChannel>>,
    config: DispatcherConfig,
}

impl NotificationDispatcher {
    pub fn new(
        resolver: AudienceResolver,
        store: Arc<dyn NotificationStore>,
        email: Option<Arc<EmailChannel>>,
        config: DispatcherConfig,
    ) -> Self {
        Self {
            resolver,
            store,
            email,
            config,
        }
    }

    /// Resolve `spec` for a confirmation step. Pass the result to
    /// [`dispatch_resolved`](Self::dispatch_resolved) to send to exactly
    /// the previewed recipients.
    pub async fn preview(&self, spec: &AudienceSpec) -> Result<ResolvedAudience, AudienceError> {
        self.resolver.resolve(spec).await
    }

    /// Resolve and dispatch in one step.
    pub async fn dispatch(
        &self,
        spec: &AudienceSpec,
        template: &NotificationTemplate,
    ) -> Result<DispatchOutcome, CoreError> {
        template.check()?;
        match self.resolver.resolve(spec).await {
            Ok(resolved) => self.dispatch_resolved(&resolved, template).await,
            Err(AudienceError::NoRecipients { stats }) => {
                tracing::info!(
                    directory_total = stats.total,
                    "Audience matched no recipients, skipping dispatch"
                );
                Ok(DispatchOutcome::NoRecipients(stats))
            }
            Err(AudienceError::Directory(e)) => Err(e),
        }
    }

    pub async fn dispatch_resolved(
        &self,
        resolved: &ResolvedAudience,
        template: &NotificationTemplate,
    ) -> Result<DispatchOutcome, CoreError> {
        if resolved.is_empty() {
            return Ok(DispatchOutcome::NoRecipients(resolved.stats));
        }

        let dispatch_id = new_dispatch_id();
        let notifications = self
            .store
            .create_batch(dispatch_id, &resolved.recipients, template)
            .await
            .inspect_err(|e| {
                tracing::error!(%dispatch_id, recipients = resolved.len(), error = %e, "Dispatch failed");
            })?;

        tracing::info!(
            %dispatch_id,
            recipients = notifications.len(),
            kind = %template.payload.kind(),
            priority = %template.priority,
            "Notifications dispatched"
        );

        let email = self.relay(dispatch_id, &notifications);

        Ok(DispatchOutcome::Dispatched(DispatchReceipt {
            dispatch_id,
            notifications,
            stats: resolved.stats,
            email,
        }))
    }

    fn relay(
        &self,
        dispatch_id: DispatchId,
        notifications: &[Notification],
    ) -> Option<JoinHandle<BatchReport>> {
        let channel = self.email.as_ref()?;
        let batch: Vec<Notification> = notifications
            .iter()
            .filter(|n| n.priority >= self.config.email_min_priority)
            .cloned()
            .collect();
        if batch.is_empty() {
            return None;
        }

        let channel = Arc::clone(channel);
        Some(tokio::spawn(async move {
            tracing::info!(%dispatch_id, emails = batch.len(), "Relaying dispatch by email");
            channel.send_batch(&batch).await
        }))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
